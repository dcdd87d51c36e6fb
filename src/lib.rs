// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![cfg_attr(not(test), warn(unsafe_code))]
#![warn(clippy::all)]
#![warn(clippy::cast_lossless)]
#![warn(clippy::explicit_deref_methods)]
#![warn(clippy::explicit_into_iter_loop)]
#![warn(clippy::explicit_iter_loop)]
#![cfg_attr(not(test), warn(clippy::panic_in_result_fn))]
#![warn(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

pub mod prelude;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

pub mod codec;

mod error;
mod frame;
mod slave;
#[cfg(any(feature = "rtu", feature = "tcp"))]
mod transport;

pub use crate::{
    error::{Error, ErrorCode, Result},
    frame::{
        Address, Cell, Coil, ExceptionFrame, FunctionCode, FunctionKind, Quantity, RegisterClass,
        Request, Response, Word,
    },
    slave::{Slave, SlaveId},
};
