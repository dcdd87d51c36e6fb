// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types

pub use crate::{
    Cell, Error, ErrorCode, ExceptionFrame, FunctionCode, FunctionKind, RegisterClass, Request,
    Response, Result, Slave, SlaveId,
};

#[cfg(feature = "rtu")]
pub use crate::rtu;

#[cfg(feature = "tcp")]
pub use crate::tcp;
