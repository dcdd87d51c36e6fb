// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP header values.

/// The client-chosen correlator carried in the MBAP header; responses must
/// echo it.
pub type TransactionId = u16;

/// The unit identifier addressing a device behind a Modbus/TCP endpoint.
///
/// Identical to the slave id of the embedded PDU.
pub type UnitId = u8;

/// The decoded MBAP envelope of a received frame.
///
/// The protocol id is validated during decoding and the length field is
/// consumed by the framer, so neither is carried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) transaction_id: TransactionId,
    pub(crate) unit_id: UnitId,
}
