// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error types

use std::fmt;

use crate::frame::FunctionCode;
use crate::slave::SlaveId;

/// A specialized [`Result`](std::result::Result) type for Modbus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// All Modbus error codes known to this library.
///
/// The first group are the error codes of the Modbus specification and the
/// only ones that may appear inside an exception frame on the wire. The
/// second group are library-internal codes that classify framing, codec and
/// transport failures; they are never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u8)]
pub enum ErrorCode {
    /// 0x01
    #[error("Illegal function")]
    IllegalFunction = 0x01,
    /// 0x02
    #[error("Illegal data address")]
    IllegalDataAddress = 0x02,
    /// 0x03
    #[error("Illegal data value")]
    IllegalDataValue = 0x03,
    /// 0x04
    #[error("Slave device failure")]
    SlaveDeviceFailure = 0x04,
    /// 0x05
    #[error("Acknowledge")]
    Acknowledge = 0x05,
    /// 0x06
    #[error("Slave device busy")]
    SlaveDeviceBusy = 0x06,
    /// 0x07
    #[error("Negative acknowledge")]
    NegativeAcknowledge = 0x07,
    /// 0x08
    #[error("Memory parity error")]
    MemoryParityError = 0x08,
    /// 0x0A
    #[error("Gateway path unavailable")]
    GatewayPathUnavailable = 0x0A,
    /// 0x0B
    #[error("Gateway target device failed to respond")]
    GatewayTargetDeviceFailedToRespond = 0x0B,

    /// The checksum of a received RTU frame does not match its payload.
    #[error("Invalid CRC")]
    InvalidCrc = 0x7E,
    /// A PDU could not be decoded: truncated buffer, unknown function code
    /// or any other malformed byte layout.
    #[error("Invalid byte order")]
    InvalidByteOrder = 0x7D,
    /// The transaction id of a TCP response does not match the request.
    #[error("Invalid message ID")]
    InvalidMessageId = 0x7C,
    /// The peer violated the transport protocol (e.g. a broken MBAP header
    /// or a failed socket operation).
    #[error("Protocol error")]
    ProtocolError = 0x7B,
    /// The connection was closed by the peer.
    #[error("Connection is closed")]
    ConnectionClosed = 0x7A,
    /// A read did not complete within the configured deadline.
    #[error("Timeout")]
    Timeout = 0x79,
    /// The number of registers cannot be serialized into a single PDU.
    #[error("Number of registers is invalid")]
    NumberOfRegistersInvalid = 0x78,
    /// The cell values do not cover the declared quantity.
    #[error("Number of values is invalid")]
    NumberOfValuesInvalid = 0x77,
    /// Encountered end of data during parsing.
    #[error("Input data length is invalid")]
    InputDataLengthInvalid = 0x76,
    /// A const cell accessor was used on the other cell variant.
    #[error("Wrong cell variant requested")]
    WrongCellVariant = 0x75,
}

impl ErrorCode {
    /// Returns the numeric value of the code.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Checks if this is a standard Modbus error code.
    ///
    /// Only standard codes are serializable onto the wire.
    #[must_use]
    pub const fn is_standard(self) -> bool {
        matches!(
            self,
            Self::IllegalFunction
                | Self::IllegalDataAddress
                | Self::IllegalDataValue
                | Self::SlaveDeviceFailure
                | Self::Acknowledge
                | Self::SlaveDeviceBusy
                | Self::NegativeAcknowledge
                | Self::MemoryParityError
                | Self::GatewayPathUnavailable
                | Self::GatewayTargetDeviceFailedToRespond
        )
    }

    /// Decodes an error code received inside an exception frame.
    ///
    /// Returns `None` for bytes that do not map to a standard code.
    #[must_use]
    pub const fn from_wire(value: u8) -> Option<Self> {
        let code = match value {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::SlaveDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::SlaveDeviceBusy,
            0x07 => Self::NegativeAcknowledge,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetDeviceFailedToRespond,
            _ => return None,
        };
        Some(code)
    }
}

/// A Modbus error: an [`ErrorCode`] plus the slave id and function code the
/// failure is attributed to, when known.
///
/// Both received exception frames and locally detected failures are reported
/// through this single type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorCode,
    slave: Option<SlaveId>,
    function: FunctionCode,
}

impl Error {
    /// Creates an error without an attributed slave or function.
    #[must_use]
    pub const fn new(kind: ErrorCode) -> Self {
        Self {
            kind,
            slave: None,
            function: FunctionCode::Undefined,
        }
    }

    /// Attributes the error to a slave device.
    #[must_use]
    pub const fn with_slave(mut self, slave: SlaveId) -> Self {
        self.slave = Some(slave);
        self
    }

    /// Attributes the error to a function code.
    #[must_use]
    pub const fn with_function(mut self, function: FunctionCode) -> Self {
        self.function = function;
        self
    }

    /// The error code.
    #[must_use]
    pub const fn kind(&self) -> ErrorCode {
        self.kind
    }

    /// The slave id the error is attributed to, if any.
    #[must_use]
    pub const fn slave(&self) -> Option<SlaveId> {
        self.slave
    }

    /// The function code the error is attributed to.
    ///
    /// [`FunctionCode::Undefined`] if unknown.
    #[must_use]
    pub const fn function(&self) -> FunctionCode {
        self.function
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Error on slave ")?;
        match self.slave {
            Some(slave) => write!(f, "{slave}")?,
            None => f.write_str("Unknown")?,
        }
        write!(f, " - {}", self.kind)?;
        if self.function != FunctionCode::Undefined {
            write!(f, " ( on function: {} )", self.function)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ErrorCode> for Error {
    fn from(kind: ErrorCode) -> Self {
        Self::new(kind)
    }
}

// Required by the `tokio_util::codec` traits. The frame codecs construct
// structured errors themselves; this conversion only classifies I/O failures
// that reach the codec seam from the outside.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::{
            BrokenPipe, ConnectionAborted, ConnectionReset, InvalidData, TimedOut, UnexpectedEof,
            WouldBlock,
        };
        let kind = match err.kind() {
            TimedOut | WouldBlock => ErrorCode::Timeout,
            UnexpectedEof | ConnectionReset | ConnectionAborted | BrokenPipe => {
                ErrorCode::ConnectionClosed
            }
            InvalidData => ErrorCode::InvalidByteOrder,
            _ => ErrorCode::ProtocolError,
        };
        Self::new(kind)
    }
}
