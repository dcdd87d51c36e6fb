// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PDU codec.
//!
//! Serialization of [`Request`], [`Response`] and [`ExceptionFrame`] values
//! to and from the Modbus PDU byte layout. All multi-byte integers are
//! big-endian; the trailing CRC-16 of RTU frames is little-endian and
//! handled by [`rtu`].
//!
//! Encoding validates the protocol ceilings (quantity ranges, payload
//! sizes). Decoding is deliberately permissive for interoperability and
//! reports any malformed layout as [`ErrorCode::InvalidByteOrder`].

pub mod rtu;
pub mod tcp;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::{Error, ErrorCode, Result},
    frame::{Cell, ExceptionFrame, FunctionCode, FunctionKind, Quantity, RegisterClass, Request, Response},
    slave::SlaveId,
};

/// The smallest decodable PDU: slave id, function code and one payload byte.
const MIN_PDU_LEN: usize = 3;

/// An exception PDU is exactly three bytes.
pub(crate) const EXCEPTION_PDU_LEN: usize = 3;

/// An exception PDU plus its RTU checksum.
pub(crate) const EXCEPTION_FRAME_LEN: usize = EXCEPTION_PDU_LEN + 2;

/// Quantity ceiling for coil and discrete input operations.
const MAX_BIT_QUANTITY: Quantity = 2000;

/// Quantity ceiling for register reads.
const MAX_READ_WORD_QUANTITY: Quantity = 125;

/// Quantity ceiling for register writes.
const MAX_WRITE_WORD_QUANTITY: Quantity = 123;

/// Payload byte ceiling of a single response PDU.
const MAX_RESPONSE_DATA_LEN: usize = 253;

impl Request {
    /// Serializes the request into its PDU byte layout (without CRC).
    ///
    /// Fails with the matching `NumberOf…Invalid` code when the quantity
    /// exceeds the protocol ceilings or the values do not cover it, and
    /// with [`ErrorCode::InvalidByteOrder`] for an undefined function code.
    pub fn to_bytes(&self) -> Result<Bytes> {
        encode_request(self)
    }

    /// Deserializes a request PDU, ignoring any trailing bytes.
    pub fn from_bytes(data: impl AsRef<[u8]>) -> Result<Self> {
        Self::decode(data.as_ref(), false).map(|(request, _)| request)
    }

    /// Deserializes a request PDU and validates the trailing CRC-16.
    pub fn from_bytes_checked(data: impl AsRef<[u8]>) -> Result<Self> {
        Self::decode(data.as_ref(), true).map(|(request, _)| request)
    }

    /// Decodes a request and returns it together with the byte index where
    /// the CRC would begin.
    pub(crate) fn decode(data: &[u8], check_crc: bool) -> Result<(Self, usize)> {
        let (slave_id, function) = decode_header(data)?;
        let err = || malformed(slave_id, function);
        let kind = function.kind().ok_or_else(err)?;
        let class = function.register_class().ok_or_else(err)?;
        let address = be_word(data, 2).ok_or_else(err)?;
        let (quantity, values, crc_index) = match kind {
            FunctionKind::Read => (be_word(data, 4).ok_or_else(err)?, Vec::new(), 6),
            FunctionKind::WriteSingle => {
                let value = if class.is_bit() {
                    Cell::coil(*data.get(4).ok_or_else(err)? == 0xFF)
                } else {
                    Cell::register(be_word(data, 4).ok_or_else(err)?)
                };
                (1, vec![value], 6)
            }
            FunctionKind::WriteMultiple => {
                let quantity = be_word(data, 4).ok_or_else(err)?;
                let follow = usize::from(*data.get(6).ok_or_else(err)?);
                let values = if class.is_bit() {
                    unpack_bit_cells(data, 7, quantity).ok_or_else(err)?
                } else {
                    unpack_word_cells(data, 7, quantity).ok_or_else(err)?
                };
                (quantity, values, 7 + follow)
            }
        };
        if check_crc {
            check_frame_crc(data, crc_index, slave_id)?;
        }
        Ok((
            Self::new(slave_id, function, address, quantity, values),
            crc_index,
        ))
    }
}

impl Response {
    /// Serializes the response into its PDU byte layout (without CRC).
    ///
    /// Fails with [`ErrorCode::NumberOfRegistersInvalid`] when the register
    /// payload would not fit a single PDU and with
    /// [`ErrorCode::NumberOfValuesInvalid`] when the value container does
    /// not cover the quantity.
    pub fn to_bytes(&self) -> Result<Bytes> {
        encode_response(self)
    }

    /// Deserializes a response PDU, ignoring any trailing bytes.
    ///
    /// Bit-read responses decode whole payload bytes, so the resulting
    /// quantity is the byte count times eight;
    /// [`apply_request`](Self::apply_request) truncates it back.
    pub fn from_bytes(data: impl AsRef<[u8]>) -> Result<Self> {
        Self::decode(data.as_ref(), false).map(|(response, _)| response)
    }

    /// Deserializes a response PDU and validates the trailing CRC-16.
    pub fn from_bytes_checked(data: impl AsRef<[u8]>) -> Result<Self> {
        Self::decode(data.as_ref(), true).map(|(response, _)| response)
    }

    /// Decodes a response and returns it together with the byte index where
    /// the CRC would begin.
    pub(crate) fn decode(data: &[u8], check_crc: bool) -> Result<(Self, usize)> {
        let (slave_id, function) = decode_header(data)?;
        let err = || malformed(slave_id, function);
        let kind = function.kind().ok_or_else(err)?;
        let class = function.register_class().ok_or_else(err)?;
        let (address, quantity, values, crc_index) = match kind {
            FunctionKind::Read => {
                let byte_count = usize::from(*data.get(2).ok_or_else(err)?);
                let (quantity, values) = if class.is_bit() {
                    let quantity = (byte_count * 8) as Quantity;
                    (quantity, unpack_bit_cells(data, 3, quantity).ok_or_else(err)?)
                } else {
                    let quantity = (byte_count / 2) as Quantity;
                    (quantity, unpack_word_cells(data, 3, quantity).ok_or_else(err)?)
                };
                (0, quantity, values, 3 + byte_count)
            }
            FunctionKind::WriteSingle => {
                let address = be_word(data, 2).ok_or_else(err)?;
                let value = if class.is_bit() {
                    Cell::coil(*data.get(4).ok_or_else(err)? == 0xFF)
                } else {
                    Cell::register(be_word(data, 4).ok_or_else(err)?)
                };
                (address, 1, vec![value], 6)
            }
            FunctionKind::WriteMultiple => {
                let address = be_word(data, 2).ok_or_else(err)?;
                let quantity = be_word(data, 4).ok_or_else(err)?;
                (address, quantity, Vec::new(), 6)
            }
        };
        if check_crc {
            check_frame_crc(data, crc_index, slave_id)?;
        }
        Ok((
            Self::new(slave_id, function, address, quantity, values),
            crc_index,
        ))
    }
}

impl ExceptionFrame {
    /// Serializes the exception into its three-byte PDU layout
    /// `[slave_id, function | 0x80, error_code]`.
    ///
    /// Only standard Modbus error codes are serializable; a library-internal
    /// code fails with [`ErrorCode::ProtocolError`].
    pub fn to_bytes(&self) -> Result<Bytes> {
        if !self.error().is_standard() {
            return Err(Error::new(ErrorCode::ProtocolError).with_function(self.function()));
        }
        let mut data = BytesMut::with_capacity(EXCEPTION_PDU_LEN);
        data.put_u8(self.slave_id());
        data.put_u8(self.function().value() | 0x80);
        data.put_u8(self.error().value());
        Ok(data.freeze())
    }

    /// Deserializes an exception PDU, ignoring any trailing bytes.
    pub fn from_bytes(data: impl AsRef<[u8]>) -> Result<Self> {
        Self::decode(data.as_ref(), false)
    }

    /// Deserializes an exception PDU and validates the trailing CRC-16.
    pub fn from_bytes_checked(data: impl AsRef<[u8]>) -> Result<Self> {
        Self::decode(data.as_ref(), true)
    }

    pub(crate) fn decode(data: &[u8], check_crc: bool) -> Result<Self> {
        let min_len = if check_crc {
            EXCEPTION_FRAME_LEN
        } else {
            EXCEPTION_PDU_LEN
        };
        if data.len() < min_len {
            return Err(Error::new(ErrorCode::InvalidByteOrder));
        }
        let slave_id = data[0];
        if data[1] & 0x80 == 0 {
            return Err(Error::new(ErrorCode::InvalidByteOrder).with_slave(slave_id));
        }
        let function = FunctionCode::new(data[1] & 0x7F);
        let error = ErrorCode::from_wire(data[2]).ok_or_else(|| malformed(slave_id, function))?;
        if check_crc {
            check_frame_crc(data, EXCEPTION_PDU_LEN, slave_id)?;
        }
        Ok(Self::new(error, slave_id, function))
    }
}

fn encode_request(request: &Request) -> Result<Bytes> {
    let slave_id = request.slave_id();
    let function = request.function();
    let quantity = request.quantity();
    let values = request.values();
    let err = || malformed(slave_id, function);
    let kind = function.kind().ok_or_else(err)?;
    let class = function.register_class().ok_or_else(err)?;

    match kind {
        FunctionKind::Read => check_read_quantity(class, quantity, slave_id, function)?,
        FunctionKind::WriteSingle => {
            if values.is_empty() {
                return Err(values_invalid(slave_id, function));
            }
        }
        FunctionKind::WriteMultiple => {
            check_write_quantity(class, quantity, values.len(), slave_id, function)?;
        }
    }

    let mut data = BytesMut::with_capacity(request_byte_count(class, kind, quantity));
    data.put_u8(slave_id);
    data.put_u8(function.value());
    data.put_u16(request.address());
    match kind {
        FunctionKind::Read => data.put_u16(quantity),
        FunctionKind::WriteSingle => {
            if class.is_bit() {
                data.put_u16(if values[0].to_coil() { 0xFF00 } else { 0x0000 });
            } else {
                data.put_u16(values[0].to_register());
            }
        }
        FunctionKind::WriteMultiple => {
            data.put_u16(quantity);
            let values = &values[..usize::from(quantity)];
            if class.is_bit() {
                let packed = pack_cells(values);
                data.put_u8(packed.len() as u8);
                data.put_slice(&packed);
            } else {
                data.put_u8((quantity * 2) as u8);
                for value in values {
                    data.put_u16(value.to_register());
                }
            }
        }
    }
    Ok(data.freeze())
}

fn encode_response(response: &Response) -> Result<Bytes> {
    let slave_id = response.slave_id();
    let function = response.function();
    let quantity = response.quantity();
    let values = response.values();
    let err = || malformed(slave_id, function);
    let kind = function.kind().ok_or_else(err)?;
    let class = function.register_class().ok_or_else(err)?;

    let mut data = BytesMut::with_capacity(response_byte_count(class, kind, quantity));
    data.put_u8(slave_id);
    data.put_u8(function.value());
    match kind {
        FunctionKind::Read => {
            if values.is_empty() || values.len() < usize::from(quantity) {
                return Err(values_invalid(slave_id, function));
            }
            if class.is_bit() {
                if quantity == 0 || quantity > MAX_BIT_QUANTITY {
                    return Err(values_invalid(slave_id, function));
                }
                let packed = pack_cells(&values[..usize::from(quantity)]);
                data.put_u8(packed.len() as u8);
                data.put_slice(&packed);
            } else {
                if usize::from(quantity) * 2 > MAX_RESPONSE_DATA_LEN {
                    return Err(Error::new(ErrorCode::NumberOfRegistersInvalid)
                        .with_slave(slave_id)
                        .with_function(function));
                }
                data.put_u8((quantity * 2) as u8);
                for value in &values[..usize::from(quantity)] {
                    data.put_u16(value.to_register());
                }
            }
        }
        FunctionKind::WriteSingle => {
            data.put_u16(response.address());
            let value = values.first().ok_or_else(|| values_invalid(slave_id, function))?;
            if class.is_bit() {
                data.put_u16(if value.to_coil() { 0xFF00 } else { 0x0000 });
            } else {
                data.put_u16(value.to_register());
            }
        }
        FunctionKind::WriteMultiple => {
            data.put_u16(response.address());
            data.put_u16(quantity);
        }
    }
    Ok(data.freeze())
}

fn decode_header(data: &[u8]) -> Result<(SlaveId, FunctionCode)> {
    if data.len() < MIN_PDU_LEN {
        return Err(Error::new(ErrorCode::InvalidByteOrder));
    }
    Ok((data[0], FunctionCode::new(data[1])))
}

const fn malformed(slave_id: SlaveId, function: FunctionCode) -> Error {
    Error::new(ErrorCode::InvalidByteOrder)
        .with_slave(slave_id)
        .with_function(function)
}

const fn values_invalid(slave_id: SlaveId, function: FunctionCode) -> Error {
    Error::new(ErrorCode::NumberOfValuesInvalid)
        .with_slave(slave_id)
        .with_function(function)
}

fn check_read_quantity(
    class: RegisterClass,
    quantity: Quantity,
    slave_id: SlaveId,
    function: FunctionCode,
) -> Result<()> {
    let max = if class.is_bit() {
        MAX_BIT_QUANTITY
    } else {
        MAX_READ_WORD_QUANTITY
    };
    if quantity == 0 || quantity > max {
        if class.is_bit() {
            return Err(values_invalid(slave_id, function));
        }
        return Err(Error::new(ErrorCode::NumberOfRegistersInvalid)
            .with_slave(slave_id)
            .with_function(function));
    }
    Ok(())
}

fn check_write_quantity(
    class: RegisterClass,
    quantity: Quantity,
    available: usize,
    slave_id: SlaveId,
    function: FunctionCode,
) -> Result<()> {
    let max = if class.is_bit() {
        MAX_BIT_QUANTITY
    } else {
        MAX_WRITE_WORD_QUANTITY
    };
    if quantity == 0 || quantity > max {
        if class.is_bit() {
            return Err(values_invalid(slave_id, function));
        }
        return Err(Error::new(ErrorCode::NumberOfRegistersInvalid)
            .with_slave(slave_id)
            .with_function(function));
    }
    if available < usize::from(quantity) {
        return Err(values_invalid(slave_id, function));
    }
    Ok(())
}

fn request_byte_count(class: RegisterClass, kind: FunctionKind, quantity: Quantity) -> usize {
    match kind {
        FunctionKind::Read | FunctionKind::WriteSingle => 6,
        FunctionKind::WriteMultiple => {
            if class.is_bit() {
                7 + packed_len(usize::from(quantity))
            } else {
                7 + usize::from(quantity) * 2
            }
        }
    }
}

fn response_byte_count(class: RegisterClass, kind: FunctionKind, quantity: Quantity) -> usize {
    match kind {
        FunctionKind::Read => {
            if class.is_bit() {
                3 + packed_len(usize::from(quantity))
            } else {
                3 + usize::from(quantity) * 2
            }
        }
        FunctionKind::WriteSingle | FunctionKind::WriteMultiple => 6,
    }
}

fn be_word(data: &[u8], idx: usize) -> Option<u16> {
    data.get(idx..idx + 2).map(BigEndian::read_u16)
}

pub(crate) const fn packed_len(bit_count: usize) -> usize {
    (bit_count + 7) / 8
}

/// Packs cells into coil payload bytes: bit `i % 8` of byte `i / 8` is cell
/// `i`, unused high bits of the last byte are zero.
fn pack_cells(cells: &[Cell]) -> Vec<u8> {
    let mut packed = vec![0; packed_len(cells.len())];
    for (idx, cell) in cells.iter().enumerate() {
        if cell.to_coil() {
            packed[idx / 8] |= 1 << (idx % 8);
        }
    }
    packed
}

fn unpack_bit_cells(data: &[u8], start: usize, quantity: Quantity) -> Option<Vec<Cell>> {
    let mut values = Vec::with_capacity(usize::from(quantity));
    for idx in 0..usize::from(quantity) {
        let byte = data.get(start + idx / 8)?;
        values.push(Cell::coil(byte & (1 << (idx % 8)) != 0));
    }
    Some(values)
}

fn unpack_word_cells(data: &[u8], start: usize, quantity: Quantity) -> Option<Vec<Cell>> {
    (0..usize::from(quantity))
        .map(|idx| be_word(data, start + idx * 2).map(Cell::register))
        .collect()
}

fn check_frame_crc(data: &[u8], crc_index: usize, slave_id: SlaveId) -> Result<()> {
    let expected = data
        .get(crc_index..crc_index + 2)
        .map(LittleEndian::read_u16)
        .ok_or_else(|| Error::new(ErrorCode::InvalidByteOrder).with_slave(slave_id))?;
    let actual = rtu::crc16(&data[..crc_index]);
    if expected != actual {
        return Err(Error::new(ErrorCode::InvalidCrc).with_slave(slave_id));
    }
    Ok(())
}
