// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing.
//!
//! An RTU frame is the PDU followed by its CRC-16, transmitted low byte
//! first. The decoders reassemble frames from arbitrarily fragmented input:
//! a buffer that does not yet hold a decodable frame yields `None` so the
//! caller can read more bytes. A frame with a bad checksum is *not*
//! consumed either; the line may still be delivering it. The transport's
//! read deadline bounds how long that can go on.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, ErrorCode, Result},
    frame::{ExceptionFrame, Request, Response},
};

use super::{EXCEPTION_FRAME_LEN, EXCEPTION_PDU_LEN};

/// Precomputed remainders for the Modbus CRC-16 polynomial (0xA001,
/// reflected).
const CRC_TABLE: [u16; 256] = build_crc_table();

const fn build_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut idx = 0;
    while idx < 256 {
        let mut crc = idx as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[idx] = crc;
        idx += 1;
    }
    table
}

/// Calculates the Modbus CRC-16 of `data`.
///
/// Table-driven, initial value 0xFFFF, no final XOR. The result is written
/// to the wire low byte first.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0xFFFFu16;
    for byte in data {
        let idx = usize::from((crc ^ u16::from(*byte)) & 0xFF);
        crc = (crc >> 8) ^ CRC_TABLE[idx];
    }
    crc
}

/// Appends the PDU's CRC-16 to `buf`, low byte first.
fn put_crc(pdu: &[u8], buf: &mut BytesMut) {
    buf.put_u16_le(crc16(pdu));
}

const fn is_retryable(err: &Error) -> bool {
    matches!(
        err.kind(),
        ErrorCode::InvalidCrc | ErrorCode::InvalidByteOrder
    )
}

fn reject(frame_type: &str, err: &Error) {
    if err.kind() == ErrorCode::InvalidCrc {
        log::warn!("Rejected {frame_type} frame, keeping the buffer: {err}");
    } else {
        log::debug!("Incomplete {frame_type} frame, awaiting more data: {err}");
    }
}

/// The RTU codec of the requesting side: encodes requests, decodes
/// responses and exception frames.
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec;

/// The RTU codec of the responding side: encodes responses and exception
/// frames, decodes requests.
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec;

impl<'a> Encoder<&'a Request> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, request: &'a Request, buf: &mut BytesMut) -> Result<()> {
        let pdu = request.to_bytes()?;
        buf.reserve(pdu.len() + 2);
        buf.put_slice(&pdu);
        put_crc(&pdu, buf);
        Ok(())
    }
}

impl<'a> Encoder<&'a Response> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, response: &'a Response, buf: &mut BytesMut) -> Result<()> {
        let pdu = response.to_bytes()?;
        buf.reserve(pdu.len() + 2);
        buf.put_slice(&pdu);
        put_crc(&pdu, buf);
        Ok(())
    }
}

impl<'a> Encoder<&'a ExceptionFrame> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, exception: &'a ExceptionFrame, buf: &mut BytesMut) -> Result<()> {
        let pdu = exception.to_bytes()?;
        buf.reserve(pdu.len() + 2);
        buf.put_slice(&pdu);
        put_crc(&pdu, buf);
        Ok(())
    }
}

impl Decoder for ClientCodec {
    type Item = (std::result::Result<Response, ExceptionFrame>, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if ExceptionFrame::exist(buf) {
            if buf.len() < EXCEPTION_FRAME_LEN {
                return Ok(None);
            }
            return match ExceptionFrame::decode(buf, true) {
                Ok(frame) => {
                    let raw = buf.split_to(EXCEPTION_PDU_LEN + 2).freeze();
                    Ok(Some((Err(frame), raw)))
                }
                Err(err) if is_retryable(&err) => {
                    reject("exception", &err);
                    Ok(None)
                }
                Err(err) => Err(err),
            };
        }
        match Response::decode(buf, true) {
            Ok((response, crc_index)) => {
                let raw = buf.split_to(crc_index + 2).freeze();
                Ok(Some((Ok(response), raw)))
            }
            Err(err) if is_retryable(&err) => {
                reject("response", &err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl Decoder for ServerCodec {
    type Item = (Request, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match Request::decode(buf, true) {
            Ok((request, crc_index)) => {
                let raw = buf.split_to(crc_index + 2).freeze();
                Ok(Some((request, raw)))
            }
            Err(err) if is_retryable(&err) => {
                reject("request", &err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
