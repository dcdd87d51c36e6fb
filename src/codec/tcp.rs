// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing.
//!
//! A Modbus/TCP frame is a six-byte prefix (transaction id, protocol id,
//! length) followed by the PDU, whose leading slave id byte doubles as the
//! MBAP unit id. The length field counts the PDU bytes including that unit
//! id byte.
//!
//! Framing errors are surfaced immediately; only a short buffer yields
//! `None` so the transport can gather the rest of the message.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, ErrorCode, Result},
    frame::{
        tcp::{Header, TransactionId},
        ExceptionFrame, Request, Response,
    },
};

/// Transaction id, protocol id and length field.
const PREFIX_LEN: usize = 6;

const PROTOCOL_ID: u16 = 0x0000;

/// Upper bound on a single message, matching the 1024-byte receive buffer
/// of the transports. Far above any legal Modbus frame.
pub(crate) const MAX_MESSAGE_LEN: usize = 1024;

/// The MBAP codec of the requesting side.
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec;

/// The MBAP codec of the responding side.
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec;

fn encode_frame(transaction_id: TransactionId, pdu: &[u8], buf: &mut BytesMut) {
    buf.reserve(PREFIX_LEN + pdu.len());
    buf.put_u16(transaction_id);
    buf.put_u16(PROTOCOL_ID);
    buf.put_u16(pdu.len() as u16);
    buf.put_slice(pdu);
}

fn decode_frame(buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }
    let transaction_id = BigEndian::read_u16(&buf[0..2]);
    let protocol_id = BigEndian::read_u16(&buf[2..4]);
    if protocol_id != PROTOCOL_ID {
        log::error!("Invalid protocol identifier: {protocol_id}");
        return Err(Error::new(ErrorCode::ProtocolError));
    }
    let len = usize::from(BigEndian::read_u16(&buf[4..6]));
    if len == 0 {
        return Err(Error::new(ErrorCode::ProtocolError));
    }
    if PREFIX_LEN + len > MAX_MESSAGE_LEN {
        return Err(Error::new(ErrorCode::InputDataLengthInvalid));
    }
    if buf.len() < PREFIX_LEN + len {
        // Short read, the body is still in flight.
        return Ok(None);
    }
    let frame = buf.split_to(PREFIX_LEN + len);
    let pdu = Bytes::copy_from_slice(&frame[PREFIX_LEN..]);
    let header = Header {
        transaction_id,
        unit_id: pdu[0],
    };
    Ok(Some((header, pdu)))
}

impl<'a> Encoder<(TransactionId, &'a Request)> for ClientCodec {
    type Error = Error;

    fn encode(
        &mut self,
        (transaction_id, request): (TransactionId, &'a Request),
        buf: &mut BytesMut,
    ) -> Result<()> {
        let pdu = request.to_bytes()?;
        encode_frame(transaction_id, &pdu, buf);
        Ok(())
    }
}

impl<'a> Encoder<(TransactionId, &'a Response)> for ServerCodec {
    type Error = Error;

    fn encode(
        &mut self,
        (transaction_id, response): (TransactionId, &'a Response),
        buf: &mut BytesMut,
    ) -> Result<()> {
        let pdu = response.to_bytes()?;
        encode_frame(transaction_id, &pdu, buf);
        Ok(())
    }
}

impl<'a> Encoder<(TransactionId, &'a ExceptionFrame)> for ServerCodec {
    type Error = Error;

    fn encode(
        &mut self,
        (transaction_id, exception): (TransactionId, &'a ExceptionFrame),
        buf: &mut BytesMut,
    ) -> Result<()> {
        let pdu = exception.to_bytes()?;
        encode_frame(transaction_id, &pdu, buf);
        Ok(())
    }
}

impl Decoder for ClientCodec {
    type Item = (Header, std::result::Result<Response, ExceptionFrame>);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some((header, pdu)) = decode_frame(buf)? else {
            return Ok(None);
        };
        let decoded = if ExceptionFrame::exist(&pdu) {
            Err(ExceptionFrame::from_bytes(&pdu)?)
        } else {
            Ok(Response::from_bytes(&pdu)?)
        };
        Ok(Some((header, decoded)))
    }
}

impl Decoder for ServerCodec {
    type Item = (Header, Request);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some((header, pdu)) = decode_frame(buf)? else {
            return Ok(None);
        };
        let request = Request::from_bytes(&pdu)?;
        Ok(Some((header, request)))
    }
}
