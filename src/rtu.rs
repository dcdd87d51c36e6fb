// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serial (RTU) transport.
//!
//! [`Connection`] speaks Modbus RTU over a serial device or any other byte
//! channel. The public surface is blocking: the connection owns a
//! current-thread runtime and every read is bounded by the configurable
//! byte-level timeout (100 ms by default).
//!
//! The device is configured through a [`SerialPortBuilder`], which carries
//! the path, a baud rate from the standard set (up to 230400), parity,
//! stop bits and data bits; it is opened in raw mode:
//!
//! ```no_run
//! use modbus_wire::rtu;
//!
//! # fn main() -> modbus_wire::Result<()> {
//! let builder = rtu::builder("/dev/ttyUSB0", 19200).parity(rtu::Parity::Even);
//! let mut conn = rtu::Connection::open(&builder)?;
//! conn.set_timeout(std::time::Duration::from_millis(200));
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Runtime;
use tokio_serial::SerialStream;
use tokio_util::codec::{Decoder, Encoder};

pub use tokio_serial::{new as builder, DataBits, Parity, SerialPortBuilder, StopBits};

use crate::{
    codec::rtu::{ClientCodec, ServerCodec},
    error::{Error, ErrorCode, Result},
    frame::{ExceptionFrame, Request, Response},
    slave::Slave,
    transport::{block_on_with_timeout, new_runtime},
};

/// The default byte-level read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

const READ_CHUNK_LEN: usize = 256;

/// A Modbus RTU connection over a byte channel.
///
/// The connection exclusively owns the underlying device handle; dropping
/// the connection closes it.
#[derive(Debug)]
pub struct Connection<T = SerialStream> {
    runtime: Runtime,
    transport: T,
    timeout: Duration,
    client_codec: ClientCodec,
    server_codec: ServerCodec,
    buf: BytesMut,
}

impl Connection<SerialStream> {
    /// Opens the serial device described by `builder` in raw mode.
    pub fn open(builder: &SerialPortBuilder) -> Result<Self> {
        let runtime = new_runtime()?;
        let transport = {
            let _guard = runtime.enter();
            SerialStream::open(builder).map_err(|err| {
                log::error!("Failed to open serial device: {err}");
                Error::new(ErrorCode::SlaveDeviceFailure)
            })?
        };
        Ok(Self::with_transport(runtime, transport))
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Attaches a connection to an already established byte channel.
    ///
    /// Besides serial devices this accommodates in-memory pipes and
    /// RTU-over-TCP streams.
    pub fn attach(transport: T) -> Result<Self> {
        let runtime = new_runtime()?;
        Ok(Self::with_transport(runtime, transport))
    }

    fn with_transport(runtime: Runtime, transport: T) -> Self {
        Self {
            runtime,
            transport,
            timeout: DEFAULT_TIMEOUT,
            client_codec: ClientCodec::default(),
            server_codec: ServerCodec::default(),
            buf: BytesMut::new(),
        }
    }

    /// The byte-level read timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Changes the byte-level read timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sends a request and returns the bytes that went onto the wire
    /// (PDU plus CRC).
    ///
    /// Any bytes still buffered from earlier exchanges are discarded so the
    /// next [`await_response`](Self::await_response) only sees frames sent
    /// after this request.
    pub fn send_request(&mut self, request: &Request) -> Result<Vec<u8>> {
        self.buf.clear();
        let mut frame = BytesMut::new();
        self.client_codec.encode(request, &mut frame)?;
        self.write_frame(&frame)?;
        Ok(frame.to_vec())
    }

    /// Sends a response and returns the bytes that went onto the wire.
    pub fn send_response(&mut self, response: &Response) -> Result<Vec<u8>> {
        let mut frame = BytesMut::new();
        self.server_codec.encode(response, &mut frame)?;
        self.write_frame(&frame)?;
        Ok(frame.to_vec())
    }

    /// Sends an exception frame and returns the bytes that went onto the
    /// wire.
    pub fn send_exception(&mut self, exception: &ExceptionFrame) -> Result<Vec<u8>> {
        let mut frame = BytesMut::new();
        self.server_codec.encode(exception, &mut frame)?;
        self.write_frame(&frame)?;
        Ok(frame.to_vec())
    }

    /// Awaits a response frame and returns it with the raw bytes it was
    /// decoded from.
    ///
    /// Incoming chunks are accumulated until they form a frame with a valid
    /// checksum; each chunk is awaited for at most the configured timeout.
    /// A received exception frame is surfaced as an [`Error`] carrying its
    /// code, slave id and function code.
    pub fn await_response(&mut self) -> Result<(Response, Vec<u8>)> {
        loop {
            if let Some((decoded, raw)) = self.client_codec.decode(&mut self.buf)? {
                log::debug!("Received response frame: {:02X?}", &raw[..]);
                return match decoded {
                    Ok(response) => Ok((response, raw.to_vec())),
                    Err(exception) => Err(exception.into()),
                };
            }
            self.read_chunk()?;
        }
    }

    /// Awaits a request frame and returns it with the raw bytes it was
    /// decoded from.
    pub fn await_request(&mut self) -> Result<(Request, Vec<u8>)> {
        loop {
            if let Some((request, raw)) = self.server_codec.decode(&mut self.buf)? {
                log::debug!("Received request frame: {:02X?}", &raw[..]);
                return Ok((request, raw.to_vec()));
            }
            self.read_chunk()?;
        }
    }

    /// Awaits the next request addressed to `slave`.
    ///
    /// RTU lines are shared; every device sees every frame. This skips
    /// well-formed requests destined for other addresses and returns the
    /// first one carrying the given address or the broadcast address.
    pub fn await_request_for(&mut self, slave: Slave) -> Result<(Request, Vec<u8>)> {
        loop {
            let (request, raw) = self.await_request()?;
            let addressed = Slave(request.slave_id());
            if addressed == slave || addressed.is_broadcast() {
                return Ok((request, raw));
            }
            log::debug!("Ignoring request addressed to slave {addressed}");
        }
    }

    /// Returns whatever arrived in one timed read, undecoded.
    ///
    /// Bytes already buffered by an earlier incomplete decode are drained
    /// first.
    pub fn await_bytes(&mut self) -> Result<Vec<u8>> {
        if self.buf.is_empty() {
            self.read_chunk()?;
        }
        Ok(self.buf.split().to_vec())
    }

    /// Discards all bytes buffered from earlier reads.
    pub fn clear_input(&mut self) {
        self.buf.clear();
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let Self {
            runtime, transport, ..
        } = self;
        runtime.block_on(async {
            transport.write_all(frame).await.map_err(write_error)?;
            transport.flush().await.map_err(write_error)
        })?;
        log::debug!("Sent frame: {frame:02X?}");
        Ok(())
    }

    fn read_chunk(&mut self) -> Result<usize> {
        let Self {
            runtime,
            transport,
            timeout,
            buf,
            ..
        } = self;
        buf.reserve(READ_CHUNK_LEN);
        let len = block_on_with_timeout(runtime, *timeout, async {
            transport.read_buf(buf).await.map_err(|err| {
                log::debug!("Serial read failed: {err}");
                Error::new(ErrorCode::SlaveDeviceFailure)
            })
        })?;
        if len == 0 {
            return Err(Error::new(ErrorCode::ConnectionClosed));
        }
        Ok(len)
    }
}

fn write_error(err: std::io::Error) -> Error {
    log::debug!("Serial write failed: {err}");
    Error::new(ErrorCode::SlaveDeviceFailure)
}
