// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP (MBAP) transport.
//!
//! [`Connection`] frames PDUs with the MBAP header and correlates responses
//! by transaction id; [`Server`] accepts connections from a listening
//! socket. Both own their OS handle exclusively and block the calling
//! thread; response waits are bounded by a configurable timeout (500 ms by
//! default), while idle waits for a request use a 60 second ceiling after
//! which the connection is considered dead.
//!
//! The client never changes the transaction id on its own; the application
//! assigns one with [`Connection::set_transaction_id`] and the next request
//! carries it. On the server side the id of each received request is
//! adopted, so the subsequent response echoes it.

use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::time::Duration;

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio_util::codec::{Decoder, Encoder};

pub use crate::frame::tcp::{TransactionId, UnitId};

use crate::{
    codec::tcp::{ClientCodec, ServerCodec, MAX_MESSAGE_LEN},
    error::{Error, ErrorCode, Result},
    frame::{ExceptionFrame, Request, Response},
    transport::{block_on_with_timeout, new_runtime},
};

/// The default deadline for awaiting a response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// A silent peer is considered gone after this long.
const ALIVE_TIMEOUT: Duration = Duration::from_secs(60);

const LISTEN_BACKLOG: i32 = 255;

/// A Modbus/TCP connection.
///
/// Obtained either from [`connect`](Self::connect) (client side) or from
/// [`Server::accept`] (server side). The connection exclusively owns the
/// socket; dropping the connection closes it.
#[derive(Debug)]
pub struct Connection {
    runtime: Runtime,
    stream: TcpStream,
    transaction_id: TransactionId,
    response_timeout: Duration,
    client_codec: ClientCodec,
    server_codec: ServerCodec,
    buf: BytesMut,
}

impl Connection {
    /// Connects to a Modbus/TCP endpoint.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let runtime = new_runtime()?;
        let stream = runtime.block_on(TcpStream::connect(addr)).map_err(|err| {
            log::error!("Failed to connect to {addr}: {err}");
            Error::new(ErrorCode::ConnectionClosed)
        })?;
        Ok(Self::with_stream(runtime, stream))
    }

    pub(crate) fn attach_std(stream: StdTcpStream) -> Result<Self> {
        stream.set_nonblocking(true).map_err(socket_error)?;
        let runtime = new_runtime()?;
        let stream = runtime
            .block_on(async { TcpStream::from_std(stream) })
            .map_err(socket_error)?;
        Ok(Self::with_stream(runtime, stream))
    }

    fn with_stream(runtime: Runtime, stream: TcpStream) -> Self {
        Self {
            runtime,
            stream,
            transaction_id: 0,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            client_codec: ClientCodec::default(),
            server_codec: ServerCodec::default(),
            buf: BytesMut::new(),
        }
    }

    /// The transaction id used by the next outgoing frame.
    #[must_use]
    pub const fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Assigns the transaction id for subsequent outgoing frames.
    pub fn set_transaction_id(&mut self, transaction_id: TransactionId) {
        self.transaction_id = transaction_id;
    }

    /// The deadline for awaiting a response.
    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Changes the deadline for awaiting a response.
    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    /// Sends a request under the current transaction id and returns the
    /// framed bytes that went onto the wire.
    pub fn send_request(&mut self, request: &Request) -> Result<Vec<u8>> {
        let mut frame = BytesMut::new();
        self.client_codec
            .encode((self.transaction_id, request), &mut frame)?;
        self.write_frame(&frame)?;
        Ok(frame.to_vec())
    }

    /// Sends a response echoing the transaction id of the last received
    /// request and returns the framed bytes.
    pub fn send_response(&mut self, response: &Response) -> Result<Vec<u8>> {
        let mut frame = BytesMut::new();
        self.server_codec
            .encode((self.transaction_id, response), &mut frame)?;
        self.write_frame(&frame)?;
        Ok(frame.to_vec())
    }

    /// Sends an exception frame and returns the framed bytes.
    pub fn send_exception(&mut self, exception: &ExceptionFrame) -> Result<Vec<u8>> {
        let mut frame = BytesMut::new();
        self.server_codec
            .encode((self.transaction_id, exception), &mut frame)?;
        self.write_frame(&frame)?;
        Ok(frame.to_vec())
    }

    /// Awaits the response to the last sent request.
    ///
    /// Fails with [`ErrorCode::InvalidMessageId`] when the received
    /// transaction id differs from the stored one. A received exception
    /// frame is surfaced as an [`Error`] carrying its code, slave id and
    /// function code.
    pub fn await_response(&mut self) -> Result<Response> {
        loop {
            if let Some((header, decoded)) = self.client_codec.decode(&mut self.buf)? {
                if header.transaction_id != self.transaction_id {
                    log::warn!(
                        "Transaction id mismatch: expected = {}, actual = {}",
                        self.transaction_id,
                        header.transaction_id
                    );
                    return Err(
                        Error::new(ErrorCode::InvalidMessageId).with_slave(header.unit_id)
                    );
                }
                return match decoded {
                    Ok(response) => Ok(response),
                    Err(exception) => Err(exception.into()),
                };
            }
            self.read_chunk(self.response_timeout)?;
        }
    }

    /// Awaits the next request and adopts its transaction id, so the
    /// subsequent response echoes it.
    pub fn await_request(&mut self) -> Result<Request> {
        loop {
            if let Some((header, request)) = self.server_codec.decode(&mut self.buf)? {
                self.transaction_id = header.transaction_id;
                return Ok(request);
            }
            self.read_chunk(ALIVE_TIMEOUT)?;
        }
    }

    /// Returns whatever arrived in one read, undecoded.
    ///
    /// Bytes already buffered by an earlier incomplete decode are drained
    /// first.
    pub fn await_bytes(&mut self) -> Result<Vec<u8>> {
        if self.buf.is_empty() {
            self.read_chunk(ALIVE_TIMEOUT)?;
        }
        Ok(self.buf.split().to_vec())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let Self {
            runtime, stream, ..
        } = self;
        runtime.block_on(async {
            stream.write_all(frame).await.map_err(socket_error)?;
            stream.flush().await.map_err(socket_error)
        })?;
        log::debug!("Sent frame: {frame:02X?}");
        Ok(())
    }

    fn read_chunk(&mut self, timeout: Duration) -> Result<usize> {
        let Self {
            runtime,
            stream,
            buf,
            ..
        } = self;
        buf.reserve(MAX_MESSAGE_LEN);
        let len = block_on_with_timeout(runtime, timeout, async {
            stream.read_buf(buf).await.map_err(socket_error)
        })?;
        if len == 0 {
            return Err(Error::new(ErrorCode::ConnectionClosed));
        }
        Ok(len)
    }
}

/// A Modbus/TCP server socket.
///
/// Owns the listening socket exclusively; dropping the server closes it.
#[derive(Debug)]
pub struct Server {
    runtime: Runtime,
    listener: TcpListener,
}

impl Server {
    /// Binds a listening socket to the requested port on all interfaces,
    /// with `SO_REUSEADDR` set.
    pub fn bind(port: u16) -> Result<Self> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    /// Binds a listening socket to `addr`, with `SO_REUSEADDR` set.
    pub fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(socket_error)?;
        socket.set_reuse_address(true).map_err(socket_error)?;
        socket.bind(&addr.into()).map_err(socket_error)?;
        socket.listen(LISTEN_BACKLOG).map_err(socket_error)?;
        let listener: StdTcpListener = socket.into();
        listener.set_nonblocking(true).map_err(socket_error)?;

        let runtime = new_runtime()?;
        let listener = runtime
            .block_on(async { TcpListener::from_std(listener) })
            .map_err(socket_error)?;
        Ok(Self { runtime, listener })
    }

    /// The local address of the listening socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(socket_error)
    }

    /// Blocks until a client connects and returns the accepted connection.
    pub fn accept(&self) -> Result<Connection> {
        let (stream, peer) = self
            .runtime
            .block_on(self.listener.accept())
            .map_err(socket_error)?;
        log::debug!("Accepted connection from {peer}");
        let stream = stream.into_std().map_err(socket_error)?;
        Connection::attach_std(stream)
    }
}

fn socket_error(err: std::io::Error) -> Error {
    log::debug!("Socket operation failed: {err}");
    Error::new(ErrorCode::ProtocolError)
}
