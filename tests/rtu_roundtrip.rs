// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end RTU exchanges over an in-memory byte channel.

#![cfg(feature = "rtu")]

use std::{thread, time::Duration};

use modbus_wire::{
    rtu, Cell, ErrorCode, ExceptionFrame, FunctionCode, Request, Response, Slave,
};
use tokio::io::AsyncWriteExt;

#[test]
fn request_response_exchange() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (master, slave) = tokio::io::duplex(256);
    let mut client = rtu::Connection::attach(master).unwrap();
    let mut server = rtu::Connection::attach(slave).unwrap();
    client.set_timeout(Duration::from_secs(2));
    server.set_timeout(Duration::from_secs(2));

    let server_handle = thread::spawn(move || {
        let (request, raw) = server.await_request().unwrap();
        assert_eq!(request.function(), FunctionCode::ReadHoldingRegisters);
        assert_eq!(raw.len(), 8);

        let mut response = Response::from(&request);
        response.set_values(vec![
            Cell::register(0xAE41),
            Cell::register(0x5652),
            Cell::register(0x4340),
        ]);
        server.send_response(&response).unwrap();
    });

    let slave_id = Slave::MIN_DEVICE.into();
    let request = Request::new(slave_id, FunctionCode::ReadHoldingRegisters, 0x6B, 3, vec![]);
    let sent = client.send_request(&request).unwrap();
    // PDU plus two CRC bytes.
    assert_eq!(sent.len(), 8);

    let (mut response, raw) = client.await_response().unwrap();
    assert_eq!(raw.len(), 11);
    response.apply_request(&request);
    assert_eq!(response.address(), 0x6B);
    assert_eq!(
        response.values(),
        &[
            Cell::register(0xAE41),
            Cell::register(0x5652),
            Cell::register(0x4340)
        ]
    );

    server_handle.join().unwrap();
}

#[test]
fn write_request_is_echoed() {
    let (master, slave) = tokio::io::duplex(256);
    let mut client = rtu::Connection::attach(master).unwrap();
    let mut server = rtu::Connection::attach(slave).unwrap();
    client.set_timeout(Duration::from_secs(2));
    server.set_timeout(Duration::from_secs(2));

    let server_handle = thread::spawn(move || {
        let (request, _) = server.await_request().unwrap();
        assert_eq!(request.values(), &[Cell::coil(true)]);
        server.send_response(&Response::from(&request)).unwrap();
    });

    let request = Request::new(
        0x11,
        FunctionCode::WriteSingleCoil,
        0xAC,
        1,
        vec![Cell::coil(true)],
    );
    client.send_request(&request).unwrap();
    let (response, _) = client.await_response().unwrap();
    assert_eq!(response.address(), 0xAC);
    assert_eq!(response.values(), &[Cell::coil(true)]);

    server_handle.join().unwrap();
}

#[test]
fn fragmented_response_is_reassembled() {
    let (master, mut wire) = tokio::io::duplex(256);
    let mut client = rtu::Connection::attach(master).unwrap();
    client.set_timeout(Duration::from_secs(2));

    let frame = [0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD];
    let writer = thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            wire.write_all(&frame[..4]).await.unwrap();
            wire.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            wire.write_all(&frame[4..]).await.unwrap();
            wire.flush().await.unwrap();
            // Keep the channel open until the client is done.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });
    });

    let (response, raw) = client.await_response().unwrap();
    assert_eq!(raw, frame.to_vec());
    assert_eq!(response.quantity(), 3);

    writer.join().unwrap();
}

#[test]
fn corrupted_frame_keeps_waiting_until_timeout() {
    let (master, mut wire) = tokio::io::duplex(256);
    let mut client = rtu::Connection::attach(master).unwrap();
    client.set_timeout(Duration::from_millis(50));

    let mut frame = [0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD];
    frame[10] ^= 0xFF;
    let writer = thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            wire.write_all(&frame).await.unwrap();
            wire.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });
    });

    // The frame never validates, so the reader keeps waiting for more bytes
    // until its read deadline expires.
    let err = client.await_response().unwrap_err();
    assert_eq!(err.kind(), ErrorCode::Timeout);

    writer.join().unwrap();
}

#[test]
fn exception_frame_is_surfaced() {
    let (master, slave) = tokio::io::duplex(256);
    let mut client = rtu::Connection::attach(master).unwrap();
    let mut server = rtu::Connection::attach(slave).unwrap();
    client.set_timeout(Duration::from_secs(2));

    let exception = ExceptionFrame::new(
        ErrorCode::SlaveDeviceBusy,
        0x11,
        FunctionCode::WriteMultipleRegisters,
    );
    let sent = server.send_exception(&exception).unwrap();
    assert_eq!(sent.len(), 5);
    assert_eq!(sent[1], 0x10 | 0x80);

    let err = client.await_response().unwrap_err();
    assert_eq!(err.kind(), ErrorCode::SlaveDeviceBusy);
    assert_eq!(err.slave(), Some(0x11));
    assert_eq!(err.function(), FunctionCode::WriteMultipleRegisters);
}

#[test]
fn requests_for_other_slaves_are_skipped() {
    let (master, slave) = tokio::io::duplex(256);
    let mut peer = rtu::Connection::attach(master).unwrap();
    let mut server = rtu::Connection::attach(slave).unwrap();
    server.set_timeout(Duration::from_secs(2));

    // Another device on the bus is addressed first.
    peer.send_request(&Request::new(0x22, FunctionCode::ReadCoils, 0, 1, vec![]))
        .unwrap();
    peer.send_request(&Request::new(0x11, FunctionCode::ReadCoils, 0, 1, vec![]))
        .unwrap();

    let (request, _) = server.await_request_for(Slave(0x11)).unwrap();
    assert_eq!(request.slave_id(), 0x11);

    // Broadcasts are handled by every device.
    peer.send_request(&Request::new(
        Slave::BROADCAST.into(),
        FunctionCode::WriteSingleCoil,
        0xAC,
        1,
        vec![Cell::coil(true)],
    ))
    .unwrap();
    let (request, _) = server.await_request_for(Slave(0x11)).unwrap();
    assert_eq!(request.slave_id(), Slave::BROADCAST.id());
}

#[test]
fn server_replies_with_exception() {
    let (master, slave) = tokio::io::duplex(256);
    let mut client = rtu::Connection::attach(master).unwrap();
    let mut server = rtu::Connection::attach(slave).unwrap();
    client.set_timeout(Duration::from_secs(2));
    server.set_timeout(Duration::from_secs(2));

    let server_handle = thread::spawn(move || {
        let (request, _) = server.await_request().unwrap();
        // The requested address range is not backed by anything.
        let exception = ExceptionFrame::new(
            ErrorCode::IllegalDataAddress,
            request.slave_id(),
            request.function(),
        );
        server.send_exception(&exception).unwrap();
    });

    let request = Request::new(0x11, FunctionCode::ReadInputRegisters, 0xFFF0, 1, vec![]);
    client.send_request(&request).unwrap();
    let err = client.await_response().unwrap_err();
    assert_eq!(err.kind(), ErrorCode::IllegalDataAddress);
    assert_eq!(err.function(), FunctionCode::ReadInputRegisters);

    server_handle.join().unwrap();
}

#[test]
fn two_frames_in_one_chunk_decode_sequentially() {
    let (master, mut wire) = tokio::io::duplex(256);
    let mut server = rtu::Connection::attach(master).unwrap();
    server.set_timeout(Duration::from_secs(2));

    let first = [0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00, 0x4E, 0x8B];
    let second = [0x11, 0x04, 0x00, 0x08, 0x00, 0x01, 0xB2, 0x98];
    let writer = thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mut both = first.to_vec();
            both.extend_from_slice(&second);
            wire.write_all(&both).await.unwrap();
            wire.flush().await.unwrap();
            std::future::pending::<()>().await;
        });
    });

    let (request, raw) = server.await_request().unwrap();
    assert_eq!(request.function(), FunctionCode::WriteSingleCoil);
    assert_eq!(raw, first.to_vec());

    // The second frame is already buffered; no further read happens.
    let (request, raw) = server.await_request().unwrap();
    assert_eq!(request.function(), FunctionCode::ReadInputRegisters);
    assert_eq!(raw, second.to_vec());

    drop(server);
    drop(writer);
}

#[test]
fn await_bytes_returns_one_chunk() {
    let (master, mut wire) = tokio::io::duplex(256);
    let mut client = rtu::Connection::attach(master).unwrap();
    client.set_timeout(Duration::from_secs(2));

    let writer = thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            wire.write_all(&[0x01, 0x02, 0x03]).await.unwrap();
            wire.flush().await.unwrap();
            std::future::pending::<()>().await;
        });
    });

    let bytes = client.await_bytes().unwrap();
    assert_eq!(bytes, vec![0x01, 0x02, 0x03]);

    drop(client);
    drop(writer); // detached; the channel owner has gone away
}
