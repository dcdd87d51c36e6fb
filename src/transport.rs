// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared plumbing of the blocking transports.
//!
//! Every connection owns a current-thread runtime and drives its socket or
//! serial device through it; reads are bounded by wrapping the future in
//! [`tokio::time::timeout`].

use std::{future::Future, time::Duration};

use tokio::runtime::{Builder, Runtime};

use crate::error::{Error, ErrorCode, Result};

pub(crate) fn new_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .map_err(|err| {
            log::error!("Failed to start the transport runtime: {err}");
            Error::new(ErrorCode::ProtocolError)
        })
}

/// Runs `task` to completion, failing with [`ErrorCode::Timeout`] when it
/// does not finish within `duration`.
pub(crate) fn block_on_with_timeout<T>(
    runtime: &Runtime,
    duration: Duration,
    task: impl Future<Output = Result<T>>,
) -> Result<T> {
    runtime.block_on(async move {
        tokio::time::timeout(duration, task)
            .await
            .unwrap_or_else(|_elapsed| Err(Error::new(ErrorCode::Timeout)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_reported() {
        let runtime = new_runtime().unwrap();
        let result: Result<()> = block_on_with_timeout(
            &runtime,
            Duration::from_millis(10),
            std::future::pending(),
        );
        assert_eq!(result.unwrap_err().kind(), ErrorCode::Timeout);
    }

    #[test]
    fn completed_task_is_passed_through() {
        let runtime = new_runtime().unwrap();
        let result = block_on_with_timeout(&runtime, Duration::from_millis(10), async { Ok(42) });
        assert_eq!(result.unwrap(), 42);
    }
}
