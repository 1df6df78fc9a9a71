// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Package upload over WebSocket
//
// The whole package travels as one binary message. The upload is complete when the
// receiving side closes the connection. There is no retry.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::package::UploadPackage;
use crate::progress::{NoProgress, Progress, ProgressSink};
use crate::transport::{self, SecurityWarning, WsStream, CONNECT_TIMEOUT};

/// Default bound on the whole transfer once connected
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct UploadOptions {
    pub connect_timeout: Duration,
    pub overall_timeout: Duration,
    /// The caller runs in a context where plaintext transport deserves a warning
    pub secure_context: bool,
    pub progress: Arc<dyn ProgressSink>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            overall_timeout: UPLOAD_TIMEOUT,
            secure_context: false,
            progress: Arc::new(NoProgress),
        }
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("connect_timeout", &self.connect_timeout)
            .field("overall_timeout", &self.overall_timeout)
            .field("secure_context", &self.secure_context)
            .finish()
    }
}

/// Confirmation of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub bytes: usize,
    pub elapsed: Duration,
    pub warning: Option<SecurityWarning>,
}

/// Send `package` to `endpoint` and wait for the receiver to close
pub async fn upload(
    package: &UploadPackage,
    endpoint: &str,
    options: &UploadOptions,
) -> Result<UploadReceipt> {
    let url = transport::parse_endpoint(endpoint)?;
    let warning = transport::check_transport_security(&url, options.secure_context);
    let bytes = package.to_bytes()?;
    let size = bytes.len();
    let started = Instant::now();

    let stream = transport::connect(&url, options.connect_timeout).await?;
    debug!(endpoint = %url, bytes = size, format = %package.format(), "Uploading package");

    match tokio::time::timeout(options.overall_timeout, send_and_await_close(stream, bytes)).await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::UploadTimeout {
                endpoint: url.to_string(),
                timeout: options.overall_timeout,
            })
        }
    }

    options.progress.report(Progress::Uploading { bytes: size });
    let elapsed = started.elapsed();
    info!(endpoint = %url, bytes = size, elapsed_ms = elapsed.as_millis() as u64, "Upload complete");

    Ok(UploadReceipt {
        bytes: size,
        elapsed,
        warning,
    })
}

async fn send_and_await_close(mut stream: WsStream, bytes: Vec<u8>) -> Result<()> {
    stream
        .send(Message::Binary(bytes))
        .await
        .map_err(connection_error)?;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                debug!(frame = ?frame, "Receiver closed the connection");
            }
            Ok(_) => {}
            Err(tungstenite::Error::ConnectionClosed) => break,
            Err(e) => return Err(connection_error(e)),
        }
    }
    Ok(())
}

fn connection_error(e: tungstenite::Error) -> Error {
    Error::UploadConnectionError {
        message: e.to_string(),
    }
}
