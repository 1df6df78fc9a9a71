// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Recording collector server
//
// Accepts WebSocket connections from recording clients. In stream mode every binary
// message is one frame record, appended to a new recording as it arrives. In package
// mode the client sends one finished upload package and the server closes the
// connection to acknowledge it. Only one client is served at a time.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::format::transcript;
use crate::parser::{parse_bytes, TruncationPolicy};
use crate::storage::{FrameSink, RecordingStore};

/// Frames between collector progress log lines
pub const COLLECTOR_PROGRESS_EVERY: u64 = 1000;

/// What connected clients send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CollectorMode {
    /// Live frame records, one per message
    #[default]
    Stream,
    /// One finished upload package per connection
    Package,
}

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub mode: CollectorMode,
    /// Also write a transcript next to each finished stream recording
    pub convert_transcript: bool,
    pub progress_every: u64,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            mode: CollectorMode::Stream,
            convert_transcript: false,
            progress_every: COLLECTOR_PROGRESS_EVERY,
        }
    }
}

/// A finished collector session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedSession {
    pub peer: SocketAddr,
    pub name: String,
    pub frames: u64,
    pub bytes: u64,
    pub duration: Duration,
    pub transcript: Option<String>,
}

struct Shared {
    store: Arc<dyn RecordingStore>,
    options: CollectorOptions,
    busy: AtomicBool,
    sequence: AtomicU64,
    completions: Option<mpsc::UnboundedSender<CollectedSession>>,
}

/// Clears the busy flag when a session ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CollectorServer {
    listener: TcpListener,
    shared: Shared,
}

impl CollectorServer {
    pub async fn bind(
        addr: SocketAddr,
        store: Arc<dyn RecordingStore>,
        options: CollectorOptions,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            shared: Shared {
                store,
                options,
                busy: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
                completions: None,
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Receive a notification for every finished session
    pub fn completions(&mut self) -> mpsc::UnboundedReceiver<CollectedSession> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.completions = Some(tx);
        rx
    }

    /// Serve connections forever
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serve connections until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let shared = Arc::new(self.shared);
        let listener = self.listener;
        info!(
            addr = ?listener.local_addr().ok(),
            mode = ?shared.options.mode,
            "Collector listening"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Collector shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (tcp, peer) = accepted?;
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(shared, tcp, peer).await {
                            error!(peer = %peer, error = %e, "Collector session failed");
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(shared: Arc<Shared>, tcp: TcpStream, peer: SocketAddr) -> Result<()> {
    let mut ws = tokio_tungstenite::accept_async(tcp)
        .await
        .map_err(|e| Error::ConnectFailed {
            endpoint: peer.to_string(),
            message: e.to_string(),
        })?;

    if shared.busy.swap(true, Ordering::AcqRel) {
        warn!(peer = %peer, "Rejecting client, a recording is already in progress");
        let frame = CloseFrame {
            code: CloseCode::Policy,
            reason: "another recording is in progress".into(),
        };
        let _ = ws.close(Some(frame)).await;
        while ws.next().await.is_some() {}
        return Ok(());
    }
    let _guard = BusyGuard(&shared.busy);

    info!(peer = %peer, "Recording client connected");
    let session = match shared.options.mode {
        CollectorMode::Stream => collect_stream(&shared, &mut ws, peer).await?,
        CollectorMode::Package => collect_package(&shared, &mut ws, peer).await?,
    };

    if let Some(tx) = &shared.completions {
        let _ = tx.send(session);
    }
    Ok(())
}

fn next_name(shared: &Shared, prefix: &str, extension: &str) -> String {
    let seq = shared.sequence.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}-{}-{}.{}",
        prefix,
        Utc::now().format("%Y%m%d-%H%M%S"),
        seq,
        extension
    )
}

async fn collect_stream(
    shared: &Shared,
    ws: &mut WebSocketStream<TcpStream>,
    peer: SocketAddr,
) -> Result<CollectedSession> {
    let name = next_name(shared, "recording", "bin");
    let mut sink = shared
        .store
        .open(&name, true)
        .await
        .map_err(Error::storage)?;
    let started = Instant::now();
    let progress_every = shared.options.progress_every.max(1);
    let mut frames = 0u64;
    let mut bytes = 0u64;

    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                sink.append(&data).await.map_err(|e| Error::WriteFailed {
                    message: e.to_string(),
                })?;
                frames += 1;
                bytes += data.len() as u64;
                if frames % progress_every == 0 {
                    info!(
                        name = %name,
                        frames,
                        mb = bytes as f64 / (1024.0 * 1024.0),
                        "Collecting"
                    );
                }
            }
            Ok(Message::Close(_)) => debug!(peer = %peer, "Recording client closed"),
            Ok(Message::Text(_)) => warn!(peer = %peer, "Ignoring text message"),
            Ok(_) => {}
            Err(e) => {
                warn!(peer = %peer, error = %e, "Recording client connection lost");
                break;
            }
        }
    }
    sink.close().await.map_err(|e| Error::WriteFailed {
        message: e.to_string(),
    })?;

    let duration = started.elapsed();
    info!(
        name = %name,
        frames,
        mb = bytes as f64 / (1024.0 * 1024.0),
        duration_s = duration.as_secs_f64(),
        "Recording collected"
    );

    let transcript = if shared.options.convert_transcript {
        Some(write_transcript(shared.store.as_ref(), &name).await?)
    } else {
        None
    };

    Ok(CollectedSession {
        peer,
        name,
        frames,
        bytes,
        duration,
        transcript,
    })
}

async fn collect_package(
    shared: &Shared,
    ws: &mut WebSocketStream<TcpStream>,
    peer: SocketAddr,
) -> Result<CollectedSession> {
    let started = Instant::now();
    let payload = loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => break Some(data),
            Some(Ok(Message::Text(text))) => break Some(text.into_bytes()),
            Some(Ok(Message::Close(_))) | None => break None,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(Error::UploadConnectionError {
                    message: e.to_string(),
                })
            }
        }
    };

    let name = next_name(shared, "upload", "pkg");
    let bytes = match &payload {
        Some(data) => {
            let mut sink = shared
                .store
                .open(&name, true)
                .await
                .map_err(Error::storage)?;
            sink.append(data).await?;
            sink.close().await?;
            data.len() as u64
        }
        None => 0,
    };

    // Closing acknowledges the upload
    let _ = ws.close(None).await;
    while ws.next().await.is_some() {}

    info!(peer = %peer, name = %name, bytes, "Upload received");
    Ok(CollectedSession {
        peer,
        name,
        frames: u64::from(payload.is_some()),
        bytes,
        duration: started.elapsed(),
        transcript: None,
    })
}

/// Convert a stored recording to transcript text, stored beside it
pub async fn write_transcript(store: &dyn RecordingStore, name: &str) -> Result<String> {
    let bytes = store.read(name).await?;
    let recording = parse_bytes(&bytes, TruncationPolicy::Lenient)?;
    let text = transcript::render(recording.frames(), Utc::now());

    let target = match name.strip_suffix(".bin") {
        Some(stem) => format!("{}.js", stem),
        None => format!("{}.js", name),
    };
    if store.exists(&target).await? {
        store.remove(&target).await?;
    }
    let mut sink = store.open(&target, true).await.map_err(Error::storage)?;
    sink.append(text.as_bytes()).await?;
    sink.close().await?;

    debug!(source = %name, target = %target, frames = recording.frames().len(), "Wrote transcript");
    Ok(target)
}
