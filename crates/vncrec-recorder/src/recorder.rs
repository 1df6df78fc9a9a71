// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Live traffic recorder
//
// Timestamps every observed protocol message relative to recording start, serializes it
// as a frame record and submits it to the ordered write queue. The write target is
// either a durable store or a live WebSocket connection to a collector.

use async_trait::async_trait;
use futures_util::SinkExt;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::format::Frame;
use crate::progress::{NoProgress, ProgressSink};
use crate::queue::{QueueSender, RecorderProgress, WriteQueue};
use crate::storage::{FrameSink, RecordingStore};
use crate::transport::{self, WsStream, CONNECT_TIMEOUT};

/// Frames between recording progress reports
pub const DEFAULT_RECORD_PROGRESS_EVERY: u64 = 1000;

/// Where recorded frames go
#[derive(Clone)]
pub enum WriteTarget {
    /// Append to a named recording in a store
    Store {
        store: Arc<dyn RecordingStore>,
        name: String,
    },
    /// Stream frames live to a collector endpoint
    Collector { endpoint: String },
}

impl fmt::Debug for WriteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteTarget::Store { name, .. } => f.debug_struct("Store").field("name", name).finish(),
            WriteTarget::Collector { endpoint } => {
                f.debug_struct("Collector").field("endpoint", endpoint).finish()
            }
        }
    }
}

/// Recorder configuration
#[derive(Clone)]
pub struct RecorderOptions {
    pub connect_timeout: Duration,
    pub progress: Arc<dyn ProgressSink>,
    /// Written frames between `Progress::Recording` reports; zero disables them
    pub progress_every: u64,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            progress: Arc::new(NoProgress),
            progress_every: DEFAULT_RECORD_PROGRESS_EVERY,
        }
    }
}

impl fmt::Debug for RecorderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecorderOptions")
            .field("connect_timeout", &self.connect_timeout)
            .field("progress_every", &self.progress_every)
            .finish()
    }
}

/// Summary of a stopped recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSummary {
    pub frames: u64,
    pub bytes: u64,
    pub write_failures: u64,
    pub duration_ms: u32,
}

/// Cloneable handle for appending frames from transport callbacks
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    capturing: Arc<AtomicBool>,
    started_at: Instant,
    queue: QueueSender,
    /// Held from timestamping to enqueue so queue order matches timestamp order
    submit: Arc<Mutex<()>>,
}

impl RecorderHandle {
    /// Milliseconds since the recording started, saturating at u32::MAX
    pub fn elapsed_ms(&self) -> u32 {
        u32::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u32::MAX)
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    /// Record one message; returns false if capture is off or the queue has closed
    pub fn append(&self, from_client: bool, payload: &[u8]) -> bool {
        if !self.is_capturing() {
            return false;
        }

        let _submit = self.submit.lock().unwrap_or_else(|e| e.into_inner());
        let frame = Frame::new(from_client, self.elapsed_ms(), payload.to_vec());
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Dropping frame that cannot be encoded");
                return false;
            }
        };

        trace!(
            from_client,
            timestamp_ms = frame.timestamp_ms,
            len = frame.payload.len(),
            "Queued frame"
        );
        self.queue.enqueue(bytes)
    }

    pub fn progress(&self) -> RecorderProgress {
        self.queue.stats()
    }
}

struct ActiveRecording {
    handle: RecorderHandle,
    queue: WriteQueue,
    target: WriteTarget,
}

/// Records live traffic into one write target at a time
pub struct Recorder {
    options: RecorderOptions,
    active: Option<ActiveRecording>,
}

impl Recorder {
    pub fn new(options: RecorderOptions) -> Self {
        Self {
            options,
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Open the write target and start the clock
    pub async fn start(&mut self, target: WriteTarget) -> Result<RecorderHandle> {
        if self.active.is_some() {
            return Err(Error::invalid_state("stopped recorder", "active recording"));
        }

        let sink = self.open_target(&target).await?;
        let queue = WriteQueue::spawn_with_progress(
            sink,
            self.options.progress.clone(),
            self.options.progress_every,
        );
        let handle = RecorderHandle {
            capturing: Arc::new(AtomicBool::new(true)),
            started_at: Instant::now(),
            queue: queue.sender(),
            submit: Arc::new(Mutex::new(())),
        };

        info!(target = ?target, "Recording started");
        self.active = Some(ActiveRecording {
            handle: handle.clone(),
            queue,
            target,
        });
        Ok(handle)
    }

    async fn open_target(&self, target: &WriteTarget) -> Result<Box<dyn FrameSink>> {
        match target {
            WriteTarget::Store { store, name } => {
                let estimate = store.usage().await.map_err(Error::storage)?;
                if estimate.is_exhausted() {
                    return Err(Error::StorageUnavailable {
                        message: format!(
                            "quota exhausted ({} of {:?} bytes used)",
                            estimate.usage, estimate.quota
                        ),
                    });
                }

                if store.exists(name).await.map_err(Error::storage)? {
                    debug!(name = %name, "Replacing existing recording");
                    store.remove(name).await.map_err(Error::storage)?;
                }

                store.open(name, true).await.map_err(Error::storage)
            }
            WriteTarget::Collector { endpoint } => {
                let url = transport::parse_endpoint(endpoint)?;
                let stream = transport::connect(&url, self.options.connect_timeout).await?;
                Ok(Box::new(CollectorSink { stream }))
            }
        }
    }

    /// Record one message
    pub fn append(&self, from_client: bool, payload: &[u8]) -> Result<()> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| Error::invalid_state("active recording", "stopped recorder"))?;

        if active.handle.append(from_client, payload) {
            Ok(())
        } else {
            Err(Error::WriteFailed {
                message: "recording is no longer accepting frames".to_string(),
            })
        }
    }

    pub fn handle(&self) -> Option<RecorderHandle> {
        self.active.as_ref().map(|a| a.handle.clone())
    }

    pub fn progress(&self) -> RecorderProgress {
        self.active
            .as_ref()
            .map(|a| a.handle.progress())
            .unwrap_or_default()
    }

    /// Stop capturing, wait for every queued write, then release the target
    pub async fn stop(&mut self) -> Result<RecordingSummary> {
        let active = self
            .active
            .take()
            .ok_or_else(|| Error::invalid_state("active recording", "stopped recorder"))?;

        // Capture goes off first so nothing new is queued behind the drain
        active.handle.capturing.store(false, Ordering::Release);
        let duration_ms = active.handle.elapsed_ms();

        let drained = active.queue.drain().await;
        let progress = active.queue.close().await?;
        drained?;

        info!(
            target = ?active.target,
            frames = progress.frames_written,
            bytes = progress.bytes_written,
            duration_ms,
            "Recording stopped"
        );

        Ok(RecordingSummary {
            frames: progress.frames_written,
            bytes: progress.bytes_written,
            write_failures: progress.write_failures,
            duration_ms,
        })
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(RecorderOptions::default())
    }
}

/// Sends every frame record as one binary WebSocket message
struct CollectorSink {
    stream: WsStream,
}

#[async_trait]
impl FrameSink for CollectorSink {
    async fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream
            .send(Message::Binary(bytes.to_vec()))
            .await
            .map_err(io::Error::other)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.close(None).await.map_err(io::Error::other)
    }
}
