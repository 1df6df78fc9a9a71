// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Deterministic replay of recorded server traffic
//
// Server frames are delivered one at a time, in recording order, to a stateful decoder
// attached to an off-screen render target. After each frame the engine waits for the
// decoder to settle and takes a snapshot, so every server frame yields exactly one
// capture. Client frames never reach the decoder.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::parser::Recording;
use crate::progress::{NoProgress, Progress, ProgressSink};
use crate::raster::RasterStill;

/// Default bound on waiting for the decoder to settle after one frame
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Server frames between replay progress notifications
pub const PROGRESS_EVERY: usize = 10;

/// Protocol decoder bound to an off-screen render surface
#[async_trait]
pub trait RenderTarget: Send {
    /// Hand one server message to the decoder
    async fn deliver(&mut self, payload: &[u8]) -> anyhow::Result<()>;

    /// True while decoded work is still queued for rendering
    fn has_pending_work(&self) -> bool;

    /// Resolve once the current render pass has completed
    async fn await_settled(&mut self) -> anyhow::Result<()>;

    /// Copy the current framebuffer
    async fn snapshot(&mut self) -> anyhow::Result<RasterStill>;

    fn current_width(&self) -> u32;

    fn current_height(&self) -> u32;
}

/// Receive-only transport feeding recorded payloads to a render target
///
/// Stands in for the live socket: the decoder sees the same message sequence it saw
/// during capture, without any network activity.
pub struct SyntheticTransport<'a> {
    target: &'a mut dyn RenderTarget,
    messages: u64,
    bytes: u64,
}

impl<'a> SyntheticTransport<'a> {
    pub fn new(target: &'a mut dyn RenderTarget) -> Self {
        Self {
            target,
            messages: 0,
            bytes: 0,
        }
    }

    pub async fn receive(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        self.messages += 1;
        self.bytes += payload.len() as u64;
        self.target.deliver(payload).await
    }

    /// Wait until the decoder has no queued work, bounded by `timeout`
    pub async fn settle(&mut self, timeout: Duration) -> anyhow::Result<()> {
        let target = &mut *self.target;
        let wait = async move {
            target.await_settled().await?;
            while target.has_pending_work() {
                tokio::task::yield_now().await;
                target.await_settled().await?;
            }
            Ok::<(), anyhow::Error>(())
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("decoder still busy after {:?}", timeout),
        }
    }

    pub async fn snapshot(&mut self) -> anyhow::Result<RasterStill> {
        self.target.snapshot().await
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.target.current_width(), self.target.current_height())
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// One rendered still, aligned with a server frame
#[derive(Clone, PartialEq)]
pub struct Capture {
    /// Position in the server index
    pub sequence: u32,
    /// Position of the source frame in the recording
    pub source_frame_index: u32,
    pub timestamp_ms: u32,
    /// `None` when the snapshot failed
    pub image: Option<RasterStill>,
    pub width: u32,
    pub height: u32,
}

impl Capture {
    pub fn has_known_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture")
            .field("sequence", &self.sequence)
            .field("source_frame_index", &self.source_frame_index)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("has_image", &self.image.is_some())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Lifecycle of a replay engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Running,
    Finished,
    Aborted,
}

/// Result of a completed replay
#[derive(Debug, Clone, Default)]
pub struct ReplayOutput {
    pub captures: Vec<Capture>,
    pub settle_failures: usize,
    pub snapshot_failures: usize,
    pub bytes_delivered: u64,
}

/// Requests cooperative cancellation of a running replay
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Sequential replay driver
pub struct ReplayEngine {
    settle_timeout: Duration,
    progress: Arc<dyn ProgressSink>,
    cancelled: Arc<AtomicBool>,
    state: ReplayState,
}

impl ReplayEngine {
    pub fn new() -> Self {
        Self {
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            progress: Arc::new(NoProgress),
            cancelled: Arc::new(AtomicBool::new(false)),
            state: ReplayState::Idle,
        }
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Replay every server frame of `recording` into `target`
    pub async fn run(
        &mut self,
        recording: &Recording,
        target: &mut dyn RenderTarget,
    ) -> Result<ReplayOutput> {
        if self.state == ReplayState::Running {
            return Err(Error::invalid_state("idle replay engine", "running replay"));
        }

        self.state = ReplayState::Running;
        let result = self.replay_frames(recording, target).await;
        self.state = match &result {
            Ok(_) => ReplayState::Finished,
            Err(_) => ReplayState::Aborted,
        };
        result
    }

    async fn replay_frames(
        &self,
        recording: &Recording,
        target: &mut dyn RenderTarget,
    ) -> Result<ReplayOutput> {
        let frames = recording.frames();
        let index = recording.server_index();
        let total = index.len();
        let mut transport = SyntheticTransport::new(target);
        let mut output = ReplayOutput {
            captures: Vec::with_capacity(total),
            ..Default::default()
        };

        info!(server_frames = total, frames = frames.len(), "Starting replay");

        for (sequence, position) in index.iter().enumerate() {
            if self.is_cancelled() {
                info!(processed = sequence, total, "Replay cancelled");
                return Err(Error::Aborted {
                    processed: sequence,
                    total,
                });
            }

            let frame = frames.get(position as usize).ok_or_else(|| {
                Error::invalid_state(
                    format!("frame at position {}", position),
                    format!("{} frames", frames.len()),
                )
            })?;

            let settled = match transport.receive(&frame.payload).await {
                Ok(()) => transport.settle(self.settle_timeout).await,
                Err(e) => Err(e),
            };
            if let Err(e) = settled {
                let failure = Error::DecodeSettleFailure {
                    frame_index: position,
                    message: format!("{:#}", e),
                };
                warn!(error = %failure, "Continuing replay after decode failure");
                output.settle_failures += 1;
            }

            let image = match transport.snapshot().await {
                Ok(image) => Some(image),
                Err(e) => {
                    let failure = Error::SnapshotFailure {
                        frame_index: position,
                        message: format!("{:#}", e),
                    };
                    warn!(error = %failure, "Recording capture without an image");
                    output.snapshot_failures += 1;
                    None
                }
            };

            let (width, height) = transport.dimensions();
            output.captures.push(Capture {
                sequence: sequence as u32,
                source_frame_index: position,
                timestamp_ms: frame.timestamp_ms,
                image,
                width,
                height,
            });

            let processed = sequence + 1;
            if processed % PROGRESS_EVERY == 0 || processed == total {
                self.progress.report(Progress::Replaying { processed, total });
            }
        }

        if let Err(e) = transport.settle(self.settle_timeout).await {
            warn!(error = ?e, "Final settle did not complete");
        }

        output.bytes_delivered = transport.bytes();
        debug!(
            captures = output.captures.len(),
            settle_failures = output.settle_failures,
            snapshot_failures = output.snapshot_failures,
            bytes = output.bytes_delivered,
            "Replay finished"
        );
        Ok(output)
    }
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new()
    }
}
