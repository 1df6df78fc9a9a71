// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Phase progress notifications for UI feedback

use tracing::info;

/// Progress of a single pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Recording { frames: u64, bytes: u64 },
    Parsing { frames: u64, bytes: u64 },
    Replaying { processed: usize, total: usize },
    Encoding { emitted: usize, total: usize },
    Uploading { bytes: usize },
}

/// Receiver of progress notifications
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

/// Logs progress as status messages
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, progress: Progress) {
        match progress {
            Progress::Recording { frames, bytes } => {
                info!(frames, mb = bytes as f64 / (1024.0 * 1024.0), "Recording");
            }
            Progress::Parsing { frames, bytes } => {
                info!(frames, bytes, "Parsing recording");
            }
            Progress::Replaying { processed, total } => {
                info!(processed, total, "Replaying server frames");
            }
            Progress::Encoding { emitted, total } => {
                info!(emitted, total, "Encoding video frames");
            }
            Progress::Uploading { bytes } => {
                info!(bytes, "Uploading package");
            }
        }
    }
}

/// Discards all notifications
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: Progress) {}
}
