// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Incremental recording parser
//
// Reconstitutes frames from a whole buffer or from arbitrarily sized chunks. Partial
// frame records stay buffered until the next chunk completes them, so the result does
// not depend on how the source was split.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::format::{decode_frame, Frame, FrameDecode};
use crate::progress::{NoProgress, Progress, ProgressSink};

/// Default number of frames between progress notifications
pub const DEFAULT_PROGRESS_EVERY: u64 = 1000;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// What to do with a partial record at end of input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationPolicy {
    /// Fail with `TruncatedRecording`
    Strict,
    /// Warn and drop the partial record
    Lenient,
}

/// Ordered positions of server-originated frames within a recording
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerIndex(Vec<u32>);

impl ServerIndex {
    pub fn positions(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    fn push(&mut self, position: u32) {
        self.0.push(position);
    }
}

/// A fully parsed recording
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recording {
    frames: Vec<Frame>,
    server_index: ServerIndex,
}

impl Recording {
    /// Build a recording from frames, deriving the server index
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        let mut server_index = ServerIndex::default();
        for (i, frame) in frames.iter().enumerate() {
            if !frame.from_client {
                server_index.push(i as u32);
            }
        }
        Self {
            frames,
            server_index,
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn server_index(&self) -> &ServerIndex {
        &self.server_index
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Timestamp of the last frame, or zero for an empty recording
    pub fn duration_ms(&self) -> u32 {
        self.frames.last().map(|f| f.timestamp_ms).unwrap_or(0)
    }

    /// Total serialized size in bytes
    pub fn encoded_len(&self) -> usize {
        self.frames.iter().map(Frame::encoded_len).sum()
    }
}

/// Chunk-fed frame parser
pub struct FrameParser {
    residual: Vec<u8>,
    frames: Vec<Frame>,
    server_index: ServerIndex,
    consumed: u64,
    progress_every: u64,
    progress: Arc<dyn ProgressSink>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            residual: Vec::new(),
            frames: Vec::new(),
            server_index: ServerIndex::default(),
            consumed: 0,
            progress_every: DEFAULT_PROGRESS_EVERY,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>, every: u64) -> Self {
        self.progress = progress;
        self.progress_every = every.max(1);
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Bytes buffered but not yet part of a complete frame
    pub fn pending_bytes(&self) -> usize {
        self.residual.len()
    }

    /// Append a chunk and extract every complete frame; returns how many were added
    pub fn push(&mut self, chunk: &[u8]) -> Result<usize> {
        self.residual.extend_from_slice(chunk);

        let mut offset = 0;
        let mut added = 0;
        while let FrameDecode::Frame { frame, consumed } = decode_frame(&self.residual[offset..]) {
            offset += consumed;
            self.consumed += consumed as u64;

            let position = u32::try_from(self.frames.len()).map_err(|_| Error::TruncatedRecording {
                offset: self.consumed,
                needed: 0,
            })?;
            if !frame.from_client {
                self.server_index.push(position);
            }
            self.frames.push(frame);
            added += 1;

            let count = self.frames.len() as u64;
            if count % self.progress_every == 0 {
                self.progress.report(Progress::Parsing {
                    frames: count,
                    bytes: self.consumed,
                });
            }
        }

        if offset > 0 {
            self.residual.drain(..offset);
        }
        Ok(added)
    }

    /// Finish parsing and apply the truncation policy to any leftover bytes
    pub fn finish(self, policy: TruncationPolicy) -> Result<Recording> {
        if !self.residual.is_empty() {
            let needed = match decode_frame(&self.residual) {
                FrameDecode::Incomplete { needed } => needed,
                FrameDecode::Frame { .. } => 0,
            };

            match policy {
                TruncationPolicy::Strict => {
                    return Err(Error::TruncatedRecording {
                        offset: self.consumed,
                        needed,
                    });
                }
                TruncationPolicy::Lenient => {
                    warn!(
                        offset = self.consumed,
                        leftover = self.residual.len(),
                        needed,
                        "Dropping truncated frame record at end of recording"
                    );
                }
            }
        }

        debug!(
            frames = self.frames.len(),
            server_frames = self.server_index.len(),
            bytes = self.consumed,
            "Parsed recording"
        );

        Ok(Recording {
            frames: self.frames,
            server_index: self.server_index,
        })
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a complete in-memory recording
pub fn parse_bytes(bytes: &[u8], policy: TruncationPolicy) -> Result<Recording> {
    let mut parser = FrameParser::new();
    parser.push(bytes)?;
    parser.finish(policy)
}

/// Parse a recording from any async reader in fixed-size chunks
pub async fn parse_stream<R>(
    mut reader: R,
    policy: TruncationPolicy,
    progress: Arc<dyn ProgressSink>,
    progress_every: u64,
) -> Result<Recording>
where
    R: AsyncRead + Unpin,
{
    let mut parser = FrameParser::new().with_progress(progress, progress_every);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        parser.push(&chunk[..n])?;
    }

    parser.finish(policy)
}
