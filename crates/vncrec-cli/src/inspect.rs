// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use vncrec_recorder::{parse_stream, LogProgress, RecorderConfig, Recording, TruncationPolicy};

#[derive(Args)]
pub struct InspectArgs {
    /// Binary recording to inspect
    pub input: PathBuf,

    /// Only print the summary line
    #[arg(long)]
    pub summary_only: bool,

    /// Drop a truncated trailing record instead of failing
    #[arg(long)]
    pub lenient: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum InspectLine {
    Frame {
        index: usize,
        direction: &'static str,
        timestamp_ms: u32,
        length: usize,
    },
    Summary {
        frames: usize,
        server_frames: usize,
        client_frames: usize,
        duration_ms: u32,
        bytes: usize,
    },
}

impl InspectArgs {
    pub async fn run(self, config: RecorderConfig) -> anyhow::Result<()> {
        let file = tokio::fs::File::open(&self.input)
            .await
            .with_context(|| format!("Failed to open {}", self.input.display()))?;
        let policy = if self.lenient {
            TruncationPolicy::Lenient
        } else {
            TruncationPolicy::Strict
        };
        let recording = parse_stream(
            tokio::io::BufReader::new(file),
            policy,
            Arc::new(LogProgress),
            config.parse_progress_every,
        )
        .await?;

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for line in inspect_lines(&recording, self.summary_only) {
            serde_json::to_writer(&mut out, &line)?;
            writeln!(out)?;
        }
        Ok(())
    }
}

fn inspect_lines(recording: &Recording, summary_only: bool) -> Vec<InspectLine> {
    let mut lines = Vec::new();
    if !summary_only {
        lines.extend(
            recording
                .frames()
                .iter()
                .enumerate()
                .map(|(index, frame)| InspectLine::Frame {
                    index,
                    direction: if frame.from_client { "client" } else { "server" },
                    timestamp_ms: frame.timestamp_ms,
                    length: frame.payload.len(),
                }),
        );
    }

    let server_frames = recording.server_index().len();
    lines.push(InspectLine::Summary {
        frames: recording.frames().len(),
        server_frames,
        client_frames: recording.frames().len() - server_frames,
        duration_ms: recording.duration_ms(),
        bytes: recording.encoded_len(),
    });
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use vncrec_recorder::Frame;

    fn recording() -> Recording {
        Recording::from_frames(vec![
            Frame::server(0, vec![0; 12]),
            Frame::client(4, vec![1]),
            Frame::server(9, vec![2, 3]),
        ])
    }

    #[test]
    fn test_frame_lines_then_summary() {
        let lines = inspect_lines(&recording(), false);
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[1],
            InspectLine::Frame {
                index: 1,
                direction: "client",
                timestamp_ms: 4,
                length: 1,
            }
        );
        assert_eq!(
            lines[3],
            InspectLine::Summary {
                frames: 3,
                server_frames: 2,
                client_frames: 1,
                duration_ms: 9,
                bytes: 3 * 9 + 15,
            }
        );
    }

    #[test]
    fn test_summary_json_shape() {
        let lines = inspect_lines(&recording(), true);
        assert_eq!(lines.len(), 1);
        let json = serde_json::to_value(&lines[0]).unwrap();
        assert_eq!(json["type"], "summary");
        assert_eq!(json["server_frames"], 2);
    }
}
