// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use vncrec_recorder::format::transcript;
use vncrec_recorder::{parse_bytes, RecorderConfig, TruncationPolicy};

#[derive(Args)]
pub struct ConvertArgs {
    /// Binary recording to convert
    pub input: PathBuf,

    /// Transcript file to write (default: input with a .js extension)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Fail on a truncated trailing record instead of dropping it
    #[arg(long)]
    pub strict: bool,
}

impl ConvertArgs {
    pub async fn run(self, _config: RecorderConfig) -> anyhow::Result<()> {
        let bytes = tokio::fs::read(&self.input)
            .await
            .with_context(|| format!("Failed to read {}", self.input.display()))?;

        let policy = if self.strict {
            TruncationPolicy::Strict
        } else {
            TruncationPolicy::Lenient
        };
        let recording = parse_bytes(&bytes, policy)?;
        if recording.is_empty() {
            warn!(input = %self.input.display(), "Recording has no frames");
        }

        let output = self.output.unwrap_or_else(|| transcript_path(&self.input));
        let text = transcript::render(recording.frames(), chrono::Utc::now());
        tokio::fs::write(&output, text.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;

        info!(
            input = %self.input.display(),
            output = %output.display(),
            frames = recording.frames().len(),
            "Converted recording"
        );
        Ok(())
    }
}

fn transcript_path(input: &Path) -> PathBuf {
    input.with_extension("js")
}
