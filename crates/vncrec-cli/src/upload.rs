// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use vncrec_recorder::{ExportFormat, Exporter, FsStore, LogProgress, RecorderConfig, TimedEvent};

use crate::{set_override, ToJsonOverrides};

#[derive(Args)]
pub struct UploadArgs {
    /// Binary recording to export
    pub input: PathBuf,

    /// Collector endpoint (ws:// or wss://)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Package format to upload
    #[arg(long, value_enum)]
    pub format: Option<ExportFormat>,

    /// JSON file with the session's input events
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Warn when uploading over plaintext transport
    #[arg(long)]
    pub secure_context: bool,

    /// Also write the exported package next to the input
    #[arg(long)]
    pub keep_package: bool,
}

impl ToJsonOverrides for UploadArgs {
    fn to_json_overrides(&self) -> serde_json::Value {
        let mut overrides = serde_json::Map::new();
        set_override(&mut overrides, "endpoint", self.endpoint.as_ref());
        set_override(&mut overrides, "export_format", self.format);
        set_override(&mut overrides, "secure_context", self.secure_context.then_some(true));
        serde_json::Value::Object(overrides)
    }
}

impl UploadArgs {
    pub async fn run(self, config: RecorderConfig) -> anyhow::Result<()> {
        if config.endpoint.is_none() {
            anyhow::bail!("No upload endpoint configured; pass --endpoint or set VNCREC_ENDPOINT");
        }
        if config.export_format == ExportFormat::Container {
            warn!("Container export needs a decoder and encoder backend, which this build lacks");
        }

        let events = match &self.events {
            Some(path) => read_events(path).await?,
            None => Vec::new(),
        };

        let (dir, name) = split_input(&self.input)?;
        let store = FsStore::new(dir);
        let exporter = Exporter::new(config, Arc::new(LogProgress));
        let outcome = exporter.run(&store, &name, &events, None).await?;

        if self.keep_package {
            let path = self.input.with_extension(outcome.package.extension());
            tokio::fs::write(&path, outcome.package.to_bytes()?)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Package saved");
        }

        info!(
            format = %outcome.summary.format,
            frames = outcome.summary.frames,
            package_bytes = outcome.summary.package_bytes,
            uploaded_bytes = ?outcome.summary.uploaded_bytes,
            "Upload finished"
        );
        Ok(())
    }
}

async fn read_events(path: &Path) -> anyhow::Result<Vec<TimedEvent>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid events file {}", path.display()))
}

/// Store directory and recording name for an input path
fn split_input(input: &Path) -> anyhow::Result<(PathBuf, String)> {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid recording path {}", input.display()))?
        .to_string();
    let dir = match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vncrec_recorder::InputEvent;

    #[test]
    fn test_split_input() {
        assert_eq!(
            split_input(Path::new("recordings/session.bin")).unwrap(),
            (PathBuf::from("recordings"), "session.bin".to_string())
        );
        assert_eq!(
            split_input(Path::new("session.bin")).unwrap(),
            (PathBuf::from("."), "session.bin".to_string())
        );
        assert!(split_input(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn test_read_events() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        let events = vec![TimedEvent::new(30, InputEvent::Type { text: "hi".into() })];
        std::fs::write(&path, serde_json::to_string(&events).unwrap()).unwrap();

        assert_eq!(read_events(&path).await.unwrap(), events);
    }

    #[tokio::test]
    async fn test_missing_endpoint_fails() {
        let args = UploadArgs {
            input: PathBuf::from("session.bin"),
            endpoint: None,
            format: None,
            events: None,
            secure_context: false,
            keep_package: false,
        };
        let err = args.run(RecorderConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }
}
