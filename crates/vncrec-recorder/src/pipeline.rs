// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Export pipeline
//
// store -> parse -> (replay -> synthesize) -> package -> upload
//
// Per-frame failures are absorbed by the stages themselves. Anything that stops the
// export is reported as a `PipelineError` naming the phase that failed.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::config::RecorderConfig;
use crate::error::{Error, Phase, PhaseExt, PipelineError};
use crate::events::TimedEvent;
use crate::package::{self, ExportFormat, UploadPackage};
use crate::parser::{parse_stream, Recording, TruncationPolicy};
use crate::progress::ProgressSink;
use crate::replay::{RenderTarget, ReplayEngine};
use crate::storage::RecordingStore;
use crate::synth::{FrameSynthesizer, VideoEncoder};
use crate::upload::{self, UploadReceipt};

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Decoder and encoder needed for container exports
pub struct MediaBackends<'a> {
    pub target: &'a mut dyn RenderTarget,
    pub encoder: &'a mut dyn VideoEncoder,
}

/// Counts describing a finished export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub format: ExportFormat,
    pub frames: usize,
    pub server_frames: usize,
    pub captures: usize,
    pub settle_failures: usize,
    pub snapshot_failures: usize,
    pub video_frames_encoded: u32,
    pub video_frames_dropped: u32,
    pub package_bytes: usize,
    pub uploaded_bytes: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub package: UploadPackage,
    pub summary: ExportSummary,
}

pub struct Exporter {
    config: RecorderConfig,
    progress: Arc<dyn ProgressSink>,
}

impl Exporter {
    pub fn new(config: RecorderConfig, progress: Arc<dyn ProgressSink>) -> Self {
        Self { config, progress }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Read and parse a stored recording; truncation is fatal here
    pub async fn load(&self, store: &dyn RecordingStore, name: &str) -> PipelineResult<Recording> {
        let reader = store.reader(name).await.map_err(Error::from).in_phase(Phase::Parsing)?;
        parse_stream(
            reader,
            TruncationPolicy::Strict,
            self.progress.clone(),
            self.config.parse_progress_every,
        )
        .await
        .in_phase(Phase::Parsing)
    }

    /// Build the upload package for `recording`
    pub async fn export(
        &self,
        recording: &Recording,
        format: ExportFormat,
        events: &[TimedEvent],
        backends: Option<MediaBackends<'_>>,
    ) -> PipelineResult<ExportOutcome> {
        let mut summary = ExportSummary {
            format,
            frames: recording.frames().len(),
            server_frames: recording.server_index().len(),
            ..Default::default()
        };

        let package = match format {
            ExportFormat::Raw => package::package_raw(recording).in_phase(Phase::Packaging)?,
            ExportFormat::Transcript => package::package_transcript(recording, Utc::now()),
            ExportFormat::Container => {
                let MediaBackends { target, encoder } = backends
                    .ok_or_else(|| Error::MissingBackend {
                        format: format.to_string(),
                    })
                    .in_phase(Phase::Replaying)?;

                let mut engine = ReplayEngine::new()
                    .with_settle_timeout(self.config.settle_timeout())
                    .with_progress(self.progress.clone());
                let replay = engine
                    .run(recording, target)
                    .await
                    .in_phase(Phase::Replaying)?;
                summary.captures = replay.captures.len();
                summary.settle_failures = replay.settle_failures;
                summary.snapshot_failures = replay.snapshot_failures;

                let video = FrameSynthesizer::new(self.config.synth_config())
                    .with_progress(self.progress.clone())
                    .synthesize(&replay.captures, encoder)
                    .await
                    .in_phase(Phase::Encoding)?;
                summary.video_frames_encoded = video.frames_encoded;
                summary.video_frames_dropped = video.frames_dropped;

                package::package_container(events, &video, Utc::now()).in_phase(Phase::Packaging)?
            }
        };

        summary.package_bytes = package.len();
        info!(
            format = %format,
            frames = summary.frames,
            bytes = summary.package_bytes,
            "Export package ready"
        );
        Ok(ExportOutcome { package, summary })
    }

    pub async fn upload(
        &self,
        package: &UploadPackage,
        endpoint: &str,
    ) -> PipelineResult<UploadReceipt> {
        upload::upload(
            package,
            endpoint,
            &self.config.upload_options(self.progress.clone()),
        )
        .await
        .in_phase(Phase::Uploading)
    }

    /// Load, export and optionally upload a stored recording
    pub async fn run(
        &self,
        store: &dyn RecordingStore,
        name: &str,
        events: &[TimedEvent],
        backends: Option<MediaBackends<'_>>,
    ) -> PipelineResult<ExportOutcome> {
        let recording = self.load(store, name).await?;
        let mut outcome = self
            .export(&recording, self.config.export_format, events, backends)
            .await?;

        if let Some(endpoint) = self.config.endpoint.as_deref() {
            let receipt = self.upload(&outcome.package, endpoint).await?;
            outcome.summary.uploaded_bytes = Some(receipt.bytes);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{transcript, Frame};
    use crate::progress::NoProgress;
    use crate::storage::{FrameSink, FsStore};
    use tempfile::TempDir;

    async fn store_with(frames: &[Frame], extra: &[u8]) -> (TempDir, FsStore) {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let mut sink = store.open("rec.bin", true).await.unwrap();
        for frame in frames {
            sink.append(&frame.encode().unwrap()).await.unwrap();
        }
        sink.append(extra).await.unwrap();
        sink.close().await.unwrap();
        (dir, store)
    }

    fn exporter(format: ExportFormat) -> Exporter {
        let config = RecorderConfig {
            export_format: format,
            ..Default::default()
        };
        Exporter::new(config, Arc::new(NoProgress))
    }

    #[tokio::test]
    async fn test_transcript_export() {
        let frames = vec![Frame::server(0, vec![1]), Frame::client(2, vec![2])];
        let (_dir, store) = store_with(&frames, &[]).await;

        let outcome = exporter(ExportFormat::Transcript)
            .run(&store, "rec.bin", &[], None)
            .await
            .unwrap();

        assert_eq!(outcome.summary.frames, 2);
        assert_eq!(outcome.summary.server_frames, 1);
        assert_eq!(outcome.summary.uploaded_bytes, None);
        let UploadPackage::Transcript(text) = outcome.package else {
            panic!("Expected transcript package");
        };
        assert_eq!(transcript::parse(&text).unwrap(), frames);
    }

    #[tokio::test]
    async fn test_truncated_recording_fails_in_parsing_phase() {
        let (_dir, store) = store_with(&[Frame::server(0, vec![1])], &[0, 0, 0]).await;

        let err = exporter(ExportFormat::Raw)
            .run(&store, "rec.bin", &[], None)
            .await
            .unwrap_err();
        assert_eq!(err.phase, Phase::Parsing);
        assert!(matches!(err.source, Error::TruncatedRecording { .. }));
        assert!(err.to_string().starts_with("parsing failed"));
    }

    #[tokio::test]
    async fn test_container_without_backends() {
        let recording = Recording::from_frames(vec![Frame::server(0, vec![1])]);

        let err = exporter(ExportFormat::Container)
            .export(&recording, ExportFormat::Container, &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err.source, Error::MissingBackend { .. }));
    }
}
