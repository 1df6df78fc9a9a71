// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Recording session state
//
// Ties a recorder and an event transcriber to one captured session and tracks its
// lifecycle: Idle -> Pending (target opening) -> Active -> Stopping -> Idle.

use std::sync::Arc;
use tracing::info;

use crate::config::RecorderConfig;
use crate::error::{Error, Result};
use crate::events::{CanvasGeometry, EventTranscriber, TimedEvent};
use crate::observer::TransportObserver;
use crate::progress::ProgressSink;
use crate::queue::RecorderProgress;
use crate::recorder::{Recorder, RecorderHandle, RecorderOptions, RecordingSummary, WriteTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Pending,
    Active,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Pending => "pending",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Output of a finished session
#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub summary: RecordingSummary,
    pub events: Vec<TimedEvent>,
}

pub struct RecordingSession {
    state: SessionState,
    recorder: Recorder,
    transcriber: EventTranscriber,
    handle: Option<RecorderHandle>,
}

impl RecordingSession {
    pub fn new(options: RecorderOptions, geometry: CanvasGeometry) -> Self {
        Self {
            state: SessionState::Idle,
            recorder: Recorder::new(options),
            transcriber: EventTranscriber::new(geometry),
            handle: None,
        }
    }

    /// Session using the recorder settings of `config`
    pub fn from_config(
        config: &RecorderConfig,
        progress: Arc<dyn ProgressSink>,
        geometry: CanvasGeometry,
    ) -> Self {
        Self::new(config.recorder_options(progress), geometry)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open the write target and start capturing
    pub async fn begin(&mut self, target: WriteTarget) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::invalid_state(SessionState::Idle, self.state));
        }

        self.state = SessionState::Pending;
        match self.recorder.start(target).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.transcriber.activate();
                self.state = SessionState::Active;
                info!("Recording session active");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Observer to attach to the live transport
    pub fn observer(&self) -> Result<Arc<dyn TransportObserver>> {
        self.handle
            .clone()
            .map(|h| Arc::new(h) as Arc<dyn TransportObserver>)
            .ok_or_else(|| Error::invalid_state(SessionState::Active, self.state))
    }

    pub fn elapsed_ms(&self) -> u32 {
        self.handle.as_ref().map(RecorderHandle::elapsed_ms).unwrap_or(0)
    }

    pub fn progress(&self) -> RecorderProgress {
        self.recorder.progress()
    }

    pub fn set_geometry(&mut self, geometry: CanvasGeometry) {
        self.transcriber.set_geometry(geometry);
    }

    /// A key event the client transmitted
    pub fn key_sent(&mut self, key: &str, down: bool) {
        let now = self.elapsed_ms();
        self.transcriber.key_sent(key, down, now);
    }

    pub fn pointer_down(&mut self, x: f64, y: f64, button: u8) {
        let now = self.elapsed_ms();
        self.transcriber.pointer_down(x, y, button, now);
    }

    pub fn pointer_up(&mut self, x: f64, y: f64) {
        let now = self.elapsed_ms();
        self.transcriber.pointer_up(x, y, now);
    }

    pub fn wheel(&mut self, x: f64, y: f64, delta_y: f64) {
        let now = self.elapsed_ms();
        self.transcriber.wheel(x, y, delta_y, now);
    }

    /// Flush typed text that has been idle long enough
    pub fn tick(&mut self) {
        let now = self.elapsed_ms();
        self.transcriber.flush_idle(now);
    }

    /// Stop capturing, drain pending writes and hand back the session output
    pub async fn finish(&mut self) -> Result<SessionOutput> {
        if self.state != SessionState::Active {
            return Err(Error::invalid_state(SessionState::Active, self.state));
        }

        self.state = SessionState::Stopping;
        self.transcriber.deactivate();
        self.handle = None;
        let events = self.transcriber.finalize();
        let result = self.recorder.stop().await;
        self.state = SessionState::Idle;

        let summary = result?;
        info!(
            frames = summary.frames,
            events = events.len(),
            "Recording session finished"
        );
        Ok(SessionOutput { summary, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InputEvent;
    use crate::observer::ObservedStream;
    use crate::parser::{parse_bytes, TruncationPolicy};
    use crate::progress::Progress;
    use crate::storage::{FsStore, RecordingStore};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_session_lifecycle() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = Arc::new(FsStore::new(dir.path()));
        let mut session =
            RecordingSession::new(RecorderOptions::default(), CanvasGeometry::unscaled(640, 480));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.observer().is_err());

        session
            .begin(WriteTarget::Store {
                store: store.clone(),
                name: "live.bin".into(),
            })
            .await?;
        assert_eq!(session.state(), SessionState::Active);

        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = ObservedStream::new(client, session.observer()?);
        server.write_all(b"RFB 003.008\n").await?;
        let mut version = [0u8; 12];
        transport.read_exact(&mut version).await?;
        transport.write_all(&version).await?;

        session.key_sent("l", true);
        session.key_sent("s", true);
        session.key_sent("Enter", true);

        let output = session.finish().await?;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(output.summary.frames >= 2);
        assert!(matches!(&output.events[0].event, InputEvent::Type { text } if text == "ls"));
        assert_eq!(output.events.len(), 2);

        let recording = parse_bytes(&store.read("live.bin").await?, TruncationPolicy::Strict)?;
        assert!(!recording.frames()[0].from_client);
        assert!(recording.frames().last().map(|f| f.from_client).unwrap_or(false));
        Ok(())
    }

    #[tokio::test]
    async fn test_configured_session_reports_recording_progress() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store: Arc<dyn RecordingStore> = Arc::new(FsStore::new(dir.path()));
        let config = RecorderConfig {
            recording_name: "configured.bin".into(),
            record_progress_every: 2,
            ..Default::default()
        };
        let reports = Arc::new(std::sync::Mutex::new(Vec::new()));
        let progress = {
            let reports = reports.clone();
            move |p: Progress| reports.lock().unwrap().push(p)
        };

        let mut session =
            RecordingSession::from_config(&config, Arc::new(progress), CanvasGeometry::unscaled(1, 1));
        session.begin(config.write_target(store.clone())?).await?;
        let observer = session.observer()?;
        for i in 0..4u8 {
            observer.on_receive(&[i]);
        }
        let output = session.finish().await?;

        assert_eq!(output.summary.frames, 4);
        let frames: Vec<u64> = reports
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| match p {
                Progress::Recording { frames, .. } => Some(*frames),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![2, 4]);
        assert!(store.exists("configured.bin").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_finish_requires_active_session() {
        let mut session =
            RecordingSession::new(RecorderOptions::default(), CanvasGeometry::unscaled(1, 1));
        let err = session.finish().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_failed_begin_returns_to_idle() {
        let mut session =
            RecordingSession::new(RecorderOptions::default(), CanvasGeometry::unscaled(1, 1));
        let err = session
            .begin(WriteTarget::Collector {
                endpoint: "http://not-a-websocket".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectFailed { .. }));
        assert_eq!(session.state(), SessionState::Idle);
    }
}
