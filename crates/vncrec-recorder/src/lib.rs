// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// VNC Session Recording, Replay and Export
//
// This crate captures a live RFB protocol stream into a frame-record file (or streams
// it to a collector), replays the server half of a recording through an off-screen
// decoder, and re-times the rendered stills into a fixed-rate video packaged together
// with a transcript of the user's input.

pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod observer;
pub mod package;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod raster;
pub mod recorder;
pub mod replay;
pub mod session;
pub mod storage;
pub mod synth;
pub mod transport;
pub mod upload;

// Re-export key types for convenience
pub use collector::{CollectedSession, CollectorMode, CollectorOptions, CollectorServer};
pub use config::RecorderConfig;
pub use error::{Error, Phase, PipelineError, Result};
pub use events::{
    CanvasGeometry, EventTranscriber, InputEvent, KeyAction, Point, ScrollDirection, TimedEvent,
};
pub use format::{decode_frame, pack_container, unpack_container, Frame, FrameDecode};
pub use observer::{ObservedStream, TransportObserver};
pub use package::{
    package_container, package_raw, package_transcript, ExportFormat, UploadPackage,
};
pub use parser::{parse_bytes, parse_stream, FrameParser, Recording, ServerIndex, TruncationPolicy};
pub use pipeline::{ExportOutcome, ExportSummary, Exporter, MediaBackends};
pub use progress::{LogProgress, NoProgress, Progress, ProgressSink};
pub use queue::{RecorderProgress, WriteQueue};
pub use raster::RasterStill;
pub use recorder::{Recorder, RecorderHandle, RecordingSummary, WriteTarget};
pub use replay::{Capture, CancelHandle, RenderTarget, ReplayEngine, ReplayState};
pub use session::{RecordingSession, SessionState};
pub use storage::{FrameSink, FsStore, RecordingStore, StorageEstimate};
pub use synth::{FrameSynthesizer, SynthConfig, TrackConfig, VideoArtifact, VideoEncoder};
pub use transport::SecurityWarning;
pub use upload::{upload, UploadOptions, UploadReceipt};
