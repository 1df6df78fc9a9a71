// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Fixed-rate video synthesis
//
// Captures arrive at irregular, decoder-driven times. The synthesizer re-times them onto
// a fixed output grid: each output frame shows the last capture that landed inside its
// window, or holds the previous one when nothing new arrived.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::progress::{NoProgress, Progress, ProgressSink};
use crate::raster::{is_opaque, round_up_even, RasterStill, ALPHA_SAMPLE_STRIDE};
use crate::replay::Capture;

pub const DEFAULT_FRAME_RATE: u32 = 24;
pub const DEFAULT_CODEC: &str = "avc1.42001f";
pub const DEFAULT_BITRATE_HINT: u32 = 2_500_000;

/// Video track parameters handed to the encoder once, before any frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackConfig {
    pub codec: String,
    pub bitrate_hint: u32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Platform video encoder producing one finished video payload
#[async_trait]
pub trait VideoEncoder: Send {
    async fn add_track(&mut self, config: &TrackConfig) -> anyhow::Result<()>;

    /// Encode one still shown from `timestamp_s` for `duration_s`
    async fn encode(
        &mut self,
        still: &RasterStill,
        timestamp_s: f64,
        duration_s: f64,
    ) -> anyhow::Result<()>;

    async fn finalize(&mut self) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub frame_rate: u32,
    pub codec: String,
    pub bitrate_hint: u32,
    pub alpha_sample_stride: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            codec: DEFAULT_CODEC.to_string(),
            bitrate_hint: DEFAULT_BITRATE_HINT,
            alpha_sample_stride: ALPHA_SAMPLE_STRIDE,
        }
    }
}

impl SynthConfig {
    /// Output frame interval in whole milliseconds, rounded up
    pub fn interval_ms(&self) -> u32 {
        let fps = self.frame_rate.max(1);
        1000u32.div_ceil(fps)
    }
}

/// Finished video track
#[derive(Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    pub payload: Vec<u8>,
    /// Recording timestamp of the first included capture
    pub start_timestamp_offset_ms: u32,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u32,
    pub frame_rate: u32,
    pub frames_encoded: u32,
    pub frames_dropped: u32,
}

impl std::fmt::Debug for VideoArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoArtifact")
            .field("payload_len", &self.payload.len())
            .field("start_timestamp_offset_ms", &self.start_timestamp_offset_ms)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("duration_ms", &self.duration_ms)
            .field("frame_rate", &self.frame_rate)
            .field("frames_encoded", &self.frames_encoded)
            .field("frames_dropped", &self.frames_dropped)
            .finish()
    }
}

/// One output frame on the fixed grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFrame {
    /// Window start relative to the first included capture
    pub window_start_ms: u32,
    /// Index into the capture slice
    pub capture: usize,
}

/// First capture to include: the first fully opaque still, else the first capture
pub fn find_start(captures: &[Capture], alpha_sample_stride: usize) -> usize {
    captures
        .iter()
        .position(|c| {
            c.image
                .as_ref()
                .is_some_and(|still| is_opaque(still, alpha_sample_stride))
        })
        .unwrap_or(0)
}

/// Assign captures to fixed-rate output windows
///
/// `captures` must already start at the first included capture. Windows with no valid
/// capture at or before them are skipped.
pub fn bucket_captures(captures: &[Capture], interval_ms: u32) -> Vec<OutputFrame> {
    let (Some(first), Some(last)) = (captures.first(), captures.last()) else {
        return Vec::new();
    };
    let interval = interval_ms.max(1) as u64;
    let t0 = first.timestamp_ms as u64;
    let span = (last.timestamp_ms as u64).saturating_sub(t0);
    let windows = span / interval + 1;

    let mut frames = Vec::new();
    let mut cursor = 0;
    let mut current: Option<usize> = None;

    for k in 0..windows {
        let window_end = t0 + (k + 1) * interval;
        while cursor < captures.len() && (captures[cursor].timestamp_ms as u64) < window_end {
            if captures[cursor].image.is_some() {
                current = Some(cursor);
            }
            cursor += 1;
        }

        if let Some(capture) = current {
            frames.push(OutputFrame {
                window_start_ms: (k * interval) as u32,
                capture,
            });
        }
    }

    frames
}

/// Converts replay captures into a fixed-rate video through an encoder
pub struct FrameSynthesizer {
    config: SynthConfig,
    progress: Arc<dyn ProgressSink>,
}

impl FrameSynthesizer {
    pub fn new(config: SynthConfig) -> Self {
        Self {
            config,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    fn track_dimensions(&self, captures: &[Capture]) -> Option<(u32, u32)> {
        let (width, height) = captures
            .iter()
            .rev()
            .find(|c| c.has_known_dimensions())
            .map(|c| (c.width, c.height))
            .or_else(|| {
                captures
                    .iter()
                    .find_map(|c| c.image.as_ref())
                    .map(|still| (still.width(), still.height()))
            })?;
        Some((round_up_even(width), round_up_even(height)))
    }

    pub async fn synthesize(
        &self,
        captures: &[Capture],
        encoder: &mut dyn VideoEncoder,
    ) -> Result<VideoArtifact> {
        let start = find_start(captures, self.config.alpha_sample_stride);
        let included = &captures[start.min(captures.len())..];
        if !included.iter().any(|c| c.image.is_some()) {
            return Err(Error::NoValidFrames);
        }

        let t0 = included[0].timestamp_ms;
        let last = included[included.len() - 1].timestamp_ms;
        let interval_ms = self.config.interval_ms();
        let (width, height) = self.track_dimensions(included).ok_or(Error::NoValidFrames)?;

        debug!(
            skipped = start,
            t0, width, height, interval_ms, "Synthesizing video track"
        );

        let track = TrackConfig {
            codec: self.config.codec.clone(),
            bitrate_hint: self.config.bitrate_hint,
            width,
            height,
            frame_rate: self.config.frame_rate,
        };
        encoder
            .add_track(&track)
            .await
            .map_err(|e| Error::EncoderFailed {
                message: format!("adding track: {:#}", e),
            })?;

        let plan = bucket_captures(included, interval_ms);
        let total = plan.len();
        let duration_s = interval_ms as f64 / 1000.0;
        let mut encoded = 0u32;
        let mut dropped = 0u32;

        for (i, frame) in plan.iter().enumerate() {
            let Some(still) = included[frame.capture].image.as_ref() else {
                continue;
            };
            let timestamp_s = frame.window_start_ms as f64 / 1000.0;

            match encoder.encode(still, timestamp_s, duration_s).await {
                Ok(()) => encoded += 1,
                Err(e) => {
                    let failure = Error::EncodeFrameFailure {
                        output_index: i as u32,
                        message: format!("{:#}", e),
                    };
                    warn!(error = %failure, "Skipping output frame");
                    dropped += 1;
                }
            }

            let emitted = i + 1;
            if emitted % self.config.frame_rate.max(1) as usize == 0 || emitted == total {
                self.progress.report(Progress::Encoding { emitted, total });
            }
        }

        if encoded == 0 {
            return Err(Error::NoValidFrames);
        }

        let payload = encoder.finalize().await.map_err(|e| Error::EncoderFailed {
            message: format!("finalizing: {:#}", e),
        })?;

        info!(
            frames_encoded = encoded,
            frames_dropped = dropped,
            bytes = payload.len(),
            duration_ms = last.saturating_sub(t0),
            "Video track finished"
        );

        Ok(VideoArtifact {
            payload,
            start_timestamp_offset_ms: t0,
            width,
            height,
            duration_ms: last.saturating_sub(t0),
            frame_rate: self.config.frame_rate,
            frames_encoded: encoded,
            frames_dropped: dropped,
        })
    }
}

impl Default for FrameSynthesizer {
    fn default() -> Self {
        Self::new(SynthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn capture(sequence: u32, timestamp_ms: u32, alpha: Option<u8>) -> Capture {
        let image = alpha.map(|a| RgbaImage::from_pixel(5, 3, Rgba([sequence as u8, 0, 0, a])));
        Capture {
            sequence,
            source_frame_index: sequence,
            timestamp_ms,
            image,
            width: 5,
            height: 3,
        }
    }

    #[derive(Default)]
    struct RecordingEncoder {
        track: Option<TrackConfig>,
        frames: Vec<(u8, f64, f64)>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl VideoEncoder for RecordingEncoder {
        async fn add_track(&mut self, config: &TrackConfig) -> anyhow::Result<()> {
            self.track = Some(config.clone());
            Ok(())
        }

        async fn encode(
            &mut self,
            still: &RasterStill,
            timestamp_s: f64,
            duration_s: f64,
        ) -> anyhow::Result<()> {
            if self.fail_on == Some(self.frames.len()) {
                self.fail_on = None;
                anyhow::bail!("encoder queue full");
            }
            self.frames.push((still.get_pixel(0, 0)[0], timestamp_s, duration_s));
            Ok(())
        }

        async fn finalize(&mut self) -> anyhow::Result<Vec<u8>> {
            Ok(vec![0xAB; self.frames.len()])
        }
    }

    #[test]
    fn test_interval_rounds_up() {
        assert_eq!(SynthConfig::default().interval_ms(), 42);
        let config = SynthConfig {
            frame_rate: 30,
            ..Default::default()
        };
        assert_eq!(config.interval_ms(), 34);
    }

    #[test]
    fn test_bucketing_holds_previous_capture() {
        let captures = vec![
            capture(0, 0, Some(255)),
            capture(1, 50, Some(255)),
            capture(2, 130, Some(255)),
            capture(3, 260, Some(255)),
        ];

        let plan = bucket_captures(&captures, 42);
        let picked: Vec<(u32, usize)> = plan.iter().map(|f| (f.window_start_ms, f.capture)).collect();
        assert_eq!(
            picked,
            vec![(0, 0), (42, 1), (84, 1), (126, 2), (168, 2), (210, 2), (252, 3)]
        );
    }

    #[test]
    fn test_bucketing_picks_last_in_window_and_skips_leading_gaps() {
        let captures = vec![
            capture(0, 0, None),
            capture(1, 50, Some(255)),
            capture(2, 60, Some(255)),
        ];

        let plan = bucket_captures(&captures, 42);
        assert_eq!(
            plan,
            vec![OutputFrame {
                window_start_ms: 42,
                capture: 2
            }]
        );
    }

    #[test]
    fn test_start_at_first_opaque_capture() {
        let captures = vec![
            capture(0, 0, Some(0)),
            capture(1, 20, Some(255)),
            capture(2, 40, Some(255)),
        ];
        assert_eq!(find_start(&captures, ALPHA_SAMPLE_STRIDE), 1);

        let none_opaque = vec![capture(0, 5, Some(10)), capture(1, 9, Some(10))];
        assert_eq!(find_start(&none_opaque, ALPHA_SAMPLE_STRIDE), 0);
    }

    #[tokio::test]
    async fn test_synthesize_skips_transparent_lead_in() {
        let captures = vec![
            capture(0, 0, Some(0)),
            capture(1, 20, Some(255)),
            capture(2, 100, Some(255)),
        ];
        let mut encoder = RecordingEncoder::default();

        let artifact = FrameSynthesizer::default()
            .synthesize(&captures, &mut encoder)
            .await
            .unwrap();

        assert_eq!(artifact.start_timestamp_offset_ms, 20);
        assert_eq!(artifact.duration_ms, 80);
        assert_eq!(artifact.width, 6);
        assert_eq!(artifact.height, 4);

        let track = encoder.track.unwrap();
        assert_eq!(track.frame_rate, 24);
        assert_eq!((track.width, track.height), (6, 4));

        // Capture at 100 is 80 ms after t0, inside the second window
        let shown: Vec<u8> = encoder.frames.iter().map(|f| f.0).collect();
        assert_eq!(shown, vec![1, 2, 2]);
        assert!(encoder.frames.iter().all(|f| (f.2 - 0.042).abs() < 1e-9));
        assert!((encoder.frames[2].1 - 0.084).abs() < 1e-9);
        assert_eq!(artifact.frames_encoded, 3);
    }

    #[tokio::test]
    async fn test_encode_failure_is_skipped() {
        let captures = vec![capture(0, 0, Some(255)), capture(1, 100, Some(255))];
        let mut encoder = RecordingEncoder {
            fail_on: Some(1),
            ..Default::default()
        };

        let artifact = FrameSynthesizer::default()
            .synthesize(&captures, &mut encoder)
            .await
            .unwrap();

        assert_eq!(artifact.frames_dropped, 1);
        assert_eq!(artifact.frames_encoded, 2);
    }

    #[tokio::test]
    async fn test_no_usable_captures() {
        let mut encoder = RecordingEncoder::default();
        let synth = FrameSynthesizer::default();

        let err = synth.synthesize(&[], &mut encoder).await.unwrap_err();
        assert!(matches!(err, Error::NoValidFrames));

        let failed = vec![capture(0, 0, None), capture(1, 10, None)];
        let err = synth.synthesize(&failed, &mut encoder).await.unwrap_err();
        assert!(matches!(err, Error::NoValidFrames));
        assert!(encoder.track.is_none());
    }
}
