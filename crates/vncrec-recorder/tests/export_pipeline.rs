// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end container export against in-test decoder and encoder fakes

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::sync::{Arc, Mutex};
use vncrec_recorder::package::read_container;
use vncrec_recorder::{
    ExportFormat, Exporter, Frame, InputEvent, MediaBackends, Progress, RasterStill,
    RecorderConfig, Recording, RenderTarget, TimedEvent, TrackConfig, VideoEncoder,
};

/// Decoder fake: the first payload byte is the alpha of the rendered surface
struct AlphaTarget {
    alpha: u8,
    delivered: usize,
    fail_snapshots: Vec<usize>,
}

impl AlphaTarget {
    fn new(fail_snapshots: Vec<usize>) -> Self {
        Self {
            alpha: 0,
            delivered: 0,
            fail_snapshots,
        }
    }
}

#[async_trait]
impl RenderTarget for AlphaTarget {
    async fn deliver(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        self.alpha = payload.first().copied().unwrap_or(0);
        self.delivered += 1;
        Ok(())
    }

    fn has_pending_work(&self) -> bool {
        false
    }

    async fn await_settled(&mut self) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn snapshot(&mut self) -> anyhow::Result<RasterStill> {
        if self.fail_snapshots.contains(&(self.delivered - 1)) {
            anyhow::bail!("canvas unavailable");
        }
        Ok(RgbaImage::from_pixel(
            7,
            5,
            Rgba([self.delivered as u8, 0, 0, self.alpha]),
        ))
    }

    fn current_width(&self) -> u32 {
        7
    }

    fn current_height(&self) -> u32 {
        5
    }
}

/// Encoder fake: the payload lists the red channel of every encoded still
#[derive(Default)]
struct ListEncoder {
    track: Option<TrackConfig>,
    shown: Vec<u8>,
}

#[async_trait]
impl VideoEncoder for ListEncoder {
    async fn add_track(&mut self, config: &TrackConfig) -> anyhow::Result<()> {
        self.track = Some(config.clone());
        Ok(())
    }

    async fn encode(
        &mut self,
        still: &RasterStill,
        _timestamp_s: f64,
        _duration_s: f64,
    ) -> anyhow::Result<()> {
        self.shown.push(still.get_pixel(0, 0)[0]);
        Ok(())
    }

    async fn finalize(&mut self) -> anyhow::Result<Vec<u8>> {
        Ok(self.shown.clone())
    }
}

fn recording() -> Recording {
    Recording::from_frames(vec![
        Frame::server(0, vec![0]),
        Frame::client(10, vec![9]),
        Frame::server(20, vec![255]),
        Frame::server(60, vec![255]),
        Frame::client(70, vec![9]),
        Frame::server(150, vec![255]),
    ])
}

#[tokio::test]
async fn container_export_aligns_video_and_events() {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let progress = {
        let reports = reports.clone();
        move |p: Progress| reports.lock().unwrap().push(p)
    };
    let exporter = Exporter::new(RecorderConfig::default(), Arc::new(progress));

    let mut target = AlphaTarget::new(Vec::new());
    let mut encoder = ListEncoder::default();
    let events = vec![
        TimedEvent::new(10, InputEvent::Click { x: 3, y: 4, button: 1 }),
        TimedEvent::new(70, InputEvent::Type { text: "ok".into() }),
    ];

    let outcome = exporter
        .export(
            &recording(),
            ExportFormat::Container,
            &events,
            Some(MediaBackends {
                target: &mut target,
                encoder: &mut encoder,
            }),
        )
        .await
        .unwrap();

    assert_eq!(target.delivered, 4);
    assert_eq!(outcome.summary.captures, 4);
    assert_eq!(outcome.summary.server_frames, 4);

    // t0 = 20; windows [20,62) [62,104) [104,146) [146,188)
    assert_eq!(encoder.shown, vec![3, 3, 3, 4]);
    assert_eq!(encoder.track.as_ref().map(|t| (t.width, t.height)), Some((8, 6)));

    let bytes = outcome.package.to_bytes().unwrap();
    let (metadata, video) = read_container(&bytes).unwrap();
    assert_eq!(video, &[3, 3, 3, 4]);
    assert_eq!(metadata.video.start_timestamp_offset_ms, 20);
    assert_eq!(metadata.video.duration_ms, 130);
    assert_eq!(metadata.events, vec![TimedEvent::new(50, InputEvent::Type { text: "ok".into() })]);

    let reports = reports.lock().unwrap();
    assert!(reports
        .iter()
        .any(|p| matches!(p, Progress::Replaying { processed: 4, total: 4 })));
    assert!(reports.iter().any(|p| matches!(p, Progress::Encoding { .. })));
}

#[tokio::test]
async fn snapshot_failures_keep_capture_alignment() {
    let exporter = Exporter::new(RecorderConfig::default(), Arc::new(vncrec_recorder::NoProgress));
    let mut target = AlphaTarget::new(vec![2]);
    let mut encoder = ListEncoder::default();

    let outcome = exporter
        .export(
            &recording(),
            ExportFormat::Container,
            &[],
            Some(MediaBackends {
                target: &mut target,
                encoder: &mut encoder,
            }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.summary.captures, 4);
    assert_eq!(outcome.summary.snapshot_failures, 1);
    // The still after frame 60 is missing, so the one from frame 20 is held
    assert_eq!(encoder.shown, vec![2, 2, 2, 4]);
}

#[tokio::test]
async fn all_failed_snapshots_fail_in_encoding_phase() {
    let exporter = Exporter::new(RecorderConfig::default(), Arc::new(vncrec_recorder::NoProgress));
    let mut target = AlphaTarget::new(vec![0, 1, 2, 3]);
    let mut encoder = ListEncoder::default();

    let err = exporter
        .export(
            &recording(),
            ExportFormat::Container,
            &[],
            Some(MediaBackends {
                target: &mut target,
                encoder: &mut encoder,
            }),
        )
        .await
        .unwrap_err();

    assert_eq!(err.phase, vncrec_recorder::Phase::Encoding);
    assert!(matches!(err.source, vncrec_recorder::Error::NoValidFrames));
}
