// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Upload packages
//
// A finished session is exported in one of three shapes: the raw binary recording,
// the readable transcript text, or a container bundling the event transcript with the
// synthesized video track.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::events::TimedEvent;
use crate::format::{self, transcript};
use crate::parser::Recording;
use crate::synth::VideoArtifact;

/// Container metadata schema version
pub const CONTAINER_VERSION: u32 = 1;

/// Export shape selected for a session
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Binary frame records
    #[default]
    Raw,
    /// Readable transcript text
    Transcript,
    /// Event transcript plus video track
    Container,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Raw => write!(f, "raw"),
            ExportFormat::Transcript => write!(f, "transcript"),
            ExportFormat::Container => write!(f, "container"),
        }
    }
}

/// Video track description stored in the container metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub duration_ms: u32,
    pub frame_rate: u32,
    pub start_timestamp_offset_ms: u32,
    pub frames_encoded: u32,
    pub size: usize,
}

/// JSON section of a container package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetadata {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub video: VideoMetadata,
    /// Event times relative to the first video frame
    pub events: Vec<TimedEvent>,
}

/// A finished export ready for upload
#[derive(Clone, PartialEq, Eq)]
pub enum UploadPackage {
    Bin(Vec<u8>),
    Transcript(String),
    Container { json: Vec<u8>, video: Vec<u8> },
}

impl UploadPackage {
    pub fn format(&self) -> ExportFormat {
        match self {
            UploadPackage::Bin(_) => ExportFormat::Raw,
            UploadPackage::Transcript(_) => ExportFormat::Transcript,
            UploadPackage::Container { .. } => ExportFormat::Container,
        }
    }

    /// Size of the wire form in bytes
    pub fn len(&self) -> usize {
        match self {
            UploadPackage::Bin(bytes) => bytes.len(),
            UploadPackage::Transcript(text) => text.len(),
            UploadPackage::Container { json, video } => {
                format::CONTAINER_PREFIX_SIZE + json.len() + video.len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the wire form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            UploadPackage::Bin(bytes) => Ok(bytes.clone()),
            UploadPackage::Transcript(text) => Ok(text.as_bytes().to_vec()),
            UploadPackage::Container { json, video } => format::pack_container(json, video),
        }
    }

    /// Conventional file extension for this package
    pub fn extension(&self) -> &'static str {
        match self {
            UploadPackage::Bin(_) => "bin",
            UploadPackage::Transcript(_) => "js",
            UploadPackage::Container { .. } => "vncpkg",
        }
    }
}

impl fmt::Debug for UploadPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadPackage::Bin(bytes) => f.debug_tuple("Bin").field(&bytes.len()).finish(),
            UploadPackage::Transcript(text) => {
                f.debug_tuple("Transcript").field(&text.len()).finish()
            }
            UploadPackage::Container { json, video } => f
                .debug_struct("Container")
                .field("json_len", &json.len())
                .field("video_len", &video.len())
                .finish(),
        }
    }
}

pub fn package_raw(recording: &Recording) -> Result<UploadPackage> {
    let mut bytes = Vec::with_capacity(recording.encoded_len());
    format::write_frames(recording.frames(), &mut bytes)?;
    Ok(UploadPackage::Bin(bytes))
}

pub fn package_transcript(recording: &Recording, created_at: DateTime<Utc>) -> UploadPackage {
    UploadPackage::Transcript(transcript::render(recording.frames(), created_at))
}

/// Shift event times so zero is the first video frame, dropping earlier events
pub fn normalize_events(events: &[TimedEvent], t0: u32) -> Vec<TimedEvent> {
    events
        .iter()
        .filter_map(|e| {
            e.timestamp_ms
                .checked_sub(t0)
                .map(|ts| TimedEvent::new(ts, e.event.clone()))
        })
        .collect()
}

pub fn package_container(
    events: &[TimedEvent],
    video: &VideoArtifact,
    created_at: DateTime<Utc>,
) -> Result<UploadPackage> {
    let metadata = ContainerMetadata {
        version: CONTAINER_VERSION,
        created_at,
        video: VideoMetadata {
            width: video.width,
            height: video.height,
            duration_ms: video.duration_ms,
            frame_rate: video.frame_rate,
            start_timestamp_offset_ms: video.start_timestamp_offset_ms,
            frames_encoded: video.frames_encoded,
            size: video.payload.len(),
        },
        events: normalize_events(events, video.start_timestamp_offset_ms),
    };

    Ok(UploadPackage::Container {
        json: serde_json::to_vec(&metadata)?,
        video: video.payload.clone(),
    })
}

/// Split a container package into its metadata and video payload
pub fn read_container(bytes: &[u8]) -> Result<(ContainerMetadata, &[u8])> {
    let (json, video) = format::unpack_container(bytes)?;
    let metadata: ContainerMetadata =
        serde_json::from_slice(json).map_err(|e| Error::InvalidContainer {
            message: format!("metadata is not valid JSON: {}", e),
        })?;
    Ok((metadata, video))
}
