// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Layered recorder configuration
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! `VNCREC_*` environment variables, and command-line flags. Each layer is converted to
//! JSON and merged over the previous one before deserializing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as J;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::package::ExportFormat;
use crate::parser::DEFAULT_PROGRESS_EVERY;
use crate::progress::ProgressSink;
use crate::recorder::{RecorderOptions, WriteTarget, DEFAULT_RECORD_PROGRESS_EVERY};
use crate::storage::RecordingStore;
use crate::synth::{SynthConfig, DEFAULT_BITRATE_HINT, DEFAULT_CODEC, DEFAULT_FRAME_RATE};
use crate::upload::UploadOptions;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "VNCREC";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Collector or upload endpoint (`ws://` or `wss://`)
    pub endpoint: Option<String>,
    pub export_format: ExportFormat,
    /// Stream frames live to the collector instead of storing them
    pub stream_live: bool,
    pub storage_dir: PathBuf,
    pub recording_name: String,
    pub collector_addr: String,
    pub frame_rate: u32,
    pub codec: String,
    pub bitrate_hint: u32,
    pub connect_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub settle_timeout_ms: u64,
    pub parse_progress_every: u64,
    pub record_progress_every: u64,
    pub secure_context: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            export_format: ExportFormat::Raw,
            stream_live: false,
            storage_dir: PathBuf::from("recordings"),
            recording_name: "session.bin".to_string(),
            collector_addr: "127.0.0.1:6090".to_string(),
            frame_rate: DEFAULT_FRAME_RATE,
            codec: DEFAULT_CODEC.to_string(),
            bitrate_hint: DEFAULT_BITRATE_HINT,
            connect_timeout_ms: 5_000,
            upload_timeout_ms: 120_000,
            settle_timeout_ms: 5_000,
            parse_progress_every: DEFAULT_PROGRESS_EVERY,
            record_progress_every: DEFAULT_RECORD_PROGRESS_EVERY,
            secure_context: false,
        }
    }
}

impl RecorderConfig {
    /// Load all layers; `flags` holds command-line overrides as a JSON object
    pub fn load(file: Option<&Path>, flags: J) -> Result<Self> {
        let file_layer = match file {
            Some(path) => Some(read_toml_layer(path)?),
            None => None,
        };
        Self::from_layers(file_layer, env_overlay(None)?, flags)
    }

    /// Merge explicit layers over the defaults
    pub fn from_layers(file: Option<J>, env: J, flags: J) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        for layer in file.into_iter().chain([env, flags]) {
            merge_json(&mut merged, layer);
        }
        serde_json::from_value(merged).context("invalid recorder configuration")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn recorder_options(&self, progress: Arc<dyn ProgressSink>) -> RecorderOptions {
        RecorderOptions {
            connect_timeout: self.connect_timeout(),
            progress,
            progress_every: self.record_progress_every,
        }
    }

    /// Live collector stream when `stream_live` is set, otherwise `recording_name` in `store`
    pub fn write_target(&self, store: Arc<dyn RecordingStore>) -> Result<WriteTarget> {
        if self.stream_live {
            let endpoint = self
                .endpoint
                .clone()
                .context("stream_live requires an endpoint")?;
            Ok(WriteTarget::Collector { endpoint })
        } else {
            Ok(WriteTarget::Store {
                store,
                name: self.recording_name.clone(),
            })
        }
    }

    pub fn synth_config(&self) -> SynthConfig {
        SynthConfig {
            frame_rate: self.frame_rate,
            codec: self.codec.clone(),
            bitrate_hint: self.bitrate_hint,
            ..SynthConfig::default()
        }
    }

    pub fn upload_options(&self, progress: Arc<dyn ProgressSink>) -> UploadOptions {
        UploadOptions {
            connect_timeout: self.connect_timeout(),
            overall_timeout: self.upload_timeout(),
            secure_context: self.secure_context,
            progress,
        }
    }
}

/// Read a TOML file as a JSON layer
pub fn read_toml_layer(path: &Path) -> Result<J> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {:?}", path))?;
    let value: toml::Value = content
        .parse()
        .with_context(|| format!("parsing config file {:?}", path))?;
    Ok(serde_json::to_value(value)?)
}

/// Collect `VNCREC_*` variables as a JSON layer
///
/// `source` replaces the process environment when given.
pub fn env_overlay(source: Option<HashMap<String, String>>) -> Result<J> {
    let built = config::Config::builder()
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(source),
        )
        .build()?;

    Ok(serde_json::to_value(
        built.try_deserialize::<serde_json::Map<String, J>>()?,
    )?)
}

/// Deep-merge `layer` into `base`; nulls in `layer` keep the base value
pub fn merge_json(base: &mut J, layer: J) {
    match (base, layer) {
        (J::Object(a), J::Object(b)) => {
            for (k, v) in b {
                merge_json(a.entry(k).or_insert(J::Null), v);
            }
        }
        (_, J::Null) => {}
        (a, b) => *a = b,
    }
}
