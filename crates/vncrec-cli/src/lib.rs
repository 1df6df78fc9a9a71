// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use clap::Subcommand;
use std::path::PathBuf;
use vncrec_logging::CliLoggingArgs;

pub mod collect;
pub mod convert;
pub mod inspect;
pub mod unpack;
pub mod upload;

pub use clap::Parser;

/// Command-line flags that override configuration keys
pub trait ToJsonOverrides {
    fn to_json_overrides(&self) -> serde_json::Value;
}

#[derive(clap::Parser)]
#[command(
    name = "vncrec",
    about = "Record, convert and upload VNC sessions",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "VNCREC_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub logging: CliLoggingArgs,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a collector that receives recordings or upload packages
    Collect(collect::CollectArgs),
    /// Convert a binary recording to transcript text
    Convert(convert::ConvertArgs),
    /// Print one JSON line per frame of a recording
    Inspect(inspect::InspectArgs),
    /// Export a stored recording and upload it
    Upload(upload::UploadArgs),
    /// Split a container package into its metadata and video files
    Unpack(unpack::UnpackArgs),
}

impl ToJsonOverrides for Commands {
    fn to_json_overrides(&self) -> serde_json::Value {
        match self {
            Commands::Collect(args) => args.to_json_overrides(),
            Commands::Upload(args) => args.to_json_overrides(),
            Commands::Convert(_) | Commands::Inspect(_) | Commands::Unpack(_) => {
                serde_json::json!({})
            }
        }
    }
}

/// Insert `value` under `key` when present
pub(crate) fn set_override<T: serde::Serialize>(
    overrides: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
    value: Option<T>,
) {
    if let Some(value) = value {
        if let Ok(json) = serde_json::to_value(value) {
            overrides.insert(key.to_string(), json);
        }
    }
}
