// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::Context;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use vncrec_recorder::{CollectorMode, CollectorOptions, CollectorServer, FsStore, RecorderConfig};

use crate::{set_override, ToJsonOverrides};

#[derive(Args)]
pub struct CollectArgs {
    /// Address to listen on (default: 127.0.0.1:6090)
    #[arg(long)]
    pub listen: Option<String>,

    /// Directory receiving recordings (default: recordings)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// What clients send: live frame records or finished packages
    #[arg(long, value_enum, default_value_t = CollectorMode::Stream)]
    pub mode: CollectorMode,

    /// Also write a transcript next to each finished stream recording
    #[arg(long)]
    pub transcript: bool,
}

impl ToJsonOverrides for CollectArgs {
    fn to_json_overrides(&self) -> serde_json::Value {
        let mut overrides = serde_json::Map::new();
        set_override(&mut overrides, "collector_addr", self.listen.as_ref());
        set_override(&mut overrides, "storage_dir", self.output_dir.as_ref());
        serde_json::Value::Object(overrides)
    }
}

impl CollectArgs {
    pub async fn run(self, config: RecorderConfig) -> anyhow::Result<()> {
        let addr: SocketAddr = config
            .collector_addr
            .parse()
            .with_context(|| format!("Invalid listen address: {}", config.collector_addr))?;

        std::fs::create_dir_all(&config.storage_dir).with_context(|| {
            format!("Failed to create {}", config.storage_dir.display())
        })?;
        let store = Arc::new(FsStore::new(&config.storage_dir));

        let options = CollectorOptions {
            mode: self.mode,
            convert_transcript: self.transcript,
            progress_every: config.parse_progress_every,
        };
        let mut server = CollectorServer::bind(addr, store, options).await?;
        let mut completions = server.completions();

        tokio::spawn(async move {
            while let Some(session) = completions.recv().await {
                info!(
                    peer = %session.peer,
                    name = %session.name,
                    frames = session.frames,
                    bytes = session.bytes,
                    duration_ms = session.duration.as_millis() as u64,
                    transcript = ?session.transcript,
                    "Session saved"
                );
            }
        });

        server
            .run_until(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down collector");
            })
            .await?;
        Ok(())
    }
}
