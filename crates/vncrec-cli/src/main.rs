// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use vncrec_cli::{Cli, Commands, Parser, ToJsonOverrides};
use vncrec_recorder::RecorderConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    cli.logging.init("vncrec")?;

    let config = RecorderConfig::load(cli.config.as_deref(), cli.command.to_json_overrides())?;
    tracing::debug!(config = ?config, "Resolved configuration");

    match cli.command {
        Commands::Collect(args) => args.run(config).await,
        Commands::Convert(args) => args.run(config).await,
        Commands::Inspect(args) => args.run(config).await,
        Commands::Upload(args) => args.run(config).await,
        Commands::Unpack(args) => args.run(config).await,
    }
}
