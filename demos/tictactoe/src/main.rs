// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use rally::bus::{Bus, NatsBus};
use rally::config::GatewayConfig;
use rally::registry::ServiceRegistry;
use rally_tictactoe::GameplayService;

#[derive(Parser)]
#[command(name = "rally-tictactoe", version, about = "Play tic-tac-toe with friends.")]
struct Cli {
    /// Configuration file to initialize this service with.
    #[arg(long, short = 'c', default_value = "./config/local.yaml", env = "RALLY_CONFIG")]
    config: PathBuf,

    /// Log level (debug, info, warn, error, panic, fatal).
    #[arg(long, short = 'l', default_value = "warn", env = "RALLY_LOGLEVEL")]
    loglevel: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.loglevel);

    if let Err(e) = serve(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn serve(cli: Cli) -> anyhow::Result<()> {
    let config = GatewayConfig::load(&cli.config)?;

    let bus: Arc<dyn Bus> = Arc::new(NatsBus::connect(&config.channel.services.nats.url).await?);
    let registry = Arc::new(ServiceRegistry::new(bus));
    registry.register(Arc::new(GameplayService::new())).await?;

    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                registry.stop().await;
            }
        });
    }

    registry.listen().await;
    Ok(())
}

fn init_logging(level: &str) {
    let level = match level {
        "panic" | "fatal" => "error",
        other => other,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_owned())),
        )
        .init();
}
