// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;
use tracing::error;

use rally::config::GatewayConfig;

#[derive(Parser)]
#[command(name = "rally", version, about = "Real-time game-server gateway.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the channel edge node and block until shutdown.
    Start(StartArgs),
}

#[derive(clap::Args)]
struct StartArgs {
    /// Configuration file to initialize the channel with.
    #[arg(long, short = 'c', default_value = "./config/local.yaml", env = "RALLY_CONFIG")]
    config: PathBuf,

    /// Log level (debug, info, warn, error, panic, fatal).
    #[arg(long, short = 'l', default_value = "info", env = "RALLY_LOGLEVEL")]
    loglevel: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            init_logging(&args.loglevel);

            let config = match GatewayConfig::load(&args.config) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    std::process::exit(2);
                }
            };

            if let Err(e) = rally::run(config).await {
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

/// `panic` and `fatal` are accepted for compatibility and map onto `error`.
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
