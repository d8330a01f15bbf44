use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use motorsrv::config::ENV_CONFIG_PATH;
use motorsrv::{MotorService, MotorSrvConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Motor rig telemetry and speed command bridge", long_about = None)]
struct Args {
    /// Path to configuration file (.yaml, .toml or .json)
    #[arg(short, long, value_name = "FILE", env = ENV_CONFIG_PATH)]
    config: Option<PathBuf>,

    /// Load and validate the configuration, print it, then exit
    #[arg(long)]
    validate: bool,

    /// Override logging.level
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = MotorSrvConfig::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
        config.validate()?;
    }

    if args.validate {
        println!("{}", serde_yaml::to_string(&config)?);
        println!("Configuration OK");
        return Ok(());
    }

    common::logging::init_with_config(config.log_config())
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    info!("Starting MotorSrv v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = common::shutdown::shutdown_token();
    let mut service = MotorService::with_tcp(config.clone(), shutdown.clone());
    service.start();

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("API listening on http://{}", addr);

    axum::serve(listener, service.router())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("HTTP server error")?;

    service.shutdown().await;
    info!("MotorSrv exited");
    Ok(())
}
