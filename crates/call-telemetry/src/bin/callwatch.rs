//! callwatch - call-center telemetry service

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use callwatch_call_telemetry::config::TelemetryConfig;
use callwatch_call_telemetry::logging::{log_welcome, setup_logging};
use callwatch_call_telemetry::server::TelemetryServerBuilder;
use callwatch_call_telemetry::VERSION;

#[derive(Parser, Debug)]
#[command(name = "callwatch")]
#[command(about = "Call-center telemetry: webhook ingestion, live metrics, alerts and provider sync")]
pub struct Args {
    /// TOML configuration file; CALLWATCH__SECTION__KEY variables override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long)]
    pub bind: Option<String>,

    /// sqlx SQLite URL (`sqlite://callwatch.db`, `sqlite::memory:`)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    pub json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TelemetryConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.json_logs {
        config.logging.json = true;
    }
    config.validate().context("validating configuration")?;

    setup_logging(config.logging.to_logging_config()?)?;
    log_welcome("callwatch", VERSION);
    info!("🗄️ Database: {}", config.database.url);
    info!("🌐 Bind address: {}", config.server.bind_address);
    info!(
        "⏱️ Recompute interval: {}s, {} alert rule(s)",
        config.metrics.recompute_interval_secs,
        config.alerts.rules.len()
    );

    let server = TelemetryServerBuilder::new()
        .with_config(config)
        .build()
        .await
        .context("building telemetry server")?;

    server.run().await?;
    Ok(())
}
