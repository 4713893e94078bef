//! Detector worker service binary.
//!
//! Hosts one detection algorithm (`--detector layering|wash_trading`)
//! behind the `detect` endpoint with auth, rate limiting, and admission
//! control.

use anyhow::{anyhow, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentinel_backend::config::ServiceConfig;
use sentinel_backend::detectors::DetectorKind;
use sentinel_backend::worker;

#[derive(Parser)]
#[command(name = "sentinel-worker", about = "Host one detection algorithm")]
struct Args {
    /// Which detector this worker hosts: `layering` or `wash_trading`.
    #[arg(long)]
    detector: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8081)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let kind: DetectorKind = args.detector.parse().map_err(|e: String| anyhow!(e))?;
    let config = ServiceConfig::from_env()?;

    worker::run(kind, config, args.port).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentinel_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
