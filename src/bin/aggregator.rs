//! Aggregator service binary.
//!
//! Receives the coordinator's collected worker results, validates
//! completeness, merges, and writes the detection artefacts.

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentinel_backend::aggregator;
use sentinel_backend::config::{AggregatorConfig, ServiceConfig};

#[derive(Parser)]
#[command(name = "sentinel-aggregator", about = "Merge worker results and write artefacts")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8083)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = AggregatorConfig::from_env()?;
    let service = ServiceConfig::from_env()?;

    aggregator::run(config, service, args.port).await
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
