//! Sentinel coordinator CLI.
//!
//! One invocation runs the full pipeline over one input file: read events,
//! fan out to the detector workers, wait for every branch to reach a
//! terminal state, submit the results to the aggregator, and print the run
//! summary as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentinel_backend::config::CoordinatorConfig;
use sentinel_backend::coordinator::run_pipeline;
use sentinel_backend::wire::AggregateStatus;

#[derive(Parser)]
#[command(name = "sentinel", about = "Run the surveillance pipeline over one input file")]
struct Args {
    /// Input events CSV (header plus the seven event fields).
    #[arg(long)]
    input: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    init_tracing();

    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "Pipeline run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = CoordinatorConfig::from_env()?;
    let summary = run_pipeline(&config, &args.input).await?;

    if !summary.failed_services.is_empty() {
        warn!(
            failed_services = ?summary.failed_services,
            "Pipeline completed with missing detectors"
        );
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(match summary.status {
        AggregateStatus::Completed => ExitCode::SUCCESS,
        AggregateStatus::ValidationFailed => ExitCode::FAILURE,
    })
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
