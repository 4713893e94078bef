//! Pipeline coordinator.
//!
//! One run: read the input file, mint a request id, fingerprint the event
//! set once, fan out to every expected worker in parallel, retry each
//! branch independently under backoff, wait until every branch is
//! terminal, then hand the collected results to the aggregator.
//!
//! Branches never share mutable state; a branch exhausting its retries
//! does not disturb its sibling. Dropping the coordinator future aborts
//! the spawned branches, so cancellation propagates downward.

pub mod client;
pub mod status;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::fingerprint::fingerprint_events;
use crate::io::reader::read_events;
use crate::wire::{AggregateRequest, DetectRequest, PipelineSummary};

pub use client::WorkerClient;
pub use status::ServiceStatus;

/// Worker names the aggregator must account for, in fan-out order.
pub const EXPECTED_SERVICES: [&str; 2] = ["layering", "wash_trading"];

/// How long the pre-flight health wait tolerates unreachable services
/// before proceeding and letting the retry policy take over.
const PREFLIGHT_DEADLINE: Duration = Duration::from_secs(10);
const PREFLIGHT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Run the full pipeline over one input file.
pub async fn run_pipeline(config: &CoordinatorConfig, input: &Path) -> Result<PipelineSummary> {
    let report = read_events(input)?;
    let events = Arc::new(report.events);
    let request_id = Uuid::new_v4().to_string();
    let fingerprint = fingerprint_events(&events);

    info!(
        %request_id,
        events = events.len(),
        skipped_rows = report.skipped,
        "Pipeline starting"
    );

    let client = Arc::new(WorkerClient::new(
        config.api_key.clone(),
        config.algorithm_timeout,
    )?);

    wait_for_services(
        &client,
        &[
            &config.layering_worker_url,
            &config.wash_trading_worker_url,
            &config.aggregator_url,
        ],
    )
    .await;

    let endpoints = [
        (EXPECTED_SERVICES[0], config.layering_worker_url.clone()),
        (EXPECTED_SERVICES[1], config.wash_trading_worker_url.clone()),
    ];

    let mut branches = JoinSet::new();
    for (service_name, url) in endpoints {
        let request = DetectRequest {
            request_id: request_id.clone(),
            event_fingerprint: fingerprint.clone(),
            events: events.as_ref().clone(),
        };
        let client = client.clone();
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            backoff_base_seconds: config.retry_backoff_base_seconds,
        };
        branches.spawn(async move {
            call_worker_with_retry(&client, service_name, &url, request, policy).await
        });
    }

    let mut statuses: Vec<ServiceStatus> = Vec::with_capacity(EXPECTED_SERVICES.len());
    while let Some(joined) = branches.join_next().await {
        statuses.push(joined.context("worker branch panicked")?);
    }

    // The wait discipline above makes a non-terminal record impossible;
    // hitting this is a programmer error and fatal for the request.
    for status in &statuses {
        if !status.final_status {
            bail!(
                "worker {} finished without a terminal state",
                status.service_name
            );
        }
    }

    let aggregate_request = AggregateRequest {
        request_id: request_id.clone(),
        expected_services: EXPECTED_SERVICES.iter().map(|s| s.to_string()).collect(),
        results: statuses.into_iter().map(|s| s.into_service_result()).collect(),
    };

    let aggregate_response = client
        .aggregate(&config.aggregator_url, &aggregate_request)
        .await?;

    info!(
        %request_id,
        status = ?aggregate_response.status,
        merged = aggregate_response.merged_count,
        failed_services = ?aggregate_response.failed_services,
        "Pipeline finished"
    );

    Ok(PipelineSummary {
        request_id,
        status: aggregate_response.status,
        event_count: events.len(),
        aggregated_count: aggregate_response.merged_count,
        failed_services: aggregate_response.failed_services,
        error: aggregate_response.error,
    })
}

/// Pre-flight wait: poll each service's health endpoint until it answers
/// or the deadline passes. An unreachable service only logs a warning;
/// the per-branch retry policy decides the final outcome.
async fn wait_for_services(client: &WorkerClient, urls: &[&str]) {
    for &url in urls {
        let started = tokio::time::Instant::now();
        loop {
            if client.is_reachable(url).await {
                break;
            }
            if started.elapsed() >= PREFLIGHT_DEADLINE {
                warn!(url, "Service still unreachable after pre-flight wait");
                break;
            }
            tokio::time::sleep(PREFLIGHT_POLL_INTERVAL).await;
        }
    }
}

#[derive(Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    backoff_base_seconds: f64,
}

/// Sleep before retry `attempt` (zero-based): `base^attempt` seconds, so
/// the default base of 2 yields 1 s, 2 s, 4 s.
fn backoff_delay(base_seconds: f64, attempt: u32) -> Duration {
    Duration::from_secs_f64(base_seconds.powi(attempt as i32))
}

/// Drive one worker branch to a terminal state. Retries reuse the same
/// `(request_id, event_fingerprint)` pair so the worker's idempotency
/// cache short-circuits duplicated work.
async fn call_worker_with_retry(
    client: &WorkerClient,
    service_name: &str,
    url: &str,
    request: DetectRequest,
    policy: RetryPolicy,
) -> ServiceStatus {
    let mut status = ServiceStatus::pending(service_name);
    let mut attempt: u32 = 0;

    loop {
        match client.detect(url, &request).await {
            Ok(response) => {
                let results = response.results.unwrap_or_default();
                info!(
                    request_id = %request.request_id,
                    service = service_name,
                    results = results.len(),
                    retries = attempt,
                    "Worker succeeded"
                );
                status.mark_success(results);
                return status;
            }
            Err(error) if error.is_retryable() && attempt < policy.max_retries => {
                let delay = backoff_delay(policy.backoff_base_seconds, attempt);
                warn!(
                    request_id = %request.request_id,
                    service = service_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Worker call failed; backing off before retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                status.retry_count = attempt;
            }
            Err(error) => {
                warn!(
                    request_id = %request.request_id,
                    service = service_name,
                    retries = attempt,
                    error = %error,
                    "Worker exhausted"
                );
                status.mark_exhausted(error.to_string());
                return status;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_follows_base_powers() {
        assert_eq!(backoff_delay(2.0, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(2.0, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2.0, 2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_with_fractional_base_stays_short() {
        assert!(backoff_delay(0.1, 1) <= Duration::from_millis(100));
    }
}
