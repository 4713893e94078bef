//! Aggregation service.
//!
//! Validates that every expected worker reached a terminal state, merges
//! the successful result lists, deduplicates, imposes the deterministic
//! output order, and writes the two CSV artefacts. Exhausted workers are
//! reported in `failed_services` but never fail the request; completeness
//! violations and write failures do.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware as axum_mw,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::{AggregatorConfig, ServiceConfig};
use crate::error::AggregationError;
use crate::io::writer::{self, DETECTION_LOG_FILE, SUMMARY_FILE};
use crate::middleware::{api_key_auth, request_logging, ApiKeyAuth};
use crate::wire::{AggregateRequest, AggregateResponse, AggregateStatus, ServiceState, WireFinding};

pub struct AggregatorState {
    config: AggregatorConfig,
}

impl AggregatorState {
    pub fn new(config: AggregatorConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

/// Build the aggregator router. The single trusted caller is the
/// coordinator, so the stack is auth + payload cap + logging; no rate
/// limiting.
pub fn router(state: Arc<AggregatorState>, service: &ServiceConfig) -> Router {
    let auth = ApiKeyAuth::new(service.api_key.clone());

    Router::new()
        .route("/api/v1/aggregate", post(aggregate))
        .route("/health", get(health))
        .with_state(state)
        .layer(axum_mw::from_fn_with_state(auth, api_key_auth))
        .layer(DefaultBodyLimit::max(service.max_request_size_bytes()))
        .layer(axum_mw::from_fn(request_logging))
}

/// Run the aggregator service until the process is stopped.
pub async fn run(config: AggregatorConfig, service: ServiceConfig, port: u16) -> Result<()> {
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("failed to create output directory {}", config.output_dir.display())
    })?;

    let state = AggregatorState::new(config);
    let app = router(state, &service);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Aggregator listening");

    axum::serve(listener, app).await.context("aggregator server error")?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "aggregator",
    }))
}

async fn aggregate(
    State(state): State<Arc<AggregatorState>>,
    Json(request): Json<AggregateRequest>,
) -> Response {
    let request_id = request.request_id.clone();

    let outcome = match validate_and_merge(
        &request,
        state.config.validation_strict,
        state.config.allow_partial_results,
    ) {
        Ok(outcome) => outcome,
        Err(validation) => {
            warn!(%request_id, error = %validation, "Aggregate validation failed");
            let body = AggregateResponse {
                status: AggregateStatus::ValidationFailed,
                merged_count: 0,
                failed_services: request
                    .results
                    .iter()
                    .filter(|r| r.status != ServiceState::Success)
                    .map(|r| r.service_name.clone())
                    .collect(),
                error: Some(validation.to_string()),
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    if !outcome.failed_services.is_empty() {
        warn!(
            %request_id,
            failed_services = ?outcome.failed_services,
            "Aggregating with failed services"
        );
    }

    if let Err(write_error) = write_artefacts(
        &state.config.output_dir,
        &outcome.merged,
        state.config.pseudonymization_salt.as_deref(),
    ) {
        // Full context stays server-side; the caller sees the artefact
        // kind only.
        error!(%request_id, error = ?write_error, "Artefact write failed");
        let body = AggregateResponse {
            status: AggregateStatus::ValidationFailed,
            merged_count: 0,
            failed_services: outcome.failed_services,
            error: Some(
                write_error
                    .downcast_ref::<AggregationError>()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "failed to write detection artefacts".to_string()),
            ),
        };
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
    }

    info!(
        %request_id,
        merged = outcome.merged.len(),
        failed_services = ?outcome.failed_services,
        "Aggregate complete"
    );
    let body = AggregateResponse {
        status: AggregateStatus::Completed,
        merged_count: outcome.merged.len(),
        failed_services: outcome.failed_services,
        error: None,
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub merged: Vec<WireFinding>,
    pub failed_services: Vec<String>,
}

/// Validate completeness and merge successful result lists.
///
/// Strict mode fails closed on missing or non-terminal services;
/// `allow_partial` (or non-strict mode) records them as failed instead.
/// Exhausted-but-terminal services are always tolerated.
pub fn validate_and_merge(
    request: &AggregateRequest,
    validation_strict: bool,
    allow_partial: bool,
) -> Result<MergeOutcome, AggregationError> {
    let present: HashSet<&str> = request
        .results
        .iter()
        .map(|r| r.service_name.as_str())
        .collect();

    let missing: Vec<String> = request
        .expected_services
        .iter()
        .filter(|name| !present.contains(name.as_str()))
        .cloned()
        .collect();

    let non_final: Vec<String> = request
        .results
        .iter()
        .filter(|r| !r.final_status)
        .map(|r| r.service_name.clone())
        .collect();

    let fail_closed = validation_strict && !allow_partial;
    if fail_closed && !missing.is_empty() {
        return Err(AggregationError::MissingServices(missing));
    }
    if fail_closed && !non_final.is_empty() {
        return Err(AggregationError::NonFinalServices(non_final));
    }

    let mut failed_services: Vec<String> = Vec::new();
    failed_services.extend(missing);
    failed_services.extend(non_final.iter().cloned());

    let mut merged: Vec<WireFinding> = Vec::new();
    for result in &request.results {
        match result.status {
            ServiceState::Success => merged.extend(result.results.iter().cloned()),
            ServiceState::Exhausted => failed_services.push(result.service_name.clone()),
            ServiceState::Pending => {
                // Already recorded via the non-final list; contributes
                // nothing.
            }
        }
    }

    let mut merged = dedup_findings(merged);
    merged.sort_by_key(|f| f.sort_key());

    failed_services.sort();
    failed_services.dedup();

    Ok(MergeOutcome {
        merged,
        failed_services,
    })
}

/// Drop findings whose identity key was already seen, keeping the first
/// occurrence. Idempotent by construction.
pub fn dedup_findings(findings: Vec<WireFinding>) -> Vec<WireFinding> {
    let mut seen = HashSet::new();
    findings
        .into_iter()
        .filter(|f| seen.insert(f.dedup_key()))
        .collect()
}

fn write_artefacts(
    output_dir: &Path,
    findings: &[WireFinding],
    pseudonymization_salt: Option<&str>,
) -> Result<()> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        anyhow::Error::new(e).context(AggregationError::Write { artefact: "output directory" })
    })?;

    writer::write_summary(&output_dir.join(SUMMARY_FILE), findings)
        .context(AggregationError::Write { artefact: "detection summary" })?;
    writer::write_detection_log(
        &output_dir.join(DETECTION_LOG_FILE),
        findings,
        pseudonymization_salt,
    )
    .context(AggregationError::Write { artefact: "detection log" })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectionType;
    use crate::wire::ServiceResult;
    use chrono::{DateTime, Utc};

    fn finding(account: &str, end: &str, detection_type: DetectionType) -> WireFinding {
        WireFinding {
            account_id: account.to_string(),
            product_id: "IBM".to_string(),
            start_timestamp: "2025-01-15T10:30:00Z".parse().unwrap(),
            end_timestamp: end.parse::<DateTime<Utc>>().unwrap(),
            total_buy_qty: 3000,
            total_sell_qty: 500,
            detection_type,
            side: None,
            num_cancelled_orders: None,
            order_timestamps: None,
            alternation_percentage: None,
            price_change_percentage: None,
        }
    }

    fn success(name: &str, results: Vec<WireFinding>) -> ServiceResult {
        ServiceResult {
            service_name: name.to_string(),
            status: ServiceState::Success,
            final_status: true,
            retry_count: 0,
            results,
            error: None,
        }
    }

    fn exhausted(name: &str) -> ServiceResult {
        ServiceResult {
            service_name: name.to_string(),
            status: ServiceState::Exhausted,
            final_status: true,
            retry_count: 3,
            results: vec![],
            error: Some("connection refused".to_string()),
        }
    }

    fn request(results: Vec<ServiceResult>) -> AggregateRequest {
        AggregateRequest {
            request_id: "req-1".to_string(),
            expected_services: vec!["layering".to_string(), "wash_trading".to_string()],
            results,
        }
    }

    #[test]
    fn test_full_success_merges_everything() {
        let req = request(vec![
            success("layering", vec![finding("ACC001", "2025-01-15T10:30:09Z", DetectionType::Layering)]),
            success("wash_trading", vec![finding("ACC002", "2025-01-15T10:55:00Z", DetectionType::WashTrading)]),
        ]);

        let outcome = validate_and_merge(&req, true, false).unwrap();
        assert_eq!(outcome.merged.len(), 2);
        assert!(outcome.failed_services.is_empty());
    }

    #[test]
    fn test_exhausted_service_is_tolerated_and_reported() {
        let req = request(vec![
            success("layering", vec![finding("ACC001", "2025-01-15T10:30:09Z", DetectionType::Layering)]),
            exhausted("wash_trading"),
        ]);

        let outcome = validate_and_merge(&req, true, false).unwrap();
        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.failed_services, vec!["wash_trading".to_string()]);
    }

    #[test]
    fn test_missing_service_fails_closed() {
        let req = request(vec![success("layering", vec![])]);
        let err = validate_and_merge(&req, true, false).unwrap_err();
        assert!(matches!(err, AggregationError::MissingServices(ref names) if names == &vec!["wash_trading".to_string()]));
    }

    #[test]
    fn test_non_final_service_fails_closed() {
        let mut pending = success("wash_trading", vec![]);
        pending.status = ServiceState::Pending;
        pending.final_status = false;

        let req = request(vec![success("layering", vec![]), pending]);
        let err = validate_and_merge(&req, true, false).unwrap_err();
        assert!(matches!(err, AggregationError::NonFinalServices(_)));
    }

    #[test]
    fn test_allow_partial_downgrades_completeness_failures() {
        let req = request(vec![success(
            "layering",
            vec![finding("ACC001", "2025-01-15T10:30:09Z", DetectionType::Layering)],
        )]);

        let outcome = validate_and_merge(&req, true, true).unwrap();
        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.failed_services, vec!["wash_trading".to_string()]);
    }

    #[test]
    fn test_duplicate_findings_are_removed() {
        let shared = finding("ACC001", "2025-01-15T10:30:09Z", DetectionType::Layering);
        let req = request(vec![
            success("layering", vec![shared.clone(), shared.clone()]),
            success("wash_trading", vec![shared.clone()]),
        ]);

        let outcome = validate_and_merge(&req, true, false).unwrap();
        assert_eq!(outcome.merged.len(), 1);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let rows = vec![
            finding("ACC001", "2025-01-15T10:30:09Z", DetectionType::Layering),
            finding("ACC001", "2025-01-15T10:30:09Z", DetectionType::Layering),
            finding("ACC002", "2025-01-15T10:55:00Z", DetectionType::WashTrading),
        ];

        let once = dedup_findings(rows);
        let twice = dedup_findings(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn test_merged_output_is_deterministically_ordered() {
        let req = request(vec![
            success("wash_trading", vec![finding("ACC002", "2025-01-15T10:55:00Z", DetectionType::WashTrading)]),
            success("layering", vec![
                finding("ACC002", "2025-01-15T10:31:00Z", DetectionType::Layering),
                finding("ACC001", "2025-01-15T10:30:09Z", DetectionType::Layering),
            ]),
        ]);

        let outcome = validate_and_merge(&req, true, false).unwrap();
        let accounts: Vec<&str> = outcome.merged.iter().map(|f| f.account_id.as_str()).collect();
        assert_eq!(accounts, vec!["ACC001", "ACC002", "ACC002"]);
        assert!(outcome.merged[1].end_timestamp < outcome.merged[2].end_timestamp);
    }

    #[test]
    fn test_same_span_different_type_both_survive() {
        let layering = finding("ACC001", "2025-01-15T10:30:09Z", DetectionType::Layering);
        let mut wash = layering.clone();
        wash.detection_type = DetectionType::WashTrading;

        let req = request(vec![
            success("layering", vec![layering]),
            success("wash_trading", vec![wash]),
        ]);
        let outcome = validate_and_merge(&req, true, false).unwrap();
        assert_eq!(outcome.merged.len(), 2);
    }
}
