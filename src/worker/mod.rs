//! Detector worker service.
//!
//! Hosts one detection algorithm behind `POST /api/v1/detect`. Admission
//! control rejects oversized payloads before parsing and oversized event
//! lists after parsing; accepted work is answered from the idempotency
//! cache when the `(request_id, event_fingerprint)` pair has been seen
//! before. Domain failures are always reported as structured responses,
//! never bare transport errors.

pub mod cache;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
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
use tower::limit::ConcurrencyLimitLayer;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::detectors::{Detector, DetectorKind};
use crate::middleware::{
    api_key_auth, rate_limit_middleware, request_logging, ApiKeyAuth, RateLimitConfig,
    RateLimitLayer,
};
use crate::wire::{DetectRequest, DetectResponse, WireFinding};
use cache::IdempotencyCache;

/// Upper bound on in-flight requests per worker; excess connections queue.
const MAX_CONCURRENT_REQUESTS: usize = 100;

/// Shared worker state: the hosted detector plus the idempotency cache.
pub struct WorkerState {
    service_name: &'static str,
    detector: Box<dyn Detector>,
    cache: IdempotencyCache,
    invocations: AtomicU64,
    max_events_per_request: usize,
}

impl WorkerState {
    pub fn new(kind: DetectorKind, config: &ServiceConfig) -> Arc<Self> {
        Arc::new(Self {
            service_name: kind.service_name(),
            detector: kind.build(),
            cache: IdempotencyCache::new(config.cache_size),
            invocations: AtomicU64::new(0),
            max_events_per_request: config.max_events_per_request,
        })
    }

    pub fn service_name(&self) -> &'static str {
        self.service_name
    }

    /// How many times the detector has actually run (cache hits excluded).
    /// Used by the idempotency tests.
    pub fn detector_invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}

/// Build the worker router with its full middleware stack.
pub fn router(state: Arc<WorkerState>, config: &ServiceConfig) -> Router {
    let auth = ApiKeyAuth::new(config.api_key.clone());
    let limiter = RateLimitLayer::new(RateLimitConfig::per_minute(config.rate_limit_per_minute));

    Router::new()
        .route("/api/v1/detect", post(detect))
        .route("/health", get(health))
        .with_state(state)
        // Applied bottom-to-top: auth, then rate limiting, then the
        // payload cap, then request logging and the concurrency bound on
        // the outside.
        .layer(axum_mw::from_fn_with_state(auth, api_key_auth))
        .layer(axum_mw::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(DefaultBodyLimit::max(config.max_request_size_bytes()))
        .layer(axum_mw::from_fn(request_logging))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
}

/// Run the worker service until the process is stopped.
pub async fn run(kind: DetectorKind, config: ServiceConfig, port: u16) -> Result<()> {
    let state = WorkerState::new(kind, &config);
    let app = router(state.clone(), &config);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(service = state.service_name(), %addr, "Detector worker listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("worker server error")?;

    Ok(())
}

async fn health(State(state): State<Arc<WorkerState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": state.service_name,
    }))
}

async fn detect(
    State(state): State<Arc<WorkerState>>,
    Json(request): Json<DetectRequest>,
) -> Response {
    let request_id = request.request_id.clone();
    let service_name = state.service_name.to_string();

    if request.events.len() > state.max_events_per_request {
        warn!(
            %request_id,
            service = state.service_name,
            events = request.events.len(),
            limit = state.max_events_per_request,
            "Rejected oversized event list"
        );
        let body = DetectResponse::failure(
            request_id,
            service_name,
            format!(
                "event list exceeds the maximum of {} entries",
                state.max_events_per_request
            ),
        );
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
    }

    let key = (request.request_id.clone(), request.event_fingerprint.clone());
    if let Some(cached) = state.cache.get(&key) {
        info!(
            %request_id,
            service = state.service_name,
            results = cached.len(),
            "Idempotency cache hit"
        );
        let body = DetectResponse::success(request_id, service_name, cached.as_ref().clone());
        return (StatusCode::OK, Json(body)).into_response();
    }

    // The detectors are pure CPU work over the whole batch; keep them off
    // the async workers.
    let worker = state.clone();
    let events = request.events;
    let outcome = tokio::task::spawn_blocking(move || {
        worker.invocations.fetch_add(1, Ordering::Relaxed);
        worker
            .detector
            .detect(&events)
            .into_iter()
            .map(WireFinding::from)
            .collect::<Vec<_>>()
    })
    .await;

    match outcome {
        Ok(findings) => {
            info!(
                %request_id,
                service = state.service_name,
                results = findings.len(),
                "Detection complete"
            );
            state.cache.insert(key, findings.clone());
            let body = DetectResponse::success(request_id, service_name, findings);
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(join_error) => {
            error!(
                %request_id,
                service = state.service_name,
                error = %join_error,
                "Detector task failed"
            );
            let body = DetectResponse::failure(
                request_id,
                service_name,
                "internal detector failure".to_string(),
            );
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}
