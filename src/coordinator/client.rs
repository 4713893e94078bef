//! HTTP client for worker and aggregator calls.
//!
//! Detect calls classify every failure as retryable or permanent for the
//! coordinator's retry loop. The aggregate call is different: it is never
//! retried and its failures surface verbatim.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::StatusCode;

use crate::error::WorkerCallError;
use crate::middleware::auth::API_KEY_HEADER;
use crate::wire::{AggregateRequest, AggregateResponse, DetectRequest, DetectResponse, DetectStatus};

pub struct WorkerClient {
    http: reqwest::Client,
    api_key: String,
    timeout_secs: u64,
}

impl WorkerClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .context("Failed to build worker HTTP client")?;

        Ok(Self {
            http,
            api_key,
            timeout_secs: timeout.as_secs(),
        })
    }

    /// One detect attempt against a worker. The configured timeout acts as
    /// the per-attempt deadline; expiry cancels the in-flight call.
    pub async fn detect(
        &self,
        base_url: &str,
        request: &DetectRequest,
    ) -> Result<DetectResponse, WorkerCallError> {
        let url = format!("{}/api/v1/detect", base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if status.is_success() {
            let body: DetectResponse = response
                .json()
                .await
                .map_err(|e| WorkerCallError::Malformed(e.to_string()))?;
            return match body.status {
                DetectStatus::Success => Ok(body),
                _ => Err(WorkerCallError::Failure(
                    body.error.unwrap_or_else(|| "unspecified worker failure".to_string()),
                )),
            };
        }

        // Non-2xx: prefer the structured error message when the worker
        // managed to produce one.
        let message = response
            .json::<DetectResponse>()
            .await
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| format!("HTTP {status}"));

        if retryable_status(status) {
            Err(WorkerCallError::Server {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(WorkerCallError::Client {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Submit the collected worker results. Not retried; a structured
    /// validation failure is returned as a normal response.
    pub async fn aggregate(
        &self,
        base_url: &str,
        request: &AggregateRequest,
    ) -> Result<AggregateResponse> {
        let url = format!("{}/api/v1/aggregate", base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .context("aggregate call failed")?;

        let status = response.status();
        response
            .json::<AggregateResponse>()
            .await
            .map_err(|e| anyhow!("aggregator returned unparseable body (HTTP {status}): {e}"))
    }

    /// Pre-flight reachability probe. Any HTTP answer counts: the retry
    /// machinery owns real failure handling, this only waits out service
    /// start-up.
    pub async fn is_reachable(&self, base_url: &str) -> bool {
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        self.http.get(&url).send().await.is_ok()
    }

    fn classify_transport(&self, error: reqwest::Error) -> WorkerCallError {
        if error.is_timeout() {
            WorkerCallError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            WorkerCallError::Connect(error.to_string())
        }
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}
