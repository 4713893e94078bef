//! Preshared-key authentication middleware.
//!
//! Every operation except `/health` requires the configured key in the
//! `X-Api-Key` header. Absence or mismatch yields a structured 401.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// Request header carrying the preshared key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared auth state: the key the service expects.
pub struct ApiKeyAuth {
    expected_key: String,
}

impl ApiKeyAuth {
    pub fn new(expected_key: String) -> Arc<Self> {
        Arc::new(Self { expected_key })
    }

    fn verify(&self, presented: Option<&str>) -> Result<(), AuthError> {
        match presented {
            None => Err(AuthError::MissingKey),
            Some(key) if key == self.expected_key => Ok(()),
            Some(_) => Err(AuthError::InvalidKey),
        }
    }
}

/// Middleware validating the preshared key; health probes pass through.
pub async fn api_key_auth(
    State(auth): State<Arc<ApiKeyAuth>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    if let Err(err) = auth.verify(presented) {
        warn!(path = %request.uri().path(), "Rejected request with {} API key",
            if matches!(err, AuthError::MissingKey) { "missing" } else { "invalid" });
        return Err(err);
    }

    Ok(next.run(request).await)
}

/// Auth error types
#[derive(Debug)]
pub enum AuthError {
    MissingKey,
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingKey => "Missing API key",
            AuthError::InvalidKey => "Invalid API key",
        };
        let body = serde_json::json!({
            "error": "unauthorized",
            "message": message,
        });
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}
