//! Wire contract shared by the coordinator, workers, and aggregator.
//!
//! Every cross-component call is JSON over HTTP with the shapes below.
//! Findings travel as a flat row (`WireFinding`) whose variant-specific
//! fields are optional; the conversion back to the tagged in-memory form
//! validates that the fields required by the detection type are present.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::FindingConversionError;
use crate::models::{DetectionType, SequenceCore, Side, SuspiciousSequence, TransactionEvent};

/// `POST /api/v1/detect` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    pub request_id: String,
    /// 64-hex digest of the event set; the idempotency key together with
    /// `request_id`.
    pub event_fingerprint: String,
    pub events: Vec<TransactionEvent>,
}

/// Outcome of a single detect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectStatus {
    Success,
    Failure,
    Timeout,
}

/// `POST /api/v1/detect` response body. Workers always answer with this
/// shape, even for rejected requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub request_id: String,
    pub service_name: String,
    pub status: DetectStatus,
    pub results: Option<Vec<WireFinding>>,
    pub error: Option<String>,
}

impl DetectResponse {
    pub fn success(request_id: String, service_name: String, results: Vec<WireFinding>) -> Self {
        Self {
            request_id,
            service_name,
            status: DetectStatus::Success,
            results: Some(results),
            error: None,
        }
    }

    pub fn failure(request_id: String, service_name: String, error: String) -> Self {
        Self {
            request_id,
            service_name,
            status: DetectStatus::Failure,
            results: None,
            error: Some(error),
        }
    }
}

/// Terminal-state bookkeeping for one worker, as reported to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Pending,
    Success,
    Exhausted,
}

/// One worker's final outcome inside an aggregate request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResult {
    pub service_name: String,
    pub status: ServiceState,
    pub final_status: bool,
    pub retry_count: u32,
    #[serde(default)]
    pub results: Vec<WireFinding>,
    pub error: Option<String>,
}

/// `POST /api/v1/aggregate` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRequest {
    pub request_id: String,
    pub expected_services: Vec<String>,
    pub results: Vec<ServiceResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Completed,
    ValidationFailed,
}

/// `POST /api/v1/aggregate` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResponse {
    pub status: AggregateStatus,
    pub merged_count: usize,
    pub failed_services: Vec<String>,
    pub error: Option<String>,
}

/// Coordinator run summary returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub request_id: String,
    pub status: AggregateStatus,
    pub event_count: usize,
    pub aggregated_count: usize,
    pub failed_services: Vec<String>,
    pub error: Option<String>,
}

/// Flat finding row used on the wire and in the CSV artefacts.
///
/// Layering rows carry `side`, `num_cancelled_orders` and
/// `order_timestamps`; wash-trading rows carry `alternation_percentage`
/// and optionally `price_change_percentage`. The other variant's fields
/// are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFinding {
    pub account_id: String,
    pub product_id: String,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    pub total_buy_qty: i64,
    pub total_sell_qty: i64,
    pub detection_type: DetectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_cancelled_orders: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_timestamps: Option<Vec<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternation_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_change_percentage: Option<Decimal>,
}

impl WireFinding {
    /// Identity for deduplication across workers.
    pub fn dedup_key(&self) -> (String, String, DateTime<Utc>, DateTime<Utc>, DetectionType) {
        (
            self.account_id.clone(),
            self.product_id.clone(),
            self.start_timestamp,
            self.end_timestamp,
            self.detection_type,
        )
    }

    /// Deterministic merge ordering:
    /// `(account_id, product_id, end_timestamp, detection_type)`.
    pub fn sort_key(&self) -> (String, String, DateTime<Utc>, DetectionType) {
        (
            self.account_id.clone(),
            self.product_id.clone(),
            self.end_timestamp,
            self.detection_type,
        )
    }
}

impl From<SuspiciousSequence> for WireFinding {
    fn from(finding: SuspiciousSequence) -> Self {
        match finding {
            SuspiciousSequence::Layering {
                core,
                side,
                num_cancelled_orders,
                order_timestamps,
            } => Self {
                account_id: core.account_id,
                product_id: core.product_id,
                start_timestamp: core.start_timestamp,
                end_timestamp: core.end_timestamp,
                total_buy_qty: core.total_buy_qty,
                total_sell_qty: core.total_sell_qty,
                detection_type: DetectionType::Layering,
                side: Some(side),
                num_cancelled_orders: Some(num_cancelled_orders),
                order_timestamps: Some(order_timestamps),
                alternation_percentage: None,
                price_change_percentage: None,
            },
            SuspiciousSequence::WashTrading {
                core,
                alternation_percentage,
                price_change_percentage,
            } => Self {
                account_id: core.account_id,
                product_id: core.product_id,
                start_timestamp: core.start_timestamp,
                end_timestamp: core.end_timestamp,
                total_buy_qty: core.total_buy_qty,
                total_sell_qty: core.total_sell_qty,
                detection_type: DetectionType::WashTrading,
                side: None,
                num_cancelled_orders: None,
                order_timestamps: None,
                alternation_percentage: Some(alternation_percentage),
                price_change_percentage,
            },
        }
    }
}

impl TryFrom<WireFinding> for SuspiciousSequence {
    type Error = FindingConversionError;

    fn try_from(row: WireFinding) -> Result<Self, Self::Error> {
        let core = SequenceCore {
            account_id: row.account_id,
            product_id: row.product_id,
            start_timestamp: row.start_timestamp,
            end_timestamp: row.end_timestamp,
            total_buy_qty: row.total_buy_qty,
            total_sell_qty: row.total_sell_qty,
        };
        match row.detection_type {
            DetectionType::Layering => Ok(SuspiciousSequence::Layering {
                core,
                side: row.side.ok_or(FindingConversionError {
                    detection_type: "LAYERING",
                    field: "side",
                })?,
                num_cancelled_orders: row.num_cancelled_orders.ok_or(FindingConversionError {
                    detection_type: "LAYERING",
                    field: "num_cancelled_orders",
                })?,
                order_timestamps: row.order_timestamps.ok_or(FindingConversionError {
                    detection_type: "LAYERING",
                    field: "order_timestamps",
                })?,
            }),
            DetectionType::WashTrading => Ok(SuspiciousSequence::WashTrading {
                core,
                alternation_percentage: row.alternation_percentage.ok_or(
                    FindingConversionError {
                        detection_type: "WASH_TRADING",
                        field: "alternation_percentage",
                    },
                )?,
                price_change_percentage: row.price_change_percentage,
            }),
        }
    }
}
