//! Core domain model for the surveillance pipeline.
//!
//! Events are plain immutable value objects produced by the input reader and
//! consumed by the detectors. Findings are a tagged enum so each detection
//! type only carries the fields that exist for it; the flat row form used on
//! the wire and in CSV artefacts lives in `wire` and `io::writer`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// The side a completing trade must be on for a spoof on `self`.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Lifecycle stage of an order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "ORDER_PLACED")]
    OrderPlaced,
    #[serde(rename = "ORDER_CANCELLED")]
    OrderCancelled,
    #[serde(rename = "TRADE_EXECUTED")]
    TradeExecuted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderPlaced => "ORDER_PLACED",
            EventType::OrderCancelled => "ORDER_CANCELLED",
            EventType::TradeExecuted => "TRADE_EXECUTED",
        }
    }

    /// Secondary sort rank for same-timestamp events: placements sort before
    /// cancellations, cancellations before executions.
    pub fn sort_rank(&self) -> u8 {
        match self {
            EventType::OrderPlaced => 0,
            EventType::OrderCancelled => 1,
            EventType::TradeExecuted => 2,
        }
    }
}

/// One intraday trading event.
///
/// Two events with identical fields are indistinguishable; nothing in the
/// pipeline assigns identity beyond the fields themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub timestamp: DateTime<Utc>,
    pub account_id: String,
    pub product_id: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: i64,
    pub event_type: EventType,
}

/// Which detector produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetectionType {
    #[serde(rename = "LAYERING")]
    Layering,
    #[serde(rename = "WASH_TRADING")]
    WashTrading,
}

impl DetectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionType::Layering => "LAYERING",
            DetectionType::WashTrading => "WASH_TRADING",
        }
    }
}

/// Fields shared by every finding regardless of detection type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceCore {
    pub account_id: String,
    pub product_id: String,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    pub total_buy_qty: i64,
    pub total_sell_qty: i64,
}

/// A detected manipulation pattern.
///
/// Layering findings carry the spoofed side, the matched placement count and
/// their timestamps; wash-trading findings carry the alternation metric and
/// an optional price-change metric. Neither variant has the other's fields.
#[derive(Debug, Clone, PartialEq)]
pub enum SuspiciousSequence {
    Layering {
        core: SequenceCore,
        side: Side,
        num_cancelled_orders: usize,
        order_timestamps: Vec<DateTime<Utc>>,
    },
    WashTrading {
        core: SequenceCore,
        alternation_percentage: f64,
        price_change_percentage: Option<Decimal>,
    },
}

impl SuspiciousSequence {
    pub fn core(&self) -> &SequenceCore {
        match self {
            SuspiciousSequence::Layering { core, .. } => core,
            SuspiciousSequence::WashTrading { core, .. } => core,
        }
    }

    pub fn detection_type(&self) -> DetectionType {
        match self {
            SuspiciousSequence::Layering { .. } => DetectionType::Layering,
            SuspiciousSequence::WashTrading { .. } => DetectionType::WashTrading,
        }
    }

    /// Deterministic output ordering: `(account_id, product_id,
    /// end_timestamp, detection_type)`.
    pub fn sort_key(&self) -> (String, String, DateTime<Utc>, DetectionType) {
        let core = self.core();
        (
            core.account_id.clone(),
            core.product_id.clone(),
            core.end_timestamp,
            self.detection_type(),
        )
    }
}
