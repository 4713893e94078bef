//! CSV event input.
//!
//! Header-bearing CSV with the seven event fields in fixed order. Rows
//! that fail field validation are skipped with a warning and the pipeline
//! continues; only an unreadable file is fatal.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::models::{EventType, Side, TransactionEvent};

/// One raw input row before field validation.
#[derive(Debug, Deserialize)]
struct RawRecord {
    timestamp: String,
    account_id: String,
    product_id: String,
    side: String,
    price: String,
    quantity: String,
    event_type: String,
}

pub struct ReadReport {
    pub events: Vec<TransactionEvent>,
    /// Rows dropped by validation; already logged individually.
    pub skipped: usize,
}

pub fn read_events(path: &Path) -> Result<ReadReport> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open events input {}", path.display()))?;

    let mut events = Vec::new();
    let mut skipped = 0usize;

    for (i, row) in reader.deserialize::<RawRecord>().enumerate() {
        let line = i + 2; // line 1 is the header
        match row {
            Ok(raw) => match parse_record(raw) {
                Ok(event) => events.push(event),
                Err(reason) => {
                    warn!(line, reason, "Skipping invalid input row");
                    skipped += 1;
                }
            },
            Err(error) => {
                warn!(line, error = %error, "Skipping malformed input row");
                skipped += 1;
            }
        }
    }

    Ok(ReadReport { events, skipped })
}

fn parse_record(raw: RawRecord) -> Result<TransactionEvent, &'static str> {
    let timestamp = raw
        .timestamp
        .parse::<DateTime<Utc>>()
        .map_err(|_| "invalid timestamp")?;

    if raw.account_id.trim().is_empty() {
        return Err("empty account_id");
    }
    if raw.product_id.trim().is_empty() {
        return Err("empty product_id");
    }

    let side = match raw.side.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        _ => return Err("invalid side"),
    };

    let price = raw.price.parse::<Decimal>().map_err(|_| "invalid price")?;
    if price <= Decimal::ZERO {
        return Err("price must be strictly positive");
    }

    let quantity = raw.quantity.parse::<i64>().map_err(|_| "invalid quantity")?;
    if quantity <= 0 {
        return Err("quantity must be strictly positive");
    }

    let event_type = match raw.event_type.as_str() {
        "ORDER_PLACED" => EventType::OrderPlaced,
        "ORDER_CANCELLED" => EventType::OrderCancelled,
        "TRADE_EXECUTED" => EventType::TradeExecuted,
        _ => return Err("invalid event_type"),
    };

    Ok(TransactionEvent {
        timestamp,
        account_id: raw.account_id,
        product_id: raw.product_id,
        side,
        price,
        quantity,
        event_type,
    })
}
