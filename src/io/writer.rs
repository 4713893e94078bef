//! Output artefacts.
//!
//! Two CSV files per run: the detection summary (one row per surviving
//! finding) and the per-sequence detection log (timestamp sequences and
//! duration). Identifier cells are neutralised against spreadsheet formula
//! interpretation; the log's `account_id` can additionally be
//! pseudonymised with a salted one-way hash.

use std::borrow::Cow;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use sha2::{Digest, Sha256};

use crate::models::DetectionType;
use crate::wire::WireFinding;

pub const SUMMARY_FILE: &str = "detection_summary.csv";
pub const DETECTION_LOG_FILE: &str = "detection_log.csv";

/// Prefix an apostrophe when the cell contains any character a spreadsheet
/// could interpret as the start of a formula.
pub fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value
        .chars()
        .any(|c| matches!(c, '=' | '+' | '-' | '@' | '\t' | '\r'))
    {
        Cow::Owned(format!("'{value}"))
    } else {
        Cow::Borrowed(value)
    }
}

/// One-way account transform: `SHA256(salt ":" account_id)` as 64-hex.
pub fn pseudonymize(salt: &str, account_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(account_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Write the detection summary table.
pub fn write_summary(path: &Path, findings: &[WireFinding]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("failed to create summary artefact")?;
    writer
        .write_record([
            "account_id",
            "product_id",
            "total_buy_qty",
            "total_sell_qty",
            "num_cancelled_orders",
            "detected_timestamp",
            "detection_type",
            "alternation_percentage",
            "price_change_percentage",
        ])
        .context("failed to write summary header")?;

    for finding in findings {
        let (alternation, price_change) = match finding.detection_type {
            DetectionType::Layering => (String::new(), String::new()),
            DetectionType::WashTrading => (
                finding
                    .alternation_percentage
                    .map(|p| format!("{p:.2}"))
                    .unwrap_or_default(),
                finding
                    .price_change_percentage
                    .map(|p| format!("{p:.2}"))
                    .unwrap_or_default(),
            ),
        };

        let total_buy_qty = finding.total_buy_qty.to_string();
        let total_sell_qty = finding.total_sell_qty.to_string();
        let num_cancelled = finding.num_cancelled_orders.unwrap_or(0).to_string();
        let detected = finding
            .end_timestamp
            .to_rfc3339_opts(SecondsFormat::AutoSi, true);

        writer
            .write_record([
                sanitize_cell(&finding.account_id).as_ref(),
                sanitize_cell(&finding.product_id).as_ref(),
                total_buy_qty.as_str(),
                total_sell_qty.as_str(),
                num_cancelled.as_str(),
                detected.as_str(),
                finding.detection_type.as_str(),
                alternation.as_str(),
                price_change.as_str(),
            ])
            .context("failed to write summary row")?;
    }

    writer.flush().context("failed to flush summary artefact")?;
    Ok(())
}

/// Write the per-sequence detection log.
pub fn write_detection_log(
    path: &Path,
    findings: &[WireFinding],
    pseudonymization_salt: Option<&str>,
) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).context("failed to create detection log artefact")?;
    writer
        .write_record(["account_id", "product_id", "order_timestamps", "duration_seconds"])
        .context("failed to write detection log header")?;

    for finding in findings {
        let account = match pseudonymization_salt {
            Some(salt) => Cow::Owned(pseudonymize(salt, &finding.account_id)),
            None => sanitize_cell(&finding.account_id),
        };

        let order_timestamps = finding
            .order_timestamps
            .as_deref()
            .map(|timestamps| {
                timestamps
                    .iter()
                    .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                    .collect::<Vec<_>>()
                    .join(";")
            })
            .unwrap_or_default();

        let duration_ms = (finding.end_timestamp - finding.start_timestamp).num_milliseconds();
        let duration_seconds = format!("{:.3}", duration_ms as f64 / 1000.0);

        writer
            .write_record([
                account.as_ref(),
                sanitize_cell(&finding.product_id).as_ref(),
                order_timestamps.as_str(),
                duration_seconds.as_str(),
            ])
            .context("failed to write detection log row")?;
    }

    writer
        .flush()
        .context("failed to flush detection log artefact")?;
    Ok(())
}
