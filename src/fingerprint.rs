//! Order-independent fingerprinting of event batches.
//!
//! The fingerprint is the coordinator-minted idempotency key: retries carry
//! the same digest so workers can serve cached results. Each event is
//! rendered as a fixed-order field tuple, the tuples are sorted
//! lexicographically, and the concatenation is hashed with SHA-256. Equal
//! multisets of events therefore produce equal fingerprints regardless of
//! input order.

use chrono::SecondsFormat;
use sha2::{Digest, Sha256};

use crate::models::TransactionEvent;

/// 64-character lowercase hex digest of an event batch.
pub fn fingerprint_events(events: &[TransactionEvent]) -> String {
    let mut tuples: Vec<String> = events.iter().map(canonical_tuple).collect();
    tuples.sort_unstable();

    let mut hasher = Sha256::new();
    for tuple in &tuples {
        hasher.update(tuple.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn canonical_tuple(event: &TransactionEvent) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{}",
        event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        event.account_id,
        event.product_id,
        event.side.as_str(),
        event.price,
        event.quantity,
        event.event_type.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, Side};
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    fn event(ts: &str, account: &str, qty: i64) -> TransactionEvent {
        TransactionEvent {
            timestamp: ts.parse::<DateTime<Utc>>().unwrap(),
            account_id: account.to_string(),
            product_id: "IBM".to_string(),
            side: Side::Buy,
            price: Decimal::new(10050, 2),
            quantity: qty,
            event_type: EventType::OrderPlaced,
        }
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = event("2025-01-15T10:30:00Z", "ACC001", 1000);
        let b = event("2025-01-15T10:30:02Z", "ACC001", 2000);
        let c = event("2025-01-15T10:30:04Z", "ACC002", 3000);

        let forward = fingerprint_events(&[a.clone(), b.clone(), c.clone()]);
        let reversed = fingerprint_events(&[c, b, a]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint_events(&[event("2025-01-15T10:30:00Z", "ACC001", 1000)]);
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_sensitive_to_every_field() {
        let base = event("2025-01-15T10:30:00Z", "ACC001", 1000);
        let original = fingerprint_events(&[base.clone()]);

        let mut ts = base.clone();
        ts.timestamp = "2025-01-15T10:30:01Z".parse::<DateTime<Utc>>().unwrap();
        let mut account = base.clone();
        account.account_id = "ACC002".to_string();
        let mut product = base.clone();
        product.product_id = "GOOG".to_string();
        let mut side = base.clone();
        side.side = Side::Sell;
        let mut price = base.clone();
        price.price = Decimal::new(10051, 2);
        let mut qty = base.clone();
        qty.quantity = 1001;
        let mut kind = base.clone();
        kind.event_type = EventType::OrderCancelled;

        for perturbed in [ts, account, product, side, price, qty, kind] {
            assert_ne!(fingerprint_events(&[perturbed]), original);
        }
    }

    #[test]
    fn test_fingerprint_preserves_duplicate_multiplicity() {
        let e = event("2025-01-15T10:30:00Z", "ACC001", 1000);
        let once = fingerprint_events(&[e.clone()]);
        let twice = fingerprint_events(&[e.clone(), e]);
        assert_ne!(once, twice);
    }

    #[test]
    fn test_empty_batch_has_stable_fingerprint() {
        assert_eq!(fingerprint_events(&[]), fingerprint_events(&[]));
    }
}
