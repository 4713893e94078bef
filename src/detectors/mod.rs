//! Manipulation-pattern detectors.
//!
//! Both detectors are pure: they take an unsorted batch of events and
//! return findings, owning no state between calls. The worker service hosts
//! exactly one of them behind its `detect` endpoint.

pub mod layering;
pub mod wash_trading;

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::models::{SuspiciousSequence, TransactionEvent};

pub use layering::{DetectionConfig, LayeringDetector};
pub use wash_trading::{WashTradingConfig, WashTradingDetector};

/// A detection algorithm hosted by a worker.
pub trait Detector: Send + Sync {
    /// Stable service name used on the wire and in aggregation.
    fn name(&self) -> &'static str;

    /// Run the algorithm over one event batch.
    fn detect(&self, events: &[TransactionEvent]) -> Vec<SuspiciousSequence>;
}

/// The two detector kinds this pipeline ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Layering,
    WashTrading,
}

impl DetectorKind {
    pub fn service_name(&self) -> &'static str {
        match self {
            DetectorKind::Layering => "layering",
            DetectorKind::WashTrading => "wash_trading",
        }
    }

    /// Instantiate the detector with configuration from the environment.
    pub fn build(&self) -> Box<dyn Detector> {
        match self {
            DetectorKind::Layering => Box::new(LayeringDetector::new(DetectionConfig::from_env())),
            DetectorKind::WashTrading => {
                Box::new(WashTradingDetector::new(WashTradingConfig::default()))
            }
        }
    }
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "layering" => Ok(DetectorKind::Layering),
            "wash_trading" => Ok(DetectorKind::WashTrading),
            other => Err(format!(
                "unknown detector `{other}` (expected `layering` or `wash_trading`)"
            )),
        }
    }
}

/// Partition a batch by `(account_id, product_id)` and sort each group by
/// timestamp, breaking ties by event-type rank and then insertion order so
/// repeated runs over the same input are byte-identical.
pub(crate) fn group_events(
    events: &[TransactionEvent],
) -> BTreeMap<(&str, &str), Vec<&TransactionEvent>> {
    let mut groups: BTreeMap<(&str, &str), Vec<&TransactionEvent>> = BTreeMap::new();
    for event in events {
        groups
            .entry((event.account_id.as_str(), event.product_id.as_str()))
            .or_default()
            .push(event);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|e| (e.timestamp, e.event_type.sort_rank()));
    }
    groups
}

/// Final deterministic ordering of a detector's output.
pub(crate) fn sort_findings(findings: &mut [SuspiciousSequence]) {
    findings.sort_by_key(|f| f.sort_key());
}


#[cfg(test)]
mod tests {
    use super::testutil::event;
    use super::*;
    use crate::models::{EventType, Side};

    #[test]
    fn test_group_events_partitions_and_sorts() {
        let events = vec![
            event("2025-01-15T10:30:05Z", "ACC002", "IBM", Side::Buy, "100", 1, EventType::OrderPlaced),
            event("2025-01-15T10:30:01Z", "ACC001", "IBM", Side::Buy, "100", 1, EventType::OrderPlaced),
            event("2025-01-15T10:30:00Z", "ACC001", "IBM", Side::Buy, "100", 1, EventType::OrderPlaced),
            event("2025-01-15T10:30:00Z", "ACC001", "GOOG", Side::Sell, "100", 1, EventType::TradeExecuted),
        ];

        let groups = group_events(&events);
        let keys: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![("ACC001", "GOOG"), ("ACC001", "IBM"), ("ACC002", "IBM")]
        );

        let acc1_ibm = &groups[&("ACC001", "IBM")];
        assert_eq!(acc1_ibm.len(), 2);
        assert!(acc1_ibm[0].timestamp < acc1_ibm[1].timestamp);
    }

    #[test]
    fn test_same_timestamp_orders_by_event_type() {
        let events = vec![
            event("2025-01-15T10:30:00Z", "A", "P", Side::Buy, "100", 1, EventType::TradeExecuted),
            event("2025-01-15T10:30:00Z", "A", "P", Side::Buy, "100", 1, EventType::OrderCancelled),
            event("2025-01-15T10:30:00Z", "A", "P", Side::Buy, "100", 1, EventType::OrderPlaced),
        ];

        let groups = group_events(&events);
        let group = &groups[&("A", "P")];
        assert_eq!(group[0].event_type, EventType::OrderPlaced);
        assert_eq!(group[1].event_type, EventType::OrderCancelled);
        assert_eq!(group[2].event_type, EventType::TradeExecuted);
    }

    #[test]
    fn test_detector_kind_parsing() {
        assert_eq!("layering".parse::<DetectorKind>().unwrap(), DetectorKind::Layering);
        assert_eq!(
            "wash_trading".parse::<DetectorKind>().unwrap(),
            DetectorKind::WashTrading
        );
        assert!("spoofing".parse::<DetectorKind>().is_err());
    }
}
