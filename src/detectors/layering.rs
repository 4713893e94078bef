//! Layering detection.
//!
//! A layering pattern inside one `(account_id, product_id)` group is a run
//! of at least three same-side placements opening within `orders_window` of
//! the first one, each cancelled by a distinct same-side cancellation before
//! the cancel deadline, followed by an opposite-side execution strictly
//! after the last cancellation but within `opposite_trade_window` of it.
//!
//! Orders are consumed: once a run matches, neither its placements nor its
//! matched cancellations can participate in a later sequence of the same
//! group. Small groups are scanned linearly; larger groups answer window
//! queries from a per-`(event_type, side)` index via binary search.

use chrono::{DateTime, Duration, Utc};

use super::{group_events, sort_findings, Detector};
use crate::models::{EventType, SequenceCore, Side, SuspiciousSequence, TransactionEvent};

/// Minimum number of spoof placements in a run.
const MIN_SPOOF_PLACEMENTS: usize = 3;

/// Group size at which window queries switch from linear scans to binary
/// search over the per-`(event_type, side)` index.
const INDEX_THRESHOLD: usize = 100;

/// Time windows for the three matching stages. All windows are strictly
/// positive.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Placements joining the run must open within this window of the anchor.
    pub orders_window: Duration,
    /// Cancellations must land within this window after the run closes.
    pub cancel_window: Duration,
    /// The completing opposite-side trade must print within this window
    /// after the last cancellation.
    pub opposite_trade_window: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            orders_window: Duration::seconds(10),
            cancel_window: Duration::seconds(5),
            opposite_trade_window: Duration::seconds(2),
        }
    }
}

impl DetectionConfig {
    /// Load window overrides from the environment, keeping defaults for
    /// unset or non-positive values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            orders_window: env_window("ORDERS_WINDOW_SECONDS", defaults.orders_window),
            cancel_window: env_window("CANCEL_WINDOW_SECONDS", defaults.cancel_window),
            opposite_trade_window: env_window(
                "OPPOSITE_TRADE_WINDOW_SECONDS",
                defaults.opposite_trade_window,
            ),
        }
    }
}

fn env_window(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|&v| v > 0)
        .map(Duration::seconds)
        .unwrap_or(default)
}

pub struct LayeringDetector {
    config: DetectionConfig,
}

impl LayeringDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }
}

impl Detector for LayeringDetector {
    fn name(&self) -> &'static str {
        "layering"
    }

    fn detect(&self, events: &[TransactionEvent]) -> Vec<SuspiciousSequence> {
        let mut findings = Vec::new();
        for ((account_id, product_id), group) in group_events(events) {
            let index = GroupIndex::new(&group);
            for side in [Side::Buy, Side::Sell] {
                detect_side(&self.config, &index, account_id, product_id, side, &mut findings);
            }
        }
        sort_findings(&mut findings);
        findings
    }
}

/// Per-group event index: one timestamp-sorted bucket per
/// `(event_type, side)`. Window queries scan linearly below
/// `INDEX_THRESHOLD` group events and binary-search above it.
struct GroupIndex<'a> {
    buckets: [Vec<&'a TransactionEvent>; 6],
    linear: bool,
}

fn bucket_slot(event_type: EventType, side: Side) -> usize {
    let side_bit = match side {
        Side::Buy => 0,
        Side::Sell => 1,
    };
    event_type.sort_rank() as usize * 2 + side_bit
}

impl<'a> GroupIndex<'a> {
    fn new(group: &[&'a TransactionEvent]) -> Self {
        let mut buckets: [Vec<&'a TransactionEvent>; 6] = Default::default();
        for event in group {
            buckets[bucket_slot(event.event_type, event.side)].push(event);
        }
        Self {
            buckets,
            linear: group.len() < INDEX_THRESHOLD,
        }
    }

    fn bucket(&self, event_type: EventType, side: Side) -> &[&'a TransactionEvent] {
        &self.buckets[bucket_slot(event_type, side)]
    }

    /// Half-open index range `[lo, hi)` into the bucket for events with
    /// timestamp in the window. The lower bound is inclusive or exclusive
    /// per `lower_inclusive`; the upper bound is always inclusive.
    fn window_range(
        &self,
        event_type: EventType,
        side: Side,
        lower: DateTime<Utc>,
        lower_inclusive: bool,
        upper: DateTime<Utc>,
    ) -> (usize, usize) {
        let bucket = self.bucket(event_type, side);
        if self.linear {
            let mut lo = 0;
            while lo < bucket.len() && below_lower(bucket[lo].timestamp, lower, lower_inclusive) {
                lo += 1;
            }
            let mut hi = lo;
            while hi < bucket.len() && bucket[hi].timestamp <= upper {
                hi += 1;
            }
            (lo, hi)
        } else {
            let lo = bucket.partition_point(|e| below_lower(e.timestamp, lower, lower_inclusive));
            let hi = bucket.partition_point(|e| e.timestamp <= upper);
            (lo.min(hi), hi)
        }
    }

    fn has_in_window(
        &self,
        event_type: EventType,
        side: Side,
        lower: DateTime<Utc>,
        lower_inclusive: bool,
        upper: DateTime<Utc>,
    ) -> bool {
        let (lo, hi) = self.window_range(event_type, side, lower, lower_inclusive, upper);
        lo < hi
    }
}

fn below_lower(ts: DateTime<Utc>, lower: DateTime<Utc>, lower_inclusive: bool) -> bool {
    if lower_inclusive {
        ts < lower
    } else {
        ts <= lower
    }
}

fn detect_side(
    config: &DetectionConfig,
    index: &GroupIndex<'_>,
    account_id: &str,
    product_id: &str,
    side: Side,
    out: &mut Vec<SuspiciousSequence>,
) {
    let placements = index.bucket(EventType::OrderPlaced, side);
    let cancellations = index.bucket(EventType::OrderCancelled, side);
    let mut cancel_used = vec![false; cancellations.len()];

    let mut anchor = 0;
    while anchor < placements.len() {
        let anchor_ts = placements[anchor].timestamp;

        // Stage 1: extend the spoof run while placements stay within
        // orders_window of the anchor (window edge inclusive).
        let (_, run_end) = index.window_range(
            EventType::OrderPlaced,
            side,
            anchor_ts,
            true,
            anchor_ts + config.orders_window,
        );
        let run = &placements[anchor..run_end];
        if run.len() < MIN_SPOOF_PLACEMENTS {
            anchor += 1;
            continue;
        }

        // Stage 2: every placement in the run needs a distinct subsequent
        // cancellation before the run's cancel deadline, with no same-side
        // execution interposed between placement and cancellation.
        let deadline = run[run.len() - 1].timestamp + config.cancel_window;
        let Some(matched) =
            match_cancellations(index, side, run, cancellations, &cancel_used, deadline)
        else {
            anchor += 1;
            continue;
        };

        // Stage 3: an opposite-side execution strictly after the last
        // cancellation, within opposite_trade_window of it.
        let last_cancel_ts = matched
            .iter()
            .map(|&j| cancellations[j].timestamp)
            .max()
            .expect("matched run is non-empty");
        let (lo, hi) = index.window_range(
            EventType::TradeExecuted,
            side.opposite(),
            last_cancel_ts,
            false,
            last_cancel_ts + config.opposite_trade_window,
        );
        let completing = &index.bucket(EventType::TradeExecuted, side.opposite())[lo..hi];
        if completing.is_empty() {
            anchor += 1;
            continue;
        }

        // Commit: consume the matched cancellations and skip the anchor
        // past the run so its orders cannot seed another sequence.
        for &j in &matched {
            cancel_used[j] = true;
        }
        let spoofed_qty: i64 = run.iter().map(|p| p.quantity).sum();
        let completing_qty: i64 = completing.iter().map(|t| t.quantity).sum();
        let (total_buy_qty, total_sell_qty) = match side {
            Side::Buy => (spoofed_qty, completing_qty),
            Side::Sell => (completing_qty, spoofed_qty),
        };

        out.push(SuspiciousSequence::Layering {
            core: SequenceCore {
                account_id: account_id.to_string(),
                product_id: product_id.to_string(),
                start_timestamp: anchor_ts,
                end_timestamp: completing[0].timestamp,
                total_buy_qty,
                total_sell_qty,
            },
            side,
            num_cancelled_orders: run.len(),
            order_timestamps: run.iter().map(|p| p.timestamp).collect(),
        });

        anchor = run_end;
    }
}

/// Greedily match each placement in the run to the earliest unused
/// cancellation between the placement and the deadline. Candidates are
/// scanned earliest-first, so the first candidate with an interposed
/// same-side execution fails the placement outright: every later candidate
/// spans the same execution.
fn match_cancellations(
    index: &GroupIndex<'_>,
    side: Side,
    run: &[&TransactionEvent],
    cancellations: &[&TransactionEvent],
    used: &[bool],
    deadline: DateTime<Utc>,
) -> Option<Vec<usize>> {
    let mut picked: Vec<usize> = Vec::with_capacity(run.len());
    for placement in run {
        let (lo, hi) =
            index.window_range(EventType::OrderCancelled, side, placement.timestamp, true, deadline);
        let mut matched = None;
        for j in lo..hi {
            if used[j] || picked.contains(&j) {
                continue;
            }
            let executed_before_cancel = index.has_in_window(
                EventType::TradeExecuted,
                side,
                placement.timestamp,
                true,
                cancellations[j].timestamp,
            );
            if executed_before_cancel {
                return None;
            }
            matched = Some(j);
            break;
        }
        picked.push(matched?);
    }
    Some(picked)
}

#[cfg(test)]
mod tests {
    use super::super::testutil::event;
    use super::*;
    use crate::models::DetectionType;

    fn detector() -> LayeringDetector {
        LayeringDetector::new(DetectionConfig::default())
    }

    /// The canonical BUY-side pattern: three placements two seconds apart,
    /// three cancellations, one completing SELL execution.
    fn canonical_events() -> Vec<TransactionEvent> {
        vec![
            event("2025-01-15T10:30:00Z", "ACC001", "IBM", Side::Buy, "100.50", 1000, EventType::OrderPlaced),
            event("2025-01-15T10:30:02Z", "ACC001", "IBM", Side::Buy, "100.60", 1000, EventType::OrderPlaced),
            event("2025-01-15T10:30:04Z", "ACC001", "IBM", Side::Buy, "100.70", 1000, EventType::OrderPlaced),
            event("2025-01-15T10:30:06Z", "ACC001", "IBM", Side::Buy, "100.50", 1000, EventType::OrderCancelled),
            event("2025-01-15T10:30:07Z", "ACC001", "IBM", Side::Buy, "100.60", 1000, EventType::OrderCancelled),
            event("2025-01-15T10:30:08Z", "ACC001", "IBM", Side::Buy, "100.70", 1000, EventType::OrderCancelled),
            event("2025-01-15T10:30:09Z", "ACC001", "IBM", Side::Sell, "100.40", 500, EventType::TradeExecuted),
        ]
    }

    #[test]
    fn test_canonical_match() {
        let findings = detector().detect(&canonical_events());
        assert_eq!(findings.len(), 1);

        let finding = &findings[0];
        assert_eq!(finding.detection_type(), DetectionType::Layering);
        let core = finding.core();
        assert_eq!(core.account_id, "ACC001");
        assert_eq!(core.product_id, "IBM");
        assert_eq!(core.total_buy_qty, 3000);
        assert_eq!(core.total_sell_qty, 500);
        assert_eq!(core.start_timestamp, "2025-01-15T10:30:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(core.end_timestamp, "2025-01-15T10:30:09Z".parse::<DateTime<Utc>>().unwrap());

        match finding {
            SuspiciousSequence::Layering {
                side,
                num_cancelled_orders,
                order_timestamps,
                ..
            } => {
                assert_eq!(*side, Side::Buy);
                assert_eq!(*num_cancelled_orders, 3);
                assert_eq!(order_timestamps.len(), 3);
                assert!(order_timestamps.windows(2).all(|w| w[0] < w[1]));
            }
            other => panic!("expected layering finding, got {other:?}"),
        }
    }

    #[test]
    fn test_late_cancellation_disqualifies() {
        let mut events = canonical_events();
        // Push the last cancellation past the cancel deadline (run closes
        // at 10:30:04, deadline 10:30:09).
        events[5] = event("2025-01-15T10:30:10Z", "ACC001", "IBM", Side::Buy, "100.70", 1000, EventType::OrderCancelled);
        assert!(detector().detect(&events).is_empty());
    }

    #[test]
    fn test_missing_opposite_trade_disqualifies() {
        let mut events = canonical_events();
        events.pop();
        assert!(detector().detect(&events).is_empty());
    }

    #[test]
    fn test_two_placements_are_not_enough() {
        let events = vec![
            event("2025-01-15T10:30:00Z", "ACC001", "IBM", Side::Buy, "100.50", 1000, EventType::OrderPlaced),
            event("2025-01-15T10:30:02Z", "ACC001", "IBM", Side::Buy, "100.60", 1000, EventType::OrderPlaced),
            event("2025-01-15T10:30:06Z", "ACC001", "IBM", Side::Buy, "100.50", 1000, EventType::OrderCancelled),
            event("2025-01-15T10:30:07Z", "ACC001", "IBM", Side::Buy, "100.60", 1000, EventType::OrderCancelled),
            event("2025-01-15T10:30:08Z", "ACC001", "IBM", Side::Sell, "100.40", 500, EventType::TradeExecuted),
        ];
        assert!(detector().detect(&events).is_empty());
    }

    #[test]
    fn test_orders_window_boundary_inclusive() {
        let mut events = canonical_events();
        // Third placement at exactly anchor + 10 s still joins the run.
        events[2] = event("2025-01-15T10:30:10Z", "ACC001", "IBM", Side::Buy, "100.70", 1000, EventType::OrderPlaced);
        events[3] = event("2025-01-15T10:30:11Z", "ACC001", "IBM", Side::Buy, "100.50", 1000, EventType::OrderCancelled);
        events[4] = event("2025-01-15T10:30:12Z", "ACC001", "IBM", Side::Buy, "100.60", 1000, EventType::OrderCancelled);
        events[5] = event("2025-01-15T10:30:13Z", "ACC001", "IBM", Side::Buy, "100.70", 1000, EventType::OrderCancelled);
        events[6] = event("2025-01-15T10:30:14Z", "ACC001", "IBM", Side::Sell, "100.40", 500, EventType::TradeExecuted);

        let findings = detector().detect(&events);
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_orders_window_one_tick_past_excluded() {
        let mut events = canonical_events();
        events[2] = event("2025-01-15T10:30:10.001Z", "ACC001", "IBM", Side::Buy, "100.70", 1000, EventType::OrderPlaced);
        events[3] = event("2025-01-15T10:30:11Z", "ACC001", "IBM", Side::Buy, "100.50", 1000, EventType::OrderCancelled);
        events[4] = event("2025-01-15T10:30:12Z", "ACC001", "IBM", Side::Buy, "100.60", 1000, EventType::OrderCancelled);
        events[5] = event("2025-01-15T10:30:13Z", "ACC001", "IBM", Side::Buy, "100.70", 1000, EventType::OrderCancelled);
        events[6] = event("2025-01-15T10:30:14Z", "ACC001", "IBM", Side::Sell, "100.40", 500, EventType::TradeExecuted);

        assert!(detector().detect(&events).is_empty());
    }

    #[test]
    fn test_interposed_same_side_execution_disqualifies() {
        let mut events = canonical_events();
        // A BUY execution between the first placement and its cancellation
        // means the spoof order (partially) filled.
        events.push(event("2025-01-15T10:30:05Z", "ACC001", "IBM", Side::Buy, "100.50", 100, EventType::TradeExecuted));
        assert!(detector().detect(&events).is_empty());
    }

    #[test]
    fn test_opposite_trade_must_be_strictly_after_last_cancel() {
        let mut events = canonical_events();
        events[6] = event("2025-01-15T10:30:08Z", "ACC001", "IBM", Side::Sell, "100.40", 500, EventType::TradeExecuted);
        assert!(detector().detect(&events).is_empty());
    }

    #[test]
    fn test_opposite_trade_window_boundary() {
        let mut events = canonical_events();
        // Last cancellation at 10:30:08; exactly + 2 s matches.
        events[6] = event("2025-01-15T10:30:10Z", "ACC001", "IBM", Side::Sell, "100.40", 500, EventType::TradeExecuted);
        assert_eq!(detector().detect(&events).len(), 1);

        events[6] = event("2025-01-15T10:30:10.001Z", "ACC001", "IBM", Side::Sell, "100.40", 500, EventType::TradeExecuted);
        assert!(detector().detect(&events).is_empty());
    }

    #[test]
    fn test_multiple_completing_trades_sum_into_opposite_column() {
        let mut events = canonical_events();
        events.push(event("2025-01-15T10:30:09.500Z", "ACC001", "IBM", Side::Sell, "100.30", 700, EventType::TradeExecuted));

        let findings = detector().detect(&events);
        assert_eq!(findings.len(), 1);
        let core = findings[0].core();
        assert_eq!(core.total_sell_qty, 1200);
        // end_timestamp stays at the first completing trade.
        assert_eq!(core.end_timestamp, "2025-01-15T10:30:09Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_cancellations_are_not_reused_across_sequences() {
        let mut events = canonical_events();
        // A second run of placements whose only cancellation candidates
        // were already consumed by the first sequence.
        events.extend([
            event("2025-01-15T10:31:00Z", "ACC001", "IBM", Side::Buy, "100.10", 1000, EventType::OrderPlaced),
            event("2025-01-15T10:31:01Z", "ACC001", "IBM", Side::Buy, "100.20", 1000, EventType::OrderPlaced),
            event("2025-01-15T10:31:02Z", "ACC001", "IBM", Side::Buy, "100.30", 1000, EventType::OrderPlaced),
            event("2025-01-15T10:31:03Z", "ACC001", "IBM", Side::Buy, "100.10", 1000, EventType::OrderCancelled),
            event("2025-01-15T10:31:04Z", "ACC001", "IBM", Side::Buy, "100.20", 1000, EventType::OrderCancelled),
            // Only two fresh cancellations: the third placement cannot match.
            event("2025-01-15T10:31:06Z", "ACC001", "IBM", Side::Sell, "100.00", 500, EventType::TradeExecuted),
        ]);

        let findings = detector().detect(&events);
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].core().end_timestamp,
            "2025-01-15T10:30:09Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_sell_side_pattern_detected() {
        let events = vec![
            event("2025-01-15T11:00:00Z", "ACC003", "MSFT", Side::Sell, "210.00", 400, EventType::OrderPlaced),
            event("2025-01-15T11:00:01Z", "ACC003", "MSFT", Side::Sell, "210.10", 400, EventType::OrderPlaced),
            event("2025-01-15T11:00:02Z", "ACC003", "MSFT", Side::Sell, "210.20", 400, EventType::OrderPlaced),
            event("2025-01-15T11:00:04Z", "ACC003", "MSFT", Side::Sell, "210.00", 400, EventType::OrderCancelled),
            event("2025-01-15T11:00:05Z", "ACC003", "MSFT", Side::Sell, "210.10", 400, EventType::OrderCancelled),
            event("2025-01-15T11:00:06Z", "ACC003", "MSFT", Side::Sell, "210.20", 400, EventType::OrderCancelled),
            event("2025-01-15T11:00:07Z", "ACC003", "MSFT", Side::Buy, "210.30", 900, EventType::TradeExecuted),
        ];

        let findings = detector().detect(&events);
        assert_eq!(findings.len(), 1);
        let core = findings[0].core();
        assert_eq!(core.total_sell_qty, 1200);
        assert_eq!(core.total_buy_qty, 900);
        match &findings[0] {
            SuspiciousSequence::Layering { side, .. } => assert_eq!(*side, Side::Sell),
            other => panic!("expected layering finding, got {other:?}"),
        }
    }

    #[test]
    fn test_groups_do_not_mix() {
        let mut events = canonical_events();
        // Same shape but the completing trade belongs to another account.
        for e in &mut events {
            if e.event_type == EventType::TradeExecuted {
                e.account_id = "ACC999".to_string();
            }
        }
        assert!(detector().detect(&events).is_empty());
    }

    #[test]
    fn test_indexed_path_matches_linear_path() {
        let mut events = canonical_events();
        // Pad the group over the index threshold with old, unrelated
        // executions that cannot interact with the pattern windows.
        for i in 0..120 {
            events.push(event(
                &format!("2025-01-15T08:00:{:02}Z", i % 60),
                "ACC001",
                "IBM",
                if i % 2 == 0 { Side::Buy } else { Side::Sell },
                "99.00",
                10,
                EventType::TradeExecuted,
            ));
        }

        let findings = detector().detect(&events);
        assert_eq!(findings.len(), 1);
        let core = findings[0].core();
        assert_eq!(core.total_buy_qty, 3000);
        assert_eq!(core.total_sell_qty, 500);
    }

    #[test]
    fn test_empty_input_yields_no_findings() {
        assert!(detector().detect(&[]).is_empty());
    }
}
