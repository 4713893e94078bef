//! Wash-trading detection.
//!
//! Within one `(account_id, product_id)` group the detector sweeps executed
//! trades with a two-pointer window: `right` advances one trade at a time,
//! `left` follows to keep the window inside the configured duration. Side
//! counts, per-side volume and the alternation switch count are maintained
//! incrementally, so the sweep is O(n) per group. On the first window that
//! satisfies the predicate a finding is emitted and `left` jumps past the
//! window, so one burst of self-crossing activity yields one finding.

use chrono::Duration;
use rust_decimal::Decimal;

use super::{group_events, sort_findings, Detector};
use crate::models::{EventType, SequenceCore, Side, SuspiciousSequence, TransactionEvent};

/// Wash-trading thresholds. All values are strictly positive.
#[derive(Debug, Clone)]
pub struct WashTradingConfig {
    /// Sliding window duration.
    pub window: Duration,
    /// Minimum BUY trades and minimum SELL trades inside the window.
    pub min_side_trades: usize,
    /// Minimum summed quantity across the window.
    pub min_total_quantity: i64,
    /// Minimum percentage of adjacent trade pairs with differing sides.
    pub min_alternation_pct: f64,
    /// Price-change percentage is only reported at or above this value.
    pub min_price_change_pct: Decimal,
}

impl Default for WashTradingConfig {
    fn default() -> Self {
        Self {
            window: Duration::minutes(30),
            min_side_trades: 3,
            min_total_quantity: 10_000,
            min_alternation_pct: 60.0,
            min_price_change_pct: Decimal::ONE,
        }
    }
}

pub struct WashTradingDetector {
    config: WashTradingConfig,
}

impl WashTradingDetector {
    pub fn new(config: WashTradingConfig) -> Self {
        Self { config }
    }
}

impl Detector for WashTradingDetector {
    fn name(&self) -> &'static str {
        "wash_trading"
    }

    fn detect(&self, events: &[TransactionEvent]) -> Vec<SuspiciousSequence> {
        let mut findings = Vec::new();
        for ((account_id, product_id), group) in group_events(events) {
            let trades: Vec<&TransactionEvent> = group
                .into_iter()
                .filter(|e| e.event_type == EventType::TradeExecuted)
                .collect();
            sweep_group(&self.config, account_id, product_id, &trades, &mut findings);
        }
        sort_findings(&mut findings);
        findings
    }
}

/// Running window state, maintained incrementally as the pointers move.
#[derive(Default)]
struct WindowState {
    buy_count: usize,
    sell_count: usize,
    buy_qty: i64,
    sell_qty: i64,
    /// Number of adjacent trade pairs inside the window with differing sides.
    switches: usize,
}

impl WindowState {
    fn add(&mut self, trade: &TransactionEvent) {
        match trade.side {
            Side::Buy => {
                self.buy_count += 1;
                self.buy_qty += trade.quantity;
            }
            Side::Sell => {
                self.sell_count += 1;
                self.sell_qty += trade.quantity;
            }
        }
    }

    fn remove(&mut self, trade: &TransactionEvent) {
        match trade.side {
            Side::Buy => {
                self.buy_count -= 1;
                self.buy_qty -= trade.quantity;
            }
            Side::Sell => {
                self.sell_count -= 1;
                self.sell_qty -= trade.quantity;
            }
        }
    }

    fn total_qty(&self) -> i64 {
        self.buy_qty + self.sell_qty
    }
}

fn sweep_group(
    config: &WashTradingConfig,
    account_id: &str,
    product_id: &str,
    trades: &[&TransactionEvent],
    out: &mut Vec<SuspiciousSequence>,
) {
    let mut state = WindowState::default();
    let mut left = 0;

    for right in 0..trades.len() {
        if right > left && trades[right].side != trades[right - 1].side {
            state.switches += 1;
        }
        state.add(trades[right]);

        while trades[right].timestamp - trades[left].timestamp > config.window {
            if trades[left].side != trades[left + 1].side {
                state.switches -= 1;
            }
            state.remove(trades[left]);
            left += 1;
        }

        let count = right - left + 1;
        if satisfies(config, &state, count) {
            out.push(build_finding(
                config,
                account_id,
                product_id,
                &trades[left..=right],
                &state,
                count,
            ));
            left = right + 1;
            state = WindowState::default();
        }
    }
}

fn satisfies(config: &WashTradingConfig, state: &WindowState, count: usize) -> bool {
    if state.buy_count < config.min_side_trades || state.sell_count < config.min_side_trades {
        return false;
    }
    if state.total_qty() < config.min_total_quantity {
        return false;
    }
    // Integer-scaled comparison keeps the 60% boundary exact.
    (state.switches * 100) as f64 >= config.min_alternation_pct * (count - 1) as f64
}

fn build_finding(
    config: &WashTradingConfig,
    account_id: &str,
    product_id: &str,
    window: &[&TransactionEvent],
    state: &WindowState,
    count: usize,
) -> SuspiciousSequence {
    let alternation_percentage = (state.switches * 100) as f64 / (count - 1) as f64;

    let min_price = window.iter().map(|t| t.price).min().expect("window is non-empty");
    let max_price = window.iter().map(|t| t.price).max().expect("window is non-empty");
    // Prices are validated strictly positive at ingest; a zero sneaking in
    // over the wire downgrades to "no price metric" instead of a panic.
    let price_change_percentage = if min_price > Decimal::ZERO {
        let price_change = (max_price - min_price) / min_price * Decimal::ONE_HUNDRED;
        (price_change >= config.min_price_change_pct).then_some(price_change)
    } else {
        None
    };

    SuspiciousSequence::WashTrading {
        core: SequenceCore {
            account_id: account_id.to_string(),
            product_id: product_id.to_string(),
            start_timestamp: window[0].timestamp,
            end_timestamp: window[window.len() - 1].timestamp,
            total_buy_qty: state.buy_qty,
            total_sell_qty: state.sell_qty,
        },
        alternation_percentage,
        price_change_percentage,
    }
}
