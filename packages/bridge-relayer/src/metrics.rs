//! Prometheus metrics for the bridge relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use bridge_core::Amount;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};

lazy_static! {
    // Block processing metrics
    pub static ref BLOCKS_PROCESSED: CounterVec = register_counter_vec!(
        "relay_blocks_processed_total",
        "Total number of finalized blocks processed",
        &["chain"]
    ).unwrap();

    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "relay_latest_block",
        "Latest finalized block number processed",
        &["chain"]
    ).unwrap();

    pub static ref MESSAGES_EMITTED: CounterVec = register_counter_vec!(
        "relay_messages_emitted_total",
        "Total number of messages put on the channel",
        &["chain", "kind"]
    ).unwrap();

    // Dispatch metrics
    pub static ref OUTCOMES: CounterVec = register_counter_vec!(
        "relay_message_outcomes_total",
        "Total number of messages handled by the dispatcher, by outcome",
        &["app", "outcome"]
    ).unwrap();

    pub static ref LEDGER_LOCKED: GaugeVec = register_gauge_vec!(
        "relay_ledger_total_locked",
        "Locked balance per application ledger (in base units)",
        &["app", "asset"]
    ).unwrap();

    // Queue sizes
    pub static ref CHANNEL_DEPTH: Gauge = register_gauge!(
        "relay_channel_depth",
        "Messages waiting in the channel"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relay_errors_total",
        "Total number of errors",
        &["component", "type"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "relay_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

/// Record a block processed
pub fn record_block_processed(chain: &str, block_number: u64) {
    BLOCKS_PROCESSED.with_label_values(&[chain]).inc();
    LATEST_BLOCK
        .with_label_values(&[chain])
        .set(block_number as f64);
}

/// Record a message emitted by a listener
pub fn record_message_emitted(chain: &str, kind: &str) {
    MESSAGES_EMITTED.with_label_values(&[chain, kind]).inc();
}

/// Record a dispatcher outcome
pub fn record_outcome(app: &str, outcome: &str) {
    OUTCOMES.with_label_values(&[app, outcome]).inc();
}

/// Update a ledger's locked balance
pub fn set_ledger_locked(app: &str, asset: &str, amount: Amount) {
    LEDGER_LOCKED
        .with_label_values(&[app, asset])
        .set(amount_as_f64(amount));
}

pub fn set_channel_depth(depth: usize) {
    CHANNEL_DEPTH.set(depth as f64);
}

/// Record an error
pub fn record_error(component: &str, error_type: &str) {
    ERRORS.with_label_values(&[component, error_type]).inc();
}

pub fn set_up(up: bool) {
    UP.set(if up { 1.0 } else { 0.0 });
}

/// Lossy conversion for gauges; balances above f64 precision are rounded
fn amount_as_f64(amount: Amount) -> f64 {
    amount.to_string().parse().unwrap_or(f64::MAX)
}
