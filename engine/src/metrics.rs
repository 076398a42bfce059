//! Allocation metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `prizedraw_allocations_total{outcome}` - Allocation requests by outcome
//! - `prizedraw_tickets_allocated_total` - Tickets issued
//! - `prizedraw_instant_wins_claimed_total{prize_type}` - Instant-win claims
//! - `prizedraw_wallet_movements_pence_total{direction}` - Wallet debits and credits
//! - `prizedraw_funding_rollbacks_total{path}` - Reservations discarded by failed allocations
//! - `prizedraw_invariant_violations_total` - Locking-discipline bugs detected
//! - `prizedraw_event_publish_failures_total{event_type}` - Undelivered domain events
//!
//! ## Histograms
//! - `prizedraw_allocation_duration_seconds{operation}` - Time spent per engine call

use metrics::{describe_counter, describe_histogram};
use std::time::Duration;

/// Register descriptions of every allocation metric.
///
/// Call once at startup, before any metric is recorded.
pub fn register_allocation_metrics() {
    describe_counter!(
        "prizedraw_allocations_total",
        "Allocation requests by outcome (allocated, payment_required, or the error label)"
    );
    describe_counter!("prizedraw_tickets_allocated_total", "Tickets issued");
    describe_counter!(
        "prizedraw_instant_wins_claimed_total",
        "Instant-win slots claimed, by prize type"
    );
    describe_counter!(
        "prizedraw_wallet_movements_pence_total",
        "Pence moved through the wallet ledger, by direction"
    );
    describe_counter!(
        "prizedraw_funding_rollbacks_total",
        "Funding reservations discarded because the allocation failed"
    );
    describe_counter!(
        "prizedraw_invariant_violations_total",
        "Impossible states detected by the engine"
    );
    describe_counter!(
        "prizedraw_event_publish_failures_total",
        "Domain events that could not be handed to a collaborator"
    );
    describe_histogram!(
        "prizedraw_allocation_duration_seconds",
        "Time spent in an engine operation, including the unit of work"
    );

    tracing::info!("Allocation metrics registered");
}

/// Record a successful allocation of `tickets` tickets.
pub fn record_allocated(operation: &'static str, tickets: u32, elapsed: Duration) {
    metrics::counter!("prizedraw_allocations_total", "outcome" => "allocated").increment(1);
    metrics::counter!("prizedraw_tickets_allocated_total").increment(u64::from(tickets));
    metrics::histogram!("prizedraw_allocation_duration_seconds", "operation" => operation)
        .record(elapsed.as_secs_f64());
}

/// Record a checkout that now waits for external payment.
pub fn record_payment_required(elapsed: Duration) {
    metrics::counter!("prizedraw_allocations_total", "outcome" => "payment_required").increment(1);
    metrics::histogram!("prizedraw_allocation_duration_seconds", "operation" => "begin_reservation")
        .record(elapsed.as_secs_f64());
}

/// Record a rejected request.
pub fn record_rejected(operation: &'static str, outcome: &'static str, elapsed: Duration) {
    metrics::counter!("prizedraw_allocations_total", "outcome" => outcome).increment(1);
    metrics::histogram!("prizedraw_allocation_duration_seconds", "operation" => operation)
        .record(elapsed.as_secs_f64());
}

/// Record an event that could not be delivered.
pub fn record_publish_failure(event_type: &'static str) {
    metrics::counter!("prizedraw_event_publish_failures_total", "event_type" => event_type)
        .increment(1);
}
