//! Metric instrument factories.
//!
//! Uses the globally registered `MeterProvider`; without one the instruments
//! are no-ops. All instruments come from the `"workpool"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("workpool")
}

/// Counter: invocations spawned.
pub fn invocations_started() -> Counter<u64> {
    meter()
        .u64_counter("workpool.invocations.started")
        .with_description("Number of worker invocations spawned")
        .build()
}

/// Counter: settled invocations.
/// Labels: `status` ("succeeded" | "timed_out" | "failed").
pub fn invocation_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("workpool.invocations.outcomes")
        .with_description("Number of settled worker invocations by status")
        .build()
}

/// Histogram: invocation wall-clock duration in seconds.
pub fn invocation_duration_secs() -> Histogram<f64> {
    meter()
        .f64_histogram("workpool.invocations.duration")
        .with_description("Worker invocation duration")
        .with_unit("s")
        .build()
}

/// Counter: items that could not be claimed.
pub fn claim_failures() -> Counter<u64> {
    meter()
        .u64_counter("workpool.tracker.claim_failures")
        .with_description("Number of failed claim attempts")
        .build()
}

/// Counter: rounds where the ready listing was unavailable.
pub fn tracker_unavailable() -> Counter<u64> {
    meter()
        .u64_counter("workpool.tracker.unavailable")
        .with_description("Number of failed ready-item listings")
        .build()
}

/// Counter: lock entries force-released by the orchestrator.
pub fn locks_released() -> Counter<u64> {
    meter()
        .u64_counter("workpool.locks.released")
        .with_description("Number of lock entries force-released")
        .build()
}

/// Counter: events received from workers.
/// Labels: `kind` ("text" | "tool_use" | "tool_result" | "result").
pub fn worker_events() -> Counter<u64> {
    meter()
        .u64_counter("workpool.worker.events")
        .with_description("Number of worker stream events")
        .build()
}
