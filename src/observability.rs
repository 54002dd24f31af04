use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Planning ────────────────────────────────────────────────────

/// Counter: slots allocated. Labels: family.
pub const ALLOCATIONS_TOTAL: &str = "planner_allocations_total";

/// Histogram: days skipped per allocation.
pub const DAYS_SKIPPED: &str = "planner_days_skipped";

/// Counter: write conflicts that led to a retry or gave up.
pub const CONFLICT_RETRIES_TOTAL: &str = "planner_conflict_retries_total";

/// Counter: slots freed by reconciliation. Labels: family.
pub const SLOTS_RELEASED_TOTAL: &str = "planner_slots_released_total";

/// Counter: planned dates the upstream sink refused.
pub const PATCH_FAILURES_TOTAL: &str = "planner_patch_failures_total";

/// Counter: tender feed records processed.
pub const TENDERS_PROCESSED_TOTAL: &str = "planner_tenders_processed_total";

// ── Store ───────────────────────────────────────────────────────

/// Counter: compare-and-swap writes rejected by the store.
pub const STORE_CONFLICTS_TOTAL: &str = "planner_store_conflicts_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "planner_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (entries per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "planner_journal_flush_batch_size";

/// Counter: journal compactions run.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "planner_journal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
