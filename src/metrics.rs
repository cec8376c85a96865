//! Lightweight global metrics for LazyVac.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Lazy vacuum (heap scan / index rounds / truncate)
//! - Failsafe
//! - Cost-based delay
//! - Parallel workers
//! - Analyze sampling

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Vacuum -----
static VACUUM_RUNS: AtomicU64 = AtomicU64::new(0);
static HEAP_PAGES_SCANNED: AtomicU64 = AtomicU64::new(0);
static DEAD_ROWS_REMOVED: AtomicU64 = AtomicU64::new(0);
static INDEX_SCAN_ROUNDS: AtomicU64 = AtomicU64::new(0);
static INDEX_BULK_DELETE_CALLS: AtomicU64 = AtomicU64::new(0);
static INDEX_CLEANUP_CALLS: AtomicU64 = AtomicU64::new(0);
static PAGES_TRUNCATED: AtomicU64 = AtomicU64::new(0);
static TRUNCATE_LOCK_CONFLICTS: AtomicU64 = AtomicU64::new(0);

// ----- Failsafe -----
static FAILSAFE_TRIGGERS: AtomicU64 = AtomicU64::new(0);

// ----- Cost delay -----
static COST_DELAY_SLEEPS: AtomicU64 = AtomicU64::new(0);
static COST_DELAY_MICROS: AtomicU64 = AtomicU64::new(0);

// ----- Parallel -----
static PARALLEL_WORKERS_LAUNCHED: AtomicU64 = AtomicU64::new(0);

// ----- Analyze -----
static ANALYZE_RUNS: AtomicU64 = AtomicU64::new(0);
static SAMPLE_ROWS_COLLECTED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    // Vacuum
    pub vacuum_runs: u64,
    pub heap_pages_scanned: u64,
    pub dead_rows_removed: u64,
    pub index_scan_rounds: u64,
    pub index_bulk_delete_calls: u64,
    pub index_cleanup_calls: u64,
    pub pages_truncated: u64,
    pub truncate_lock_conflicts: u64,

    // Failsafe
    pub failsafe_triggers: u64,

    // Cost delay
    pub cost_delay_sleeps: u64,
    pub cost_delay_micros: u64,

    // Parallel
    pub parallel_workers_launched: u64,

    // Analyze
    pub analyze_runs: u64,
    pub sample_rows_collected: u64,
}

impl MetricsSnapshot {
    pub fn avg_delay_ms(&self) -> f64 {
        if self.cost_delay_sleeps == 0 {
            0.0
        } else {
            self.cost_delay_micros as f64 / 1000.0 / self.cost_delay_sleeps as f64
        }
    }
}

// ----- Recorders (Vacuum) -----
pub fn record_vacuum_run() {
    VACUUM_RUNS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_heap_pages_scanned(n: u64) {
    HEAP_PAGES_SCANNED.fetch_add(n, Ordering::Relaxed);
}

pub fn record_dead_rows_removed(n: u64) {
    DEAD_ROWS_REMOVED.fetch_add(n, Ordering::Relaxed);
}

pub fn record_index_scan_round() {
    INDEX_SCAN_ROUNDS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_index_bulk_delete() {
    INDEX_BULK_DELETE_CALLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_index_cleanup() {
    INDEX_CLEANUP_CALLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_pages_truncated(n: u64) {
    PAGES_TRUNCATED.fetch_add(n, Ordering::Relaxed);
}

pub fn record_truncate_lock_conflict() {
    TRUNCATE_LOCK_CONFLICTS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Failsafe) -----
pub fn record_failsafe_trigger() {
    FAILSAFE_TRIGGERS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Cost delay) -----
pub fn record_cost_delay(micros: u64) {
    COST_DELAY_SLEEPS.fetch_add(1, Ordering::Relaxed);
    COST_DELAY_MICROS.fetch_add(micros, Ordering::Relaxed);
}

// ----- Recorders (Parallel) -----
pub fn record_parallel_workers_launched(n: u64) {
    PARALLEL_WORKERS_LAUNCHED.fetch_add(n, Ordering::Relaxed);
}

// ----- Recorders (Analyze) -----
pub fn record_analyze_run() {
    ANALYZE_RUNS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_sample_rows(n: u64) {
    SAMPLE_ROWS_COLLECTED.fetch_add(n, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        vacuum_runs: VACUUM_RUNS.load(Ordering::Relaxed),
        heap_pages_scanned: HEAP_PAGES_SCANNED.load(Ordering::Relaxed),
        dead_rows_removed: DEAD_ROWS_REMOVED.load(Ordering::Relaxed),
        index_scan_rounds: INDEX_SCAN_ROUNDS.load(Ordering::Relaxed),
        index_bulk_delete_calls: INDEX_BULK_DELETE_CALLS.load(Ordering::Relaxed),
        index_cleanup_calls: INDEX_CLEANUP_CALLS.load(Ordering::Relaxed),
        pages_truncated: PAGES_TRUNCATED.load(Ordering::Relaxed),
        truncate_lock_conflicts: TRUNCATE_LOCK_CONFLICTS.load(Ordering::Relaxed),

        failsafe_triggers: FAILSAFE_TRIGGERS.load(Ordering::Relaxed),

        cost_delay_sleeps: COST_DELAY_SLEEPS.load(Ordering::Relaxed),
        cost_delay_micros: COST_DELAY_MICROS.load(Ordering::Relaxed),

        parallel_workers_launched: PARALLEL_WORKERS_LAUNCHED.load(Ordering::Relaxed),

        analyze_runs: ANALYZE_RUNS.load(Ordering::Relaxed),
        sample_rows_collected: SAMPLE_ROWS_COLLECTED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    VACUUM_RUNS.store(0, Ordering::Relaxed);
    HEAP_PAGES_SCANNED.store(0, Ordering::Relaxed);
    DEAD_ROWS_REMOVED.store(0, Ordering::Relaxed);
    INDEX_SCAN_ROUNDS.store(0, Ordering::Relaxed);
    INDEX_BULK_DELETE_CALLS.store(0, Ordering::Relaxed);
    INDEX_CLEANUP_CALLS.store(0, Ordering::Relaxed);
    PAGES_TRUNCATED.store(0, Ordering::Relaxed);
    TRUNCATE_LOCK_CONFLICTS.store(0, Ordering::Relaxed);

    FAILSAFE_TRIGGERS.store(0, Ordering::Relaxed);

    COST_DELAY_SLEEPS.store(0, Ordering::Relaxed);
    COST_DELAY_MICROS.store(0, Ordering::Relaxed);

    PARALLEL_WORKERS_LAUNCHED.store(0, Ordering::Relaxed);

    ANALYZE_RUNS.store(0, Ordering::Relaxed);
    SAMPLE_ROWS_COLLECTED.store(0, Ordering::Relaxed);
}
