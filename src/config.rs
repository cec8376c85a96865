//! Centralized configuration and builder for LazyVac.
//!
//! Goals:
//! - Single place to collect vacuum/analyze tunables instead of global variables.
//! - VacuumConfig::from_env() reads LV_* env vars on top of the defaults.
//! - VacuumConfigBuilder starts from env (or clean defaults) and allows overrides.
//!
//! Конфиг передаётся явно во все точки входа (vacuum(), analyze_rel()); глобального
//! изменяемого состояния нет.

use std::fmt;

use crate::consts::{DEFAULT_PAGE_SIZE, FSM_EVERY_BYTES};

/// Top-level configuration for vacuum and analyze.
#[derive(Clone, Debug)]
pub struct VacuumConfig {
    /// Memory budget for dead row collection, KiB.
    /// Env: LV_MAINTENANCE_WORK_MEM_KB (default 65536)
    pub maintenance_work_mem_kb: usize,

    /// Env: LV_FREEZE_MIN_AGE (default 50_000_000)
    pub freeze_min_age: u32,
    /// Env: LV_FREEZE_TABLE_AGE (default 150_000_000)
    pub freeze_table_age: u32,
    /// Env: LV_MULTIXACT_FREEZE_MIN_AGE (default 5_000_000)
    pub multixact_freeze_min_age: u32,
    /// Env: LV_MULTIXACT_FREEZE_TABLE_AGE (default 150_000_000)
    pub multixact_freeze_table_age: u32,
    /// Env: LV_AUTOVACUUM_FREEZE_MAX_AGE (default 200_000_000)
    pub autovacuum_freeze_max_age: u32,
    /// Env: LV_AUTOVACUUM_MULTIXACT_FREEZE_MAX_AGE (default 400_000_000)
    pub autovacuum_multixact_freeze_max_age: u32,

    /// Hard failsafe age for relfrozenxid.
    /// Env: LV_FAILSAFE_AGE (default 1_600_000_000)
    pub failsafe_age: u32,
    /// Env: LV_MULTIXACT_FAILSAFE_AGE (default 1_600_000_000)
    pub multixact_failsafe_age: u32,

    // ---------- cost-based delay ----------
    /// Sleep per cost_limit units, ms. 0 disables throttling.
    /// Env: LV_COST_DELAY_MS (default 0.0)
    pub cost_delay_ms: f64,
    /// Env: LV_COST_LIMIT (default 200)
    pub cost_limit: u32,
    /// Env: LV_COST_PAGE_HIT (default 1)
    pub cost_page_hit: u32,
    /// Env: LV_COST_PAGE_MISS (default 2)
    pub cost_page_miss: u32,
    /// Env: LV_COST_PAGE_DIRTY (default 20)
    pub cost_page_dirty: u32,

    // ---------- parallel ----------
    /// System cap for parallel index workers.
    /// Env: LV_MAX_PARALLEL_WORKERS (default 2)
    pub max_parallel_maintenance_workers: usize,
    /// Indexes smaller than this (pages) are processed by the leader only.
    /// Env: LV_MIN_PARALLEL_INDEX_PAGES (default 64)
    pub min_parallel_index_pages: u32,

    // ---------- analyze ----------
    /// Env: LV_DEFAULT_STATISTICS_TARGET (default 100)
    pub default_statistics_target: u32,
    /// Fixed RNG seed for sampling (None = entropy).
    /// Env: LV_SAMPLE_SEED
    pub sample_seed: Option<u64>,

    // ---------- truncate ----------
    /// Env: LV_TRUNCATE_LOCK_WAIT_INTERVAL_MS (default 50)
    pub truncate_lock_wait_interval_ms: u64,
    /// Env: LV_TRUNCATE_LOCK_TIMEOUT_MS (default 5000)
    pub truncate_lock_timeout_ms: u64,
    /// Env: LV_TRUNCATE_LOCK_CHECK_INTERVAL_MS (default 20)
    pub truncate_lock_check_interval_ms: u64,

    // ---------- misc ----------
    /// Space map cadence for tables without indexes (pages).
    /// Env: LV_FSM_VACUUM_EVERY_PAGES (default 8 GiB / page size)
    pub fsm_vacuum_every_pages: u32,
    /// Ring size of the buffer access strategy (pages).
    /// Env: LV_STRATEGY_RING_PAGES (default 32)
    pub strategy_ring_pages: usize,
}

impl Default for VacuumConfig {
    fn default() -> Self {
        Self {
            maintenance_work_mem_kb: 65536,

            freeze_min_age: 50_000_000,
            freeze_table_age: 150_000_000,
            multixact_freeze_min_age: 5_000_000,
            multixact_freeze_table_age: 150_000_000,
            autovacuum_freeze_max_age: 200_000_000,
            autovacuum_multixact_freeze_max_age: 400_000_000,

            failsafe_age: 1_600_000_000,
            multixact_failsafe_age: 1_600_000_000,

            cost_delay_ms: 0.0,
            cost_limit: 200,
            cost_page_hit: 1,
            cost_page_miss: 2,
            cost_page_dirty: 20,

            max_parallel_maintenance_workers: 2,
            min_parallel_index_pages: 64,

            default_statistics_target: 100,
            sample_seed: None,

            truncate_lock_wait_interval_ms: 50,
            truncate_lock_timeout_ms: 5000,
            truncate_lock_check_interval_ms: 20,

            fsm_vacuum_every_pages: (FSM_EVERY_BYTES / DEFAULT_PAGE_SIZE as u64) as u32,
            strategy_ring_pages: 32,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl VacuumConfig {
    /// Load configuration from LV_* environment variables on top of defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(n) = env_parse("LV_MAINTENANCE_WORK_MEM_KB") {
            cfg.maintenance_work_mem_kb = n;
        }

        // ----- freeze ages -----
        if let Some(n) = env_parse("LV_FREEZE_MIN_AGE") {
            cfg.freeze_min_age = n;
        }
        if let Some(n) = env_parse("LV_FREEZE_TABLE_AGE") {
            cfg.freeze_table_age = n;
        }
        if let Some(n) = env_parse("LV_MULTIXACT_FREEZE_MIN_AGE") {
            cfg.multixact_freeze_min_age = n;
        }
        if let Some(n) = env_parse("LV_MULTIXACT_FREEZE_TABLE_AGE") {
            cfg.multixact_freeze_table_age = n;
        }
        if let Some(n) = env_parse("LV_AUTOVACUUM_FREEZE_MAX_AGE") {
            cfg.autovacuum_freeze_max_age = n;
        }
        if let Some(n) = env_parse("LV_AUTOVACUUM_MULTIXACT_FREEZE_MAX_AGE") {
            cfg.autovacuum_multixact_freeze_max_age = n;
        }
        if let Some(n) = env_parse("LV_FAILSAFE_AGE") {
            cfg.failsafe_age = n;
        }
        if let Some(n) = env_parse("LV_MULTIXACT_FAILSAFE_AGE") {
            cfg.multixact_failsafe_age = n;
        }

        // ----- cost -----
        if let Some(n) = env_parse("LV_COST_DELAY_MS") {
            cfg.cost_delay_ms = n;
        }
        if let Some(n) = env_parse("LV_COST_LIMIT") {
            cfg.cost_limit = n;
        }
        if let Some(n) = env_parse("LV_COST_PAGE_HIT") {
            cfg.cost_page_hit = n;
        }
        if let Some(n) = env_parse("LV_COST_PAGE_MISS") {
            cfg.cost_page_miss = n;
        }
        if let Some(n) = env_parse("LV_COST_PAGE_DIRTY") {
            cfg.cost_page_dirty = n;
        }

        // ----- parallel -----
        if let Some(n) = env_parse("LV_MAX_PARALLEL_WORKERS") {
            cfg.max_parallel_maintenance_workers = n;
        }
        if let Some(n) = env_parse("LV_MIN_PARALLEL_INDEX_PAGES") {
            cfg.min_parallel_index_pages = n;
        }

        // ----- analyze -----
        if let Some(n) = env_parse("LV_DEFAULT_STATISTICS_TARGET") {
            cfg.default_statistics_target = n;
        }
        if let Some(n) = env_parse("LV_SAMPLE_SEED") {
            cfg.sample_seed = Some(n);
        }

        // ----- truncate -----
        if let Some(n) = env_parse("LV_TRUNCATE_LOCK_WAIT_INTERVAL_MS") {
            cfg.truncate_lock_wait_interval_ms = n;
        }
        if let Some(n) = env_parse("LV_TRUNCATE_LOCK_TIMEOUT_MS") {
            cfg.truncate_lock_timeout_ms = n;
        }
        if let Some(n) = env_parse("LV_TRUNCATE_LOCK_CHECK_INTERVAL_MS") {
            cfg.truncate_lock_check_interval_ms = n;
        }

        if let Some(n) = env_parse("LV_FSM_VACUUM_EVERY_PAGES") {
            cfg.fsm_vacuum_every_pages = n;
        }
        if let Some(n) = env_parse("LV_STRATEGY_RING_PAGES") {
            cfg.strategy_ring_pages = n;
        }

        cfg
    }

    /// Effective failsafe age: never below 105% of autovacuum_freeze_max_age.
    pub fn effective_failsafe_age(&self) -> u32 {
        let floor = (self.autovacuum_freeze_max_age as u64 * 105 / 100).min(u32::MAX as u64) as u32;
        self.failsafe_age.max(floor)
    }

    pub fn effective_multixact_failsafe_age(&self) -> u32 {
        let floor = (self.autovacuum_multixact_freeze_max_age as u64 * 105 / 100)
            .min(u32::MAX as u64) as u32;
        self.multixact_failsafe_age.max(floor)
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_maintenance_work_mem_kb(mut self, kb: usize) -> Self {
        self.maintenance_work_mem_kb = kb;
        self
    }

    pub fn with_freeze_min_age(mut self, age: u32) -> Self {
        self.freeze_min_age = age;
        self
    }

    pub fn with_freeze_table_age(mut self, age: u32) -> Self {
        self.freeze_table_age = age;
        self
    }

    pub fn with_failsafe_age(mut self, age: u32) -> Self {
        self.failsafe_age = age;
        self
    }

    pub fn with_cost_delay(mut self, delay_ms: f64, limit: u32) -> Self {
        self.cost_delay_ms = delay_ms;
        self.cost_limit = limit;
        self
    }

    pub fn with_max_parallel_workers(mut self, n: usize) -> Self {
        self.max_parallel_maintenance_workers = n;
        self
    }

    pub fn with_min_parallel_index_pages(mut self, pages: u32) -> Self {
        self.min_parallel_index_pages = pages;
        self
    }

    pub fn with_statistics_target(mut self, target: u32) -> Self {
        self.default_statistics_target = target;
        self
    }

    pub fn with_sample_seed(mut self, seed: Option<u64>) -> Self {
        self.sample_seed = seed;
        self
    }

    pub fn with_truncate_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.truncate_lock_timeout_ms = ms;
        self
    }

    pub fn with_truncate_lock_check_interval_ms(mut self, ms: u64) -> Self {
        self.truncate_lock_check_interval_ms = ms;
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> Self {
        self
    }
}

impl fmt::Display for VacuumConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VacuumConfig {{ \
             maintenance_work_mem_kb: {}, \
             freeze_min_age: {}, \
             freeze_table_age: {}, \
             failsafe_age: {}, \
             cost_delay_ms: {}, \
             cost_limit: {}, \
             max_parallel_maintenance_workers: {}, \
             default_statistics_target: {}, \
             sample_seed: {} \
             }}",
            self.maintenance_work_mem_kb,
            self.freeze_min_age,
            self.freeze_table_age,
            self.effective_failsafe_age(),
            self.cost_delay_ms,
            self.cost_limit,
            self.max_parallel_maintenance_workers,
            self.default_statistics_target,
            self.sample_seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "random".to_string()),
        )
    }
}

/// Lightweight builder that produces a VacuumConfig.
#[derive(Clone, Debug)]
pub struct VacuumConfigBuilder {
    cfg: VacuumConfig,
}

impl Default for VacuumConfigBuilder {
    fn default() -> Self {
        // Start from env to preserve operator overrides, then allow code overrides.
        Self {
            cfg: VacuumConfig::from_env(),
        }
    }
}

impl VacuumConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: VacuumConfig::default(),
        }
    }

    pub fn maintenance_work_mem_kb(mut self, kb: usize) -> Self {
        self.cfg.maintenance_work_mem_kb = kb;
        self
    }

    pub fn freeze_min_age(mut self, age: u32) -> Self {
        self.cfg.freeze_min_age = age;
        self
    }

    pub fn freeze_table_age(mut self, age: u32) -> Self {
        self.cfg.freeze_table_age = age;
        self
    }

    pub fn multixact_freeze_min_age(mut self, age: u32) -> Self {
        self.cfg.multixact_freeze_min_age = age;
        self
    }

    pub fn failsafe_age(mut self, age: u32) -> Self {
        self.cfg.failsafe_age = age;
        self
    }

    pub fn cost_delay(mut self, delay_ms: f64, limit: u32) -> Self {
        self.cfg.cost_delay_ms = delay_ms;
        self.cfg.cost_limit = limit;
        self
    }

    pub fn max_parallel_workers(mut self, n: usize) -> Self {
        self.cfg.max_parallel_maintenance_workers = n;
        self
    }

    pub fn min_parallel_index_pages(mut self, pages: u32) -> Self {
        self.cfg.min_parallel_index_pages = pages;
        self
    }

    pub fn statistics_target(mut self, target: u32) -> Self {
        self.cfg.default_statistics_target = target;
        self
    }

    pub fn sample_seed(mut self, seed: Option<u64>) -> Self {
        self.cfg.sample_seed = seed;
        self
    }

    pub fn truncate_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.cfg.truncate_lock_timeout_ms = ms;
        self
    }

    pub fn truncate_lock_check_interval_ms(mut self, ms: u64) -> Self {
        self.cfg.truncate_lock_check_interval_ms = ms;
        self
    }

    pub fn fsm_vacuum_every_pages(mut self, pages: u32) -> Self {
        self.cfg.fsm_vacuum_every_pages = pages;
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> VacuumConfig {
        self.cfg
    }
}
