//! vacuum — VACUUM одного отношения.
//!
//! Подмодули:
//! - dead_rows.rs — DeadRowStore (адреса LP_DEAD в порядке скана)
//! - cutoffs.rs   — горизонты видимости/заморозки и failsafe
//! - cost.rs      — cost-based задержка (локальный и общий баланс)
//! - io.rs        — контекст I/O процесса: стратегия, счётчики, задержка, прерывание
//! - prune.rs     — prune/freeze одной страницы
//! - index.rs     — bulk-delete/cleanup одного индекса
//! - parallel.rs  — ParallelCoordinator + SharedRunState
//! - lazy.rs      — LazyVacuumEngine
//! - truncate.rs  — усечение хвоста
//! - full.rs      — VACUUM FULL
//! - relstats.rs  — оценка reltuples и монотонное обновление каталога
//!
//! vacuum() проверяет параметры, берёт блокировку (AccessExclusive для FULL, иначе
//! ShareUpdateExclusive), выполняет lazy или FULL, затем ANALYZE (если запрошен), затем
//! side storage тем же способом.

pub mod cost;
pub mod cutoffs;
pub mod dead_rows;
pub mod full;
pub mod index;
pub mod io;
pub mod lazy;
pub mod parallel;
pub mod prune;
pub mod relstats;
pub mod truncate;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::access::{LockMode, RelId, RelLockGuard, Relation, RelationLocks, VacuumEnv};
use crate::analyze::{analyze_rel, AnalyzeOutcome};
use crate::config::VacuumConfig;
use crate::metrics::record_vacuum_run;
use crate::options::{VacuumOption, VacuumParams};

pub use cost::{CostBalance, CostDelayThrottle, SleepFn};
pub use cutoffs::{CutoffCalculator, Cutoffs};
pub use dead_rows::{DeadRowStore, DeadRowStoreFull};
pub use full::FullOutcome;
pub use io::VacuumIo;
pub use lazy::{IndexOutcome, LazyVacuumEngine, VacuumOutcome, VacuumPhase};
pub use parallel::{ParallelCoordinator, ParallelPlan, PerIndexResult, SharedRunState};

/// Итог vacuum()/analyze() по отношению (и его side storage).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub relid: RelId,
    pub relname: String,
    /// Отношение пропущено: блокировка занята при SKIP_LOCKED.
    pub skipped: bool,
    pub vacuum: Option<VacuumOutcome>,
    pub full: Option<FullOutcome>,
    pub analyze: Option<AnalyzeOutcome>,
    pub side_storage: Option<Box<RunReport>>,
    pub elapsed_ms: u64,
}

/// VACUUM и/или ANALYZE одного отношения.
pub fn vacuum(
    rel: &Relation,
    params: &VacuumParams,
    cfg: &VacuumConfig,
    env: VacuumEnv<'_>,
) -> Result<RunReport> {
    params.validate()?;
    process_rel(rel, params, cfg, env)
}

fn process_rel(
    rel: &Relation,
    params: &VacuumParams,
    cfg: &VacuumConfig,
    env: VacuumEnv<'_>,
) -> Result<RunReport> {
    let started = Instant::now();
    let do_vacuum = params.has(VacuumOption::Vacuum);
    let mut report = RunReport {
        relid: rel.relid(),
        relname: rel.name().to_string(),
        ..Default::default()
    };

    let mode = if do_vacuum && params.has(VacuumOption::Full) {
        LockMode::AccessExclusive
    } else {
        LockMode::ShareUpdateExclusive
    };
    let skip_locked = params.has(VacuumOption::SkipLocked);
    let Some(guard) = lock_relation(env.locks, rel.relid(), mode, skip_locked)? else {
        let what = if do_vacuum { "vacuum" } else { "analyze" };
        warn!("skipping {} of \"{}\" --- lock not available", what, rel.name());
        report.skipped = true;
        return Ok(report);
    };

    if do_vacuum {
        record_vacuum_run();
        if params.has(VacuumOption::Full) {
            report.full = Some(full::vacuum_full(rel, params, cfg, env)?);
        } else {
            report.vacuum = Some(LazyVacuumEngine::new(rel, params, cfg, env)?.run()?);
        }
    }

    if params.has(VacuumOption::Analyze) {
        report.analyze = Some(analyze_rel(rel, params, cfg, env, do_vacuum)?);
    }
    drop(guard);

    // side storage: только vacuum, без ANALYZE
    if do_vacuum && params.process_side_storage() {
        if let Some(side) = rel.side_storage.as_deref() {
            let mut side_params = params.clone();
            side_params.options = params.options.without(VacuumOption::Analyze);
            report.side_storage = Some(Box::new(process_rel(side, &side_params, cfg, env)?));
        }
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    if let Some(min) = params.log_min_duration_ms {
        if report.elapsed_ms >= min {
            info!(
                "automatic maintenance of table \"{}\" took {} ms",
                report.relname, report.elapsed_ms
            );
        }
    }
    Ok(report)
}

fn lock_relation<'a>(
    locks: &'a dyn RelationLocks,
    relid: RelId,
    mode: LockMode,
    skip_locked: bool,
) -> Result<Option<RelLockGuard<'a>>> {
    if skip_locked {
        return Ok(RelLockGuard::try_acquire(locks, relid, mode));
    }
    RelLockGuard::acquire(locks, relid, mode).map(Some)
}
