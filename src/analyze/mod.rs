//! analyze — статистика планировщика по случайной выборке строк.
//!
//! Подмодули:
//! - sampler.rs    — BlockSampler (Algorithm S) + reservoir (Algorithms X/Z)
//! - stats.rs      — AttributeStatistics / StatSlot
//! - typanalyze.rs — TypeAnalyzer и анализаторы по категориям типов
//!
//! analyze_rel(): для каждой колонки с ненулевым target выбирается анализатор, размер
//! выборки — максимум min_rows по колонкам. После выборки каждый анализатор заполняет свою
//! статистику; в каталог уходят только валидные. Side storage не анализируется.

pub mod sampler;
pub mod stats;
pub mod typanalyze;

use anyhow::{Context, Result};
use log::{log, Level};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::access::tuple::{HeapRow, PageNumber};
use crate::access::{RelId, RelStatsUpdate, Relation, VacuumEnv};
use crate::config::VacuumConfig;
use crate::metrics::{record_analyze_run, record_sample_rows};
use crate::options::VacuumParams;
use crate::vacuum::io::VacuumIo;
use crate::vacuum::relstats::update_relstats;

pub use sampler::{acquire_sample_rows, sampler_rng, BlockSampler, Reservoir, ReservoirState, SampleResult};
pub use stats::{AttributeStatistics, StatKind, StatOperator, StatSlot};
pub use typanalyze::{analyzer_for, ColumnSample, TypeAnalyzer};

/// Размер выборки, если анализировать нечего.
const DEFAULT_TARGET_ROWS: usize = 100;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeOutcome {
    pub relid: RelId,
    pub relname: String,
    pub target_rows: usize,
    pub sample_rows: usize,
    pub pages_sampled: usize,
    pub total_pages: PageNumber,
    pub total_rows: f64,
    pub total_dead_rows: f64,
    /// Статистика всех проанализированных колонок (включая отказавшиеся анализаторы).
    pub columns: Vec<AttributeStatistics>,
    pub columns_stored: usize,
    pub elapsed_ms: u64,
}

impl AnalyzeOutcome {
    pub fn column(&self, name: &str) -> Option<&AttributeStatistics> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// ANALYZE одного отношения. `in_vacuum` — запуск как часть VACUUM ANALYZE: тогда
/// pages/tuples в каталоге уже обновил vacuum.
pub fn analyze_rel(
    rel: &Relation,
    params: &VacuumParams,
    cfg: &VacuumConfig,
    env: VacuumEnv<'_>,
    in_vacuum: bool,
) -> Result<AnalyzeOutcome> {
    let started = Instant::now();
    record_analyze_run();
    let heap = rel.heap.as_ref();
    let relid = heap.relid();
    let elevel = if params.verbose() { Level::Info } else { Level::Debug };

    log!(elevel, "analyzing \"{}\"", heap.name());

    let mut attrs: Vec<(AttributeStatistics, Arc<dyn TypeAnalyzer>)> = Vec::new();
    for (i, col) in heap.columns().iter().enumerate() {
        let target = col.stat_target.unwrap_or(cfg.default_statistics_target);
        if target == 0 {
            continue;
        }
        let analyzer = analyzer_for(col);
        let mut st = AttributeStatistics::new(i, col, target);
        st.min_rows = analyzer.min_rows(target);
        attrs.push((st, analyzer));
    }
    let target_rows = attrs
        .iter()
        .map(|(st, _)| st.min_rows)
        .max()
        .unwrap_or(DEFAULT_TARGET_ROWS);

    let mut io = VacuumIo::new(cfg, env.cancel.clone());
    let mut rng = sampler_rng(cfg.sample_seed);
    let sample = acquire_sample_rows(
        heap,
        target_rows,
        env.xact.oldest_running_xid(),
        env.xact,
        &mut io,
        &mut rng,
    )?;
    record_sample_rows(sample.rows.len() as u64);

    let rows: Vec<HeapRow> = sample.rows.iter().map(|(_, r)| r.clone()).collect();
    if !rows.is_empty() {
        for (st, analyzer) in attrs.iter_mut() {
            io.check_cancel()?;
            let cs = ColumnSample::new(&rows, st.attnum);
            analyzer
                .compute(st, &cs, sample.total_rows)
                .with_context(|| format!("compute statistics for column \"{}\" ({})", st.name, analyzer.name()))?;
        }
    }

    let columns: Vec<AttributeStatistics> = attrs.into_iter().map(|(st, _)| st).collect();
    let valid: Vec<AttributeStatistics> = columns.iter().filter(|c| c.stats_valid).cloned().collect();
    if !valid.is_empty() {
        env.catalog
            .store_column_stats(relid, &valid)
            .with_context(|| format!("store column statistics for \"{}\"", heap.name()))?;
    }

    if !in_vacuum {
        let upd = RelStatsUpdate {
            pages: sample.total_pages,
            tuples: sample.total_rows,
            ..Default::default()
        };
        update_relstats(env.catalog, relid, &upd)?;
    }

    log!(
        elevel,
        "\"{}\": {} of {} pages sampled, {} rows in sample, {:.0} estimated total rows; {} of {} columns stored",
        heap.name(),
        sample.pages_sampled,
        sample.total_pages,
        rows.len(),
        sample.total_rows,
        valid.len(),
        columns.len()
    );

    Ok(AnalyzeOutcome {
        relid,
        relname: heap.name().to_string(),
        target_rows,
        sample_rows: rows.len(),
        pages_sampled: sample.pages_sampled,
        total_pages: sample.total_pages,
        total_rows: sample.total_rows,
        total_dead_rows: sample.total_dead_rows,
        columns_stored: valid.len(),
        columns,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}
