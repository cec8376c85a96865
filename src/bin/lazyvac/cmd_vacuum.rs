use anyhow::{Context, Result};

use LazyVac::access::{CleanupParallelism, IndexCapabilities};
use LazyVac::config::VacuumConfig;
use LazyVac::mem::{MemEnv, TableBuilder};
use LazyVac::options::{VacOptValue, VacuumOption, VacuumOptions, VacuumParams, WorkerRequest};
use LazyVac::vacuum::vacuum;
use LazyVac::xid::TransactionId;

use crate::util::{print_metrics, print_report, synthetic_xids};

pub struct VacuumArgs {
    pub rows: usize,
    pub dead_pct: f64,
    pub indexes: usize,
    pub workers: Option<usize>,
    pub rows_per_page: usize,
    pub empty_tail: u32,
    pub freeze: bool,
    pub verbose: bool,
    pub full: bool,
    pub analyze: bool,
    pub no_truncate: bool,
    pub index_cleanup: String,
    pub frozen_age: u32,
    pub seed: u64,
    pub json: bool,
}

/// CLI: vacuum — синтетическая таблица в памяти + VACUUM (lazy или FULL).
///
/// relfrozenxid таблицы отстоит от следующего xid на --frozen-age; большое значение
/// (больше failsafe_age) включает failsafe.
pub fn exec(a: VacuumArgs) -> Result<()> {
    let cfg = VacuumConfig::from_env();
    let (insert_xid, delete_xid, next_xid) = synthetic_xids(a.frozen_age);

    let env = MemEnv::new(next_xid);
    let table = TableBuilder::new(1, "synthetic")
        .rows(a.rows)
        .dead_fraction(a.dead_pct / 100.0)
        .rows_per_page(a.rows_per_page)
        .empty_tail_pages(a.empty_tail)
        .indexes(a.indexes)
        .index_capabilities(IndexCapabilities {
            parallel_bulk_delete: true,
            parallel_cleanup: CleanupParallelism::IfNoBulkDelete,
            uses_maintenance_work_mem: false,
        })
        .xids(insert_xid, delete_xid)
        .relfrozenxid(TransactionId::FIRST_NORMAL)
        .seed(a.seed)
        .build(&env.catalog)
        .context("build synthetic table")?;

    let mut opts = VacuumOptions::vacuum();
    if a.freeze {
        opts = opts.with(VacuumOption::Freeze);
    }
    if a.verbose {
        opts = opts.with(VacuumOption::Verbose);
    }
    if a.full {
        opts = opts.with(VacuumOption::Full);
    }
    if a.analyze {
        opts = opts.with(VacuumOption::Analyze);
    }

    let workers = match a.workers {
        None => WorkerRequest::Auto,
        Some(0) => WorkerRequest::Disabled,
        Some(n) => WorkerRequest::Exactly(n),
    };
    let index_cleanup: VacOptValue = a
        .index_cleanup
        .parse()
        .with_context(|| format!("--index-cleanup {}", a.index_cleanup))?;
    let truncate = if a.no_truncate {
        VacOptValue::Disabled
    } else {
        VacOptValue::Unspecified
    };
    let params = VacuumParams::new(opts)
        .with_workers(workers)
        .with_index_cleanup(index_cleanup)
        .with_truncate(truncate);

    let report = vacuum(&table.relation, &params, &cfg, env.env())?;

    if a.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_report(&report);
    if a.verbose {
        print_metrics(&LazyVac::metrics::snapshot());
    }
    Ok(())
}
