use anyhow::{Context, Result};

use LazyVac::analyze::analyze_rel;
use LazyVac::config::VacuumConfig;
use LazyVac::mem::{MemEnv, TableBuilder};
use LazyVac::options::{VacuumOption, VacuumOptions, VacuumParams};

use crate::util::{print_analyze, synthetic_xids};

/// CLI: analyze — синтетическая таблица в памяти + ANALYZE.
pub fn exec(
    rows: usize,
    target: u32,
    rows_per_page: usize,
    seed: Option<u64>,
    verbose: bool,
    json: bool,
) -> Result<()> {
    let base = VacuumConfig::from_env();
    let seed = seed.or(base.sample_seed);
    let cfg = base.with_statistics_target(target).with_sample_seed(seed);
    let (insert_xid, delete_xid, next_xid) = synthetic_xids(1_000);

    let env = MemEnv::new(next_xid);
    let table = TableBuilder::new(1, "synthetic")
        .rows(rows)
        .rows_per_page(rows_per_page)
        .xids(insert_xid, delete_xid)
        .build(&env.catalog)
        .context("build synthetic table")?;

    let mut opts = VacuumOptions::analyze();
    if verbose {
        opts = opts.with(VacuumOption::Verbose);
    }
    let params = VacuumParams::new(opts);
    let out = analyze_rel(&table.relation, &params, &cfg, env.env(), false)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    print_analyze(&out);
    Ok(())
}
