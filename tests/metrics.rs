// tests/metrics.rs
//
// Глобальные счётчики: один тест на бинарник, чтобы параллельные тесты не мешали reset().

use anyhow::Result;

use LazyVac::config::VacuumConfig;
use LazyVac::mem::{MemEnv, TableBuilder};
use LazyVac::metrics;
use LazyVac::options::{VacuumOption, VacuumOptions, VacuumParams};
use LazyVac::vacuum::vacuum;
use LazyVac::xid::TransactionId;

#[test]
fn counters_follow_vacuum_and_analyze() -> Result<()> {
    metrics::reset();

    let env = MemEnv::new(TransactionId(5000));
    let t = TableBuilder::new(1, "t")
        .rows(2_000)
        .dead_fraction(0.5)
        .indexes(1)
        .empty_tail_pages(5)
        .build(&env.catalog)?;
    let cfg = VacuumConfig::default().with_freeze_min_age(100).with_sample_seed(Some(1));
    let params = VacuumParams::new(VacuumOptions::vacuum().with(VacuumOption::Analyze));
    vacuum(&t.relation, &params, &cfg, env.env())?;

    let m = metrics::snapshot();
    assert_eq!(m.vacuum_runs, 1);
    assert_eq!(m.analyze_runs, 1);
    assert_eq!(m.heap_pages_scanned, 25);
    assert_eq!(m.dead_rows_removed, t.dead_tids.len() as u64);
    assert_eq!(m.index_scan_rounds, 1);
    assert_eq!(m.index_bulk_delete_calls, 1);
    assert_eq!(m.index_cleanup_calls, 1);
    assert_eq!(m.pages_truncated, 5);
    assert_eq!(m.failsafe_triggers, 0);
    assert_eq!(m.sample_rows_collected, t.live_rows as u64);
    assert_eq!(m.avg_delay_ms(), 0.0);

    // failsafe: relfrozenxid старше порога
    let old = MemEnv::new(TransactionId(2_000_000_000));
    let t2 = TableBuilder::new(2, "old").rows(500).dead_fraction(0.2).indexes(1).build(&old.catalog)?;
    vacuum(&t2.relation, &VacuumParams::new(VacuumOptions::vacuum()), &cfg, old.env())?;
    let m = metrics::snapshot();
    assert!(m.failsafe_triggers >= 1);
    assert_eq!(m.vacuum_runs, 2);

    metrics::reset();
    let z = metrics::snapshot();
    assert_eq!(z.vacuum_runs, 0);
    assert_eq!(z.dead_rows_removed, 0);
    Ok(())
}
