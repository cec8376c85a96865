use LazyVac::analyze::AnalyzeOutcome;
use LazyVac::metrics::MetricsSnapshot;
use LazyVac::vacuum::{FullOutcome, RunReport, VacuumOutcome};
use LazyVac::xid::TransactionId;

/// Граница, за которой сравнение xid по модулю 2^32 теряет смысл.
const MAX_SYNTHETIC_AGE: u32 = 2_000_000_000;

/// (insert_xid, delete_xid, next_xid) для синтетической таблицы с relfrozenxid = 3.
pub fn synthetic_xids(frozen_age: u32) -> (TransactionId, TransactionId, TransactionId) {
    let age = frozen_age.clamp(100, MAX_SYNTHETIC_AGE);
    let base = TransactionId::FIRST_NORMAL.0;
    (
        TransactionId(base + 10),
        TransactionId(base + 20),
        TransactionId(base + age),
    )
}

pub fn print_report(r: &RunReport) {
    if r.skipped {
        println!("\"{}\": skipped (lock not available)", r.relname);
        return;
    }
    if let Some(v) = &r.vacuum {
        print_vacuum(v);
    }
    if let Some(f) = &r.full {
        print_full(&r.relname, f);
    }
    if let Some(a) = &r.analyze {
        print_analyze(a);
    }
    if let Some(side) = &r.side_storage {
        print_report(side);
    }
    println!("  elapsed_ms           = {}", r.elapsed_ms);
}

pub fn print_vacuum(v: &VacuumOutcome) {
    println!("Vacuum summary for \"{}\":", v.relname);
    println!("  aggressive           = {}", v.aggressive);
    println!("  failsafe_active      = {}", v.failsafe_active);
    println!("  pages                = {} -> {} ({} removed)", v.orig_rel_pages, v.rel_pages, v.pages_removed);
    println!(
        "  scanned_pages        = {} (pinskipped {}, frozenskipped {})",
        v.scanned_pages, v.pinskipped_pages, v.frozenskipped_pages
    );
    println!("  tuples_deleted       = {}", v.tuples_deleted);
    println!("  tuples_frozen        = {}", v.tuples_frozen);
    println!("  lpdead_items         = {}", v.lpdead_items);
    println!("  new_rel_tuples       = {:.0}", v.new_rel_tuples);
    println!("  new_dead_tuples      = {:.0}", v.new_dead_tuples);
    println!("  index_scans          = {}", v.num_index_scans);
    println!("  index_vacuum_bypassed= {}", v.index_vacuum_bypassed);
    println!("  workers_launched     = {}", v.parallel_workers_launched);
    for i in &v.indexes {
        let removed = i.bulk_delete.map(|b| b.tuples_removed).unwrap_or(0.0);
        let remain = i.cleanup.map(|c| c.num_index_tuples);
        match remain {
            Some(n) => println!("  index \"{}\": {:.0} removed, {:.0} remain", i.name, removed, n),
            None => println!("  index \"{}\": {:.0} removed, cleanup skipped", i.name, removed),
        }
    }
    println!(
        "  frozen_xid           = {}",
        v.new_frozen_xid
            .map(|x| x.to_string())
            .unwrap_or_else(|| "unchanged".to_string())
    );
    println!(
        "  io                   = hit {}, miss {}, dirtied {}",
        v.io.pages_hit, v.io.pages_miss, v.io.pages_dirtied
    );
    println!("  delay_ms             = {:.1}", v.delay_ms);
}

pub fn print_full(relname: &str, f: &FullOutcome) {
    println!("Vacuum FULL summary for \"{}\":", relname);
    println!("  pages                = {} -> {}", f.old_pages, f.new_pages);
    println!("  tuples_removed       = {}", f.tuples_removed);
    println!("  tuples_kept          = {} ({} recently dead)", f.tuples_kept, f.recently_dead);
    println!("  tuples_frozen        = {}", f.tuples_frozen);
}

pub fn print_analyze(a: &AnalyzeOutcome) {
    println!("Analyze summary for \"{}\":", a.relname);
    println!("  pages_sampled        = {} of {}", a.pages_sampled, a.total_pages);
    println!("  sample_rows          = {} (target {})", a.sample_rows, a.target_rows);
    println!("  total_rows           = {:.0}", a.total_rows);
    println!("  total_dead_rows      = {:.0}", a.total_dead_rows);
    for c in &a.columns {
        println!(
            "  column \"{}\": valid={} null_frac={:.3} avg_width={:.1} n_distinct={:.3} slots={}",
            c.name,
            c.stats_valid,
            c.null_frac,
            c.avg_width,
            c.n_distinct,
            c.slots.len()
        );
    }
}

pub fn print_metrics(m: &MetricsSnapshot) {
    println!("Metrics:");
    println!("  heap_pages_scanned   = {}", m.heap_pages_scanned);
    println!("  dead_rows_removed    = {}", m.dead_rows_removed);
    println!(
        "  index rounds/bulk/cleanup = {}/{}/{}",
        m.index_scan_rounds, m.index_bulk_delete_calls, m.index_cleanup_calls
    );
    println!(
        "  pages_truncated      = {} (lock conflicts {})",
        m.pages_truncated, m.truncate_lock_conflicts
    );
    println!("  failsafe_triggers    = {}", m.failsafe_triggers);
    println!(
        "  cost_delay           = {} sleeps, avg {:.2} ms",
        m.cost_delay_sleeps,
        m.avg_delay_ms()
    );
    println!("  workers_launched     = {}", m.parallel_workers_launched);
    if m.analyze_runs > 0 {
        println!("  sample_rows          = {}", m.sample_rows_collected);
    }
}
