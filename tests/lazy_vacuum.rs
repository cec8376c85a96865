// tests/lazy_vacuum.rs
//
// Сквозные сценарии lazy vacuum на in-memory подсистемах:
// 1) Обычный запуск: 10k строк, 30% удалено, 2 индекса, параллельный bulk-delete.
// 2) Failsafe: relfrozenxid старше порога — индексы не трогаются вовсе.
// 3) Bypass: мёртвых строк на малой доле страниц — индексный раунд пропускается.
// 4) INDEX_CLEANUP off, таблица без индексов, маленький бюджет памяти (несколько раундов).
// 5) Failsafe, сработавший между раундами: остаток раундов, cleanup и задержка отключаются.

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use LazyVac::access::{
    Catalog, CleanupParallelism, HeapRelation, IndexCapabilities, IndexRelation, ItemSlot,
    ThreadLauncher,
};
use LazyVac::config::VacuumConfig;
use LazyVac::mem::{MemEnv, SyntheticTable, TableBuilder};
use LazyVac::options::{VacOptValue, VacuumOption, VacuumOptions, VacuumParams, WorkerRequest};
use LazyVac::vacuum::{vacuum, CostDelayThrottle, LazyVacuumEngine, SleepFn, VacuumIo};
use LazyVac::xid::TransactionId;

const RELID: u32 = 1;

#[test]
fn lazy_vacuum_removes_dead_rows_with_parallel_indexes() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000)).with_launcher(ThreadLauncher::new(4));
    let t = table(&env, 10_000, 0.3, 2)?;
    let cfg = VacuumConfig::default()
        .with_freeze_min_age(100)
        .with_min_parallel_index_pages(0)
        .with_max_parallel_workers(2);
    let params = VacuumParams::new(VacuumOptions::vacuum()).with_workers(WorkerRequest::Exactly(2));

    let report = vacuum(&t.relation, &params, &cfg, env.env())?;
    let out = report.vacuum.expect("lazy vacuum outcome");

    let dead = t.dead_tids.len();
    assert!(dead > 2500 && dead < 3500, "unexpected dead count {dead}");
    assert_eq!(out.tuples_deleted, dead as u64);
    assert_eq!(out.num_index_scans, 1);
    assert_eq!(out.lpdead_items, 0);
    assert!(!out.failsafe_active);
    assert!(!out.index_vacuum_bypassed);
    assert!(out.parallel_workers_launched >= 1);
    assert!(out.tuples_frozen > 0 && out.tuples_frozen <= t.live_rows as u64);
    assert_eq!(out.index_tuples_deleted, (2 * dead) as f64);

    // куча: только живые строки, LP_DEAD не осталось
    assert_eq!(t.heap.row_count()?, t.live_rows);
    assert_eq!(t.heap.dead_item_count()?, 0);

    // индексы: ни одной ссылки на удалённые строки
    for idx in &t.indexes {
        assert_eq!(idx.len(), t.live_rows);
        assert_eq!(idx.bulk_delete_calls(), 1);
        assert_eq!(idx.cleanup_calls(), 1);
        assert!(t.dead_tids.iter().all(|tid| !idx.contains_tid(*tid)));
    }

    // каталог
    let st = env.catalog.rel_stats(RELID)?;
    assert_eq!(st.tuples, t.live_rows as f64);
    assert_eq!(st.pages, 100);
    assert_eq!(st.frozen_xid, TransactionId(4900));
    assert_eq!(st.all_visible_pages, 100);
    for idx in &t.indexes {
        let ist = env.catalog.rel_stats(idx.relid())?;
        assert_eq!(ist.tuples, t.live_rows as f64);
    }
    Ok(())
}

#[test]
fn second_vacuum_skips_all_visible_pages() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000));
    let t = table(&env, 5_000, 0.2, 1)?;
    let cfg = VacuumConfig::default().with_freeze_min_age(100);
    let params = VacuumParams::new(VacuumOptions::vacuum());

    vacuum(&t.relation, &params, &cfg, env.env())?;
    let again = vacuum(&t.relation, &params, &cfg, env.env())?
        .vacuum
        .expect("outcome");

    // всё all-visible: сканируется только последняя страница
    assert_eq!(again.scanned_pages, 1);
    assert_eq!(again.tuples_deleted, 0);
    assert_eq!(again.num_index_scans, 0);
    Ok(())
}

#[test]
fn failsafe_skips_index_work_entirely() -> Result<()> {
    let env = MemEnv::new(TransactionId(2_000_000_000));
    let t = table(&env, 10_000, 0.3, 2)?;
    let cfg = VacuumConfig::default().with_min_parallel_index_pages(0);
    let params = VacuumParams::new(VacuumOptions::vacuum());

    let out = vacuum(&t.relation, &params, &cfg, env.env())?
        .vacuum
        .expect("outcome");

    assert!(out.failsafe_active);
    assert!(out.aggressive);
    assert_eq!(out.num_index_scans, 0);
    assert_eq!(out.lpdead_items, t.dead_tids.len() as u64);
    for idx in &t.indexes {
        assert_eq!(idx.bulk_delete_calls(), 0);
        assert_eq!(idx.cleanup_calls(), 0);
        assert_eq!(idx.len(), 10_000);
        assert!(out.indexes.iter().all(|o| o.cleanup.is_none()));
    }

    // строки удалены из кучи (LP_DEAD остались), relfrozenxid продвинут до горизонта
    assert_eq!(t.heap.row_count()?, t.live_rows);
    assert_eq!(t.heap.dead_item_count()?, t.dead_tids.len());
    let st = env.catalog.rel_stats(RELID)?;
    assert_eq!(st.frozen_xid, TransactionId(2_000_000_000));
    Ok(())
}

#[test]
fn few_dead_pages_bypass_index_vacuum() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000));
    // 200 страниц, одна страница с мёртвыми строками: 0.5% < 2%
    let t = table(&env, 20_000, 0.0, 2)?;
    kill_rows(&t, &[5, 6, 7])?;

    let cfg = VacuumConfig::default().with_freeze_min_age(100);
    let params = VacuumParams::new(VacuumOptions::vacuum());
    let out = vacuum(&t.relation, &params, &cfg, env.env())?
        .vacuum
        .expect("outcome");

    assert!(out.index_vacuum_bypassed);
    assert_eq!(out.num_index_scans, 0);
    assert_eq!(out.tuples_deleted, 3);
    assert_eq!(out.lpdead_items, 3);
    assert_eq!(t.heap.dead_item_count()?, 3);
    for idx in &t.indexes {
        assert_eq!(idx.bulk_delete_calls(), 0);
        // cleanup всё равно выполняется
        assert_eq!(idx.cleanup_calls(), 1);
    }

    // INDEX_CLEANUP on запрещает bypass
    let env2 = MemEnv::new(TransactionId(5000));
    let t2 = table(&env2, 20_000, 0.0, 2)?;
    kill_rows(&t2, &[5, 6, 7])?;
    let params_on = VacuumParams::new(VacuumOptions::vacuum()).with_index_cleanup(VacOptValue::Enabled);
    let out2 = vacuum(&t2.relation, &params_on, &cfg, env2.env())?
        .vacuum
        .expect("outcome");
    assert!(!out2.index_vacuum_bypassed);
    assert_eq!(out2.num_index_scans, 1);
    assert_eq!(t2.heap.dead_item_count()?, 0);
    Ok(())
}

#[test]
fn index_cleanup_off_leaves_dead_items() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000));
    let t = table(&env, 3_000, 0.5, 2)?;
    let cfg = VacuumConfig::default().with_freeze_min_age(100);
    let params = VacuumParams::new(VacuumOptions::vacuum()).with_index_cleanup(VacOptValue::Disabled);

    let out = vacuum(&t.relation, &params, &cfg, env.env())?
        .vacuum
        .expect("outcome");
    assert_eq!(out.num_index_scans, 0);
    assert_eq!(out.lpdead_items, t.dead_tids.len() as u64);
    for idx in &t.indexes {
        assert_eq!(idx.bulk_delete_calls(), 0);
        assert_eq!(idx.cleanup_calls(), 0);
    }
    Ok(())
}

#[test]
fn table_without_indexes_reclaims_immediately() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000));
    let t = table(&env, 4_000, 0.4, 0)?;
    let cfg = VacuumConfig::default().with_freeze_min_age(100);
    let params = VacuumParams::new(VacuumOptions::vacuum());

    let out = vacuum(&t.relation, &params, &cfg, env.env())?
        .vacuum
        .expect("outcome");
    assert_eq!(out.num_index_scans, 0);
    assert_eq!(out.tuples_deleted, t.dead_tids.len() as u64);
    assert_eq!(out.lpdead_items, 0);
    assert_eq!(t.heap.dead_item_count()?, 0);
    assert!(t.heap.fsm_vacuum_calls() >= 1);
    Ok(())
}

#[test]
fn small_memory_budget_runs_several_index_rounds() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000));
    let t = table(&env, 10_000, 0.5, 1)?;
    // 1 КБ -> ~170 адресов, но не меньше одной страницы (100)
    let cfg = VacuumConfig::default()
        .with_freeze_min_age(100)
        .with_maintenance_work_mem_kb(1);
    let params = VacuumParams::new(VacuumOptions::vacuum());

    let engine = LazyVacuumEngine::new(&t.relation, &params, &cfg, env.env())?;
    let cap = engine.dead_row_capacity();
    assert!(cap >= 100 && cap < 200, "capacity {cap}");
    let out = engine.run()?;

    assert!(out.num_index_scans > 10);
    assert_eq!(t.indexes[0].bulk_delete_calls(), out.num_index_scans);
    assert_eq!(t.heap.dead_item_count()?, 0);
    assert_eq!(t.indexes[0].len(), t.live_rows);
    Ok(())
}

#[test]
fn failsafe_trips_between_index_rounds() -> Result<()> {
    let env = Arc::new(MemEnv::new(TransactionId(5000)));
    let t = table(&env, 10_000, 0.5, 1)?;
    // лимит 1: пока задержка активна, спим на каждой странице
    let cfg = VacuumConfig::default()
        .with_freeze_min_age(100)
        .with_maintenance_work_mem_kb(1)
        .with_cost_delay(1.0, 1);
    let params = VacuumParams::new(VacuumOptions::vacuum());

    let sleeps = Arc::new(AtomicUsize::new(0));
    let sleeper: SleepFn = {
        let sleeps = sleeps.clone();
        Arc::new(move |_: Duration| {
            sleeps.fetch_add(1, Ordering::SeqCst);
        })
    };

    // после второго bulk-delete возраст relfrozenxid переваливает за порог failsafe
    let sleeps_at_trip = Arc::new(AtomicUsize::new(usize::MAX));
    {
        let env = env.clone();
        let sleeps = sleeps.clone();
        let at = sleeps_at_trip.clone();
        t.indexes[0].on_bulk_delete(move |call| {
            if call == 2 {
                env.xact.set_next_xid(TransactionId(2_000_000_000));
                at.store(sleeps.load(Ordering::SeqCst), Ordering::SeqCst);
            }
        });
    }

    let io = VacuumIo::with_throttle(
        CostDelayThrottle::from_config(&cfg).with_sleeper(sleeper),
        &cfg,
        env.cancel.clone(),
    );
    let out = LazyVacuumEngine::new(&t.relation, &params, &cfg, env.env())?
        .with_io(io)
        .run()?;

    assert!(out.failsafe_active);
    assert_eq!(out.num_index_scans, 2);
    assert_eq!(t.indexes[0].bulk_delete_calls(), 2);
    assert_eq!(t.indexes[0].cleanup_calls(), 0);
    assert!(out.indexes.iter().all(|o| o.cleanup.is_none()));

    // мёртвые адреса после срабатывания остаются LP_DEAD
    assert!(out.lpdead_items > 0);
    assert_eq!(t.heap.dead_item_count()? as u64, out.lpdead_items);
    assert_eq!(t.heap.row_count()?, t.live_rows);

    // до срабатывания спали, после — ни разу
    let at = sleeps_at_trip.load(Ordering::SeqCst);
    assert!(at > 0 && at != usize::MAX);
    assert_eq!(sleeps.load(Ordering::SeqCst), at);
    Ok(())
}

#[test]
fn freeze_option_freezes_recent_rows() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000));
    let t = table(&env, 1_000, 0.0, 1)?;
    // freeze_min_age по умолчанию (50M) — без FREEZE строки не замораживаются
    let cfg = VacuumConfig::default();

    let plain = vacuum(&t.relation, &VacuumParams::new(VacuumOptions::vacuum()), &cfg, env.env())?
        .vacuum
        .expect("outcome");
    assert_eq!(plain.tuples_frozen, 0);

    let params = VacuumParams::new(VacuumOptions::vacuum().with(VacuumOption::Freeze));
    let frozen = vacuum(&t.relation, &params, &cfg, env.env())?
        .vacuum
        .expect("outcome");
    assert!(frozen.aggressive);
    assert_eq!(frozen.tuples_frozen, 1_000);
    assert!(t.heap.all_rows()?.iter().all(|(_, r)| r.header.is_frozen()));
    Ok(())
}

// ---------- helpers ----------

fn table(env: &MemEnv, rows: usize, dead: f64, indexes: usize) -> Result<SyntheticTable> {
    TableBuilder::new(RELID, "t")
        .rows(rows)
        .rows_per_page(100)
        .dead_fraction(dead)
        .indexes(indexes)
        .index_capabilities(IndexCapabilities {
            parallel_bulk_delete: true,
            parallel_cleanup: CleanupParallelism::IfNoBulkDelete,
            uses_maintenance_work_mem: false,
        })
        .xids(TransactionId(100), TransactionId(200))
        .build(&env.catalog)
}

/// Пометить строки первой страницы удалёнными (xmax = 200).
fn kill_rows(t: &SyntheticTable, slots: &[usize]) -> Result<()> {
    let mut page = t.heap.read_page(0)?;
    for &s in slots {
        if let Some(ItemSlot::Normal(row)) = page.slots.get_mut(s) {
            row.header.xmax = TransactionId(200);
        }
    }
    t.heap.write_page(0, page)?;
    Ok(())
}
