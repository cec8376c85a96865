// tests/analyze.rs
//
// ANALYZE на синтетических таблицах:
// 1) Оценка числа строк по выборке страниц — в пределах 5% от истины.
// 2) n_distinct: повторяющиеся значения — абсолютное число, уникальные — доля (-1).
// 3) Гистограмма и корреляция для монотонной колонки.
// 4) Фиксированный seed — воспроизводимая выборка.
// 5) Пустая таблица: ничего не сохраняется, reltuples = 0.

use anyhow::Result;

use LazyVac::access::{Catalog, Datum};
use LazyVac::analyze::stats::StatKind;
use LazyVac::config::VacuumConfig;
use LazyVac::mem::{MemEnv, SyntheticTable, TableBuilder};
use LazyVac::options::{VacuumOptions, VacuumParams};
use LazyVac::vacuum::vacuum;
use LazyVac::xid::TransactionId;

const RELID: u32 = 1;

#[test]
fn row_estimate_from_sampled_pages() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000));
    let t = big_table(&env)?;
    let cfg = cfg(11);

    let an = vacuum(&t.relation, &VacuumParams::new(VacuumOptions::analyze()), &cfg, env.env())?
        .analyze
        .expect("analyze outcome");

    // 300 строк на единицу статистики
    assert_eq!(an.target_rows, 3_000);
    assert_eq!(an.sample_rows, 3_000);
    assert_eq!(an.pages_sampled, 3_000);
    assert_eq!(an.total_pages, 20_000);

    let live = t.live_rows as f64;
    let dead = t.dead_tids.len() as f64;
    assert!(
        (an.total_rows - live).abs() / live < 0.05,
        "estimate {} vs live {}",
        an.total_rows,
        live
    );
    assert!((an.total_dead_rows - dead).abs() / dead < 0.10);

    // ANALYZE без VACUUM сам пишет pages/tuples
    let st = env.catalog.rel_stats(RELID)?;
    assert_eq!(st.pages, 20_000);
    assert_eq!(st.tuples, an.total_rows);
    Ok(())
}

#[test]
fn distinct_estimates_and_histogram() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000));
    let t = big_table(&env)?;
    let an = vacuum(&t.relation, &VacuumParams::new(VacuumOptions::analyze()), &cfg(5), env.env())?
        .analyze
        .expect("analyze outcome");
    assert_eq!(an.columns_stored, 3);

    // val = id % 100: каждое значение встречено многократно
    let val = an.column("val").expect("val stats");
    assert!(val.stats_valid);
    assert_eq!(val.n_distinct, 100.0);
    assert_eq!(val.null_frac, 0.0);
    assert_eq!(val.avg_width, 8.0);

    // id уникален: доля от числа строк
    let id = an.column("id").expect("id stats");
    assert_eq!(id.n_distinct, -1.0);
    assert!(id.slot(StatKind::Mcv).is_none());
    let hist = id.slot(StatKind::Histogram).expect("id histogram");
    assert_eq!(hist.values.len(), 11);
    assert!(hist
        .values
        .windows(2)
        .all(|w| matches!((&w[0], &w[1]), (Datum::Int(a), Datum::Int(b)) if a < b)));
    // выборка отсортирована по адресу строки, а id растёт вместе с ним
    let corr = id.slot(StatKind::Correlation).expect("id correlation");
    assert!(corr.numbers[0] > 0.99, "correlation {}", corr.numbers[0]);

    let note = an.column("note").expect("note stats");
    assert_eq!(note.n_distinct, -1.0);

    let stored = env.catalog.column_stats(RELID)?;
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().any(|c| c.name == "val" && c.n_distinct == 100.0));
    Ok(())
}

#[test]
fn fixed_seed_reproduces_sample() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000));
    let t = TableBuilder::new(RELID, "t")
        .rows(50_000)
        .rows_per_page(10)
        .dead_fraction(0.1)
        .build(&env.catalog)?;
    let params = VacuumParams::new(VacuumOptions::analyze());

    let a = vacuum(&t.relation, &params, &cfg(99), env.env())?
        .analyze
        .expect("first");
    let b = vacuum(&t.relation, &params, &cfg(99), env.env())?
        .analyze
        .expect("second");
    assert_eq!(a.total_rows, b.total_rows);
    assert_eq!(a.columns, b.columns);

    let c = vacuum(&t.relation, &params, &cfg(100), env.env())?
        .analyze
        .expect("third");
    assert_ne!(a.columns, c.columns);
    Ok(())
}

#[test]
fn empty_table_stores_nothing() -> Result<()> {
    let env = MemEnv::new(TransactionId(5000));
    let t = TableBuilder::new(RELID, "empty").build(&env.catalog)?;

    let an = vacuum(&t.relation, &VacuumParams::new(VacuumOptions::analyze()), &cfg(1), env.env())?
        .analyze
        .expect("analyze outcome");
    assert_eq!(an.sample_rows, 0);
    assert_eq!(an.pages_sampled, 0);
    assert_eq!(an.total_rows, 0.0);
    assert_eq!(an.columns_stored, 0);
    assert!(an.columns.iter().all(|c| !c.stats_valid));
    assert!(env.catalog.column_stats(RELID)?.is_empty());
    assert_eq!(env.catalog.rel_stats(RELID)?.tuples, 0.0);
    Ok(())
}

// ---------- helpers ----------

fn cfg(seed: u64) -> VacuumConfig {
    VacuumConfig::default()
        .with_statistics_target(10)
        .with_sample_seed(Some(seed))
}

/// 200k строк по 10 на страницу, 20% удалено.
fn big_table(env: &MemEnv) -> Result<SyntheticTable> {
    TableBuilder::new(RELID, "t")
        .rows(200_000)
        .rows_per_page(10)
        .dead_fraction(0.2)
        .xids(TransactionId(100), TransactionId(200))
        .build(&env.catalog)
}
