// tests/parallel_claims.rs
//
// Общий регион параллельного запуска:
// - конкурентный claim_next() раздаёт каждый индекс ровно один раз;
// - слот результата пишется не более одного раза за фазу;
// - merge() видит только слоты с выставленным битом готовности;
// - begin_phase() сбрасывает регион.

use anyhow::Result;
use log::Level;
use std::sync::Mutex;
use std::thread;

use LazyVac::access::IndexBulkDeleteResult;
use LazyVac::vacuum::index::IndexPhase;
use LazyVac::vacuum::{PerIndexResult, SharedRunState};

#[test]
fn concurrent_claims_hand_out_each_index_once() -> Result<()> {
    const N: usize = 37;
    let shared = SharedRunState::new(1, N, Level::Debug, 1024);
    let claimed = Mutex::new(Vec::new());

    thread::scope(|s| {
        for _ in 0..6 {
            s.spawn(|| {
                let mut mine = Vec::new();
                while let Some(i) = shared.claim_next() {
                    mine.push(i);
                    // результат без статистики: bulk-delete "ничего не нашёл"
                    let _ = shared.report_result(i, PerIndexResult::default());
                }
                if let Ok(mut all) = claimed.lock() {
                    all.extend(mine);
                }
            });
        }
    });

    let mut all = claimed.into_inner().map_err(|_| anyhow::anyhow!("poisoned"))?;
    all.sort_unstable();
    assert_eq!(all, (0..N).collect::<Vec<_>>());
    assert!(shared.claim_next().is_none());
    assert!((0..N).all(|i| shared.is_updated(i)));
    assert_eq!(shared.merge().iter().filter(|r| r.is_some()).count(), N);
    Ok(())
}

#[test]
fn slot_is_written_once_per_phase() -> Result<()> {
    let mut shared = SharedRunState::new(1, 3, Level::Debug, 1024);
    let res = PerIndexResult {
        stats: Some(IndexBulkDeleteResult {
            num_pages: 4,
            num_index_tuples: 90.0,
            tuples_removed: 10.0,
            ..Default::default()
        }),
    };

    shared.report_result(1, res)?;
    assert!(shared.report_result(1, PerIndexResult::default()).is_err());
    assert!(shared.report_result(3, res).is_err());

    // неготовые слоты отсутствуют в merge
    let merged = shared.merge();
    assert_eq!(merged, vec![None, Some(res), None]);
    assert_eq!(merged[1].map(|r| r.tuples_removed()), Some(10.0));

    shared.begin_phase(IndexPhase::Cleanup, false, 90.0, false);
    assert_eq!(shared.phase(), IndexPhase::Cleanup);
    assert_eq!(shared.reltuples(), 90.0);
    assert!(!shared.first_time());
    assert!(shared.merge().iter().all(Option::is_none));
    assert_eq!(shared.claim_next(), Some(0));
    shared.report_result(1, PerIndexResult::default())?;
    assert_eq!(shared.result(1), Some(PerIndexResult::default()));
    Ok(())
}
