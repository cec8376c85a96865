// tests/dead_rows_props.rs
//
// Рандомизированная проверка DeadRowStore:
// - contains() находит ровно добавленные адреса;
// - page_range() разбивает содержимое на непрерывные постраничные группы;
// - сверх ёмкости append() отказывает, содержимое не меняется.

use anyhow::Result;
use std::collections::BTreeSet;

use oorandom::Rand64;

use LazyVac::access::ItemPointer;
use LazyVac::vacuum::DeadRowStore;

#[test]
fn contains_matches_inserted_set() -> Result<()> {
    for seed in 0..20u128 {
        let mut rng = Rand64::new(0xDEAD_0000 + seed);
        let tids = random_tids(&mut rng, 2_000);
        let mut store = DeadRowStore::with_capacity(tids.len());
        for &t in &tids {
            store.append(t)?;
        }
        assert_eq!(store.len(), tids.len());

        let set: BTreeSet<ItemPointer> = tids.iter().copied().collect();
        for _ in 0..2_000 {
            let tid = ItemPointer::new(rng.rand_range(0..300) as u32, rng.rand_range(0..64) as u16);
            assert_eq!(store.contains(&tid), set.contains(&tid), "seed {seed} tid {tid:?}");
        }
    }
    Ok(())
}

#[test]
fn page_ranges_partition_store() -> Result<()> {
    let mut rng = Rand64::new(77);
    let tids = random_tids(&mut rng, 5_000);
    let mut store = DeadRowStore::with_capacity(tids.len());
    for &t in &tids {
        store.append(t)?;
    }

    let mut pos = 0;
    let mut pages = Vec::new();
    while pos < store.len() {
        let range = store.page_range(pos);
        assert!(!range.is_empty());
        let page = range[0].page;
        assert!(range.iter().all(|t| t.page == page));
        // следующая группа начинается с другой страницы
        if let Some(next) = store.as_slice().get(pos + range.len()) {
            assert!(next.page > page);
        }
        pages.push(page);
        pos += range.len();
    }
    assert_eq!(pos, tids.len());
    assert!(pages.windows(2).all(|w| w[0] < w[1]));
    assert!(store.page_range(store.len()).is_empty());
    Ok(())
}

#[test]
fn append_beyond_capacity_is_rejected() {
    let mut rng = Rand64::new(5);
    let tids = random_tids(&mut rng, 500);
    let cap = tids.len() / 2;
    let mut store = DeadRowStore::with_capacity(cap);
    let mut rejected = 0;
    for &t in &tids {
        if store.append(t).is_err() {
            rejected += 1;
        }
    }
    assert_eq!(store.len(), cap);
    assert_eq!(rejected, tids.len() - cap);
    assert_eq!(store.remaining(), 0);
    assert_eq!(store.as_slice(), &tids[..cap]);
}

// ---------- helpers ----------

/// Возрастающие адреса: до ~n штук на 300 страницах, случайные слоты.
fn random_tids(rng: &mut Rand64, n: usize) -> Vec<ItemPointer> {
    let mut set = BTreeSet::new();
    while set.len() < n.min(300 * 64) {
        let page = rng.rand_range(0..300) as u32;
        let slot = rng.rand_range(0..64) as u16;
        set.insert(ItemPointer::new(page, slot));
    }
    set.into_iter().collect()
}
