//! vacuum/relstats — оценка числа строк и запись статистики отношения в каталог.

use anyhow::{Context, Result};
use log::debug;

use crate::access::{Catalog, HeapRelation, RelId, RelStatsUpdate};

/// Оценить общее число строк по частичному скану.
///
/// Полный скан даёт точное значение. Если размер таблицы не изменился и просмотрено меньше
/// 2% страниц, старая оценка надёжнее. Иначе старая плотность экстраполируется на
/// непросмотренные страницы.
pub fn estimate_reltuples(
    old_rel_pages: u32,
    old_rel_tuples: f64,
    total_pages: u32,
    scanned_pages: u32,
    scanned_tuples: f64,
) -> f64 {
    if scanned_pages >= total_pages {
        return scanned_tuples;
    }
    if old_rel_pages == total_pages && (scanned_pages as f64) < total_pages as f64 * 0.02 {
        return old_rel_tuples;
    }
    if scanned_pages == 0 {
        return old_rel_tuples.max(0.0);
    }
    if old_rel_tuples < 0.0 || old_rel_pages == 0 {
        return (scanned_tuples / scanned_pages as f64 * total_pages as f64 + 0.5).floor();
    }
    let old_density = old_rel_tuples / old_rel_pages as f64;
    let unscanned = (total_pages - scanned_pages) as f64;
    (old_density * unscanned + scanned_tuples + 0.5).floor()
}

/// Записать статистику, не откатывая relfrozenxid/relminmxid назад.
pub fn update_relstats(catalog: &dyn Catalog, relid: RelId, update: &RelStatsUpdate) -> Result<()> {
    let cur = catalog
        .rel_stats(relid)
        .with_context(|| format!("read catalog stats for relation {}", relid))?;

    let mut upd = *update;
    if let Some(x) = upd.frozen_xid {
        let advance = !cur.frozen_xid.is_normal() || x.follows(cur.frozen_xid);
        if !advance {
            upd.frozen_xid = None;
        }
    }
    if let Some(m) = upd.min_multi {
        let advance = !cur.min_multi.is_valid() || m.follows(cur.min_multi);
        if !advance {
            upd.min_multi = None;
        }
    }
    debug!(
        "update relstats: relid={} pages={} tuples={:.0} frozen_xid={:?} min_multi={:?}",
        relid, upd.pages, upd.tuples, upd.frozen_xid, upd.min_multi
    );
    catalog
        .update_rel_stats(relid, &upd)
        .with_context(|| format!("update catalog stats for relation {}", relid))
}

/// Число страниц, помеченных all-visible в карте видимости.
pub fn count_all_visible(heap: &dyn HeapRelation) -> u32 {
    (0..heap.num_pages())
        .filter(|&p| heap.visibility(p).all_visible)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scan_is_exact() {
        assert_eq!(estimate_reltuples(10, 500.0, 20, 20, 1234.0), 1234.0);
    }

    #[test]
    fn tiny_scan_keeps_old_estimate() {
        // 1 из 100 страниц, размер не менялся
        assert_eq!(estimate_reltuples(100, 5000.0, 100, 1, 10.0), 5000.0);
    }

    #[test]
    fn extrapolates_old_density() {
        // старая плотность 50/стр, 60 непросмотренных + 40 просмотренных со 100 строк
        assert_eq!(estimate_reltuples(100, 5000.0, 100, 40, 100.0), 3100.0);
        // плотность неизвестна — масштабируем просмотренное
        assert_eq!(estimate_reltuples(0, -1.0, 100, 40, 100.0), 250.0);
    }
}
