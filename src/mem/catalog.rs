//! mem/catalog — статистика отношений и колонок в памяти.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::access::{Catalog, RelId, RelStats, RelStatsUpdate};
use crate::analyze::stats::AttributeStatistics;

#[derive(Debug, Default)]
pub struct MemCatalog {
    rels: RwLock<HashMap<RelId, RelStats>>,
    columns: RwLock<HashMap<RelId, Vec<AttributeStatistics>>>,
    updates: AtomicU64,
}

impl MemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rel_stats(&self, relid: RelId, stats: RelStats) -> Result<()> {
        self.rels
            .write()
            .map_err(|_| anyhow!("catalog lock poisoned"))?
            .insert(relid, stats);
        Ok(())
    }

    /// Сохранённая статистика колонок (пусто, если ANALYZE не выполнялся).
    pub fn column_stats(&self, relid: RelId) -> Result<Vec<AttributeStatistics>> {
        let cols = self
            .columns
            .read()
            .map_err(|_| anyhow!("catalog lock poisoned"))?;
        Ok(cols.get(&relid).cloned().unwrap_or_default())
    }

    /// Сколько раз вызывался update_rel_stats.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }
}

impl Catalog for MemCatalog {
    fn rel_stats(&self, relid: RelId) -> Result<RelStats> {
        let rels = self.rels.read().map_err(|_| anyhow!("catalog lock poisoned"))?;
        Ok(rels.get(&relid).copied().unwrap_or_default())
    }

    fn update_rel_stats(&self, relid: RelId, update: &RelStatsUpdate) -> Result<()> {
        let mut rels = self
            .rels
            .write()
            .map_err(|_| anyhow!("catalog lock poisoned"))?;
        let cur = rels.entry(relid).or_default();
        cur.pages = update.pages;
        cur.tuples = update.tuples;
        if let Some(v) = update.all_visible_pages {
            cur.all_visible_pages = v;
        }
        if let Some(x) = update.frozen_xid {
            cur.frozen_xid = x;
        }
        if let Some(m) = update.min_multi {
            cur.min_multi = m;
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn store_column_stats(&self, relid: RelId, stats: &[AttributeStatistics]) -> Result<()> {
        let mut cols = self
            .columns
            .write()
            .map_err(|_| anyhow!("catalog lock poisoned"))?;
        let entry = cols.entry(relid).or_default();
        for st in stats {
            match entry.iter_mut().find(|c| c.attnum == st.attnum) {
                Some(old) => *old = st.clone(),
                None => entry.push(st.clone()),
            }
        }
        entry.sort_by_key(|c| c.attnum);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xid::TransactionId;

    #[test]
    fn update_keeps_untouched_fields() {
        let c = MemCatalog::new();
        let mut st = RelStats::default();
        st.frozen_xid = TransactionId(500);
        st.all_visible_pages = 7;
        c.set_rel_stats(1, st).unwrap();

        c.update_rel_stats(
            1,
            &RelStatsUpdate {
                pages: 10,
                tuples: 99.0,
                ..Default::default()
            },
        )
        .unwrap();
        let got = c.rel_stats(1).unwrap();
        assert_eq!(got.pages, 10);
        assert_eq!(got.tuples, 99.0);
        assert_eq!(got.frozen_xid, TransactionId(500));
        assert_eq!(got.all_visible_pages, 7);
        assert_eq!(c.update_count(), 1);

        // неизвестное отношение — значения по умолчанию
        assert_eq!(c.rel_stats(42).unwrap().tuples, -1.0);
    }
}
