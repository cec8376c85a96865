//! mem/index — индекс в памяти: упорядоченные пары (ключ, адрес строки кучи).
//!
//! Страницы индекса условные: ENTRIES_PER_PAGE записей на страницу плюс метастраница.
//! Освободившиеся при bulk-delete страницы считаются удалёнными и пригодными для
//! повторного использования.

use anyhow::{anyhow, Result};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::access::tuple::{Datum, HeapRow, ItemPointer};
use crate::access::{IndexBulkDeleteResult, IndexCapabilities, IndexRelation, IndexVacuumInfo, RelId};
use crate::vacuum::dead_rows::DeadRowStore;
use crate::vacuum::io::VacuumIo;

pub const ENTRIES_PER_PAGE: usize = 256;

/// Вызывается после каждого успешного bulk-delete с его порядковым номером (с 1).
pub type BulkDeleteHook = Box<dyn Fn(u32) + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
    pub key: Datum,
    pub tid: ItemPointer,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: Vec<IndexEntry>,
    /// Максимум страниц за время жизни (удалённые страницы не возвращаются ОС).
    peak_pages: u32,
}

fn pages_for(entries: usize) -> u32 {
    1 + entries.div_ceil(ENTRIES_PER_PAGE) as u32
}

pub struct MemIndex {
    relid: RelId,
    name: String,
    /// Номер индексируемой колонки кучи.
    column: usize,
    caps: IndexCapabilities,
    state: RwLock<IndexState>,

    bulk_delete_calls: AtomicU32,
    cleanup_calls: AtomicU32,
    entries_removed: AtomicU64,
    fail_bulk_delete: AtomicBool,
    after_bulk_delete: Mutex<Option<BulkDeleteHook>>,
}

impl MemIndex {
    pub fn new(relid: RelId, name: &str, column: usize) -> Self {
        Self {
            relid,
            name: name.to_string(),
            column,
            caps: IndexCapabilities::default(),
            state: RwLock::new(IndexState {
                entries: Vec::new(),
                peak_pages: 1,
            }),
            bulk_delete_calls: AtomicU32::new(0),
            cleanup_calls: AtomicU32::new(0),
            entries_removed: AtomicU64::new(0),
            fail_bulk_delete: AtomicBool::new(false),
            after_bulk_delete: Mutex::new(None),
        }
    }

    pub fn with_capabilities(mut self, caps: IndexCapabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn insert(&self, key: Datum, tid: ItemPointer) -> Result<()> {
        let mut st = self
            .state
            .write()
            .map_err(|_| anyhow!("index state lock poisoned"))?;
        let pos = st
            .entries
            .partition_point(|e| e.key.total_cmp(&key).then(e.tid.cmp(&tid)) != CmpOrdering::Greater);
        st.entries.insert(pos, IndexEntry { key, tid });
        st.peak_pages = st.peak_pages.max(pages_for(st.entries.len()));
        Ok(())
    }

    /// Проиндексировать строку кучи по своей колонке.
    pub fn insert_row(&self, tid: ItemPointer, row: &HeapRow) -> Result<()> {
        let key = row.values.get(self.column).cloned().unwrap_or(Datum::Null);
        self.insert(key, tid)
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_tid(&self, tid: ItemPointer) -> bool {
        self.state
            .read()
            .map(|s| s.entries.iter().any(|e| e.tid == tid))
            .unwrap_or(false)
    }

    pub fn tids(&self) -> Vec<ItemPointer> {
        self.state
            .read()
            .map(|s| s.entries.iter().map(|e| e.tid).collect())
            .unwrap_or_default()
    }

    pub fn bulk_delete_calls(&self) -> u32 {
        self.bulk_delete_calls.load(Ordering::SeqCst)
    }

    pub fn cleanup_calls(&self) -> u32 {
        self.cleanup_calls.load(Ordering::SeqCst)
    }

    pub fn entries_removed(&self) -> u64 {
        self.entries_removed.load(Ordering::SeqCst)
    }

    /// Следующий bulk-delete завершится ошибкой.
    pub fn fail_next_bulk_delete(&self) {
        self.fail_bulk_delete.store(true, Ordering::SeqCst);
    }

    pub fn on_bulk_delete(&self, hook: impl Fn(u32) + Send + Sync + 'static) {
        if let Ok(mut h) = self.after_bulk_delete.lock() {
            *h = Some(Box::new(hook));
        }
    }
}

impl IndexRelation for MemIndex {
    fn relid(&self) -> RelId {
        self.relid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn num_pages(&self) -> u32 {
        self.state.read().map(|s| s.peak_pages).unwrap_or(1)
    }

    fn capabilities(&self) -> IndexCapabilities {
        self.caps
    }

    fn bulk_delete(
        &self,
        _info: &IndexVacuumInfo,
        stats: Option<IndexBulkDeleteResult>,
        dead: &DeadRowStore,
        io: &mut VacuumIo,
    ) -> Result<IndexBulkDeleteResult> {
        let call = self.bulk_delete_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_bulk_delete.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("index \"{}\": injected bulk-delete failure", self.name));
        }

        let mut st = self
            .state
            .write()
            .map_err(|_| anyhow!("index state lock poisoned"))?;

        let before = st.entries.len();
        let mut removed_on_page = vec![false; st.peak_pages as usize];
        let mut kept = Vec::with_capacity(before);
        let old = std::mem::take(&mut st.entries);
        for (i, e) in old.into_iter().enumerate() {
            if dead.contains(&e.tid) {
                if let Some(m) = removed_on_page.get_mut(1 + i / ENTRIES_PER_PAGE) {
                    *m = true;
                }
            } else {
                kept.push(e);
            }
        }
        st.entries = kept;

        // Полный проход по индексу: метастраница + все листья.
        for (p, dirtied) in removed_on_page.iter().enumerate() {
            io.page_access(self.relid, p as u32, *dirtied)?;
        }

        let removed = (before - st.entries.len()) as u64;
        self.entries_removed.fetch_add(removed, Ordering::SeqCst);

        let mut res = stats.unwrap_or_default();
        let now_pages = pages_for(st.entries.len());
        let freed = st.peak_pages.saturating_sub(now_pages);
        res.num_pages = st.peak_pages;
        res.estimated_count = false;
        res.num_index_tuples = st.entries.len() as f64;
        res.tuples_removed += removed as f64;
        res.pages_newly_deleted = freed.saturating_sub(res.pages_deleted);
        res.pages_deleted = freed;
        res.pages_free = freed;
        drop(st);

        if let Ok(hook) = self.after_bulk_delete.lock() {
            if let Some(f) = hook.as_ref() {
                f(call);
            }
        }
        Ok(res)
    }

    fn vacuum_cleanup(
        &self,
        info: &IndexVacuumInfo,
        stats: Option<IndexBulkDeleteResult>,
        io: &mut VacuumIo,
    ) -> Result<Option<IndexBulkDeleteResult>> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        if info.analyze_only {
            return Ok(stats);
        }
        let st = self
            .state
            .read()
            .map_err(|_| anyhow!("index state lock poisoned"))?;
        if stats.is_none() {
            // bulk-delete не было: статистику нужно собрать проходом по индексу
            for p in 0..st.peak_pages {
                io.page_access(self.relid, p, false)?;
            }
        }
        let mut res = stats.unwrap_or_default();
        let freed = st.peak_pages.saturating_sub(pages_for(st.entries.len()));
        res.num_pages = st.peak_pages;
        res.estimated_count = false;
        res.num_index_tuples = st.entries.len() as f64;
        res.pages_deleted = freed;
        res.pages_free = freed;
        Ok(Some(res))
    }

    fn rebuild(&self, rows: &[(ItemPointer, HeapRow)]) -> Result<()> {
        let mut entries: Vec<IndexEntry> = rows
            .iter()
            .map(|(tid, row)| IndexEntry {
                key: row.values.get(self.column).cloned().unwrap_or(Datum::Null),
                tid: *tid,
            })
            .collect();
        entries.sort_by(|a, b| a.key.total_cmp(&b.key).then(a.tid.cmp(&b.tid)));
        let mut st = self
            .state
            .write()
            .map_err(|_| anyhow!("index state lock poisoned"))?;
        st.peak_pages = pages_for(entries.len());
        st.entries = entries;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::CancelToken;
    use crate::config::VacuumConfig;

    #[test]
    fn bulk_delete_removes_dead_tids() {
        let idx = MemIndex::new(10, "t_pkey", 0);
        for i in 0..1000u32 {
            idx.insert(Datum::Int(i as i64), ItemPointer::new(i / 10, (i % 10) as u16))
                .unwrap();
        }
        assert_eq!(idx.num_pages(), 5);

        let mut dead = DeadRowStore::with_capacity(2000);
        for i in 0..600u32 {
            dead.append(ItemPointer::new(i / 10, (i % 10) as u16)).unwrap();
        }
        let cfg = VacuumConfig::default();
        let mut io = VacuumIo::new(&cfg, CancelToken::new());
        let res = idx
            .bulk_delete(&IndexVacuumInfo::default(), None, &dead, &mut io)
            .unwrap();
        assert_eq!(res.tuples_removed, 600.0);
        assert_eq!(res.num_index_tuples, 400.0);
        assert_eq!(res.num_pages, 5);
        assert_eq!(res.pages_deleted, 2);
        assert!(!idx.contains_tid(ItemPointer::new(0, 0)));
        assert!(idx.contains_tid(ItemPointer::new(60, 0)));

        let cl = idx
            .vacuum_cleanup(&IndexVacuumInfo::default(), Some(res), &mut io)
            .unwrap()
            .unwrap();
        assert_eq!(cl.tuples_removed, 600.0);
        assert_eq!(idx.bulk_delete_calls(), 1);
        assert_eq!(idx.cleanup_calls(), 1);
    }

    #[test]
    fn entries_stay_ordered() {
        let idx = MemIndex::new(10, "i", 0);
        idx.insert(Datum::Int(5), ItemPointer::new(0, 1)).unwrap();
        idx.insert(Datum::Int(1), ItemPointer::new(0, 2)).unwrap();
        idx.insert(Datum::Int(5), ItemPointer::new(0, 0)).unwrap();
        assert_eq!(
            idx.tids(),
            vec![ItemPointer::new(0, 2), ItemPointer::new(0, 0), ItemPointer::new(0, 1)]
        );
    }
}
