//! mem/heap — куча в памяти: страницы, карта видимости, карта свободного места и pin'ы.
//!
//! Чужие pin'ы моделируются явно (pin/unpin): страница с pin'ом не даёт cleanup-блокировку
//! без ожидания, а wait_for_cleanup_lock() ждёт unpin на Condvar с таймаутом.

use anyhow::{anyhow, Result};
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::access::tuple::{ColumnDef, HeapPage, HeapRow, ItemPointer, ItemSlot, PageNumber, VisibilityFlags};
use crate::access::{HeapRelation, RelId};
use crate::consts::{DEFAULT_PAGE_SIZE, MAX_ROWS_PER_PAGE};

const DEFAULT_PIN_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct MapState {
    vm: Vec<VisibilityFlags>,
    fsm: Vec<usize>,
}

pub struct MemHeap {
    relid: RelId,
    name: String,
    columns: Vec<ColumnDef>,
    page_size: usize,
    max_rows_per_page: usize,
    pin_wait: Duration,

    pages: RwLock<Vec<HeapPage>>,
    maps: RwLock<MapState>,
    /// page -> число чужих pin'ов
    pins: Mutex<HashMap<PageNumber, usize>>,
    pins_cv: Condvar,

    fsm_vacuum_calls: AtomicU64,
    truncations: AtomicU64,
}

impl MemHeap {
    pub fn new(relid: RelId, name: &str, columns: Vec<ColumnDef>) -> Self {
        Self {
            relid,
            name: name.to_string(),
            columns,
            page_size: DEFAULT_PAGE_SIZE,
            max_rows_per_page: MAX_ROWS_PER_PAGE,
            pin_wait: DEFAULT_PIN_WAIT,
            pages: RwLock::new(Vec::new()),
            maps: RwLock::new(MapState::default()),
            pins: Mutex::new(HashMap::new()),
            pins_cv: Condvar::new(),
            fsm_vacuum_calls: AtomicU64::new(0),
            truncations: AtomicU64::new(0),
        }
    }

    pub fn with_page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    pub fn with_max_rows_per_page(mut self, n: usize) -> Self {
        self.max_rows_per_page = n.max(1);
        self
    }

    pub fn with_pin_wait(mut self, wait: Duration) -> Self {
        self.pin_wait = wait;
        self
    }

    /// Добавить страницу в конец кучи. Возвращает её номер.
    pub fn append_page(&self, page: HeapPage) -> Result<PageNumber> {
        if page.slots.len() > self.max_rows_per_page {
            return Err(anyhow!(
                "relation \"{}\": page with {} slots exceeds limit {}",
                self.name,
                page.slots.len(),
                self.max_rows_per_page
            ));
        }
        let free = page.free_space(self.page_size);
        let mut pages = self
            .pages
            .write()
            .map_err(|_| anyhow!("heap pages lock poisoned"))?;
        let mut maps = self
            .maps
            .write()
            .map_err(|_| anyhow!("heap maps lock poisoned"))?;
        pages.push(page);
        maps.vm.push(VisibilityFlags::NONE);
        maps.fsm.push(free);
        Ok((pages.len() - 1) as PageNumber)
    }

    /// Чужой pin страницы (например, открытый курсор).
    pub fn pin(&self, page: PageNumber) {
        if let Ok(mut p) = self.pins.lock() {
            *p.entry(page).or_insert(0) += 1;
        }
    }

    pub fn unpin(&self, page: PageNumber) {
        if let Ok(mut p) = self.pins.lock() {
            if let Some(n) = p.get_mut(&page) {
                *n -= 1;
                if *n == 0 {
                    p.remove(&page);
                }
            }
        }
        self.pins_cv.notify_all();
    }

    /// Значение карты свободного места для страницы.
    pub fn recorded_free_space(&self, page: PageNumber) -> Option<usize> {
        self.maps.read().ok()?.fsm.get(page as usize).copied()
    }

    pub fn fsm_vacuum_calls(&self) -> u64 {
        self.fsm_vacuum_calls.load(Ordering::Relaxed)
    }

    pub fn truncations(&self) -> u64 {
        self.truncations.load(Ordering::Relaxed)
    }

    /// Все нормальные строки по возрастанию адреса.
    pub fn all_rows(&self) -> Result<Vec<(ItemPointer, HeapRow)>> {
        let pages = self
            .pages
            .read()
            .map_err(|_| anyhow!("heap pages lock poisoned"))?;
        let mut out = Vec::new();
        for (blkno, page) in pages.iter().enumerate() {
            for (slot, row) in page.rows() {
                out.push((ItemPointer::new(blkno as PageNumber, slot), row.clone()));
            }
        }
        Ok(out)
    }

    pub fn row_count(&self) -> Result<usize> {
        let pages = self
            .pages
            .read()
            .map_err(|_| anyhow!("heap pages lock poisoned"))?;
        Ok(pages.iter().map(|p| p.rows().count()).sum())
    }

    /// Число слотов LP_DEAD по всей куче.
    pub fn dead_item_count(&self) -> Result<usize> {
        let pages = self
            .pages
            .read()
            .map_err(|_| anyhow!("heap pages lock poisoned"))?;
        Ok(pages
            .iter()
            .map(|p| p.slots.iter().filter(|s| matches!(s, ItemSlot::Dead)).count())
            .sum())
    }
}

impl HeapRelation for MemHeap {
    fn relid(&self) -> RelId {
        self.relid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn max_rows_per_page(&self) -> usize {
        self.max_rows_per_page
    }

    fn num_pages(&self) -> PageNumber {
        self.pages.read().map(|p| p.len() as PageNumber).unwrap_or(0)
    }

    fn read_page(&self, page: PageNumber) -> Result<HeapPage> {
        let pages = self
            .pages
            .read()
            .map_err(|_| anyhow!("heap pages lock poisoned"))?;
        pages
            .get(page as usize)
            .cloned()
            .ok_or_else(|| anyhow!("relation \"{}\": page {} out of range", self.name, page))
    }

    fn write_page(&self, page: PageNumber, contents: HeapPage) -> Result<()> {
        let mut pages = self
            .pages
            .write()
            .map_err(|_| anyhow!("heap pages lock poisoned"))?;
        let slot = pages
            .get_mut(page as usize)
            .ok_or_else(|| anyhow!("relation \"{}\": page {} out of range", self.name, page))?;
        *slot = contents;
        Ok(())
    }

    fn cleanup_lock_available(&self, page: PageNumber) -> bool {
        self.pins.lock().map(|p| !p.contains_key(&page)).unwrap_or(false)
    }

    fn wait_for_cleanup_lock(&self, page: PageNumber) -> Result<()> {
        let deadline = Instant::now() + self.pin_wait;
        let mut pins = self
            .pins
            .lock()
            .map_err(|_| anyhow!("heap pins lock poisoned"))?;
        while pins.contains_key(&page) {
            let now = Instant::now();
            if now >= deadline {
                return Err(anyhow!(
                    "relation \"{}\": timed out waiting for cleanup lock on page {}",
                    self.name,
                    page
                ));
            }
            let (g, _) = self
                .pins_cv
                .wait_timeout(pins, deadline - now)
                .map_err(|_| anyhow!("heap pins lock poisoned"))?;
            pins = g;
        }
        Ok(())
    }

    fn visibility(&self, page: PageNumber) -> VisibilityFlags {
        self.maps
            .read()
            .ok()
            .and_then(|m| m.vm.get(page as usize).copied())
            .unwrap_or_default()
    }

    fn set_visibility(&self, page: PageNumber, flags: VisibilityFlags) {
        if let Ok(mut m) = self.maps.write() {
            if let Some(v) = m.vm.get_mut(page as usize) {
                *v = flags;
            }
        }
    }

    fn record_free_space(&self, page: PageNumber, bytes: usize) {
        if let Ok(mut m) = self.maps.write() {
            if let Some(v) = m.fsm.get_mut(page as usize) {
                *v = bytes;
            }
        }
    }

    fn vacuum_free_space_map(&self, start: PageNumber, end: PageNumber) {
        self.fsm_vacuum_calls.fetch_add(1, Ordering::Relaxed);
        debug!("\"{}\": free space map vacuumed for pages [{}, {})", self.name, start, end);
    }

    fn truncate(&self, new_pages: PageNumber) -> Result<()> {
        let mut pages = self
            .pages
            .write()
            .map_err(|_| anyhow!("heap pages lock poisoned"))?;
        let mut maps = self
            .maps
            .write()
            .map_err(|_| anyhow!("heap maps lock poisoned"))?;
        let n = new_pages as usize;
        if n > pages.len() {
            return Err(anyhow!(
                "relation \"{}\": cannot truncate {} pages to {}",
                self.name,
                pages.len(),
                n
            ));
        }
        pages.truncate(n);
        maps.vm.truncate(n);
        maps.fsm.truncate(n);
        self.truncations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn replace_contents(&self, new_pages: Vec<HeapPage>) -> Result<()> {
        let mut pages = self
            .pages
            .write()
            .map_err(|_| anyhow!("heap pages lock poisoned"))?;
        let mut maps = self
            .maps
            .write()
            .map_err(|_| anyhow!("heap maps lock poisoned"))?;
        maps.vm = vec![VisibilityFlags::NONE; new_pages.len()];
        maps.fsm = new_pages.iter().map(|p| p.free_space(self.page_size)).collect();
        *pages = new_pages;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tuple::{ColumnType, Datum, RowHeader};
    use crate::xid::TransactionId;
    use std::sync::Arc;

    fn row(i: i64) -> ItemSlot {
        ItemSlot::Normal(HeapRow {
            header: RowHeader::inserted_by(TransactionId(10)),
            values: vec![Datum::Int(i)],
        })
    }

    #[test]
    fn append_read_truncate() {
        let h = MemHeap::new(1, "t", vec![ColumnDef::new("id", ColumnType::Int)]);
        h.append_page(HeapPage::new(vec![row(1), row(2)])).unwrap();
        h.append_page(HeapPage::new(vec![ItemSlot::Unused])).unwrap();
        assert_eq!(h.num_pages(), 2);
        assert_eq!(h.row_count().unwrap(), 2);
        assert!(h.read_page(5).is_err());

        h.truncate(1).unwrap();
        assert_eq!(h.num_pages(), 1);
        assert!(h.truncate(3).is_err());
    }

    #[test]
    fn pinned_page_waits_for_unpin() {
        let h = Arc::new(
            MemHeap::new(1, "t", vec![ColumnDef::new("id", ColumnType::Int)])
                .with_pin_wait(Duration::from_secs(5)),
        );
        h.append_page(HeapPage::new(vec![row(1)])).unwrap();
        h.pin(0);
        assert!(!h.cleanup_lock_available(0));

        let h2 = h.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            h2.unpin(0);
        });
        h.wait_for_cleanup_lock(0).unwrap();
        t.join().unwrap();
        assert!(h.cleanup_lock_available(0));
    }

    #[test]
    fn pin_wait_times_out() {
        let h = MemHeap::new(1, "t", vec![]).with_pin_wait(Duration::from_millis(10));
        h.append_page(HeapPage::default()).unwrap();
        h.pin(0);
        assert!(h.wait_for_cleanup_lock(0).is_err());
    }
}
