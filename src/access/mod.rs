//! access — узкие интерфейсы внешних подсистем, через которые работает движок.
//!
//! Подмодули:
//! - tuple.rs      — модель строк/страниц (ItemPointer, HeapPage, Datum, ColumnDef)
//! - visibility.rs — классификация версий строк для vacuum
//! - strategy.rs   — кольцевая стратегия доступа к страницам и счётчики I/O
//! - launcher.rs   — запуск параллельных воркеров (по умолчанию — потоки)
//!
//! Менеджер буферов, WAL, lock manager и каталог сюда не входят: движок видит их только
//! через трейты ниже. Эталонные in-memory реализации лежат в crate::mem.

pub mod launcher;
pub mod strategy;
pub mod tuple;
pub mod visibility;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::analyze::stats::AttributeStatistics;
use crate::options::VacOptValue;
use crate::vacuum::dead_rows::DeadRowStore;
use crate::vacuum::io::VacuumIo;
use crate::xid::{MultiXactId, TransactionId};

pub use launcher::{LaunchReport, ThreadLauncher, WorkerFn, WorkerLauncher};
pub use strategy::{BufferStrategy, IoUsage, PageAccess};
pub use tuple::{
    ColumnDef, ColumnType, Datum, HeapPage, HeapRow, ItemPointer, ItemSlot, PageNumber,
    RowHeader, SlotNumber, VisibilityFlags,
};
pub use visibility::{satisfies_vacuum, visible_to_all, VacuumVisibility, XidStatus};

pub type RelId = u32;

// ----- Transactions -----

/// Источник информации о транзакциях (горизонты и статусы коммита).
pub trait TransactionOracle: Send + Sync {
    /// Следующий xid, который будет выдан.
    fn next_xid(&self) -> TransactionId;
    /// Самый старый xid, который ещё может быть "активным" для кого-то (горизонт).
    fn oldest_running_xid(&self) -> TransactionId;
    fn next_multi(&self) -> MultiXactId;
    fn oldest_running_multi(&self) -> MultiXactId;
    fn status(&self, xid: TransactionId) -> XidStatus;
}

// ----- Heap -----

pub trait HeapRelation: Send + Sync {
    fn relid(&self) -> RelId;
    fn name(&self) -> &str;
    fn columns(&self) -> &[ColumnDef];
    fn page_size(&self) -> usize;
    fn max_rows_per_page(&self) -> usize;
    fn num_pages(&self) -> PageNumber;

    fn read_page(&self, page: PageNumber) -> Result<HeapPage>;
    fn write_page(&self, page: PageNumber, contents: HeapPage) -> Result<()>;

    /// Свободна ли cleanup-блокировка страницы (нет чужих pin'ов).
    fn cleanup_lock_available(&self, page: PageNumber) -> bool;
    /// Дождаться cleanup-блокировки страницы.
    fn wait_for_cleanup_lock(&self, page: PageNumber) -> Result<()>;

    fn visibility(&self, page: PageNumber) -> VisibilityFlags;
    fn set_visibility(&self, page: PageNumber, flags: VisibilityFlags);

    /// Space map: записать свободное место страницы.
    fn record_free_space(&self, page: PageNumber, bytes: usize);
    /// Space map: обновить верхние уровни для диапазона [start, end).
    fn vacuum_free_space_map(&self, start: PageNumber, end: PageNumber);

    fn truncate(&self, new_pages: PageNumber) -> Result<()>;
    /// Полная замена содержимого (VACUUM FULL).
    fn replace_contents(&self, pages: Vec<HeapPage>) -> Result<()>;
}

// ----- Indexes -----

/// Когда cleanup индекса может выполняться параллельно.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanupParallelism {
    #[default]
    Never,
    /// Только если bulk-delete для индекса ещё не выполнялся.
    IfNoBulkDelete,
    Always,
}

/// Дескриптор возможностей индекса для параллельного vacuum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCapabilities {
    pub parallel_bulk_delete: bool,
    pub parallel_cleanup: CleanupParallelism,
    /// Индекс расходует maintenance_work_mem при vacuum (влияет на бюджет воркера).
    pub uses_maintenance_work_mem: bool,
}

/// Статистика bulk-delete/cleanup одного индекса.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexBulkDeleteResult {
    pub num_pages: u32,
    pub estimated_count: bool,
    pub num_index_tuples: f64,
    pub tuples_removed: f64,
    pub pages_newly_deleted: u32,
    pub pages_deleted: u32,
    pub pages_free: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IndexVacuumInfo {
    pub heap_relid: RelId,
    pub analyze_only: bool,
    /// num_heap_tuples — оценка, а не точное значение.
    pub estimated_count: bool,
    pub num_heap_tuples: f64,
    pub verbose: bool,
    /// Бюджет памяти процесса, обрабатывающего индекс (КБ).
    pub work_mem_kb: usize,
}

pub trait IndexRelation: Send + Sync {
    fn relid(&self) -> RelId;
    fn name(&self) -> &str;
    fn num_pages(&self) -> u32;
    fn capabilities(&self) -> IndexCapabilities;

    /// Удалить записи, ссылающиеся на строки из `dead`. `stats` — результат прошлого раунда.
    fn bulk_delete(
        &self,
        info: &IndexVacuumInfo,
        stats: Option<IndexBulkDeleteResult>,
        dead: &DeadRowStore,
        io: &mut VacuumIo,
    ) -> Result<IndexBulkDeleteResult>;

    /// Финальная обработка индекса после всех удалений.
    fn vacuum_cleanup(
        &self,
        info: &IndexVacuumInfo,
        stats: Option<IndexBulkDeleteResult>,
        io: &mut VacuumIo,
    ) -> Result<Option<IndexBulkDeleteResult>>;

    /// Перестроить индекс по новому содержимому кучи (VACUUM FULL).
    fn rebuild(&self, rows: &[(ItemPointer, HeapRow)]) -> Result<()>;
}

// ----- Catalog -----

/// Табличные defaults для трёхзначных опций.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelOptions {
    pub index_cleanup: VacOptValue,
    pub truncate: VacOptValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelStats {
    pub pages: u32,
    /// -1 — оценки ещё нет.
    pub tuples: f64,
    pub all_visible_pages: u32,
    pub frozen_xid: TransactionId,
    pub min_multi: MultiXactId,
    pub options: RelOptions,
}

impl Default for RelStats {
    fn default() -> Self {
        Self {
            pages: 0,
            tuples: -1.0,
            all_visible_pages: 0,
            frozen_xid: TransactionId::FIRST_NORMAL,
            min_multi: MultiXactId::FIRST,
            options: RelOptions::default(),
        }
    }
}

/// Что записать в каталог по итогам запуска. None — не трогать поле.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelStatsUpdate {
    pub pages: u32,
    pub tuples: f64,
    pub all_visible_pages: Option<u32>,
    pub frozen_xid: Option<TransactionId>,
    pub min_multi: Option<MultiXactId>,
}

pub trait Catalog: Send + Sync {
    fn rel_stats(&self, relid: RelId) -> Result<RelStats>;
    fn update_rel_stats(&self, relid: RelId, update: &RelStatsUpdate) -> Result<()>;
    fn store_column_stats(&self, relid: RelId, stats: &[AttributeStatistics]) -> Result<()>;
}

// ----- Locks -----

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Обычные читатели; конфликтует только с AccessExclusive.
    AccessShare,
    /// Lazy vacuum / analyze: не мешает чтению и записи.
    ShareUpdateExclusive,
    /// Усечение и VACUUM FULL.
    AccessExclusive,
}

/// Блокировка отношения недоступна.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockNotAvailable {
    pub relid: RelId,
    pub mode: LockMode,
}

impl LockMode {
    pub fn conflicts_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (AccessExclusive, _) | (_, AccessExclusive) => true,
            (ShareUpdateExclusive, ShareUpdateExclusive) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LockNotAvailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not obtain {:?} lock on relation {}", self.mode, self.relid)
    }
}

impl std::error::Error for LockNotAvailable {}

pub trait RelationLocks: Send + Sync {
    fn try_lock(&self, relid: RelId, mode: LockMode) -> bool;
    /// Блокирующий захват.
    fn lock(&self, relid: RelId, mode: LockMode) -> Result<()>;
    fn unlock(&self, relid: RelId, mode: LockMode);
    /// Ждёт ли кто-то блокировку, конфликтующую с `mode`.
    fn has_waiters(&self, relid: RelId, mode: LockMode) -> bool;
}

/// RAII-обёртка над захваченной блокировкой отношения.
pub struct RelLockGuard<'a> {
    locks: &'a dyn RelationLocks,
    relid: RelId,
    mode: LockMode,
}

impl<'a> RelLockGuard<'a> {
    pub fn try_acquire(locks: &'a dyn RelationLocks, relid: RelId, mode: LockMode) -> Option<Self> {
        if locks.try_lock(relid, mode) {
            Some(Self { locks, relid, mode })
        } else {
            None
        }
    }

    pub fn acquire(locks: &'a dyn RelationLocks, relid: RelId, mode: LockMode) -> Result<Self> {
        locks.lock(relid, mode)?;
        Ok(Self { locks, relid, mode })
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for RelLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.unlock(self.relid, self.mode);
    }
}

// ----- Relation handle -----

/// Целевое отношение: куча, её индексы и (опционально) side storage.
#[derive(Clone)]
pub struct Relation {
    pub heap: Arc<dyn HeapRelation>,
    pub indexes: Vec<Arc<dyn IndexRelation>>,
    pub side_storage: Option<Box<Relation>>,
}

impl Relation {
    pub fn new(heap: Arc<dyn HeapRelation>) -> Self {
        Self {
            heap,
            indexes: Vec::new(),
            side_storage: None,
        }
    }

    pub fn with_index(mut self, index: Arc<dyn IndexRelation>) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_side_storage(mut self, side: Relation) -> Self {
        self.side_storage = Some(Box::new(side));
        self
    }

    pub fn relid(&self) -> RelId {
        self.heap.relid()
    }

    pub fn name(&self) -> &str {
        self.heap.name()
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.heap.name())
            .field("relid", &self.heap.relid())
            .field("indexes", &self.indexes.iter().map(|i| i.name().to_string()).collect::<Vec<_>>())
            .field("side_storage", &self.side_storage.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

// ----- Cancellation -----

/// Запуск прерван; каталог не обновлялся.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("canceling statement due to user request")
    }
}

impl std::error::Error for Cancelled {}

/// Флаг прерывания, общий для лидера и воркеров.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Err(Cancelled), если запуск прерван.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(())
    }
}

/// Набор внешних подсистем, нужных одному запуску.
#[derive(Clone, Copy)]
pub struct VacuumEnv<'a> {
    pub catalog: &'a dyn Catalog,
    pub xact: &'a dyn TransactionOracle,
    pub locks: &'a dyn RelationLocks,
    pub launcher: &'a dyn WorkerLauncher,
    pub cancel: &'a CancelToken,
}
