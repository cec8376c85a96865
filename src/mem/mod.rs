//! mem — эталонные in-memory реализации внешних подсистем.
//!
//! Подмодули:
//! - heap.rs    — MemHeap (страницы, VM, FSM, pin'ы)
//! - index.rs   — MemIndex
//! - catalog.rs — MemCatalog
//! - xact.rs    — MemXact (xid/multixact, статусы коммита)
//! - locks.rs   — MemLocks (блокировки отношений с ожиданием)
//! - builder.rs — TableBuilder для синтетических таблиц
//!
//! Используются тестами, CLI и как образец для встраивания движка.

pub mod builder;
pub mod catalog;
pub mod heap;
pub mod index;
pub mod locks;
pub mod xact;

pub use builder::{SyntheticTable, TableBuilder};
pub use catalog::MemCatalog;
pub use heap::MemHeap;
pub use index::{BulkDeleteHook, IndexEntry, MemIndex};
pub use locks::MemLocks;
pub use xact::MemXact;

use crate::access::{CancelToken, ThreadLauncher, VacuumEnv};
use crate::xid::TransactionId;

/// Все in-memory подсистемы одного "кластера".
pub struct MemEnv {
    pub catalog: MemCatalog,
    pub xact: MemXact,
    pub locks: MemLocks,
    pub launcher: ThreadLauncher,
    pub cancel: CancelToken,
}

impl MemEnv {
    pub fn new(next_xid: TransactionId) -> Self {
        Self {
            catalog: MemCatalog::new(),
            xact: MemXact::new(next_xid),
            locks: MemLocks::new(),
            launcher: ThreadLauncher::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_launcher(mut self, launcher: ThreadLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_locks(mut self, locks: MemLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn env(&self) -> VacuumEnv<'_> {
        VacuumEnv {
            catalog: &self.catalog,
            xact: &self.xact,
            locks: &self.locks,
            launcher: &self.launcher,
            cancel: &self.cancel,
        }
    }
}
