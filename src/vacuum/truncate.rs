//! vacuum/truncate — усечение пустого хвоста кучи.
//!
//! Нужна AccessExclusive блокировка. Она берётся попытками с шагом wait_interval до
//! timeout; при неудаче усечение бросается (но не весь запуск). После захвата повторно
//! проверяется размер: если таблица выросла, усечение отменяется. Хвост сканируется с конца;
//! каждые check_interval проверяются ожидающие блокировку — при конфликте отрезается уже
//! проверенное, блокировка отпускается, и цикл повторяется. Под блокировкой cost-задержки нет.

use anyhow::{Context, Result};
use log::{log, warn, Level};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::access::tuple::PageNumber;
use crate::access::{HeapRelation, LockMode, RelLockGuard, RelationLocks};
use crate::config::VacuumConfig;
use crate::consts::{REL_TRUNCATE_FRACTION, REL_TRUNCATE_MINIMUM};
use crate::metrics::{record_pages_truncated, record_truncate_lock_conflict};

use super::io::VacuumIo;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncateOutcome {
    pub new_rel_pages: PageNumber,
    pub pages_removed: PageNumber,
    /// Блокировку не удалось получить — усечение брошено.
    pub lock_conflict: bool,
}

/// Стоит ли пытаться усекать: хвост достаточно велик абсолютно или относительно.
pub fn should_attempt_truncation(rel_pages: PageNumber, nonempty_pages: PageNumber) -> bool {
    let possibly_freeable = rel_pages.saturating_sub(nonempty_pages);
    possibly_freeable > 0
        && (possibly_freeable >= REL_TRUNCATE_MINIMUM
            || possibly_freeable >= rel_pages / REL_TRUNCATE_FRACTION)
}

pub struct HeapTruncator<'a> {
    heap: &'a dyn HeapRelation,
    locks: &'a dyn RelationLocks,
    wait_interval: Duration,
    timeout: Duration,
    check_interval: Duration,
    elevel: Level,
}

impl<'a> HeapTruncator<'a> {
    pub fn new(
        heap: &'a dyn HeapRelation,
        locks: &'a dyn RelationLocks,
        cfg: &VacuumConfig,
        elevel: Level,
    ) -> Self {
        Self {
            heap,
            locks,
            wait_interval: Duration::from_millis(cfg.truncate_lock_wait_interval_ms),
            timeout: Duration::from_millis(cfg.truncate_lock_timeout_ms),
            check_interval: Duration::from_millis(cfg.truncate_lock_check_interval_ms),
            elevel,
        }
    }

    /// Усечь хвост. `rel_pages` — размер на момент скана, `nonempty_pages` — граница,
    /// за которой скан не видел строк.
    pub fn run(
        &self,
        mut rel_pages: PageNumber,
        nonempty_pages: PageNumber,
        io: &mut VacuumIo,
    ) -> Result<TruncateOutcome> {
        let orig = rel_pages;
        let mut out = TruncateOutcome {
            new_rel_pages: rel_pages,
            ..Default::default()
        };

        loop {
            let Some(guard) = self.acquire_lock(io)? else {
                record_truncate_lock_conflict();
                warn!(
                    "\"{}\": stopping truncate due to conflicting lock request",
                    self.heap.name()
                );
                out.lock_conflict = true;
                break;
            };

            // за время скана таблица могла вырасти
            let cur = self.heap.num_pages();
            if cur != rel_pages {
                drop(guard);
                break;
            }

            let (new_pages, waiter) = self.count_nondeletable_pages(rel_pages, nonempty_pages, io)?;
            if new_pages >= rel_pages {
                drop(guard);
                break;
            }

            self.heap
                .truncate(new_pages)
                .with_context(|| format!("truncate \"{}\" to {} pages", self.heap.name(), new_pages))?;
            drop(guard);

            log!(
                self.elevel,
                "table \"{}\": truncated {} to {} pages",
                self.heap.name(),
                rel_pages,
                new_pages
            );
            rel_pages = new_pages;

            if !(waiter && rel_pages > nonempty_pages) {
                break;
            }
        }

        out.new_rel_pages = rel_pages;
        out.pages_removed = orig - rel_pages;
        record_pages_truncated(out.pages_removed as u64);
        Ok(out)
    }

    fn acquire_lock(&self, io: &VacuumIo) -> Result<Option<RelLockGuard<'a>>> {
        let started = Instant::now();
        loop {
            if let Some(g) =
                RelLockGuard::try_acquire(self.locks, self.heap.relid(), LockMode::AccessExclusive)
            {
                return Ok(Some(g));
            }
            io.check_cancel()?;
            if started.elapsed() >= self.timeout {
                return Ok(None);
            }
            std::thread::sleep(self.wait_interval);
        }
    }

    /// Найти новый размер: первая с конца непустая страница + 1.
    /// Второй элемент — обнаружен ли ожидающий блокировку.
    fn count_nondeletable_pages(
        &self,
        rel_pages: PageNumber,
        nonempty_pages: PageNumber,
        io: &mut VacuumIo,
    ) -> Result<(PageNumber, bool)> {
        let relid = self.heap.relid();
        let mut blkno = rel_pages;
        let mut last_check = Instant::now();

        while blkno > nonempty_pages {
            if last_check.elapsed() >= self.check_interval {
                if self.locks.has_waiters(relid, LockMode::AccessExclusive) {
                    log!(
                        self.elevel,
                        "table \"{}\": suspending truncate due to conflicting lock request",
                        self.heap.name()
                    );
                    return Ok((blkno, true));
                }
                last_check = Instant::now();
            }

            blkno -= 1;
            io.page_access_locked(relid, blkno)?;
            let page = self
                .heap
                .read_page(blkno)
                .with_context(|| format!("read page {} of \"{}\"", blkno, self.heap.name()))?;
            if !page.is_empty() {
                return Ok((blkno + 1, false));
            }
        }
        Ok((nonempty_pages, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_threshold() {
        assert!(!should_attempt_truncation(100, 100));
        // 1/16 от 100 = 6
        assert!(should_attempt_truncation(100, 94));
        assert!(!should_attempt_truncation(100, 95));
        assert!(should_attempt_truncation(100_000, 99_000));
        assert!(!should_attempt_truncation(100_000, 99_001));
    }
}
