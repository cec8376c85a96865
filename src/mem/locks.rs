//! mem/locks — таблица блокировок отношений в памяти.
//!
//! Конфликты считаются только против "внешних" держателей, зарегистрированных через
//! hold(): собственные захваты движка в этой модели реентерабельны и лишь учитываются.
//! Ожидание — на Condvar, с таймаутом; по таймауту возвращается LockNotAvailable.
//! Ожидающих (has_waiters) тесты задают явно: add_waiter() держит ожидающего до
//! remove_waiter(), queue_waiter() добавляет его после N опросов has_waiters(), и он уходит,
//! как только движок отпускает AccessExclusive.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::access::{LockMode, LockNotAvailable, RelId, RelationLocks};

const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct LockTable {
    external: HashMap<(RelId, LockMode), usize>,
    own: HashMap<(RelId, LockMode), usize>,
    waiters: HashMap<RelId, usize>,
    /// Опросов has_waiters() до появления ожидающего.
    arriving: HashMap<RelId, usize>,
    queued: HashMap<RelId, usize>,
    served: HashMap<RelId, usize>,
}

impl LockTable {
    fn conflicts(&self, relid: RelId, mode: LockMode) -> bool {
        self.external
            .iter()
            .any(|(&(r, m), &n)| r == relid && n > 0 && m.conflicts_with(mode))
    }
}

#[derive(Debug)]
pub struct MemLocks {
    table: Mutex<LockTable>,
    cv: Condvar,
    wait: Duration,
}

impl Default for MemLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl MemLocks {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            cv: Condvar::new(),
            wait: DEFAULT_LOCK_WAIT,
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Зарегистрировать чужой захват.
    pub fn hold(&self, relid: RelId, mode: LockMode) {
        if let Ok(mut t) = self.table.lock() {
            *t.external.entry((relid, mode)).or_insert(0) += 1;
        }
    }

    pub fn release(&self, relid: RelId, mode: LockMode) {
        if let Ok(mut t) = self.table.lock() {
            if let Some(n) = t.external.get_mut(&(relid, mode)) {
                *n = n.saturating_sub(1);
            }
        }
        self.cv.notify_all();
    }

    pub fn add_waiter(&self, relid: RelId) {
        if let Ok(mut t) = self.table.lock() {
            *t.waiters.entry(relid).or_insert(0) += 1;
        }
    }

    pub fn remove_waiter(&self, relid: RelId) {
        if let Ok(mut t) = self.table.lock() {
            if let Some(n) = t.waiters.get_mut(&relid) {
                *n = n.saturating_sub(1);
            }
        }
    }

    /// Ожидающий появится на `after_polls`-м опросе has_waiters() (0 — на первом же)
    /// и получит свою блокировку, когда движок отпустит AccessExclusive.
    pub fn queue_waiter(&self, relid: RelId, after_polls: usize) {
        if let Ok(mut t) = self.table.lock() {
            t.arriving.insert(relid, after_polls);
        }
    }

    /// Сколько ожидающих из queue_waiter() дождались своей блокировки.
    pub fn served_waiters(&self, relid: RelId) -> usize {
        self.table
            .lock()
            .ok()
            .and_then(|t| t.served.get(&relid).copied())
            .unwrap_or(0)
    }

    /// Сколько раз движок держит `mode` на отношении прямо сейчас.
    pub fn held_by_us(&self, relid: RelId, mode: LockMode) -> usize {
        self.table
            .lock()
            .ok()
            .and_then(|t| t.own.get(&(relid, mode)).copied())
            .unwrap_or(0)
    }
}

impl RelationLocks for MemLocks {
    fn try_lock(&self, relid: RelId, mode: LockMode) -> bool {
        let Ok(mut t) = self.table.lock() else {
            return false;
        };
        if t.conflicts(relid, mode) {
            return false;
        }
        *t.own.entry((relid, mode)).or_insert(0) += 1;
        true
    }

    fn lock(&self, relid: RelId, mode: LockMode) -> Result<()> {
        let deadline = Instant::now() + self.wait;
        let mut t = self
            .table
            .lock()
            .map_err(|_| anyhow!("lock table poisoned"))?;
        while t.conflicts(relid, mode) {
            let now = Instant::now();
            if now >= deadline {
                return Err(LockNotAvailable { relid, mode }.into());
            }
            let (g, _) = self
                .cv
                .wait_timeout(t, deadline - now)
                .map_err(|_| anyhow!("lock table poisoned"))?;
            t = g;
        }
        *t.own.entry((relid, mode)).or_insert(0) += 1;
        Ok(())
    }

    fn unlock(&self, relid: RelId, mode: LockMode) {
        if let Ok(mut t) = self.table.lock() {
            if let Some(n) = t.own.get_mut(&(relid, mode)) {
                *n = n.saturating_sub(1);
            }
            if mode == LockMode::AccessExclusive {
                if let Some(n) = t.queued.remove(&relid) {
                    *t.served.entry(relid).or_insert(0) += n;
                }
            }
        }
        self.cv.notify_all();
    }

    fn has_waiters(&self, relid: RelId, _mode: LockMode) -> bool {
        let Ok(mut t) = self.table.lock() else {
            return false;
        };
        let arrived = match t.arriving.get_mut(&relid) {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        };
        if arrived {
            t.arriving.remove(&relid);
            *t.queued.entry(relid).or_insert(0) += 1;
        }
        t.waiters.get(&relid).copied().unwrap_or(0) > 0 || t.queued.get(&relid).copied().unwrap_or(0) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_block_only_exclusive() {
        let l = MemLocks::new().with_wait(Duration::from_millis(20));
        l.hold(1, LockMode::AccessShare);
        assert!(l.try_lock(1, LockMode::ShareUpdateExclusive));
        assert!(!l.try_lock(1, LockMode::AccessExclusive));
        let err = l.lock(1, LockMode::AccessExclusive).unwrap_err();
        assert!(err.downcast_ref::<LockNotAvailable>().is_some());

        l.release(1, LockMode::AccessShare);
        assert!(l.try_lock(1, LockMode::AccessExclusive));
        l.unlock(1, LockMode::AccessExclusive);
        assert_eq!(l.held_by_us(1, LockMode::AccessExclusive), 0);
    }

    #[test]
    fn blocking_lock_wakes_on_release() {
        let l = std::sync::Arc::new(MemLocks::new());
        l.hold(7, LockMode::ShareUpdateExclusive);
        let l2 = l.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            l2.release(7, LockMode::ShareUpdateExclusive);
        });
        l.lock(7, LockMode::ShareUpdateExclusive).unwrap();
        t.join().unwrap();
        assert_eq!(l.held_by_us(7, LockMode::ShareUpdateExclusive), 1);
    }

    #[test]
    fn queued_waiter_arrives_then_leaves_on_exclusive_release() {
        let l = MemLocks::new();
        l.queue_waiter(3, 2);
        assert!(!l.has_waiters(3, LockMode::AccessExclusive));
        assert!(!l.has_waiters(3, LockMode::AccessExclusive));
        assert!(l.has_waiters(3, LockMode::AccessExclusive));

        assert!(l.try_lock(3, LockMode::ShareUpdateExclusive));
        l.unlock(3, LockMode::ShareUpdateExclusive);
        assert!(l.has_waiters(3, LockMode::AccessExclusive));

        assert!(l.try_lock(3, LockMode::AccessExclusive));
        l.unlock(3, LockMode::AccessExclusive);
        assert!(!l.has_waiters(3, LockMode::AccessExclusive));
        assert_eq!(l.served_waiters(3), 1);
    }
}
