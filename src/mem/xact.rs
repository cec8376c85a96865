//! mem/xact — счётчики транзакций и статусы коммита в памяти.
//!
//! Всё, что младше next_xid, считается закоммиченным, если статус не переопределён явно.
//! Переопределения нужны тестам: "висящая" транзакция, откат вставки и т.п.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use crate::access::visibility::XidStatus;
use crate::access::TransactionOracle;
use crate::xid::{MultiXactId, TransactionId};

#[derive(Debug)]
pub struct MemXact {
    next_xid: AtomicU32,
    oldest_running: AtomicU32,
    next_multi: AtomicU32,
    oldest_multi: AtomicU32,
    overrides: RwLock<HashMap<TransactionId, XidStatus>>,
}

impl MemXact {
    /// Ни одной активной транзакции: горизонт совпадает с next_xid.
    pub fn new(next_xid: TransactionId) -> Self {
        Self {
            next_xid: AtomicU32::new(next_xid.0),
            oldest_running: AtomicU32::new(next_xid.0),
            next_multi: AtomicU32::new(MultiXactId::FIRST.0),
            oldest_multi: AtomicU32::new(MultiXactId::FIRST.0),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_next_xid(&self, xid: TransactionId) {
        self.next_xid.store(xid.0, Ordering::SeqCst);
    }

    pub fn set_oldest_running(&self, xid: TransactionId) {
        self.oldest_running.store(xid.0, Ordering::SeqCst);
    }

    pub fn set_next_multi(&self, multi: MultiXactId) {
        self.next_multi.store(multi.0, Ordering::SeqCst);
    }

    pub fn set_oldest_running_multi(&self, multi: MultiXactId) {
        self.oldest_multi.store(multi.0, Ordering::SeqCst);
    }

    pub fn set_status(&self, xid: TransactionId, status: XidStatus) {
        if let Ok(mut m) = self.overrides.write() {
            m.insert(xid, status);
        }
    }

    pub fn abort(&self, xid: TransactionId) {
        self.set_status(xid, XidStatus::Aborted);
    }

    /// Выдать новый xid; транзакция остаётся активной до commit()/abort().
    pub fn begin(&self) -> TransactionId {
        let mut cur = self.next_xid.load(Ordering::SeqCst);
        loop {
            let next = TransactionId(cur).advance();
            match self
                .next_xid
                .compare_exchange(cur, next.0, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        let xid = TransactionId(cur);
        self.set_status(xid, XidStatus::InProgress);
        xid
    }

    pub fn commit(&self, xid: TransactionId) {
        if let Ok(mut m) = self.overrides.write() {
            m.remove(&xid);
        }
    }
}

impl TransactionOracle for MemXact {
    fn next_xid(&self) -> TransactionId {
        TransactionId(self.next_xid.load(Ordering::SeqCst))
    }

    fn oldest_running_xid(&self) -> TransactionId {
        TransactionId(self.oldest_running.load(Ordering::SeqCst))
    }

    fn next_multi(&self) -> MultiXactId {
        MultiXactId(self.next_multi.load(Ordering::SeqCst))
    }

    fn oldest_running_multi(&self) -> MultiXactId {
        MultiXactId(self.oldest_multi.load(Ordering::SeqCst))
    }

    fn status(&self, xid: TransactionId) -> XidStatus {
        if !xid.is_normal() {
            return XidStatus::Committed;
        }
        if let Some(st) = self.overrides.read().ok().and_then(|m| m.get(&xid).copied()) {
            return st;
        }
        if xid.precedes(self.next_xid()) {
            XidStatus::Committed
        } else {
            XidStatus::InProgress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let x = MemXact::new(TransactionId(100));
        assert_eq!(x.status(TransactionId(50)), XidStatus::Committed);
        assert_eq!(x.status(TransactionId(100)), XidStatus::InProgress);
        x.abort(TransactionId(50));
        assert_eq!(x.status(TransactionId(50)), XidStatus::Aborted);

        let t = x.begin();
        assert_eq!(t, TransactionId(100));
        assert_eq!(x.next_xid(), TransactionId(101));
        assert_eq!(x.status(t), XidStatus::InProgress);
        x.commit(t);
        assert_eq!(x.status(t), XidStatus::Committed);
    }
}
