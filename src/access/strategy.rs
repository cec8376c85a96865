//! access/strategy — кольцевая стратегия доступа к страницам и учёт I/O.
//!
//! Vacuum читает таблицу целиком; чтобы не вымывать общий кеш, страницы проходят через
//! небольшое кольцо. Попадание в кольцо считается hit, иначе — miss с вытеснением самой
//! старой страницы.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::RelId;
use super::tuple::PageNumber;

/// Счётчики I/O одного процесса (лидера или воркера). Переносятся лидеру после фазы.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoUsage {
    pub pages_hit: u64,
    pub pages_miss: u64,
    pub pages_dirtied: u64,
    pub wal_records: u64,
    pub wal_bytes: u64,
}

impl IoUsage {
    pub fn add(&mut self, other: &IoUsage) {
        self.pages_hit += other.pages_hit;
        self.pages_miss += other.pages_miss;
        self.pages_dirtied += other.pages_dirtied;
        self.wal_records += other.wal_records;
        self.wal_bytes += other.wal_bytes;
    }
}

/// Исход обращения к странице.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageAccess {
    Hit,
    Miss,
}

#[derive(Clone, Debug)]
pub struct BufferStrategy {
    ring: VecDeque<(RelId, PageNumber)>,
    capacity: usize,
}

impl BufferStrategy {
    pub fn new(ring_pages: usize) -> Self {
        let capacity = ring_pages.max(1);
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Зарегистрировать обращение к странице.
    pub fn access(&mut self, rel: RelId, page: PageNumber) -> PageAccess {
        if self.ring.iter().any(|&(r, p)| r == rel && p == page) {
            return PageAccess::Hit;
        }
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back((rel, page));
        PageAccess::Miss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest() {
        let mut s = BufferStrategy::new(2);
        assert_eq!(s.access(1, 0), PageAccess::Miss);
        assert_eq!(s.access(1, 1), PageAccess::Miss);
        assert_eq!(s.access(1, 0), PageAccess::Hit);
        assert_eq!(s.access(1, 2), PageAccess::Miss); // вытесняет (1,0)
        assert_eq!(s.access(1, 0), PageAccess::Miss);
        assert_eq!(s.access(2, 2), PageAccess::Miss);
    }

    #[test]
    fn worker_usage_adds_up() {
        let mut leader = IoUsage {
            pages_hit: 3,
            pages_miss: 1,
            ..Default::default()
        };
        let worker = IoUsage {
            pages_hit: 2,
            pages_miss: 5,
            pages_dirtied: 4,
            wal_records: 4,
            wal_bytes: 256,
        };
        leader.add(&worker);
        leader.add(&IoUsage::default());
        assert_eq!(
            leader,
            IoUsage {
                pages_hit: 5,
                pages_miss: 6,
                pages_dirtied: 4,
                wal_records: 4,
                wal_bytes: 256,
            }
        );
    }
}
