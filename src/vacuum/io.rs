//! vacuum/io — контекст I/O одного процесса (лидера или воркера).
//!
//! Объединяет кольцевую стратегию буферов, cost-based задержку, счётчики I/O и флаг
//! прерывания. Каждое обращение к странице проходит через page_access(): учёт hit/miss,
//! списание стоимости, проверка прерывания и, при необходимости, сон.

use anyhow::Result;

use crate::access::strategy::{BufferStrategy, IoUsage, PageAccess};
use crate::access::tuple::PageNumber;
use crate::access::{CancelToken, RelId};
use crate::config::VacuumConfig;

use super::cost::CostDelayThrottle;

#[derive(Debug)]
pub struct VacuumIo {
    throttle: CostDelayThrottle,
    strategy: BufferStrategy,
    usage: IoUsage,
    cancel: CancelToken,
}

impl VacuumIo {
    pub fn new(cfg: &VacuumConfig, cancel: CancelToken) -> Self {
        Self::with_throttle(CostDelayThrottle::from_config(cfg), cfg, cancel)
    }

    pub fn with_throttle(throttle: CostDelayThrottle, cfg: &VacuumConfig, cancel: CancelToken) -> Self {
        Self {
            throttle,
            strategy: BufferStrategy::new(cfg.strategy_ring_pages),
            usage: IoUsage::default(),
            cancel,
        }
    }

    /// Контекст для воркера: та же задержка и флаг прерывания, свои кольцо и счётчики.
    pub fn fork(&self) -> Self {
        Self {
            throttle: self.throttle.fresh_copy(),
            strategy: BufferStrategy::new(self.strategy.capacity()),
            usage: IoUsage::default(),
            cancel: self.cancel.clone(),
        }
    }

    /// Учесть обращение к странице и выдержать задержку.
    pub fn page_access(&mut self, rel: RelId, page: PageNumber, dirtied: bool) -> Result<PageAccess> {
        let access = self.account(rel, page, dirtied);
        self.delay_point()?;
        Ok(access)
    }

    /// Как page_access(), но без сна: под AccessExclusive блокировкой спать нельзя.
    /// Стоимость списывается и будет "отоспана" на следующей точке задержки.
    pub fn page_access_locked(&mut self, rel: RelId, page: PageNumber) -> Result<PageAccess> {
        let access = self.account(rel, page, false);
        self.cancel.check()?;
        Ok(access)
    }

    fn account(&mut self, rel: RelId, page: PageNumber, dirtied: bool) -> PageAccess {
        let access = self.strategy.access(rel, page);
        match access {
            PageAccess::Hit => self.usage.pages_hit += 1,
            PageAccess::Miss => self.usage.pages_miss += 1,
        }
        if dirtied {
            self.usage.pages_dirtied += 1;
        }
        let cost = self.throttle.page_cost(access, dirtied);
        self.throttle.charge(cost);
        access
    }

    /// Страница, прочитанная ранее, стала грязной.
    pub fn mark_dirty(&mut self) {
        self.usage.pages_dirtied += 1;
        let cost = self.throttle.dirty_cost();
        self.throttle.charge(cost);
    }

    pub fn wal(&mut self, records: u64, bytes: u64) {
        self.usage.wal_records += records;
        self.usage.wal_bytes += bytes;
    }

    /// Проверка прерывания + сон по балансу.
    pub fn delay_point(&mut self) -> Result<()> {
        self.cancel.check()?;
        self.throttle.maybe_sleep();
        Ok(())
    }

    pub fn check_cancel(&self) -> Result<()> {
        self.cancel.check()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn usage(&self) -> IoUsage {
        self.usage
    }

    pub fn add_usage(&mut self, other: &IoUsage) {
        self.usage.add(other);
    }

    pub fn throttle(&self) -> &CostDelayThrottle {
        &self.throttle
    }

    pub fn throttle_mut(&mut self) -> &mut CostDelayThrottle {
        &mut self.throttle
    }
}
