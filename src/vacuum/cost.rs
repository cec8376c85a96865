//! vacuum/cost — cost-based задержка vacuum.
//!
//! Каждое обращение к странице стоит единиц (hit/miss/dirty). Когда накопленный баланс
//! достигает лимита, процесс спит пропорционально балансу. В параллельном режиме баланс
//! общий: воркер спит только если общий баланс достиг лимита и сам он набрал больше своей
//! доли (0.5 * limit / active_workers). Общие счётчики — relaxed-атомики: точность троттлинга
//! не влияет на корректность.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::access::strategy::PageAccess;
use crate::config::VacuumConfig;
use crate::metrics::record_cost_delay;

/// Общий для лидера и воркеров баланс.
#[derive(Debug, Default)]
pub struct CostBalance {
    balance: AtomicI64,
    active_workers: AtomicU32,
}

impl CostBalance {
    pub fn new(initial: i64) -> Self {
        Self {
            balance: AtomicI64::new(initial),
            active_workers: AtomicU32::new(0),
        }
    }

    pub fn balance(&self) -> i64 {
        self.balance.load(Ordering::Relaxed)
    }

    pub fn active_workers(&self) -> u32 {
        self.active_workers.load(Ordering::Relaxed)
    }
}

pub type SleepFn = Arc<dyn Fn(Duration) + Send + Sync>;

#[derive(Clone)]
pub struct CostDelayThrottle {
    delay_ms: f64,
    limit: u32,
    page_hit: u32,
    page_miss: u32,
    page_dirty: u32,
    /// Баланс с момента последнего сна.
    local: i64,
    shared: Option<Arc<CostBalance>>,
    active: bool,
    sleeper: SleepFn,
    slept: Duration,
}

impl fmt::Debug for CostDelayThrottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CostDelayThrottle")
            .field("delay_ms", &self.delay_ms)
            .field("limit", &self.limit)
            .field("local", &self.local)
            .field("shared", &self.shared.is_some())
            .field("active", &self.active)
            .field("slept", &self.slept)
            .finish()
    }
}

impl CostDelayThrottle {
    pub fn from_config(cfg: &VacuumConfig) -> Self {
        Self {
            delay_ms: cfg.cost_delay_ms,
            limit: cfg.cost_limit.max(1),
            page_hit: cfg.cost_page_hit,
            page_miss: cfg.cost_page_miss,
            page_dirty: cfg.cost_page_dirty,
            local: 0,
            shared: None,
            active: cfg.cost_delay_ms > 0.0,
            sleeper: Arc::new(std::thread::sleep),
            slept: Duration::ZERO,
        }
    }

    /// Подменить функцию сна.
    pub fn with_sleeper(mut self, sleeper: SleepFn) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Копия с теми же параметрами, но без баланса и без общего счётчика.
    pub fn fresh_copy(&self) -> Self {
        Self {
            local: 0,
            shared: None,
            slept: Duration::ZERO,
            sleeper: self.sleeper.clone(),
            ..*self
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Отключить задержку до конца запуска (failsafe).
    pub fn disable(&mut self) {
        self.active = false;
        self.local = 0;
    }

    pub fn local_balance(&self) -> i64 {
        self.local
    }

    pub fn total_slept(&self) -> Duration {
        self.slept
    }

    pub fn page_cost(&self, access: PageAccess, dirtied: bool) -> u32 {
        let base = match access {
            PageAccess::Hit => self.page_hit,
            PageAccess::Miss => self.page_miss,
        };
        if dirtied {
            base + self.page_dirty
        } else {
            base
        }
    }

    pub fn dirty_cost(&self) -> u32 {
        self.page_dirty
    }

    pub fn charge(&mut self, units: u32) {
        if !self.active {
            return;
        }
        self.local += units as i64;
        if let Some(shared) = &self.shared {
            shared.balance.fetch_add(units as i64, Ordering::Relaxed);
        }
    }

    /// Подключиться к общему балансу, перенеся в него локальный.
    pub fn attach_shared(&mut self, shared: Arc<CostBalance>) {
        if self.active {
            shared.balance.fetch_add(self.local, Ordering::Relaxed);
        }
        shared.active_workers.fetch_add(1, Ordering::Relaxed);
        self.local = 0;
        self.shared = Some(shared);
    }

    /// Отключиться от общего баланса. Лидер забирает остаток общего баланса себе.
    pub fn detach_shared(&mut self, take_balance: bool) {
        if let Some(shared) = self.shared.take() {
            shared.active_workers.fetch_sub(1, Ordering::Relaxed);
            if take_balance && self.active {
                self.local = shared.balance().max(0);
            } else {
                self.local = 0;
            }
        }
    }

    /// Поспать, если баланс превысил лимит. Возвращает длительность сна.
    pub fn maybe_sleep(&mut self) -> Duration {
        if !self.active || self.delay_ms <= 0.0 {
            return Duration::ZERO;
        }
        let limit = self.limit as f64;

        let msec = match &self.shared {
            Some(shared) => {
                let nworkers = shared.active_workers().max(1) as f64;
                let shared_balance = shared.balance() as f64;
                let local = self.local as f64;
                if shared_balance >= limit && local > 0.5 * limit / nworkers {
                    shared.balance.fetch_sub(self.local, Ordering::Relaxed);
                    self.local = 0;
                    self.delay_ms * local / limit
                } else {
                    0.0
                }
            }
            None => {
                if self.local as f64 >= limit {
                    let ms = self.delay_ms * self.local as f64 / limit;
                    self.local = 0;
                    ms
                } else {
                    0.0
                }
            }
        };

        if msec <= 0.0 {
            return Duration::ZERO;
        }
        let msec = msec.min(self.delay_ms * 4.0);
        let d = Duration::from_micros((msec * 1000.0) as u64);
        (self.sleeper)(d);
        self.slept += d;
        record_cost_delay(d.as_micros() as u64);
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (SleepFn, Arc<Mutex<Vec<Duration>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l2 = log.clone();
        let f: SleepFn = Arc::new(move |d| l2.lock().unwrap().push(d));
        (f, log)
    }

    #[test]
    fn sleeps_proportionally_and_resets() {
        let cfg = VacuumConfig::default().with_cost_delay(2.0, 100);
        let (f, log) = recording();
        let mut t = CostDelayThrottle::from_config(&cfg).with_sleeper(f);

        t.charge(50);
        assert_eq!(t.maybe_sleep(), Duration::ZERO);
        t.charge(100);
        // 2ms * 150 / 100
        assert_eq!(t.maybe_sleep(), Duration::from_micros(3000));
        assert_eq!(t.local_balance(), 0);

        // потолок 4 * delay
        t.charge(10_000);
        assert_eq!(t.maybe_sleep(), Duration::from_millis(8));
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn disabled_throttle_never_sleeps() {
        let cfg = VacuumConfig::default().with_cost_delay(2.0, 100);
        let mut t = CostDelayThrottle::from_config(&cfg);
        t.disable();
        t.charge(1000);
        assert_eq!(t.maybe_sleep(), Duration::ZERO);

        let off = VacuumConfig::default();
        let mut t = CostDelayThrottle::from_config(&off);
        t.charge(1000);
        assert_eq!(t.maybe_sleep(), Duration::ZERO);
    }

    #[test]
    fn shared_balance_respects_worker_share() {
        let cfg = VacuumConfig::default().with_cost_delay(1.0, 100);
        let shared = Arc::new(CostBalance::default());
        let (f, _log) = recording();
        let mut a = CostDelayThrottle::from_config(&cfg).with_sleeper(f.clone());
        let mut b = CostDelayThrottle::from_config(&cfg).with_sleeper(f);
        a.attach_shared(shared.clone());
        b.attach_shared(shared.clone());
        assert_eq!(shared.active_workers(), 2);

        // доля = 0.5 * 100 / 2 = 25
        a.charge(80);
        b.charge(20);
        assert_eq!(shared.balance(), 100);
        assert_eq!(b.maybe_sleep(), Duration::ZERO);
        assert_eq!(a.maybe_sleep(), Duration::from_micros(800));
        assert_eq!(shared.balance(), 20);

        b.detach_shared(false);
        a.detach_shared(true);
        assert_eq!(shared.active_workers(), 0);
        assert_eq!(a.local_balance(), 20);
    }
}
