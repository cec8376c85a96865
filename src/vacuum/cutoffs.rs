//! vacuum/cutoffs — горизонты видимости и заморозки для одного запуска.
//!
//! Правила:
//! - oldest_xmin — самый старый xid, версии которого ещё кто-то может видеть;
//! - freeze_limit = oldest_xmin - min_age, но не раньше ранее записанного relfrozenxid
//!   и не позже oldest_xmin;
//! - full-scan пороги = next - table_age; если relfrozenxid их не новее — скан aggressive;
//! - failsafe срабатывает, когда возраст relfrozenxid/relminmxid строго больше жёсткого порога.

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::access::{RelStats, TransactionOracle};
use crate::config::VacuumConfig;
use crate::consts::FREEZE_TABLE_AGE_CAP;
use crate::options::AgeOverrides;
use crate::xid::{MultiXactId, TransactionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cutoffs {
    pub oldest_xmin: TransactionId,
    pub oldest_mxact: MultiXactId,
    pub freeze_limit: TransactionId,
    pub multi_cutoff: MultiXactId,
    pub xid_full_scan_limit: TransactionId,
    pub mxact_full_scan_limit: MultiXactId,
    /// Нельзя пропускать all-visible страницы: relfrozenxid должен продвинуться.
    pub aggressive: bool,
}

impl Cutoffs {
    /// Failsafe: заморозка по самому агрессивному порогу.
    pub fn apply_failsafe(&mut self) {
        self.freeze_limit = self.oldest_xmin;
        self.multi_cutoff = self.oldest_mxact;
    }
}

pub struct CutoffCalculator<'a> {
    cfg: &'a VacuumConfig,
}

impl<'a> CutoffCalculator<'a> {
    pub fn new(cfg: &'a VacuumConfig) -> Self {
        Self { cfg }
    }

    /// Вычислить cutoffs для отношения с записанными `rel.frozen_xid`/`rel.min_multi`.
    /// `force_aggressive` — DISABLE_PAGE_SKIPPING или anti-wraparound запуск.
    pub fn compute(
        &self,
        rel: &RelStats,
        xact: &dyn TransactionOracle,
        ages: &AgeOverrides,
        force_aggressive: bool,
    ) -> Result<Cutoffs> {
        let cfg = self.cfg;
        let next_xid = xact.next_xid();
        let next_multi = xact.next_multi();
        let oldest_xmin = xact.oldest_running_xid();
        let oldest_mxact = xact.oldest_running_multi();

        if rel.frozen_xid.is_normal() && rel.frozen_xid.follows(oldest_xmin) {
            return Err(anyhow!(
                "found relfrozenxid {} that follows oldest xmin {}; catalog is corrupt",
                rel.frozen_xid,
                oldest_xmin
            ));
        }

        // --- xid freeze limit ---
        let freeze_min = ages
            .freeze_min_age
            .unwrap_or(cfg.freeze_min_age)
            .min(cfg.autovacuum_freeze_max_age / 2);
        let mut freeze_limit = oldest_xmin.retreat(freeze_min);
        let safe_limit = next_xid.retreat(cfg.autovacuum_freeze_max_age);
        if freeze_limit.precedes(safe_limit) {
            warn!(
                "oldest xmin {} is far in the past; close open transactions soon to avoid wraparound problems",
                oldest_xmin
            );
            freeze_limit = oldest_xmin;
        }
        if rel.frozen_xid.is_normal() && freeze_limit.precedes(rel.frozen_xid) {
            freeze_limit = rel.frozen_xid;
        }
        if oldest_xmin.precedes(freeze_limit) {
            freeze_limit = oldest_xmin;
        }

        // --- multixact cutoff ---
        let mxid_freeze_min = ages
            .multixact_freeze_min_age
            .unwrap_or(cfg.multixact_freeze_min_age)
            .min(cfg.autovacuum_multixact_freeze_max_age / 2);
        let mut multi_cutoff = oldest_mxact.retreat(mxid_freeze_min);
        let safe_mxact = next_multi.retreat(cfg.autovacuum_multixact_freeze_max_age);
        if multi_cutoff.precedes(safe_mxact) {
            warn!(
                "oldest multixact {} is far in the past; close open transactions with multixacts soon",
                oldest_mxact
            );
            multi_cutoff = if oldest_mxact.precedes(safe_mxact) {
                oldest_mxact
            } else {
                safe_mxact
            };
        }
        if rel.min_multi.is_valid() && multi_cutoff.precedes(rel.min_multi) {
            multi_cutoff = rel.min_multi;
        }
        if oldest_mxact.precedes(multi_cutoff) {
            multi_cutoff = oldest_mxact;
        }

        // --- full-scan thresholds ---
        let cap = (cfg.autovacuum_freeze_max_age as f64 * FREEZE_TABLE_AGE_CAP) as u32;
        let table_age = ages.freeze_table_age.unwrap_or(cfg.freeze_table_age).min(cap);
        let xid_full_scan_limit = next_xid.retreat(table_age);

        let mcap = (cfg.autovacuum_multixact_freeze_max_age as f64 * FREEZE_TABLE_AGE_CAP) as u32;
        let mtable_age = ages
            .multixact_freeze_table_age
            .unwrap_or(cfg.multixact_freeze_table_age)
            .min(mcap);
        let mxact_full_scan_limit = next_multi.retreat(mtable_age);

        let aggressive = force_aggressive
            || rel.frozen_xid.precedes_or_equals(xid_full_scan_limit)
            || rel.min_multi.precedes_or_equals(mxact_full_scan_limit);

        Ok(Cutoffs {
            oldest_xmin,
            oldest_mxact,
            freeze_limit,
            multi_cutoff,
            xid_full_scan_limit,
            mxact_full_scan_limit,
            aggressive,
        })
    }

    /// Проверка failsafe по возрастам. Граница (age == порог) — не срабатывание.
    pub fn exceeds_failsafe_age(&self, xid_age: u32, mxid_age: u32) -> bool {
        xid_age > self.cfg.effective_failsafe_age()
            || mxid_age > self.cfg.effective_multixact_failsafe_age()
    }

    /// Проверка failsafe для записанных relfrozenxid/relminmxid относительно текущих счётчиков.
    pub fn check_failsafe(
        &self,
        frozen_xid: TransactionId,
        min_multi: MultiXactId,
        next_xid: TransactionId,
        next_multi: MultiXactId,
    ) -> bool {
        self.exceeds_failsafe_age(frozen_xid.age(next_xid), min_multi.age(next_multi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::XidStatus;

    struct FixedXact {
        next: u32,
        oldest: u32,
    }

    impl TransactionOracle for FixedXact {
        fn next_xid(&self) -> TransactionId {
            TransactionId(self.next)
        }
        fn oldest_running_xid(&self) -> TransactionId {
            TransactionId(self.oldest)
        }
        fn next_multi(&self) -> MultiXactId {
            MultiXactId(10)
        }
        fn oldest_running_multi(&self) -> MultiXactId {
            MultiXactId(10)
        }
        fn status(&self, _xid: TransactionId) -> XidStatus {
            XidStatus::Committed
        }
    }

    fn stats(frozen: u32) -> RelStats {
        RelStats {
            frozen_xid: TransactionId(frozen),
            ..Default::default()
        }
    }

    #[test]
    fn freeze_limit_is_clamped_to_relfrozenxid() {
        let cfg = VacuumConfig::default().with_freeze_min_age(1000);
        let calc = CutoffCalculator::new(&cfg);
        let xact = FixedXact { next: 5000, oldest: 4900 };

        let c = calc.compute(&stats(100), &xact, &AgeOverrides::default(), false).unwrap();
        assert_eq!(c.oldest_xmin, TransactionId(4900));
        assert_eq!(c.freeze_limit, TransactionId(3900));

        // relfrozenxid новее чем oldest_xmin - min_age
        let c = calc.compute(&stats(4500), &xact, &AgeOverrides::default(), false).unwrap();
        assert_eq!(c.freeze_limit, TransactionId(4500));
        assert!(c.freeze_limit.precedes_or_equals(c.oldest_xmin));
    }

    #[test]
    fn future_relfrozenxid_is_an_error() {
        let cfg = VacuumConfig::default();
        let calc = CutoffCalculator::new(&cfg);
        let xact = FixedXact { next: 5000, oldest: 4900 };
        assert!(calc.compute(&stats(4950), &xact, &AgeOverrides::default(), false).is_err());
    }

    #[test]
    fn aggressive_when_table_is_old() {
        let cfg = VacuumConfig::default().with_freeze_table_age(1000);
        let calc = CutoffCalculator::new(&cfg);
        let xact = FixedXact { next: 5000, oldest: 5000 };
        assert!(calc.compute(&stats(100), &xact, &AgeOverrides::default(), false).unwrap().aggressive);
        assert!(!calc.compute(&stats(4500), &xact, &AgeOverrides::default(), false).unwrap().aggressive);
        assert!(calc.compute(&stats(4500), &xact, &AgeOverrides::default(), true).unwrap().aggressive);
    }

    #[test]
    fn failsafe_boundary() {
        let cfg = VacuumConfig::default().with_failsafe_age(1_600_000_000);
        let calc = CutoffCalculator::new(&cfg);
        let t = cfg.effective_failsafe_age();
        assert!(!calc.exceeds_failsafe_age(t, 0));
        assert!(calc.exceeds_failsafe_age(t + 1, 0));
        assert!(!calc.exceeds_failsafe_age(0, 0));
    }
}
