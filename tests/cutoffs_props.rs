// tests/cutoffs_props.rs
//
// Рандомизированная проверка горизонтов заморозки и failsafe:
// - freeze_limit никогда не новее oldest_xmin и не старше записанного relfrozenxid
//   (в том числе при переходе счётчика через 2^32);
// - aggressive ровно тогда, когда relfrozenxid не новее next - freeze_table_age;
// - failsafe: возраст, равный порогу, не срабатывает, порог + 1 срабатывает.

use anyhow::Result;

use oorandom::Rand64;

use LazyVac::access::RelStats;
use LazyVac::config::VacuumConfig;
use LazyVac::mem::MemXact;
use LazyVac::options::AgeOverrides;
use LazyVac::vacuum::CutoffCalculator;
use LazyVac::xid::{MultiXactId, TransactionId};

#[test]
fn freeze_limit_stays_between_relfrozenxid_and_horizon() -> Result<()> {
    let mut rng = Rand64::new(0xC0FF);
    for _ in 0..5_000 {
        let next = TransactionId(rng.rand_range(1_000_000_000..4_200_000_000) as u32);
        let oldest = next.retreat(rng.rand_range(0..1_000_000) as u32);
        let relfrozen = oldest.retreat(rng.rand_range(0..1_500_000_000) as u32);
        let min_age = rng.rand_range(0..300_000_000) as u32;

        let xact = MemXact::new(next);
        xact.set_oldest_running(oldest);
        let cfg = VacuumConfig::default().with_freeze_min_age(min_age);
        let rel = RelStats {
            frozen_xid: relfrozen,
            ..Default::default()
        };

        let c = CutoffCalculator::new(&cfg).compute(&rel, &xact, &AgeOverrides::default(), false)?;
        assert_eq!(c.oldest_xmin, oldest);
        assert!(
            !c.freeze_limit.follows(oldest),
            "freeze_limit {} follows oldest_xmin {}",
            c.freeze_limit,
            oldest
        );
        assert!(
            !c.freeze_limit.precedes(relfrozen),
            "freeze_limit {} precedes relfrozenxid {}",
            c.freeze_limit,
            relfrozen
        );
    }
    Ok(())
}

#[test]
fn aggressive_iff_relfrozenxid_is_old_enough() -> Result<()> {
    let cfg = VacuumConfig::default();
    let calc = CutoffCalculator::new(&cfg);
    let mut rng = Rand64::new(42);
    for _ in 0..5_000 {
        let next = TransactionId(rng.rand_range(500_000_000..4_000_000_000) as u32);
        let relfrozen = next.retreat(rng.rand_range(0..400_000_000) as u32);
        let xact = MemXact::new(next);
        let rel = RelStats {
            frozen_xid: relfrozen,
            ..Default::default()
        };

        let c = calc.compute(&rel, &xact, &AgeOverrides::default(), false)?;
        let limit = next.retreat(cfg.freeze_table_age);
        assert_eq!(c.xid_full_scan_limit, limit);
        assert_eq!(c.aggressive, relfrozen.precedes_or_equals(limit));

        // принудительный aggressive не зависит от возраста
        assert!(calc.compute(&rel, &xact, &AgeOverrides::default(), true)?.aggressive);
    }
    Ok(())
}

#[test]
fn failsafe_fires_strictly_above_threshold() {
    let mut rng = Rand64::new(7);
    for _ in 0..1_000 {
        let failsafe = rng.rand_range(0..2_000_000_000) as u32;
        let cfg = VacuumConfig::default().with_failsafe_age(failsafe);
        let calc = CutoffCalculator::new(&cfg);

        let t = cfg.effective_failsafe_age();
        // порог не ниже 105% autovacuum_freeze_max_age
        assert!(t >= failsafe);
        assert!(t as u64 >= cfg.autovacuum_freeze_max_age as u64 * 105 / 100);

        let next = TransactionId(4_000_000_000);
        let at = next.retreat(t);
        let above = next.retreat(t + 1);
        assert_eq!(at.age(next), t);
        assert!(!calc.check_failsafe(at, MultiXactId::FIRST, next, MultiXactId::FIRST));
        assert!(calc.check_failsafe(above, MultiXactId::FIRST, next, MultiXactId::FIRST));
    }
}

#[test]
fn multixact_age_alone_triggers_failsafe() {
    let cfg = VacuumConfig::default();
    let calc = CutoffCalculator::new(&cfg);
    let t = cfg.effective_multixact_failsafe_age();
    assert!(!calc.exceeds_failsafe_age(0, t));
    assert!(calc.exceeds_failsafe_age(0, t + 1));
}
