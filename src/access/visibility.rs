//! access/visibility — проверка видимости версии строки с точки зрения vacuum.

use super::tuple::RowHeader;
use super::TransactionOracle;
use crate::xid::TransactionId;

/// Статус коммита транзакции.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XidStatus {
    InProgress,
    Committed,
    Aborted,
}

/// Результат проверки видимости для vacuum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VacuumVisibility {
    /// Никому не видна — можно удалять.
    Dead,
    /// Удалена, но ещё может быть видна кому-то старше oldest_xmin.
    RecentlyDead,
    Live,
    InsertInProgress,
    DeleteInProgress,
}

/// Классифицировать строку относительно горизонта `oldest_xmin`.
pub fn satisfies_vacuum(
    h: &RowHeader,
    oldest_xmin: TransactionId,
    oracle: &dyn TransactionOracle,
) -> VacuumVisibility {
    if !h.is_frozen() && h.xmin.is_normal() {
        match oracle.status(h.xmin) {
            XidStatus::InProgress => return VacuumVisibility::InsertInProgress,
            XidStatus::Aborted => return VacuumVisibility::Dead,
            XidStatus::Committed => {}
        }
    }

    if !h.xmax.is_valid() {
        return VacuumVisibility::Live;
    }

    match oracle.status(h.xmax) {
        XidStatus::InProgress => VacuumVisibility::DeleteInProgress,
        XidStatus::Aborted => VacuumVisibility::Live,
        XidStatus::Committed => {
            if h.xmax.precedes(oldest_xmin) {
                VacuumVisibility::Dead
            } else {
                VacuumVisibility::RecentlyDead
            }
        }
    }
}

/// Видна ли строка всем текущим и будущим снапшотам (для установки all_visible).
pub fn visible_to_all(
    h: &RowHeader,
    oldest_xmin: TransactionId,
    oracle: &dyn TransactionOracle,
) -> bool {
    if satisfies_vacuum(h, oldest_xmin, oracle) != VacuumVisibility::Live {
        return false;
    }
    h.is_frozen() || !h.xmin.is_normal() || h.xmin.precedes(oldest_xmin)
}
