//! xid — идентификаторы транзакций и мультитранзакций с арифметикой по модулю 2^32.
//!
//! Нормальные xid (>= FIRST_NORMAL_XID) сравниваются циклически: `a` предшествует `b`,
//! если `(a - b) as i32 < 0`. Специальные xid (invalid/bootstrap/frozen) сравниваются как числа
//! и всегда "старше" любого нормального.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::consts::{FIRST_MULTI, FIRST_NORMAL_XID, FROZEN_XID, INVALID_MULTI, INVALID_XID};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TransactionId(pub u32);

impl TransactionId {
    pub const INVALID: TransactionId = TransactionId(INVALID_XID);
    pub const FROZEN: TransactionId = TransactionId(FROZEN_XID);
    pub const FIRST_NORMAL: TransactionId = TransactionId(FIRST_NORMAL_XID);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != INVALID_XID
    }

    #[inline]
    pub fn is_normal(self) -> bool {
        self.0 >= FIRST_NORMAL_XID
    }

    /// Строго раньше `other` в циклическом порядке.
    pub fn precedes(self, other: TransactionId) -> bool {
        if !self.is_normal() || !other.is_normal() {
            return self.0 < other.0;
        }
        (self.0.wrapping_sub(other.0) as i32) < 0
    }

    pub fn precedes_or_equals(self, other: TransactionId) -> bool {
        if !self.is_normal() || !other.is_normal() {
            return self.0 <= other.0;
        }
        (self.0.wrapping_sub(other.0) as i32) <= 0
    }

    pub fn follows(self, other: TransactionId) -> bool {
        other.precedes(self)
    }

    /// Отступить на `age` назад, перепрыгивая через специальные id.
    pub fn retreat(self, age: u32) -> TransactionId {
        let v = self.0.wrapping_sub(age);
        if v < FIRST_NORMAL_XID {
            TransactionId::FIRST_NORMAL
        } else {
            TransactionId(v)
        }
    }

    /// Следующий нормальный xid.
    pub fn advance(self) -> TransactionId {
        let v = self.0.wrapping_add(1);
        if v < FIRST_NORMAL_XID {
            TransactionId::FIRST_NORMAL
        } else {
            TransactionId(v)
        }
    }

    /// Возраст относительно `next` (0 для специальных id).
    pub fn age(self, next: TransactionId) -> u32 {
        if !self.is_normal() {
            return 0;
        }
        next.0.wrapping_sub(self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MultiXactId(pub u32);

impl MultiXactId {
    pub const INVALID: MultiXactId = MultiXactId(INVALID_MULTI);
    pub const FIRST: MultiXactId = MultiXactId(FIRST_MULTI);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != INVALID_MULTI
    }

    pub fn precedes(self, other: MultiXactId) -> bool {
        (self.0.wrapping_sub(other.0) as i32) < 0
    }

    pub fn precedes_or_equals(self, other: MultiXactId) -> bool {
        (self.0.wrapping_sub(other.0) as i32) <= 0
    }

    pub fn follows(self, other: MultiXactId) -> bool {
        other.precedes(self)
    }

    pub fn retreat(self, age: u32) -> MultiXactId {
        let v = self.0.wrapping_sub(age);
        if v < FIRST_MULTI {
            MultiXactId::FIRST
        } else {
            MultiXactId(v)
        }
    }

    pub fn advance(self) -> MultiXactId {
        let v = self.0.wrapping_add(1);
        if v < FIRST_MULTI {
            MultiXactId::FIRST
        } else {
            MultiXactId(v)
        }
    }

    pub fn age(self, next: MultiXactId) -> u32 {
        if !self.is_valid() {
            return 0;
        }
        next.0.wrapping_sub(self.0)
    }
}

impl fmt::Display for MultiXactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_ids_precede_normal() {
        assert!(TransactionId::FROZEN.precedes(TransactionId(100)));
        assert!(TransactionId::INVALID.precedes(TransactionId::FROZEN));
        assert!(!TransactionId(100).precedes(TransactionId::FROZEN));
    }

    #[test]
    fn modular_comparison_across_wrap() {
        let old = TransactionId(u32::MAX - 10);
        let new = TransactionId(50);
        assert!(old.precedes(new));
        assert!(new.follows(old));
        assert_eq!(old.age(new), 61);
    }

    #[test]
    fn retreat_skips_special_ids() {
        assert_eq!(TransactionId(10).retreat(5), TransactionId(5));
        assert_eq!(TransactionId(10).retreat(8), TransactionId::FIRST_NORMAL);
        assert_eq!(TransactionId(10).retreat(10), TransactionId::FIRST_NORMAL);
        // 10 - 12 уходит за 2^32 и снова становится нормальным xid
        assert_eq!(TransactionId(10).retreat(12), TransactionId(u32::MAX - 1));
        assert_eq!(MultiXactId(3).retreat(3), MultiXactId::FIRST);
    }

    #[test]
    fn advance_wraps_to_first_normal() {
        assert_eq!(TransactionId(u32::MAX).advance(), TransactionId::FIRST_NORMAL);
        assert_eq!(MultiXactId(u32::MAX).advance(), MultiXactId::FIRST);
    }
}
