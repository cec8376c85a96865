//! analyze/stats — статистика одной колонки (то, что сохраняется в каталог).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::access::tuple::{ColumnDef, ColumnType, Datum};
use crate::consts::STATISTIC_NUM_SLOTS;

/// Вид слота статистики.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatKind {
    /// Most common values + частоты.
    Mcv,
    /// Границы equi-depth гистограммы (без MCV).
    Histogram,
    /// Корреляция физического и логического порядка.
    Correlation,
    /// Most common elements (массивы).
    Mcelem,
    /// Гистограмма числа различных элементов в массиве.
    DistinctElemHist,
}

/// Оператор, относительно которого посчитан слот.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatOperator {
    Eq,
    Lt,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatSlot {
    pub kind: StatKind,
    pub op: StatOperator,
    pub collation: u32,
    pub numbers: Vec<f64>,
    pub values: Vec<Datum>,
}

impl StatSlot {
    pub fn new(kind: StatKind, op: StatOperator, collation: u32) -> Self {
        Self {
            kind,
            op,
            collation,
            numbers: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn with_numbers(mut self, numbers: Vec<f64>) -> Self {
        self.numbers = numbers;
        self
    }

    pub fn with_values(mut self, values: Vec<Datum>) -> Self {
        self.values = values;
        self
    }
}

/// Рабочее состояние статистики колонки.
///
/// Создаётся до выборки, заполняется анализатором после неё. `n_distinct` > 0 — абсолютное
/// число различных значений, < 0 — доля от числа строк (−1 — все уникальны), 0 — неизвестно.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeStatistics {
    /// Номер колонки (с нуля).
    pub attnum: usize,
    pub name: String,
    pub ty: ColumnType,
    pub typmod: i32,
    pub collation: u32,
    pub stat_target: u32,
    /// Сколько строк выборки нужно этому анализатору.
    pub min_rows: usize,

    pub stats_valid: bool,
    pub null_frac: f64,
    pub avg_width: f64,
    pub n_distinct: f64,
    pub slots: Vec<StatSlot>,
}

impl AttributeStatistics {
    pub fn new(attnum: usize, col: &ColumnDef, stat_target: u32) -> Self {
        Self {
            attnum,
            name: col.name.clone(),
            ty: col.ty.clone(),
            typmod: col.typmod,
            collation: col.collation,
            stat_target,
            min_rows: 0,
            stats_valid: false,
            null_frac: 0.0,
            avg_width: 0.0,
            n_distinct: 0.0,
            slots: Vec::new(),
        }
    }

    pub fn add_slot(&mut self, slot: StatSlot) -> Result<()> {
        if self.slots.len() >= STATISTIC_NUM_SLOTS {
            return Err(anyhow!(
                "column \"{}\": no free statistics slot for {:?}",
                self.name,
                slot.kind
            ));
        }
        self.slots.push(slot);
        Ok(())
    }

    pub fn slot(&self, kind: StatKind) -> Option<&StatSlot> {
        self.slots.iter().find(|s| s.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_bounded() {
        let col = ColumnDef::new("a", ColumnType::Int);
        let mut st = AttributeStatistics::new(0, &col, 100);
        for _ in 0..STATISTIC_NUM_SLOTS {
            st.add_slot(StatSlot::new(StatKind::Mcv, StatOperator::Eq, 0)).unwrap();
        }
        assert!(st.add_slot(StatSlot::new(StatKind::Histogram, StatOperator::Lt, 0)).is_err());
        assert!(st.slot(StatKind::Mcv).is_some());
        assert!(st.slot(StatKind::Correlation).is_none());
    }
}
