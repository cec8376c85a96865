//! access/tuple — логическая модель строк и страниц кучи.
//!
//! Физический формат страницы вне зоны ответственности: здесь только то, что нужно
//! vacuum/analyze — слоты (line pointers), заголовки версий строк и значения колонок.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

use crate::analyze::typanalyze::TypeAnalyzer;
use crate::consts::{ITEM_ID_SIZE, PAGE_HEADER_SIZE, ROW_HEADER_SIZE};
use crate::xid::{MultiXactId, TransactionId};

pub type PageNumber = u32;
pub type SlotNumber = u16;

/// Адрес версии строки: (страница, слот). Порядок — сначала страница, потом слот.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemPointer {
    pub page: PageNumber,
    pub slot: SlotNumber,
}

impl ItemPointer {
    pub fn new(page: PageNumber, slot: SlotNumber) -> Self {
        Self { page, slot }
    }
}

impl fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.page, self.slot)
    }
}

/// Значение колонки.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Datum>),
    Composite(Vec<Datum>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Ширина значения в байтах (как его хранила бы куча).
    pub fn width(&self) -> usize {
        match self {
            Datum::Null => 0,
            Datum::Bool(_) => 1,
            Datum::Int(_) | Datum::Float(_) => 8,
            Datum::Text(s) => s.len() + 4,
            Datum::Array(items) => 16 + items.iter().map(Datum::width).sum::<usize>(),
            Datum::Composite(fields) => 8 + fields.iter().map(Datum::width).sum::<usize>(),
        }
    }

    /// Полный порядок для сортируемых типов. Разные варианты упорядочены по рангу.
    pub fn total_cmp(&self, other: &Datum) -> Ordering {
        match (self, other) {
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Int(a), Datum::Int(b)) => a.cmp(b),
            (Datum::Float(a), Datum::Float(b)) => a.total_cmp(b),
            (Datum::Int(a), Datum::Float(b)) => (*a as f64).total_cmp(b),
            (Datum::Float(a), Datum::Int(b)) => a.total_cmp(&(*b as f64)),
            (Datum::Text(a), Datum::Text(b)) => a.cmp(b),
            (Datum::Array(a), Datum::Array(b)) | (Datum::Composite(a), Datum::Composite(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let c = x.total_cmp(y);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Datum::Null => 0,
            Datum::Bool(_) => 1,
            Datum::Int(_) | Datum::Float(_) => 2,
            Datum::Text(_) => 3,
            Datum::Array(_) => 4,
            Datum::Composite(_) => 5,
        }
    }

    /// Стабильное хеширование значения (для equality-only статистики).
    pub fn hash_into<H: Hasher>(&self, h: &mut H) {
        h.write_u8(self.rank());
        match self {
            Datum::Null => {}
            Datum::Bool(b) => h.write_u8(*b as u8),
            Datum::Int(v) => h.write_i64(*v),
            Datum::Float(v) => h.write_u64(v.to_bits()),
            Datum::Text(s) => {
                h.write_usize(s.len());
                h.write(s.as_bytes());
            }
            Datum::Array(items) | Datum::Composite(items) => {
                h.write_usize(items.len());
                for it in items {
                    it.hash_into(h);
                }
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int(v) => Some(*v as f64),
            Datum::Float(v) => Some(*v),
            Datum::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

/// Категория типа колонки; определяет, каким анализатором считать статистику.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Text,
    Array(Box<ColumnType>),
    Composite,
    /// Пользовательский тип; анализатор задаётся в ColumnDef::custom_analyzer.
    Custom(String),
}

/// Описание колонки таблицы.
#[derive(Clone)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub typmod: i32,
    pub collation: u32,
    /// Per-column statistics target (None = default_statistics_target, Some(0) = skip).
    pub stat_target: Option<u32>,
    pub custom_analyzer: Option<Arc<dyn TypeAnalyzer>>,
}

impl ColumnDef {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            typmod: -1,
            collation: 0,
            stat_target: None,
            custom_analyzer: None,
        }
    }

    pub fn with_collation(mut self, collation: u32) -> Self {
        self.collation = collation;
        self
    }

    pub fn with_stat_target(mut self, target: u32) -> Self {
        self.stat_target = Some(target);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn TypeAnalyzer>) -> Self {
        self.custom_analyzer = Some(analyzer);
        self
    }
}

impl fmt::Debug for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("typmod", &self.typmod)
            .field("collation", &self.collation)
            .field("stat_target", &self.stat_target)
            .field("custom_analyzer", &self.custom_analyzer.is_some())
            .finish()
    }
}

/// Заголовок версии строки.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowHeader {
    /// Вставившая транзакция; TransactionId::FROZEN после заморозки.
    pub xmin: TransactionId,
    /// Удалившая транзакция (INVALID — не удалялась).
    pub xmax: TransactionId,
    /// Мультитранзакция, держащая блокировку строки (только lockers).
    pub lock_multi: Option<MultiXactId>,
}

impl RowHeader {
    pub fn inserted_by(xmin: TransactionId) -> Self {
        Self {
            xmin,
            xmax: TransactionId::INVALID,
            lock_multi: None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.xmin == TransactionId::FROZEN
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeapRow {
    pub header: RowHeader,
    pub values: Vec<Datum>,
}

impl HeapRow {
    pub fn width(&self) -> usize {
        ROW_HEADER_SIZE + self.values.iter().map(Datum::width).sum::<usize>()
    }
}

/// Состояние line pointer'а.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemSlot {
    /// Свободен для повторного использования.
    Unused,
    /// Хранилище освобождено, но на слот ещё могут ссылаться индексы (LP_DEAD).
    Dead,
    Normal(HeapRow),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeapPage {
    pub slots: Vec<ItemSlot>,
}

impl HeapPage {
    pub fn new(slots: Vec<ItemSlot>) -> Self {
        Self { slots }
    }

    /// На странице нет ни одной строки и ни одного LP_DEAD.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| matches!(s, ItemSlot::Unused))
    }

    pub fn has_dead_items(&self) -> bool {
        self.slots.iter().any(|s| matches!(s, ItemSlot::Dead))
    }

    pub fn rows(&self) -> impl Iterator<Item = (SlotNumber, &HeapRow)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| match s {
            ItemSlot::Normal(r) => Some((i as SlotNumber, r)),
            _ => None,
        })
    }

    pub fn used_bytes(&self) -> usize {
        let rows: usize = self.rows().map(|(_, r)| r.width()).sum();
        PAGE_HEADER_SIZE + self.slots.len() * ITEM_ID_SIZE + rows
    }

    pub fn free_space(&self, page_size: usize) -> usize {
        page_size.saturating_sub(self.used_bytes())
    }
}

/// Биты карты видимости для страницы.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityFlags {
    pub all_visible: bool,
    pub all_frozen: bool,
}

impl VisibilityFlags {
    pub const NONE: VisibilityFlags = VisibilityFlags {
        all_visible: false,
        all_frozen: false,
    };
}
