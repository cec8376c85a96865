//! vacuum/dead_rows — ограниченное хранилище адресов мёртвых строк.
//!
//! Ёмкость фиксируется при создании из бюджета памяти и не меняется. Сканирование идёт по
//! возрастанию страниц, поэтому адреса поступают уже отсортированными — contains() работает
//! бинарным поиском без отдельной сортировки.

use std::fmt;

use crate::access::tuple::ItemPointer;
use crate::consts::ITEM_POINTER_SIZE;

/// Хранилище заполнено; нужен раунд очистки индексов перед повторной попыткой.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadRowStoreFull {
    pub capacity: usize,
}

impl fmt::Display for DeadRowStoreFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dead row store is full (capacity {})", self.capacity)
    }
}

impl std::error::Error for DeadRowStoreFull {}

#[derive(Debug, Clone)]
pub struct DeadRowStore {
    items: Vec<ItemPointer>,
    capacity: usize,
}

impl DeadRowStore {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Ёмкость из бюджета памяти (КБ).
    ///
    /// Без индексов мёртвые строки убираются сразу постранично, поэтому хватает одной
    /// страницы. С индексами ёмкость не превышает того, что вообще может поместиться в
    /// таблице, но не меньше одной страницы.
    pub fn from_memory_budget(
        budget_kb: usize,
        rel_pages: u32,
        has_indexes: bool,
        max_rows_per_page: usize,
    ) -> Self {
        let per_page = max_rows_per_page.max(1);
        if !has_indexes {
            return Self::with_capacity(per_page);
        }
        let mut cap = budget_kb.saturating_mul(1024) / ITEM_POINTER_SIZE;
        let table_max = (rel_pages as usize).saturating_mul(per_page);
        if table_max < cap {
            cap = table_max;
        }
        Self::with_capacity(cap.max(per_page))
    }

    /// Добавить адрес. Адреса должны поступать по возрастанию.
    pub fn append(&mut self, tid: ItemPointer) -> Result<(), DeadRowStoreFull> {
        if self.items.len() >= self.capacity {
            return Err(DeadRowStoreFull {
                capacity: self.capacity,
            });
        }
        debug_assert!(
            self.items.last().map_or(true, |last| *last < tid),
            "dead rows must be appended in ascending order"
        );
        self.items.push(tid);
        Ok(())
    }

    pub fn contains(&self, tid: &ItemPointer) -> bool {
        self.items.binary_search(tid).is_ok()
    }

    /// Сбросить содержимое без освобождения памяти.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Сколько ещё адресов поместится.
    pub fn remaining(&self) -> usize {
        self.capacity - self.items.len()
    }

    pub fn as_slice(&self) -> &[ItemPointer] {
        &self.items
    }

    /// Адреса, относящиеся к одной странице (непрерывный диапазон).
    pub fn page_range(&self, start: usize) -> &[ItemPointer] {
        let Some(first) = self.items.get(start) else {
            return &[];
        };
        let end = self.items[start..]
            .iter()
            .position(|t| t.page != first.page)
            .map_or(self.items.len(), |n| start + n);
        &self.items[start..end]
    }
}
