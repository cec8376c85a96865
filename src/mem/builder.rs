//! mem/builder — синтетические таблицы для тестов, бенчмарков и CLI.
//!
//! Таблица (id int, val int, note text): id — порядковый номер, val = id % 100. Доля
//! удалённых строк выбирается детерминированно по seed. Индексы строятся по колонкам
//! id и val по очереди.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use super::catalog::MemCatalog;
use super::heap::MemHeap;
use super::index::MemIndex;
use crate::access::tuple::{
    ColumnDef, ColumnType, Datum, HeapPage, HeapRow, ItemPointer, ItemSlot, PageNumber, RowHeader,
};
use crate::access::{HeapRelation, IndexCapabilities, IndexRelation, RelId, RelStats, Relation};
use crate::xid::TransactionId;

#[derive(Clone, Debug)]
pub struct TableBuilder {
    relid: RelId,
    name: String,
    rows: usize,
    dead_fraction: f64,
    rows_per_page: usize,
    empty_tail_pages: u32,
    indexes: usize,
    index_caps: IndexCapabilities,
    insert_xid: TransactionId,
    delete_xid: TransactionId,
    relfrozenxid: TransactionId,
    seed: u64,
}

/// Построенная таблица: куча, индексы и готовый Relation для движка.
pub struct SyntheticTable {
    pub heap: Arc<MemHeap>,
    pub indexes: Vec<Arc<MemIndex>>,
    pub relation: Relation,
    /// Адреса удалённых строк, по возрастанию.
    pub dead_tids: Vec<ItemPointer>,
    pub live_rows: usize,
}

impl TableBuilder {
    pub fn new(relid: RelId, name: &str) -> Self {
        Self {
            relid,
            name: name.to_string(),
            rows: 0,
            dead_fraction: 0.0,
            rows_per_page: 100,
            empty_tail_pages: 0,
            indexes: 0,
            index_caps: IndexCapabilities::default(),
            insert_xid: TransactionId(100),
            delete_xid: TransactionId(200),
            relfrozenxid: TransactionId::FIRST_NORMAL,
            seed: 0x5EED,
        }
    }

    pub fn rows(mut self, n: usize) -> Self {
        self.rows = n;
        self
    }

    /// Доля строк, удалённых закоммиченной транзакцией delete_xid.
    pub fn dead_fraction(mut self, f: f64) -> Self {
        self.dead_fraction = f.clamp(0.0, 1.0);
        self
    }

    pub fn rows_per_page(mut self, n: usize) -> Self {
        self.rows_per_page = n.max(1);
        self
    }

    /// Пустые страницы в конце кучи (кандидаты на усечение).
    pub fn empty_tail_pages(mut self, n: u32) -> Self {
        self.empty_tail_pages = n;
        self
    }

    pub fn indexes(mut self, n: usize) -> Self {
        self.indexes = n;
        self
    }

    pub fn index_capabilities(mut self, caps: IndexCapabilities) -> Self {
        self.index_caps = caps;
        self
    }

    pub fn xids(mut self, insert: TransactionId, delete: TransactionId) -> Self {
        self.insert_xid = insert;
        self.delete_xid = delete;
        self
    }

    pub fn relfrozenxid(mut self, xid: TransactionId) -> Self {
        self.relfrozenxid = xid;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnType::Int),
            ColumnDef::new("val", ColumnType::Int),
            ColumnDef::new("note", ColumnType::Text),
        ]
    }

    /// Построить таблицу и записать её начальную статистику в каталог.
    pub fn build(&self, catalog: &MemCatalog) -> Result<SyntheticTable> {
        if !self.insert_xid.is_normal() {
            return Err(anyhow!("insert xid {} is not a normal xid", self.insert_xid));
        }
        let heap = Arc::new(
            MemHeap::new(self.relid, &self.name, Self::columns()).with_max_rows_per_page(self.rows_per_page),
        );
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut all_rows: Vec<(ItemPointer, HeapRow)> = Vec::with_capacity(self.rows);
        let mut dead_tids = Vec::new();

        let mut page = HeapPage::default();
        let mut blkno: PageNumber = 0;
        for i in 0..self.rows {
            let mut header = RowHeader::inserted_by(self.insert_xid);
            let dead = self.dead_fraction > 0.0 && rng.gen_bool(self.dead_fraction);
            if dead {
                header.xmax = self.delete_xid;
            }
            let row = HeapRow {
                header,
                values: vec![
                    Datum::Int(i as i64),
                    Datum::Int((i % 100) as i64),
                    Datum::Text(format!("row-{}", i)),
                ],
            };
            let tid = ItemPointer::new(blkno, page.slots.len() as u16);
            if dead {
                dead_tids.push(tid);
            }
            all_rows.push((tid, row.clone()));
            page.slots.push(ItemSlot::Normal(row));
            if page.slots.len() == self.rows_per_page {
                heap.append_page(std::mem::take(&mut page))?;
                blkno += 1;
            }
        }
        if !page.slots.is_empty() {
            heap.append_page(page)?;
        }
        for _ in 0..self.empty_tail_pages {
            heap.append_page(HeapPage::default())?;
        }

        let mut indexes = Vec::with_capacity(self.indexes);
        let mut relation = Relation::new(heap.clone());
        for k in 0..self.indexes {
            let idx = Arc::new(
                MemIndex::new(
                    self.relid + 1 + k as RelId,
                    &format!("{}_idx{}", self.name, k),
                    k % 2,
                )
                .with_capabilities(self.index_caps),
            );
            idx.rebuild(&all_rows)?;
            relation = relation.with_index(idx.clone());
            indexes.push(idx);
        }

        catalog.set_rel_stats(
            self.relid,
            RelStats {
                pages: heap.num_pages(),
                tuples: self.rows as f64,
                frozen_xid: self.relfrozenxid,
                ..Default::default()
            },
        )?;

        Ok(SyntheticTable {
            live_rows: self.rows - dead_tids.len(),
            heap,
            indexes,
            relation,
            dead_tids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Catalog;

    #[test]
    fn builds_pages_and_indexes() {
        let cat = MemCatalog::new();
        let t = TableBuilder::new(1, "t")
            .rows(1050)
            .rows_per_page(100)
            .dead_fraction(0.3)
            .indexes(2)
            .empty_tail_pages(3)
            .build(&cat)
            .unwrap();
        assert_eq!(t.heap.num_pages(), 11 + 3);
        assert_eq!(t.heap.row_count().unwrap(), 1050);
        assert_eq!(t.indexes.len(), 2);
        assert_eq!(t.indexes[1].len(), 1050);
        assert!(t.dead_tids.len() > 200 && t.dead_tids.len() < 420);
        assert!(t.dead_tids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(cat.rel_stats(1).unwrap().pages, 14);
    }
}
