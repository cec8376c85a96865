//! vacuum/full — VACUUM FULL: компактная перезапись кучи и перестройка индексов.
//!
//! Вызывается под AccessExclusive блокировкой (её берёт vacuum()). Мёртвые версии
//! отбрасываются, недавно удалённые и живые переносятся, старые xmin замораживаются.
//! Параллельности здесь нет.

use anyhow::{Context, Result};
use log::{debug, log, Level};
use serde::{Deserialize, Serialize};
use std::mem;

use crate::access::tuple::{HeapPage, HeapRow, ItemPointer, ItemSlot, PageNumber, SlotNumber};
use crate::access::visibility::{satisfies_vacuum, VacuumVisibility};
use crate::access::{RelStatsUpdate, Relation, VacuumEnv};
use crate::config::VacuumConfig;
use crate::consts::{ITEM_ID_SIZE, PAGE_HEADER_SIZE};
use crate::options::VacuumParams;
use crate::xid::{MultiXactId, TransactionId};

use super::cutoffs::CutoffCalculator;
use super::io::VacuumIo;
use super::prune::freeze_row;
use super::relstats::update_relstats;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FullOutcome {
    pub old_pages: PageNumber,
    pub new_pages: PageNumber,
    pub tuples_removed: u64,
    pub tuples_kept: u64,
    pub recently_dead: u64,
    pub tuples_frozen: u64,
    pub new_frozen_xid: Option<TransactionId>,
    pub new_min_multi: Option<MultiXactId>,
    pub elapsed_ms: u64,
}

/// Раскладка строк по новым страницам.
struct PagePacker {
    page_size: usize,
    max_rows: usize,
    pages: Vec<HeapPage>,
    cur: HeapPage,
    cur_bytes: usize,
}

impl PagePacker {
    fn new(page_size: usize, max_rows: usize) -> Self {
        Self {
            page_size,
            max_rows: max_rows.max(1),
            pages: Vec::new(),
            cur: HeapPage::default(),
            cur_bytes: PAGE_HEADER_SIZE,
        }
    }

    /// Положить строку, вернуть её новый адрес.
    fn push(&mut self, row: HeapRow) -> ItemPointer {
        let need = row.width() + ITEM_ID_SIZE;
        let full = self.cur.slots.len() >= self.max_rows || self.cur_bytes + need > self.page_size;
        if full && !self.cur.slots.is_empty() {
            self.pages.push(mem::take(&mut self.cur));
            self.cur_bytes = PAGE_HEADER_SIZE;
        }
        let tid = ItemPointer::new(self.pages.len() as PageNumber, self.cur.slots.len() as SlotNumber);
        self.cur_bytes += need;
        self.cur.slots.push(ItemSlot::Normal(row));
        tid
    }

    fn finish(mut self) -> Vec<HeapPage> {
        if !self.cur.slots.is_empty() {
            self.pages.push(self.cur);
        }
        self.pages
    }
}

pub fn vacuum_full(
    rel: &Relation,
    params: &VacuumParams,
    cfg: &VacuumConfig,
    env: VacuumEnv<'_>,
) -> Result<FullOutcome> {
    let started = std::time::Instant::now();
    let heap = rel.heap.as_ref();
    let relid = heap.relid();
    let elevel = if params.verbose() { Level::Info } else { Level::Debug };
    let xact = env.xact;

    let old_stats = env
        .catalog
        .rel_stats(relid)
        .with_context(|| format!("read catalog stats for \"{}\"", heap.name()))?;
    let cutoffs = CutoffCalculator::new(cfg).compute(&old_stats, xact, &params.effective_ages(), false)?;

    log!(elevel, "vacuuming \"{}\" (full rewrite)", heap.name());

    let mut io = VacuumIo::new(cfg, env.cancel.clone());
    let mut packer = PagePacker::new(heap.page_size(), heap.max_rows_per_page());
    let mut kept: Vec<(ItemPointer, HeapRow)> = Vec::new();
    let mut out = FullOutcome {
        old_pages: heap.num_pages(),
        ..Default::default()
    };

    for blkno in 0..out.old_pages {
        io.page_access(relid, blkno, false)?;
        let page = heap
            .read_page(blkno)
            .with_context(|| format!("while rewriting block {} of relation \"{}\"", blkno, heap.name()))?;
        for (_, row) in page.rows() {
            match satisfies_vacuum(&row.header, cutoffs.oldest_xmin, xact) {
                VacuumVisibility::Dead => {
                    out.tuples_removed += 1;
                    continue;
                }
                VacuumVisibility::RecentlyDead => out.recently_dead += 1,
                _ => {}
            }
            let mut row = row.clone();
            if freeze_row(&mut row.header, &cutoffs, xact) {
                out.tuples_frozen += 1;
            }
            let tid = packer.push(row.clone());
            kept.push((tid, row));
        }
    }

    let pages = packer.finish();
    out.new_pages = pages.len() as PageNumber;
    out.tuples_kept = kept.len() as u64;
    for _ in 0..pages.len() {
        io.mark_dirty();
    }
    io.wal(pages.len() as u64, pages.iter().map(|p| p.used_bytes() as u64).sum());

    heap.replace_contents(pages)
        .with_context(|| format!("replace contents of \"{}\"", heap.name()))?;

    for index in &rel.indexes {
        io.check_cancel()?;
        index
            .rebuild(&kept)
            .with_context(|| format!("rebuild index \"{}\"", index.name()))?;
        debug!("rebuilt index \"{}\" with {} entries", index.name(), kept.len());
        let iupd = RelStatsUpdate {
            pages: index.num_pages(),
            tuples: kept.len() as f64,
            ..Default::default()
        };
        update_relstats(env.catalog, index.relid(), &iupd)?;
    }

    let upd = RelStatsUpdate {
        pages: out.new_pages,
        tuples: out.tuples_kept as f64,
        all_visible_pages: Some(0),
        frozen_xid: Some(cutoffs.freeze_limit),
        min_multi: Some(cutoffs.multi_cutoff),
    };
    update_relstats(env.catalog, relid, &upd)?;
    out.new_frozen_xid = upd.frozen_xid;
    out.new_min_multi = upd.min_multi;
    out.elapsed_ms = started.elapsed().as_millis() as u64;

    log!(
        elevel,
        "\"{}\": found {} removable, {} nonremovable row versions in {} pages; {} pages now",
        heap.name(),
        out.tuples_removed,
        out.tuples_kept,
        out.old_pages,
        out.new_pages
    );
    Ok(out)
}
