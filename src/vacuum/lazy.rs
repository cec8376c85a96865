//! vacuum/lazy — lazy vacuum одной кучи.
//!
//! Машина состояний:
//!   ScanHeap -> (VacuumIndex <-> VacuumHeap)* -> IndexCleanup -> Truncate -> Done
//! с терминальным Error из любого состояния.
//!
//! ScanHeap идёт по страницам по возрастанию: prune + freeze, адреса LP_DEAD копятся в
//! DeadRowStore. Когда в хранилище не помещается ещё одна страница, выполняется раунд:
//! bulk-delete во всех индексах (последовательно или через ParallelCoordinator), затем
//! вторая фаза по куче. Без индексов мёртвые слоты освобождаются сразу на первом проходе.
//!
//! Failsafe проверяется на старте, периодически по ходу скана, перед каждым раундом и после
//! каждого индекса. После срабатывания: никаких раундов, cleanup, усечения и задержек,
//! cutoffs — самые агрессивные. Failsafe проверяется раньше bypass и всегда его перекрывает.

use anyhow::{Context, Result};
use log::{debug, info, log, warn, Level};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::access::tuple::{ItemPointer, PageNumber, SlotNumber, VisibilityFlags};
use crate::access::{
    HeapRelation, IndexBulkDeleteResult, IndexVacuumInfo, IoUsage, RelStats, RelStatsUpdate,
    Relation, VacuumEnv,
};
use crate::config::VacuumConfig;
use crate::consts::{
    BYPASS_MAX_DEAD_BYTES, BYPASS_THRESHOLD_PAGES, FAILSAFE_EVERY_BYTES, ITEM_ID_SIZE,
    ITEM_POINTER_SIZE, SKIP_PAGES_THRESHOLD,
};
use crate::metrics::{
    record_dead_rows_removed, record_failsafe_trigger, record_heap_pages_scanned,
    record_index_scan_round,
};
use crate::options::{VacOptValue, VacuumOption, VacuumParams};
use crate::xid::{MultiXactId, TransactionId};

use super::cutoffs::{CutoffCalculator, Cutoffs};
use super::dead_rows::DeadRowStore;
use super::index::{bulk_delete_one, cleanup_one, IndexPhase};
use super::io::VacuumIo;
use super::parallel::ParallelCoordinator;
use super::prune::{count_rows, page_needs_freeze, page_visibility, prune_and_freeze, reclaim_dead_slots};
use super::relstats::{count_all_visible, estimate_reltuples, update_relstats};
use super::truncate::{should_attempt_truncation, HeapTruncator};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VacuumPhase {
    ScanHeap,
    VacuumIndex,
    VacuumHeap,
    IndexCleanup,
    Truncate,
    Done,
    Error,
}

impl fmt::Display for VacuumPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VacuumPhase::ScanHeap => "scanning heap",
            VacuumPhase::VacuumIndex => "vacuuming indexes",
            VacuumPhase::VacuumHeap => "vacuuming heap",
            VacuumPhase::IndexCleanup => "cleaning up indexes",
            VacuumPhase::Truncate => "truncating heap",
            VacuumPhase::Done => "done",
            VacuumPhase::Error => "error",
        };
        f.write_str(s)
    }
}

/// Итог по одному индексу.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub name: String,
    /// Результат последнего раунда bulk-delete (None — раундов не было).
    pub bulk_delete: Option<IndexBulkDeleteResult>,
    pub cleanup: Option<IndexBulkDeleteResult>,
}

/// Итог lazy vacuum одного отношения.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VacuumOutcome {
    pub relid: u32,
    pub relname: String,
    pub aggressive: bool,
    pub failsafe_active: bool,
    pub orig_rel_pages: PageNumber,
    pub rel_pages: PageNumber,
    pub pages_removed: PageNumber,
    pub scanned_pages: PageNumber,
    pub pinskipped_pages: PageNumber,
    pub frozenskipped_pages: PageNumber,
    /// Строки, удалённые в этом запуске.
    pub tuples_deleted: u64,
    /// LP_DEAD слоты, оставшиеся в куче (bypass/failsafe/INDEX_CLEANUP off).
    pub lpdead_items: u64,
    pub tuples_frozen: u64,
    pub index_tuples_deleted: f64,
    pub new_rel_tuples: f64,
    pub new_live_tuples: f64,
    /// Недавно удалённые строки, которые ещё нельзя убрать.
    pub new_dead_tuples: f64,
    pub missed_dead_tuples: u64,
    pub num_index_scans: u32,
    pub index_vacuum_bypassed: bool,
    pub truncate_lock_conflict: bool,
    pub new_frozen_xid: Option<TransactionId>,
    pub new_min_multi: Option<MultiXactId>,
    pub indexes: Vec<IndexOutcome>,
    pub parallel_workers_launched: usize,
    pub io: IoUsage,
    pub delay_ms: f64,
    pub elapsed_ms: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct ScanCounters {
    scanned_pages: PageNumber,
    pinskipped_pages: PageNumber,
    frozenskipped_pages: PageNumber,
    tupcount_pages: PageNumber,
    nonempty_pages: PageNumber,
    lpdead_item_pages: PageNumber,
    tuples_deleted: u64,
    lpdead_items: u64,
    num_tuples: u64,
    live_tuples: u64,
    recently_dead: u64,
    missed_dead: u64,
    nfrozen: u64,
    dead_rows_reclaimed: u64,
}

pub struct LazyVacuumEngine<'a> {
    rel: &'a Relation,
    heap: &'a dyn HeapRelation,
    params: &'a VacuumParams,
    cfg: &'a VacuumConfig,
    env: VacuumEnv<'a>,
    elevel: Level,
    phase: VacuumPhase,

    old_stats: RelStats,
    cutoffs: Cutoffs,
    new_frozen_xid: TransactionId,
    new_min_multi: MultiXactId,

    do_index_vacuuming: bool,
    do_index_cleanup: bool,
    do_rel_truncate: bool,
    consider_bypass: bool,
    failsafe_active: bool,
    have_vacuumed_indexes: bool,
    bypassed: bool,

    dead: DeadRowStore,
    io: VacuumIo,
    parallel: Option<ParallelCoordinator>,
    istats: Vec<Option<IndexBulkDeleteResult>>,
    bulk_results: Vec<Option<IndexBulkDeleteResult>>,
    parallel_launched: usize,

    orig_rel_pages: PageNumber,
    rel_pages: PageNumber,
    pages_removed: PageNumber,
    truncate_lock_conflict: bool,
    num_index_scans: u32,
    c: ScanCounters,
    new_rel_tuples: f64,
    new_live_tuples: f64,
}

impl<'a> LazyVacuumEngine<'a> {
    pub fn new(
        rel: &'a Relation,
        params: &'a VacuumParams,
        cfg: &'a VacuumConfig,
        env: VacuumEnv<'a>,
    ) -> Result<Self> {
        let heap = rel.heap.as_ref();
        let relid = heap.relid();
        let elevel = if params.verbose() { Level::Info } else { Level::Debug };

        let old_stats = env
            .catalog
            .rel_stats(relid)
            .with_context(|| format!("read catalog stats for \"{}\"", heap.name()))?;

        let force_aggressive = params.has(VacuumOption::DisablePageSkipping) || params.is_wraparound;
        let cutoffs = CutoffCalculator::new(cfg)
            .compute(&old_stats, env.xact, &params.effective_ages(), force_aggressive)
            .with_context(|| format!("compute cutoffs for \"{}\"", heap.name()))?;

        let nindexes = rel.indexes.len();
        let (do_index_vacuuming, do_index_cleanup, consider_bypass) =
            match params.index_cleanup.resolve(old_stats.options.index_cleanup) {
                VacOptValue::Disabled => (false, false, false),
                VacOptValue::Enabled => (true, true, false),
                VacOptValue::Auto | VacOptValue::Unspecified => (true, true, true),
            };
        let do_rel_truncate =
            params.truncate.resolve(old_stats.options.truncate) != VacOptValue::Disabled;

        let rel_pages = heap.num_pages();
        let dead = DeadRowStore::from_memory_budget(
            cfg.maintenance_work_mem_kb,
            rel_pages,
            nindexes > 0,
            heap.max_rows_per_page(),
        );

        let parallel = if nindexes > 1 {
            let plan = ParallelCoordinator::plan(
                &rel.indexes,
                params.workers,
                cfg,
                env.launcher.max_workers(),
            );
            ParallelCoordinator::allocate(plan, &rel.indexes, relid, elevel, cfg)
        } else {
            None
        };

        Ok(Self {
            rel,
            heap,
            params,
            cfg,
            env,
            elevel,
            phase: VacuumPhase::ScanHeap,
            old_stats,
            new_frozen_xid: cutoffs.freeze_limit,
            new_min_multi: cutoffs.multi_cutoff,
            cutoffs,
            do_index_vacuuming: do_index_vacuuming && nindexes > 0,
            do_index_cleanup: do_index_cleanup && nindexes > 0,
            do_rel_truncate,
            consider_bypass,
            failsafe_active: false,
            have_vacuumed_indexes: false,
            bypassed: false,
            dead,
            io: VacuumIo::new(cfg, env.cancel.clone()),
            parallel,
            istats: vec![None; nindexes],
            bulk_results: vec![None; nindexes],
            parallel_launched: 0,
            orig_rel_pages: rel_pages,
            rel_pages,
            pages_removed: 0,
            truncate_lock_conflict: false,
            num_index_scans: 0,
            c: ScanCounters::default(),
            new_rel_tuples: 0.0,
            new_live_tuples: 0.0,
        })
    }

    /// Подменить I/O контекст (например, с другой функцией сна).
    pub fn with_io(mut self, io: VacuumIo) -> Self {
        self.io = io;
        self
    }

    pub fn phase(&self) -> VacuumPhase {
        self.phase
    }

    pub fn cutoffs(&self) -> &Cutoffs {
        &self.cutoffs
    }

    pub fn dead_row_capacity(&self) -> usize {
        self.dead.capacity()
    }

    pub fn planned_workers(&self) -> usize {
        self.parallel.as_ref().map_or(0, |p| p.nworkers())
    }

    pub fn run(mut self) -> Result<VacuumOutcome> {
        match self.run_inner() {
            Ok(out) => {
                self.phase = VacuumPhase::Done;
                Ok(out)
            }
            Err(e) => {
                let at = self.phase;
                self.phase = VacuumPhase::Error;
                Err(e.context(format!("vacuum of \"{}\" failed while {}", self.heap.name(), at)))
            }
        }
    }

    fn run_inner(&mut self) -> Result<VacuumOutcome> {
        let started = Instant::now();
        log!(
            self.elevel,
            "vacuuming \"{}\" ({} pages, aggressive={}, oldest_xmin={}, freeze_limit={})",
            self.heap.name(),
            self.rel_pages,
            self.cutoffs.aggressive,
            self.cutoffs.oldest_xmin,
            self.cutoffs.freeze_limit
        );

        // failsafe на старте: cutoffs форсируются до скана
        if self.check_failsafe() {
            self.new_frozen_xid = self.cutoffs.freeze_limit;
            self.new_min_multi = self.cutoffs.multi_cutoff;
        }

        self.scan_heap()?;

        if self.do_index_cleanup {
            self.cleanup_all_indexes()?;
        }

        self.truncate()?;

        let (frozen, multi) = self.update_catalog()?;

        let out = self.outcome(frozen, multi, started.elapsed().as_millis() as u64);
        self.log_summary(&out);
        Ok(out)
    }

    // ---------- failsafe ----------

    /// Проверить failsafe; при срабатывании переключить запуск в деградированный режим.
    fn check_failsafe(&mut self) -> bool {
        if self.failsafe_active {
            return true;
        }
        let calc = CutoffCalculator::new(self.cfg);
        let fire = calc.check_failsafe(
            self.old_stats.frozen_xid,
            self.old_stats.min_multi,
            self.env.xact.next_xid(),
            self.env.xact.next_multi(),
        );
        if !fire {
            return false;
        }
        self.failsafe_active = true;
        self.do_index_vacuuming = false;
        self.do_index_cleanup = false;
        self.do_rel_truncate = false;
        self.io.throttle_mut().disable();
        self.cutoffs.apply_failsafe();
        record_failsafe_trigger();
        warn!(
            "bypassing nonessential maintenance of table \"{}\" as a failsafe after {} index scans",
            self.heap.name(),
            self.num_index_scans
        );
        true
    }

    // ---------- first heap pass ----------

    fn next_unskippable(&self, mut blk: PageNumber, nblocks: PageNumber) -> PageNumber {
        if self.params.has(VacuumOption::DisablePageSkipping) {
            return blk;
        }
        while blk < nblocks {
            let vm = self.heap.visibility(blk);
            let skippable = if self.cutoffs.aggressive {
                vm.all_frozen
            } else {
                vm.all_visible
            };
            if !skippable {
                break;
            }
            blk += 1;
        }
        blk
    }

    fn scan_heap(&mut self) -> Result<()> {
        self.phase = VacuumPhase::ScanHeap;
        let heap = self.heap;
        let relid = heap.relid();
        let nblocks = self.rel_pages;
        let nindexes = self.rel.indexes.len();
        let failsafe_every = (FAILSAFE_EVERY_BYTES / heap.page_size().max(1) as u64).max(1) as PageNumber;
        let fsm_every = self.cfg.fsm_vacuum_every_pages.max(1);
        let mut next_fsm_block: PageNumber = 0;

        let mut next_unskippable = self.next_unskippable(0, nblocks);
        let mut skipping_blocks = next_unskippable >= SKIP_PAGES_THRESHOLD;

        for blkno in 0..nblocks {
            if blkno == next_unskippable {
                next_unskippable = self.next_unskippable(blkno + 1, nblocks);
                skipping_blocks = next_unskippable - blkno > SKIP_PAGES_THRESHOLD;
            } else if skipping_blocks && blkno != nblocks - 1 {
                // последняя страница сканируется всегда: по ней решается усечение
                if self.cutoffs.aggressive || heap.visibility(blkno).all_frozen {
                    self.c.frozenskipped_pages += 1;
                }
                continue;
            }

            self.io.delay_point()?;
            if blkno > 0 && blkno % failsafe_every == 0 {
                self.check_failsafe();
            }

            // для страницы должно хватить места в хранилище
            if nindexes > 0
                && !self.dead.is_empty()
                && self.dead.remaining() < heap.max_rows_per_page()
            {
                self.lazy_vacuum(false)?;
                self.phase = VacuumPhase::ScanHeap;
                heap.vacuum_free_space_map(next_fsm_block, blkno);
                next_fsm_block = blkno;
            }

            self.scan_page(blkno, nblocks)
                .with_context(|| format!("while scanning block {} of relation \"{}\"", blkno, heap.name()))?;

            if nindexes == 0 && blkno - next_fsm_block >= fsm_every {
                heap.vacuum_free_space_map(next_fsm_block, blkno);
                next_fsm_block = blkno;
            }
        }
        record_heap_pages_scanned(self.c.scanned_pages as u64);

        if !self.dead.is_empty() {
            let onecall = !self.have_vacuumed_indexes;
            self.lazy_vacuum(onecall)?;
        }
        if nblocks > next_fsm_block {
            heap.vacuum_free_space_map(next_fsm_block, nblocks);
        }

        // оценки нужны до cleanup индексов
        let scanned_tuples = self.c.num_tuples as f64;
        self.new_rel_tuples = estimate_reltuples(
            self.old_stats.pages,
            self.old_stats.tuples,
            nblocks,
            self.c.tupcount_pages,
            scanned_tuples,
        )
        .max(0.0);
        self.new_live_tuples = (self.new_rel_tuples - self.c.recently_dead as f64).max(0.0);

        debug!(
            "\"{}\": scan done relid={} scanned={} pinskipped={} frozenskipped={} tuples={} dead={}",
            heap.name(),
            relid,
            self.c.scanned_pages,
            self.c.pinskipped_pages,
            self.c.frozenskipped_pages,
            self.c.num_tuples,
            self.c.tuples_deleted
        );
        Ok(())
    }

    fn scan_page(&mut self, blkno: PageNumber, nblocks: PageNumber) -> Result<()> {
        let heap = self.heap;
        let relid = heap.relid();
        let xact = self.env.xact;
        let nindexes = self.rel.indexes.len();

        self.io.page_access(relid, blkno, false)?;
        let mut page = heap.read_page(blkno)?;

        if !heap.cleanup_lock_available(blkno) {
            let last = blkno == nblocks - 1;
            if !self.cutoffs.aggressive && !last {
                self.c.pinskipped_pages += 1;
                return Ok(());
            }
            if !page_needs_freeze(&page, &self.cutoffs) {
                // заморозка не нужна — только считаем строки
                let r = count_rows(&page, &self.cutoffs, xact);
                self.c.scanned_pages += 1;
                self.c.tupcount_pages += 1;
                self.c.pinskipped_pages += 1;
                self.c.num_tuples += r.num_tuples;
                self.c.live_tuples += r.live_tuples;
                self.c.recently_dead += r.recently_dead;
                self.c.missed_dead += r.missed_dead;
                if r.has_rows {
                    self.c.nonempty_pages = blkno + 1;
                }
                return Ok(());
            }
            if !self.cutoffs.aggressive {
                // последняя страница неагрессивного скана: ждать не будем
                self.c.pinskipped_pages += 1;
                if page.rows().next().is_some() || page.has_dead_items() {
                    self.c.nonempty_pages = blkno + 1;
                }
                return Ok(());
            }
            heap.wait_for_cleanup_lock(blkno)?;
            page = heap.read_page(blkno)?;
        }

        self.c.scanned_pages += 1;
        self.c.tupcount_pages += 1;

        let res = prune_and_freeze(&mut page, &self.cutoffs, xact);
        self.c.tuples_deleted += res.tuples_deleted;
        self.c.num_tuples += res.num_tuples;
        self.c.live_tuples += res.live_tuples;
        self.c.recently_dead += res.recently_dead;
        self.c.nfrozen += res.nfrozen;
        if res.has_rows {
            self.c.nonempty_pages = blkno + 1;
        }

        let mut dirty = res.modified;
        let (all_visible, all_frozen) = if nindexes == 0 && !res.dead_slots.is_empty() {
            // без индексов мёртвые слоты освобождаются сразу
            let n = reclaim_dead_slots(&mut page, &res.dead_slots);
            self.c.dead_rows_reclaimed += n as u64;
            dirty = true;
            page_visibility(&page, &self.cutoffs, xact)
        } else {
            if !res.dead_slots.is_empty() {
                self.c.lpdead_item_pages += 1;
            }
            (res.all_visible, res.all_frozen)
        };

        let free = page.free_space(heap.page_size());
        let has_dead_items = page.has_dead_items();
        if dirty {
            self.io.mark_dirty();
            self.io.wal(1, (res.dead_slots.len() * ITEM_ID_SIZE) as u64 + res.nfrozen * 12);
            heap.write_page(blkno, page)?;
        }

        let vm = heap.visibility(blkno);
        if all_visible && (!vm.all_visible || (all_frozen && !vm.all_frozen)) {
            heap.set_visibility(
                blkno,
                VisibilityFlags {
                    all_visible: true,
                    all_frozen,
                },
            );
        } else if !all_visible && vm.all_visible {
            debug!(
                "page {} of relation \"{}\" is not all-visible but visibility map bit is set",
                blkno,
                heap.name()
            );
            heap.set_visibility(blkno, VisibilityFlags::NONE);
        }

        if !has_dead_items {
            heap.record_free_space(blkno, free);
        }

        if nindexes > 0 {
            for &slot in &res.dead_slots {
                self.remember_dead(ItemPointer::new(blkno, slot))?;
            }
        }
        Ok(())
    }

    fn remember_dead(&mut self, tid: ItemPointer) -> Result<()> {
        if let Err(full) = self.dead.append(tid) {
            debug!("{}; running an index vacuum round", full);
            self.lazy_vacuum(false)?;
            self.phase = VacuumPhase::ScanHeap;
            self.dead.append(tid)?;
        }
        Ok(())
    }

    // ---------- index rounds ----------

    fn lazy_vacuum(&mut self, onecall: bool) -> Result<()> {
        self.have_vacuumed_indexes = true;
        if !self.do_index_vacuuming {
            self.c.lpdead_items += self.dead.len() as u64;
            self.dead.clear();
            return Ok(());
        }

        // failsafe раньше bypass
        if self.check_failsafe() {
            self.c.lpdead_items += self.dead.len() as u64;
            self.dead.clear();
            return Ok(());
        }

        let mut bypass = false;
        if onecall && self.consider_bypass && self.rel_pages > 0 {
            let threshold = self.rel_pages as f64 * BYPASS_THRESHOLD_PAGES;
            bypass = (self.c.lpdead_item_pages as f64) < threshold
                && self.dead.len() < BYPASS_MAX_DEAD_BYTES / ITEM_POINTER_SIZE;
        }

        if bypass {
            log!(
                self.elevel,
                "table \"{}\": index scan bypassed: {} pages from table ({:.2}% of total) have {} dead item identifiers",
                self.heap.name(),
                self.c.lpdead_item_pages,
                100.0 * self.c.lpdead_item_pages as f64 / self.rel_pages as f64,
                self.dead.len()
            );
            self.do_index_vacuuming = false;
            self.bypassed = true;
            self.c.lpdead_items += self.dead.len() as u64;
        } else if self.vacuum_all_indexes()? {
            self.vacuum_heap_rel()?;
        } else {
            // failsafe сработал посреди раунда
            self.c.lpdead_items += self.dead.len() as u64;
        }
        self.dead.clear();
        Ok(())
    }

    /// Bulk-delete во всех индексах. false — раунд прерван failsafe'ом.
    fn vacuum_all_indexes(&mut self) -> Result<bool> {
        self.phase = VacuumPhase::VacuumIndex;
        if self.check_failsafe() {
            return Ok(false);
        }

        let info = IndexVacuumInfo {
            heap_relid: self.heap.relid(),
            analyze_only: false,
            estimated_count: true,
            num_heap_tuples: self.old_stats.tuples,
            verbose: self.params.verbose(),
            work_mem_kb: self.cfg.maintenance_work_mem_kb,
        };

        let mut allindexes = true;
        if let Some(par) = self.parallel.as_mut() {
            let launched = par.run_phase(
                IndexPhase::BulkDelete,
                self.num_index_scans,
                &self.rel.indexes,
                &mut self.istats,
                info,
                &self.dead,
                &mut self.io,
                self.env.launcher,
            )?;
            self.parallel_launched = self.parallel_launched.max(launched);
            if self.check_failsafe() {
                allindexes = false;
            }
        } else {
            for i in 0..self.rel.indexes.len() {
                let index = self.rel.indexes[i].as_ref();
                let res = bulk_delete_one(index, &info, self.istats[i], &self.dead, &mut self.io, self.elevel)?;
                self.istats[i] = Some(res);
                if self.check_failsafe() {
                    allindexes = false;
                    break;
                }
            }
        }

        self.num_index_scans += 1;
        record_index_scan_round();
        self.bulk_results.clone_from(&self.istats);
        Ok(allindexes)
    }

    /// Вторая фаза: освободить слоты, удалённые из индексов в этом раунде.
    fn vacuum_heap_rel(&mut self) -> Result<()> {
        self.phase = VacuumPhase::VacuumHeap;
        let heap = self.heap;
        let relid = heap.relid();
        let xact = self.env.xact;

        let mut pos = 0usize;
        let mut pages = 0u64;
        let mut reclaimed = 0u64;
        while pos < self.dead.len() {
            let range = self.dead.page_range(pos);
            let blkno = range[0].page;
            let slots: Vec<SlotNumber> = range.iter().map(|t| t.slot).collect();
            pos += slots.len();

            self.io.page_access(relid, blkno, true)?;
            heap.wait_for_cleanup_lock(blkno)?;
            let mut page = heap
                .read_page(blkno)
                .with_context(|| format!("while vacuuming block {} of relation \"{}\"", blkno, heap.name()))?;
            reclaimed += reclaim_dead_slots(&mut page, &slots) as u64;
            let (all_visible, all_frozen) = page_visibility(&page, &self.cutoffs, xact);
            let free = page.free_space(heap.page_size());
            heap.write_page(blkno, page)?;
            self.io.wal(1, (slots.len() * ITEM_ID_SIZE) as u64);

            if all_visible {
                heap.set_visibility(
                    blkno,
                    VisibilityFlags {
                        all_visible,
                        all_frozen,
                    },
                );
            }
            heap.record_free_space(blkno, free);
            pages += 1;
        }
        self.c.dead_rows_reclaimed += reclaimed;
        log!(
            self.elevel,
            "table \"{}\": removed {} dead item identifiers in {} pages",
            heap.name(),
            reclaimed,
            pages
        );
        Ok(())
    }

    fn cleanup_all_indexes(&mut self) -> Result<()> {
        self.phase = VacuumPhase::IndexCleanup;
        let info = IndexVacuumInfo {
            heap_relid: self.heap.relid(),
            analyze_only: false,
            estimated_count: self.c.tupcount_pages < self.rel_pages,
            num_heap_tuples: self.new_rel_tuples,
            verbose: self.params.verbose(),
            work_mem_kb: self.cfg.maintenance_work_mem_kb,
        };

        if let Some(par) = self.parallel.as_mut() {
            let empty = DeadRowStore::with_capacity(1);
            let launched = par.run_phase(
                IndexPhase::Cleanup,
                self.num_index_scans,
                &self.rel.indexes,
                &mut self.istats,
                info,
                &empty,
                &mut self.io,
                self.env.launcher,
            )?;
            self.parallel_launched = self.parallel_launched.max(launched);
        } else {
            for i in 0..self.rel.indexes.len() {
                let index = self.rel.indexes[i].as_ref();
                self.istats[i] = cleanup_one(index, &info, self.istats[i], &mut self.io, self.elevel)?;
            }
        }
        Ok(())
    }

    // ---------- truncation ----------

    fn truncate(&mut self) -> Result<()> {
        if !self.do_rel_truncate || self.failsafe_active {
            return Ok(());
        }
        if !should_attempt_truncation(self.rel_pages, self.c.nonempty_pages) {
            return Ok(());
        }
        self.phase = VacuumPhase::Truncate;
        let t = HeapTruncator::new(self.heap, self.env.locks, self.cfg, self.elevel).run(
            self.rel_pages,
            self.c.nonempty_pages,
            &mut self.io,
        )?;
        self.pages_removed = t.pages_removed;
        self.rel_pages = t.new_rel_pages;
        self.truncate_lock_conflict = t.lock_conflict;
        Ok(())
    }

    // ---------- catalog ----------

    fn update_catalog(&mut self) -> Result<(Option<TransactionId>, Option<MultiXactId>)> {
        let heap = self.heap;
        // relfrozenxid можно продвинуть, только если просмотрены все незамороженные страницы
        let can_advance = self.c.scanned_pages + self.c.frozenskipped_pages >= self.orig_rel_pages;
        let frozen = can_advance.then_some(self.new_frozen_xid);
        let multi = can_advance.then_some(self.new_min_multi);

        let upd = RelStatsUpdate {
            pages: self.rel_pages,
            tuples: self.new_rel_tuples,
            all_visible_pages: Some(count_all_visible(heap).min(self.rel_pages)),
            frozen_xid: frozen,
            min_multi: multi,
        };
        update_relstats(self.env.catalog, heap.relid(), &upd)?;

        if self.do_index_cleanup {
            for (i, index) in self.rel.indexes.iter().enumerate() {
                if let Some(s) = self.istats[i] {
                    if s.estimated_count {
                        continue;
                    }
                    let iupd = RelStatsUpdate {
                        pages: s.num_pages,
                        tuples: s.num_index_tuples,
                        ..Default::default()
                    };
                    update_relstats(self.env.catalog, index.relid(), &iupd)?;
                }
            }
        }
        Ok((frozen, multi))
    }

    fn outcome(
        &self,
        frozen: Option<TransactionId>,
        multi: Option<MultiXactId>,
        elapsed_ms: u64,
    ) -> VacuumOutcome {
        let indexes: Vec<IndexOutcome> = self
            .rel
            .indexes
            .iter()
            .enumerate()
            .map(|(i, idx)| IndexOutcome {
                name: idx.name().to_string(),
                bulk_delete: self.bulk_results[i],
                cleanup: if self.do_index_cleanup { self.istats[i] } else { None },
            })
            .collect();
        let index_tuples_deleted = indexes
            .iter()
            .filter_map(|o| o.bulk_delete.map(|s| s.tuples_removed))
            .sum();

        VacuumOutcome {
            relid: self.heap.relid(),
            relname: self.heap.name().to_string(),
            aggressive: self.cutoffs.aggressive,
            failsafe_active: self.failsafe_active,
            orig_rel_pages: self.orig_rel_pages,
            rel_pages: self.rel_pages,
            pages_removed: self.pages_removed,
            scanned_pages: self.c.scanned_pages,
            pinskipped_pages: self.c.pinskipped_pages,
            frozenskipped_pages: self.c.frozenskipped_pages,
            tuples_deleted: self.c.tuples_deleted,
            lpdead_items: self.c.lpdead_items,
            tuples_frozen: self.c.nfrozen,
            index_tuples_deleted,
            new_rel_tuples: self.new_rel_tuples,
            new_live_tuples: self.new_live_tuples,
            new_dead_tuples: self.c.recently_dead as f64,
            missed_dead_tuples: self.c.missed_dead,
            num_index_scans: self.num_index_scans,
            index_vacuum_bypassed: self.bypassed,
            truncate_lock_conflict: self.truncate_lock_conflict,
            new_frozen_xid: frozen,
            new_min_multi: multi,
            indexes,
            parallel_workers_launched: self.parallel_launched,
            io: self.io.usage(),
            delay_ms: self.io.throttle().total_slept().as_secs_f64() * 1000.0,
            elapsed_ms,
        }
    }

    fn log_summary(&self, out: &VacuumOutcome) {
        record_dead_rows_removed(self.c.dead_rows_reclaimed);
        let long_enough = self
            .params
            .log_min_duration_ms
            .map_or(false, |min| out.elapsed_ms >= min);
        let lvl = if self.params.verbose() || long_enough {
            Level::Info
        } else {
            Level::Debug
        };
        log!(
            lvl,
            "finished vacuuming \"{}\": index scans: {}, pages: {} removed, {} remain, {} scanned ({} pinskipped, {} frozenskipped)",
            out.relname,
            out.num_index_scans,
            out.pages_removed,
            out.rel_pages,
            out.scanned_pages,
            out.pinskipped_pages,
            out.frozenskipped_pages
        );
        log!(
            lvl,
            "tuples: {} removed, {:.0} remain, {:.0} are dead but not yet removable; {} frozen; failsafe={}",
            out.tuples_deleted,
            out.new_rel_tuples,
            out.new_dead_tuples,
            out.tuples_frozen,
            out.failsafe_active
        );
        if lvl == Level::Info {
            info!(
                "buffer usage: {} hits, {} misses, {} dirtied; WAL: {} records, {} bytes; delay {:.3} ms; elapsed {} ms",
                out.io.pages_hit,
                out.io.pages_miss,
                out.io.pages_dirtied,
                out.io.wal_records,
                out.io.wal_bytes,
                out.delay_ms,
                out.elapsed_ms
            );
        }
    }
}
