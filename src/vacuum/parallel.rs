//! vacuum/parallel — параллельная обработка индексов лидером и воркерами.
//!
//! Схема:
//! - plan(): сколько воркеров запускать (лидер тоже берёт индексы, поэтому воркеров на один
//!   меньше, чем подходящих индексов);
//! - SharedRunState: общий регион запуска — заголовок, атомарный счётчик захвата, битовая
//!   карта готовых слотов и по одному слоту результата на индекс;
//! - claim_next(): единственный примитив раздачи работы — fetch_add по счётчику, без локов;
//! - report_result(): сначала запись слота, потом установка бита (Release). Чтение — только
//!   после проверки бита (Acquire). Слот без бита считается отсутствующим и пересчитывается
//!   лидером.
//!
//! Слоты пишутся не более одного раза за фазу; между фазами лидер сбрасывает регион через
//! &mut (воркеров в этот момент нет).

use anyhow::{anyhow, Result};
use log::{debug, log, warn, Level};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::access::strategy::IoUsage;
use crate::access::{
    CleanupParallelism, IndexBulkDeleteResult, IndexCapabilities, IndexRelation, IndexVacuumInfo,
    RelId, WorkerLauncher,
};
use crate::config::VacuumConfig;
use crate::metrics::record_parallel_workers_launched;
use crate::options::WorkerRequest;

use super::cost::CostBalance;
use super::dead_rows::DeadRowStore;
use super::index::{process_index, IndexPhase};
use super::io::VacuumIo;

/// Результат обработки одного индекса в фазе.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PerIndexResult {
    pub stats: Option<IndexBulkDeleteResult>,
}

impl PerIndexResult {
    pub fn has_stats(&self) -> bool {
        self.stats.is_some()
    }

    pub fn tuples_removed(&self) -> f64 {
        self.stats.map_or(0.0, |s| s.tuples_removed)
    }

    pub fn num_index_tuples(&self) -> f64 {
        self.stats.map_or(0.0, |s| s.num_index_tuples)
    }
}

/// Общий регион одного параллельного запуска.
#[derive(Debug)]
pub struct SharedRunState {
    pub relid: RelId,
    /// Уровень логирования прогресса для воркеров.
    pub elevel: Level,
    phase: IndexPhase,
    first_time: bool,
    reltuples: f64,
    estimated_count: bool,
    pub worker_mem_kb: usize,
    cost: Arc<CostBalance>,
    next_index: AtomicUsize,
    updated: Box<[AtomicU8]>,
    slots: Box<[OnceLock<PerIndexResult>]>,
}

impl SharedRunState {
    pub fn new(relid: RelId, nindexes: usize, elevel: Level, worker_mem_kb: usize) -> Self {
        let bitmap_len = (nindexes + 7) / 8;
        Self {
            relid,
            elevel,
            phase: IndexPhase::BulkDelete,
            first_time: true,
            reltuples: -1.0,
            estimated_count: true,
            worker_mem_kb,
            cost: Arc::new(CostBalance::default()),
            next_index: AtomicUsize::new(0),
            updated: (0..bitmap_len).map(|_| AtomicU8::new(0)).collect(),
            slots: (0..nindexes).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn nindexes(&self) -> usize {
        self.slots.len()
    }

    pub fn phase(&self) -> IndexPhase {
        self.phase
    }

    pub fn first_time(&self) -> bool {
        self.first_time
    }

    pub fn reltuples(&self) -> f64 {
        self.reltuples
    }

    pub fn estimated_count(&self) -> bool {
        self.estimated_count
    }

    pub fn cost(&self) -> &Arc<CostBalance> {
        &self.cost
    }

    /// Подготовить регион к новой фазе: счётчик, карта и слоты обнуляются.
    pub fn begin_phase(&mut self, phase: IndexPhase, first_time: bool, reltuples: f64, estimated_count: bool) {
        self.phase = phase;
        self.first_time = first_time;
        self.reltuples = reltuples;
        self.estimated_count = estimated_count;
        self.cost = Arc::new(CostBalance::default());
        *self.next_index.get_mut() = 0;
        for b in self.updated.iter_mut() {
            *b.get_mut() = 0;
        }
        for s in self.slots.iter_mut() {
            s.take();
        }
    }

    /// Захватить следующий индекс. None — индексы закончились.
    pub fn claim_next(&self) -> Option<usize> {
        let idx = self.next_index.fetch_add(1, Ordering::Relaxed);
        if idx < self.slots.len() {
            Some(idx)
        } else {
            None
        }
    }

    /// Записать результат индекса и только затем пометить слот готовым.
    pub fn report_result(&self, idx: usize, result: PerIndexResult) -> Result<()> {
        let slot = self
            .slots
            .get(idx)
            .ok_or_else(|| anyhow!("index slot {} out of range ({} slots)", idx, self.slots.len()))?;
        slot.set(result)
            .map_err(|_| anyhow!("index slot {} already holds a result", idx))?;
        self.updated[idx / 8].fetch_or(1u8 << (idx % 8), Ordering::Release);
        Ok(())
    }

    pub fn is_updated(&self, idx: usize) -> bool {
        match self.updated.get(idx / 8) {
            Some(b) => b.load(Ordering::Acquire) & (1u8 << (idx % 8)) != 0,
            None => false,
        }
    }

    /// Результат слота, если он помечен готовым.
    pub fn result(&self, idx: usize) -> Option<PerIndexResult> {
        if !self.is_updated(idx) {
            return None;
        }
        self.slots.get(idx).and_then(|s| s.get().copied())
    }

    /// Собрать результаты всех слотов (вызывается лидером после завершения воркеров).
    pub fn merge(&self) -> Vec<Option<PerIndexResult>> {
        (0..self.slots.len()).map(|i| self.result(i)).collect()
    }
}

/// Решение о параллельности для набора индексов.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParallelPlan {
    pub nworkers: usize,
    /// Индекс вообще участвует в параллельной обработке (по возможностям и размеру).
    pub will_parallel: Vec<bool>,
    pub nindexes_parallel_bulkdel: usize,
    pub nindexes_parallel_cleanup: usize,
    /// Сколько параллельных индексов расходуют maintenance_work_mem.
    pub nindexes_mwm: usize,
}

pub struct ParallelCoordinator {
    plan: ParallelPlan,
    caps: Vec<IndexCapabilities>,
    shared: SharedRunState,
    mwm_kb: usize,
}

impl ParallelCoordinator {
    /// Выбрать число воркеров. 0 — параллельность выключена.
    pub fn plan(
        indexes: &[Arc<dyn IndexRelation>],
        request: WorkerRequest,
        cfg: &VacuumConfig,
        system_cap: usize,
    ) -> ParallelPlan {
        let mut plan = ParallelPlan {
            will_parallel: vec![false; indexes.len()],
            ..Default::default()
        };
        let disabled = matches!(request, WorkerRequest::Disabled | WorkerRequest::Exactly(0));
        if disabled || indexes.len() < 2 || cfg.max_parallel_maintenance_workers == 0 || system_cap == 0 {
            return plan;
        }

        for (i, idx) in indexes.iter().enumerate() {
            let caps = idx.capabilities();
            let no_parallel =
                !caps.parallel_bulk_delete && caps.parallel_cleanup == CleanupParallelism::Never;
            if no_parallel || idx.num_pages() < cfg.min_parallel_index_pages {
                continue;
            }
            plan.will_parallel[i] = true;
            if caps.parallel_bulk_delete {
                plan.nindexes_parallel_bulkdel += 1;
            }
            if caps.parallel_cleanup != CleanupParallelism::Never {
                plan.nindexes_parallel_cleanup += 1;
            }
            if caps.uses_maintenance_work_mem {
                plan.nindexes_mwm += 1;
            }
        }

        // лидер обрабатывает один индекс сам
        let nparallel = plan
            .nindexes_parallel_bulkdel
            .max(plan.nindexes_parallel_cleanup)
            .saturating_sub(1);
        if nparallel == 0 {
            return plan;
        }
        let wanted = match request {
            WorkerRequest::Exactly(n) => n.min(nparallel),
            _ => nparallel,
        };
        plan.nworkers = wanted
            .min(cfg.max_parallel_maintenance_workers)
            .min(system_cap);
        plan
    }

    /// Выделить общий регион. None, если план не предполагает воркеров.
    pub fn allocate(
        plan: ParallelPlan,
        indexes: &[Arc<dyn IndexRelation>],
        relid: RelId,
        elevel: Level,
        cfg: &VacuumConfig,
    ) -> Option<Self> {
        if plan.nworkers == 0 {
            return None;
        }
        let mwm_kb = cfg.maintenance_work_mem_kb;
        let worker_mem_kb = if plan.nindexes_mwm > 0 {
            mwm_kb / plan.nworkers.min(plan.nindexes_mwm)
        } else {
            mwm_kb
        };
        let caps = indexes.iter().map(|i| i.capabilities()).collect();
        let shared = SharedRunState::new(relid, indexes.len(), elevel, worker_mem_kb);
        debug!(
            "parallel vacuum: relid={} workers={} indexes={} worker_mem_kb={}",
            relid,
            plan.nworkers,
            indexes.len(),
            worker_mem_kb
        );
        Some(Self {
            plan,
            caps,
            shared,
            mwm_kb,
        })
    }

    pub fn nworkers(&self) -> usize {
        self.plan.nworkers
    }

    pub fn plan_ref(&self) -> &ParallelPlan {
        &self.plan
    }

    pub fn shared(&self) -> &SharedRunState {
        &self.shared
    }

    /// Может ли индекс `i` обрабатываться воркером в этой фазе.
    pub fn is_parallel_safe(&self, i: usize, phase: IndexPhase, num_index_scans: u32) -> bool {
        if !self.plan.will_parallel.get(i).copied().unwrap_or(false) {
            return false;
        }
        let caps = self.caps[i];
        match phase {
            IndexPhase::BulkDelete => caps.parallel_bulk_delete,
            IndexPhase::Cleanup => match caps.parallel_cleanup {
                CleanupParallelism::Never => false,
                CleanupParallelism::IfNoBulkDelete => num_index_scans == 0,
                CleanupParallelism::Always => true,
            },
        }
    }

    /// Выполнить фазу над всеми индексами. `istats` — вход (прошлый раунд) и выход.
    /// Возвращает число реально запущенных воркеров.
    #[allow(clippy::too_many_arguments)]
    pub fn run_phase(
        &mut self,
        phase: IndexPhase,
        num_index_scans: u32,
        indexes: &[Arc<dyn IndexRelation>],
        istats: &mut [Option<IndexBulkDeleteResult>],
        info: IndexVacuumInfo,
        dead: &DeadRowStore,
        io: &mut VacuumIo,
        launcher: &dyn WorkerLauncher,
    ) -> Result<usize> {
        let n = indexes.len();
        let safe: Vec<bool> = (0..n)
            .map(|i| self.is_parallel_safe(i, phase, num_index_scans))
            .collect();
        let nsafe = safe.iter().filter(|s| **s).count();
        let nworkers = self.plan.nworkers.min(nsafe.saturating_sub(1));

        self.shared
            .begin_phase(phase, num_index_scans == 0, info.num_heap_tuples, info.estimated_count);
        let elevel = self.shared.elevel;
        let leader_info = IndexVacuumInfo {
            work_mem_kb: self.mwm_kb,
            ..info
        };

        let mut launched = 0usize;
        if nsafe > 0 {
            let shared = &self.shared;
            let cost = shared.cost().clone();
            let worker_info = IndexVacuumInfo {
                work_mem_kb: shared.worker_mem_kb,
                ..info
            };
            let prior: &[Option<IndexBulkDeleteResult>] = istats;
            let template = io.fork();

            io.throttle_mut().attach_shared(cost.clone());

            let worker = |w: usize| -> Result<IoUsage> {
                let mut wio = template.fork();
                wio.throttle_mut().attach_shared(cost.clone());
                let res = claim_loop(shared, &safe, indexes, prior, &worker_info, dead, &mut wio);
                wio.throttle_mut().detach_shared(false);
                res?;
                debug!("parallel vacuum worker {} done ({})", w, phase.as_str());
                Ok(wio.usage())
            };
            let mut leader = || claim_loop(shared, &safe, indexes, prior, &leader_info, dead, io);

            let report = launcher.launch(nworkers, &worker, &mut leader);
            io.throttle_mut().detach_shared(true);
            let report = report?;

            launched = report.launched;
            for r in report.results {
                let usage = r?;
                io.add_usage(&usage);
            }
            record_parallel_workers_launched(launched as u64);
            if nworkers > 0 {
                log!(
                    elevel,
                    "launched {} parallel vacuum workers for index {} (planned: {})",
                    launched,
                    phase.as_str(),
                    nworkers
                );
            }
            if launched < nworkers {
                warn!(
                    "only {} of {} planned parallel vacuum workers were launched",
                    launched, nworkers
                );
            }
        }

        // слоты с битом — готовые результаты; остальное (небезопасные индексы и то,
        // что никто не дописал) лидер делает сам
        let merged = self.shared.merge();
        for i in 0..n {
            if safe[i] {
                if let Some(r) = merged[i] {
                    istats[i] = r.stats;
                    continue;
                }
            }
            io.check_cancel()?;
            istats[i] = process_index(
                phase,
                indexes[i].as_ref(),
                &leader_info,
                istats[i],
                dead,
                io,
                elevel,
            )?;
        }
        Ok(launched)
    }
}

fn claim_loop(
    shared: &SharedRunState,
    safe: &[bool],
    indexes: &[Arc<dyn IndexRelation>],
    prior: &[Option<IndexBulkDeleteResult>],
    info: &IndexVacuumInfo,
    dead: &DeadRowStore,
    io: &mut VacuumIo,
) -> Result<()> {
    while let Some(i) = shared.claim_next() {
        if !safe[i] {
            continue;
        }
        io.check_cancel()?;
        let stats = process_index(
            shared.phase(),
            indexes[i].as_ref(),
            info,
            prior[i],
            dead,
            io,
            shared.elevel,
        )?;
        shared.report_result(i, PerIndexResult { stats })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_write_once_per_phase() {
        let mut s = SharedRunState::new(1, 3, Level::Debug, 1024);
        assert_eq!(s.claim_next(), Some(0));
        assert_eq!(s.claim_next(), Some(1));
        assert_eq!(s.claim_next(), Some(2));
        assert_eq!(s.claim_next(), None);

        assert!(s.result(1).is_none());
        s.report_result(1, PerIndexResult::default()).unwrap();
        assert!(s.is_updated(1));
        assert!(s.report_result(1, PerIndexResult::default()).is_err());
        assert!(s.report_result(7, PerIndexResult::default()).is_err());

        let m = s.merge();
        assert_eq!(m.iter().filter(|r| r.is_some()).count(), 1);

        s.begin_phase(IndexPhase::Cleanup, false, 10.0, false);
        assert!(!s.is_updated(1));
        assert_eq!(s.claim_next(), Some(0));
        assert_eq!(s.phase(), IndexPhase::Cleanup);
    }
}
