//! vacuum/index — bulk-delete и cleanup одного индекса.
//!
//! Общая точка для последовательного пути (лидер) и параллельного (воркеры через
//! ParallelCoordinator).

use anyhow::{Context, Result};
use log::{log, Level};

use crate::access::{IndexBulkDeleteResult, IndexRelation, IndexVacuumInfo};
use crate::metrics::{record_index_bulk_delete, record_index_cleanup};

use super::dead_rows::DeadRowStore;
use super::io::VacuumIo;

/// Фаза обработки индексов.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexPhase {
    BulkDelete,
    Cleanup,
}

impl IndexPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexPhase::BulkDelete => "vacuuming",
            IndexPhase::Cleanup => "cleaning up",
        }
    }
}

pub fn bulk_delete_one(
    index: &dyn IndexRelation,
    info: &IndexVacuumInfo,
    istat: Option<IndexBulkDeleteResult>,
    dead: &DeadRowStore,
    io: &mut VacuumIo,
    elevel: Level,
) -> Result<IndexBulkDeleteResult> {
    let res = index
        .bulk_delete(info, istat, dead, io)
        .with_context(|| format!("while vacuuming index \"{}\"", index.name()))?;
    record_index_bulk_delete();
    log!(
        elevel,
        "scanned index \"{}\" to remove {} row versions",
        index.name(),
        dead.len()
    );
    Ok(res)
}

pub fn cleanup_one(
    index: &dyn IndexRelation,
    info: &IndexVacuumInfo,
    istat: Option<IndexBulkDeleteResult>,
    io: &mut VacuumIo,
    elevel: Level,
) -> Result<Option<IndexBulkDeleteResult>> {
    let res = index
        .vacuum_cleanup(info, istat, io)
        .with_context(|| format!("while cleaning up index \"{}\"", index.name()))?;
    record_index_cleanup();
    if let Some(r) = &res {
        log!(
            elevel,
            "index \"{}\" now contains {:.0} row versions in {} pages ({} removed, {} deleted pages, {} reusable)",
            index.name(),
            r.num_index_tuples,
            r.num_pages,
            r.tuples_removed,
            r.pages_deleted,
            r.pages_free
        );
    }
    Ok(res)
}

/// Обработать индекс в заданной фазе.
pub fn process_index(
    phase: IndexPhase,
    index: &dyn IndexRelation,
    info: &IndexVacuumInfo,
    istat: Option<IndexBulkDeleteResult>,
    dead: &DeadRowStore,
    io: &mut VacuumIo,
    elevel: Level,
) -> Result<Option<IndexBulkDeleteResult>> {
    match phase {
        IndexPhase::BulkDelete => bulk_delete_one(index, info, istat, dead, io, elevel).map(Some),
        IndexPhase::Cleanup => cleanup_one(index, info, istat, io, elevel),
    }
}
