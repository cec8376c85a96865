//! vacuum/prune — обработка одной страницы кучи при сканировании.
//!
//! prune_and_freeze(): мёртвые версии превращаются в LP_DEAD (хранилище освобождено, слот
//! ждёт очистки индексов), оставшиеся версии старше freeze_limit замораживаются. Заодно
//! считаются строки и вычисляются флаги all_visible/all_frozen для карты видимости.

use crate::access::tuple::{HeapPage, ItemSlot, RowHeader, SlotNumber};
use crate::access::visibility::{satisfies_vacuum, visible_to_all, VacuumVisibility, XidStatus};
use crate::access::TransactionOracle;
use crate::xid::TransactionId;

use super::cutoffs::Cutoffs;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneResult {
    /// LP_DEAD слоты страницы (новые и оставшиеся от прошлых запусков).
    pub dead_slots: Vec<SlotNumber>,
    /// Версии, ставшие мёртвыми в этом проходе.
    pub tuples_deleted: u64,
    /// Оставшиеся версии (живые, недавно удалённые, в процессе).
    pub num_tuples: u64,
    pub live_tuples: u64,
    pub recently_dead: u64,
    /// Мёртвые версии, которые не удалось убрать (страница без cleanup-блокировки).
    pub missed_dead: u64,
    pub nfrozen: u64,
    pub all_visible: bool,
    pub all_frozen: bool,
    /// На странице остались строки: её нельзя отрезать усечением.
    pub has_rows: bool,
    pub modified: bool,
}

/// Заморозить заголовок по cutoffs. true — что-то изменилось.
pub fn freeze_row(h: &mut RowHeader, cutoffs: &Cutoffs, xact: &dyn TransactionOracle) -> bool {
    let mut changed = false;
    if !h.is_frozen()
        && h.xmin.is_normal()
        && h.xmin.precedes(cutoffs.freeze_limit)
        && xact.status(h.xmin) == XidStatus::Committed
    {
        h.xmin = TransactionId::FROZEN;
        changed = true;
    }
    if h.xmax.is_normal()
        && h.xmax.precedes(cutoffs.freeze_limit)
        && xact.status(h.xmax) == XidStatus::Aborted
    {
        h.xmax = TransactionId::INVALID;
        changed = true;
    }
    if let Some(m) = h.lock_multi {
        if m.precedes(cutoffs.multi_cutoff) {
            h.lock_multi = None;
            changed = true;
        }
    }
    changed
}

/// Понадобится ли строке заморозка когда-нибудь.
pub fn needs_eventual_freeze(h: &RowHeader) -> bool {
    (!h.is_frozen() && h.xmin.is_normal()) || h.xmax.is_valid() || h.lock_multi.is_some()
}

/// Есть ли на странице версии, которые надо заморозить сейчас.
pub fn page_needs_freeze(page: &HeapPage, cutoffs: &Cutoffs) -> bool {
    page.rows().any(|(_, r)| {
        let h = &r.header;
        (!h.is_frozen() && h.xmin.is_normal() && h.xmin.precedes(cutoffs.freeze_limit))
            || (h.xmax.is_normal() && h.xmax.precedes(cutoffs.freeze_limit))
            || h.lock_multi.map_or(false, |m| m.precedes(cutoffs.multi_cutoff))
    })
}

pub fn prune_and_freeze(
    page: &mut HeapPage,
    cutoffs: &Cutoffs,
    xact: &dyn TransactionOracle,
) -> PruneResult {
    let mut res = PruneResult {
        all_visible: true,
        all_frozen: true,
        ..Default::default()
    };

    for (i, slot) in page.slots.iter_mut().enumerate() {
        let kill = match slot {
            ItemSlot::Unused => false,
            ItemSlot::Dead => {
                res.dead_slots.push(i as SlotNumber);
                false
            }
            ItemSlot::Normal(row) => {
                let verdict = satisfies_vacuum(&row.header, cutoffs.oldest_xmin, xact);
                match verdict {
                    VacuumVisibility::Dead => true,
                    VacuumVisibility::Live => {
                        res.live_tuples += 1;
                        if !visible_to_all(&row.header, cutoffs.oldest_xmin, xact) {
                            res.all_visible = false;
                        }
                        false
                    }
                    VacuumVisibility::RecentlyDead => {
                        res.recently_dead += 1;
                        res.all_visible = false;
                        false
                    }
                    VacuumVisibility::InsertInProgress => {
                        res.all_visible = false;
                        false
                    }
                    VacuumVisibility::DeleteInProgress => {
                        res.live_tuples += 1;
                        res.all_visible = false;
                        false
                    }
                }
            }
        };

        if kill {
            *slot = ItemSlot::Dead;
            res.dead_slots.push(i as SlotNumber);
            res.tuples_deleted += 1;
            res.modified = true;
            continue;
        }

        if let ItemSlot::Normal(row) = slot {
            res.num_tuples += 1;
            res.has_rows = true;
            if freeze_row(&mut row.header, cutoffs, xact) {
                res.nfrozen += 1;
                res.modified = true;
            }
            if needs_eventual_freeze(&row.header) {
                res.all_frozen = false;
            }
        }
    }

    if !res.dead_slots.is_empty() {
        res.all_visible = false;
    }
    if !res.all_visible {
        res.all_frozen = false;
    }
    res
}

/// Подсчёт строк без изменения страницы (cleanup-блокировка недоступна).
pub fn count_rows(page: &HeapPage, cutoffs: &Cutoffs, xact: &dyn TransactionOracle) -> PruneResult {
    let mut res = PruneResult::default();
    for (_, row) in page.rows() {
        res.has_rows = true;
        match satisfies_vacuum(&row.header, cutoffs.oldest_xmin, xact) {
            VacuumVisibility::Dead => {
                res.missed_dead += 1;
                continue;
            }
            VacuumVisibility::Live | VacuumVisibility::DeleteInProgress => res.live_tuples += 1,
            VacuumVisibility::RecentlyDead => res.recently_dead += 1,
            VacuumVisibility::InsertInProgress => {}
        }
        res.num_tuples += 1;
    }
    if page.has_dead_items() {
        res.has_rows = true;
    }
    res
}

/// Вторая фаза: пометить LP_DEAD слоты свободными. Возвращает число освобождённых.
pub fn reclaim_dead_slots(page: &mut HeapPage, slots: &[SlotNumber]) -> usize {
    let mut n = 0;
    for &s in slots {
        if let Some(slot) = page.slots.get_mut(s as usize) {
            if matches!(slot, ItemSlot::Dead) {
                *slot = ItemSlot::Unused;
                n += 1;
            }
        }
    }
    n
}

/// Все ли оставшиеся строки видны всем и заморожены (после освобождения слотов).
pub fn page_visibility(
    page: &HeapPage,
    cutoffs: &Cutoffs,
    xact: &dyn TransactionOracle,
) -> (bool, bool) {
    if page.has_dead_items() {
        return (false, false);
    }
    let mut all_visible = true;
    let mut all_frozen = true;
    for (_, row) in page.rows() {
        if !visible_to_all(&row.header, cutoffs.oldest_xmin, xact) {
            all_visible = false;
            all_frozen = false;
            break;
        }
        if needs_eventual_freeze(&row.header) {
            all_frozen = false;
        }
    }
    (all_visible, all_frozen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tuple::{Datum, HeapRow};
    use crate::xid::MultiXactId;

    struct Xact;

    impl TransactionOracle for Xact {
        fn next_xid(&self) -> TransactionId {
            TransactionId(1000)
        }
        fn oldest_running_xid(&self) -> TransactionId {
            TransactionId(900)
        }
        fn next_multi(&self) -> MultiXactId {
            MultiXactId(5)
        }
        fn oldest_running_multi(&self) -> MultiXactId {
            MultiXactId(5)
        }
        fn status(&self, xid: TransactionId) -> XidStatus {
            match xid.0 {
                666 => XidStatus::Aborted,
                x if x >= 900 => XidStatus::InProgress,
                _ => XidStatus::Committed,
            }
        }
    }

    fn cutoffs() -> Cutoffs {
        Cutoffs {
            oldest_xmin: TransactionId(900),
            oldest_mxact: MultiXactId(5),
            freeze_limit: TransactionId(500),
            multi_cutoff: MultiXactId(5),
            xid_full_scan_limit: TransactionId(3),
            mxact_full_scan_limit: MultiXactId(1),
            aggressive: false,
        }
    }

    fn row(xmin: u32, xmax: u32) -> ItemSlot {
        ItemSlot::Normal(HeapRow {
            header: RowHeader {
                xmin: TransactionId(xmin),
                xmax: TransactionId(xmax),
                lock_multi: None,
            },
            values: vec![Datum::Int(1)],
        })
    }

    #[test]
    fn prune_marks_dead_and_freezes_old_rows() {
        let mut page = HeapPage::new(vec![
            row(100, 0),   // живая, старше freeze_limit -> заморозка
            row(100, 200), // удалена давно -> dead
            row(600, 0),   // живая, но моложе freeze_limit
            row(100, 950), // удаление в процессе
            row(666, 0),   // вставка откатилась -> dead
            ItemSlot::Dead,
            ItemSlot::Unused,
        ]);
        let res = prune_and_freeze(&mut page, &cutoffs(), &Xact);
        assert_eq!(res.tuples_deleted, 2);
        assert_eq!(res.dead_slots, vec![1, 4, 5]);
        assert_eq!(res.num_tuples, 3);
        assert_eq!(res.live_tuples, 3);
        // строки 0 и 3 (xmin 100 < freeze_limit)
        assert_eq!(res.nfrozen, 2);
        assert!(!res.all_visible);
        assert!(res.has_rows);

        match &page.slots[0] {
            ItemSlot::Normal(r) => assert!(r.header.is_frozen()),
            other => panic!("unexpected slot {:?}", other),
        }
        assert_eq!(page.slots[1], ItemSlot::Dead);

        assert_eq!(reclaim_dead_slots(&mut page, &res.dead_slots), 3);
        assert!(!page.has_dead_items());
    }

    #[test]
    fn clean_page_is_all_visible() {
        let mut page = HeapPage::new(vec![row(100, 0), row(600, 0)]);
        let res = prune_and_freeze(&mut page, &cutoffs(), &Xact);
        assert!(res.all_visible);
        // строка 600 не заморожена
        assert!(!res.all_frozen);

        let mut frozen = HeapPage::new(vec![row(100, 0)]);
        let res = prune_and_freeze(&mut frozen, &cutoffs(), &Xact);
        assert!(res.all_visible && res.all_frozen);
        assert_eq!(page_visibility(&frozen, &cutoffs(), &Xact), (true, true));
    }
}
