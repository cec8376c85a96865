//! analyze/sampler — двухступенчатая выборка строк.
//!
//! 1) BlockSampler (Knuth, Algorithm S) выбирает до `target` страниц из N без повторов, по
//!    возрастанию номера.
//! 2) Reservoir (Vitter, Algorithm X для первых ~22·n строк, дальше Algorithm Z) держит
//!    равномерную выборку из `target` строк по потоку неизвестной длины. Случайный шаг
//!    пропуска считается один раз на принятую строку, а не монетка на каждую.
//!
//! Итоговое число строк экстраполируется по плотности на выбранных страницах.

use anyhow::{Context, Result};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::access::tuple::{HeapRow, ItemPointer, PageNumber};
use crate::access::visibility::{satisfies_vacuum, VacuumVisibility};
use crate::access::{HeapRelation, TransactionOracle};
use crate::consts::VITTER_Z_THRESHOLD;
use crate::vacuum::io::VacuumIo;
use crate::xid::TransactionId;

/// Случайное число в (0, 1): ноль недопустим под логарифмом.
fn random_fract<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(f64::MIN_POSITIVE..1.0)
}

/// Генератор для выборки: фиксированный seed — воспроизводимый результат.
pub fn sampler_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

// ---------- Algorithm S ----------

#[derive(Debug, Clone)]
pub struct BlockSampler {
    /// Всего страниц.
    n: PageNumber,
    /// Сколько выбрать.
    k: usize,
    /// Страниц просмотрено.
    t: PageNumber,
    /// Страниц выбрано.
    m: usize,
}

impl BlockSampler {
    pub fn new(nblocks: PageNumber, samplesize: usize) -> Self {
        Self {
            n: nblocks,
            k: samplesize,
            t: 0,
            m: 0,
        }
    }

    pub fn has_more(&self) -> bool {
        self.t < self.n && self.m < self.k
    }

    /// Выбрано страниц на данный момент.
    pub fn selected(&self) -> usize {
        self.m
    }

    pub fn next<R: Rng + ?Sized>(&mut self, rng: &mut R) -> PageNumber {
        let big_k = (self.n - self.t) as f64;
        let k = (self.k - self.m) as f64;
        if k >= big_k {
            // нужно взять все оставшиеся
            self.m += 1;
            let b = self.t;
            self.t += 1;
            return b;
        }
        let mut remaining = big_k;
        let mut p = 1.0 - k / remaining;
        let v = random_fract(rng);
        while v < p {
            self.t += 1;
            remaining -= 1.0;
            p *= 1.0 - k / remaining;
        }
        self.m += 1;
        let b = self.t;
        self.t += 1;
        b
    }
}

// ---------- Algorithms X / Z ----------

/// Состояние генератора пропусков (W из Algorithm Z).
#[derive(Debug, Clone, Copy)]
pub struct ReservoirState {
    w: f64,
}

impl ReservoirState {
    pub fn new<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Self {
        Self {
            w: (-random_fract(rng).ln() / n as f64).exp(),
        }
    }

    /// Сколько следующих строк пропустить. `t` — строк уже просмотрено, `n` — размер выборки.
    pub fn next_skip<R: Rng + ?Sized>(&mut self, mut t: f64, n: usize, rng: &mut R) -> f64 {
        let nf = n as f64;
        let mut s = 0.0;

        if t <= VITTER_Z_THRESHOLD * nf {
            // Algorithm X
            let v = random_fract(rng);
            t += 1.0;
            let mut quot = (t - nf) / t;
            while quot > v {
                s += 1.0;
                t += 1.0;
                quot *= (t - nf) / t;
            }
            return s;
        }

        // Algorithm Z
        let mut w = self.w;
        let term = t - nf + 1.0;
        loop {
            let u = random_fract(rng);
            let x = t * (w - 1.0);
            s = x.floor();
            let tmp = (t + 1.0) / term;
            let lhs = (((u * tmp * tmp) * (term + s)) / (t + x)).ln() / nf;
            let lhs = lhs.exp();
            let rhs = (((t + x) / (term + s)) * term) / t;
            if lhs <= rhs {
                w = rhs / lhs;
                break;
            }
            let mut y = (((u * (t + 1.0)) / term) * (t + s + 1.0)) / (t + x);
            let (mut denom, numer_lim) = if nf < s {
                (t, term + s)
            } else {
                (t - nf + s, t + 1.0)
            };
            let mut numer = t + s;
            while numer >= numer_lim {
                y *= numer / denom;
                denom -= 1.0;
                numer -= 1.0;
            }
            w = (-random_fract(rng).ln() / nf).exp();
            if (y.ln() / nf).exp() <= (t + x) / t {
                break;
            }
        }
        self.w = w;
        s
    }
}

/// Равномерная выборка фиксированного размера из потока.
#[derive(Debug, Clone)]
pub struct Reservoir<T> {
    target: usize,
    items: Vec<T>,
    seen: f64,
    skip: f64,
    state: ReservoirState,
}

impl<T> Reservoir<T> {
    pub fn new<R: Rng + ?Sized>(target: usize, rng: &mut R) -> Self {
        Self {
            target,
            items: Vec::with_capacity(target),
            seen: 0.0,
            skip: -1.0,
            state: ReservoirState::new(target.max(1), rng),
        }
    }

    /// Предложить элемент. true — принят (добавлен или вытеснил случайный).
    pub fn offer<R: Rng + ?Sized>(&mut self, item: T, rng: &mut R) -> bool {
        let accepted = if self.items.len() < self.target {
            self.items.push(item);
            true
        } else if self.target == 0 {
            false
        } else {
            if self.skip < 0.0 {
                self.skip = self.state.next_skip(self.seen, self.target, rng);
            }
            let take = self.skip <= 0.0;
            if take {
                let k = (self.target as f64 * random_fract(rng)) as usize;
                self.items[k.min(self.target - 1)] = item;
            }
            self.skip -= 1.0;
            take
        };
        self.seen += 1.0;
        accepted
    }

    /// Выборка переполнялась (были вытеснения/пропуски).
    pub fn overflowed(&self) -> bool {
        self.seen > self.target as f64
    }

    pub fn seen(&self) -> u64 {
        self.seen as u64
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

// ---------- выборка строк кучи ----------

#[derive(Debug, Clone, Default)]
pub struct SampleResult {
    /// Выборка, по возрастанию адреса строки.
    pub rows: Vec<(ItemPointer, HeapRow)>,
    pub live_rows: f64,
    pub dead_rows: f64,
    pub total_rows: f64,
    pub total_dead_rows: f64,
    pub pages_sampled: usize,
    pub total_pages: PageNumber,
}

/// Собрать до `target` строк. Живые (и удаляемые в процессе) строки попадают в выборку,
/// мёртвые и недавно удалённые только считаются.
pub fn acquire_sample_rows<R: Rng + ?Sized>(
    heap: &dyn HeapRelation,
    target: usize,
    oldest_xmin: TransactionId,
    xact: &dyn TransactionOracle,
    io: &mut VacuumIo,
    rng: &mut R,
) -> Result<SampleResult> {
    let total_pages = heap.num_pages();
    let mut blocks = BlockSampler::new(total_pages, target);
    let mut reservoir: Reservoir<(ItemPointer, HeapRow)> = Reservoir::new(target, rng);
    let mut live = 0.0;
    let mut dead = 0.0;

    while blocks.has_more() {
        let blkno = blocks.next(rng);
        io.page_access(heap.relid(), blkno, false)?;
        let page = heap
            .read_page(blkno)
            .with_context(|| format!("while sampling block {} of relation \"{}\"", blkno, heap.name()))?;
        for (slot, row) in page.rows() {
            let sample_it = match satisfies_vacuum(&row.header, oldest_xmin, xact) {
                VacuumVisibility::Live | VacuumVisibility::DeleteInProgress => {
                    live += 1.0;
                    true
                }
                VacuumVisibility::Dead | VacuumVisibility::RecentlyDead => {
                    dead += 1.0;
                    false
                }
                VacuumVisibility::InsertInProgress => false,
            };
            if sample_it {
                reservoir.offer((ItemPointer::new(blkno, slot), row.clone()), rng);
            }
        }
    }

    let pages_sampled = blocks.selected();
    let overflowed = reservoir.overflowed();
    let seen = reservoir.seen();
    let mut rows = reservoir.into_items();
    if overflowed {
        // корреляция считается по физическому порядку
        rows.sort_by_key(|(tid, _)| *tid);
    }

    let (total_rows, total_dead_rows) = if pages_sampled > 0 {
        let scale = total_pages as f64 / pages_sampled as f64;
        ((live * scale + 0.5).floor(), (dead * scale + 0.5).floor())
    } else {
        (0.0, 0.0)
    };

    debug!(
        "\"{}\": scanned {} of {} pages, containing {:.0} live rows and {:.0} dead rows; {} rows in sample (of {} seen), {:.0} estimated total rows",
        heap.name(),
        pages_sampled,
        total_pages,
        live,
        dead,
        rows.len(),
        seen,
        total_rows
    );

    Ok(SampleResult {
        rows,
        live_rows: live,
        dead_rows: dead,
        total_rows,
        total_dead_rows,
        pages_sampled,
        total_pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sampler_picks_distinct_ascending() {
        let mut rng = sampler_rng(Some(7));
        let mut bs = BlockSampler::new(1000, 30);
        let mut got = Vec::new();
        while bs.has_more() {
            got.push(bs.next(&mut rng));
        }
        assert_eq!(got.len(), 30);
        assert!(got.windows(2).all(|w| w[0] < w[1]));
        assert!(got.iter().all(|&b| b < 1000));
    }

    #[test]
    fn block_sampler_takes_all_when_small() {
        let mut rng = sampler_rng(Some(1));
        let mut bs = BlockSampler::new(5, 30);
        let mut got = Vec::new();
        while bs.has_more() {
            got.push(bs.next(&mut rng));
        }
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn reservoir_keeps_exact_size() {
        let mut rng = sampler_rng(Some(42));
        let mut r = Reservoir::new(100, &mut rng);
        for i in 0..100_000u32 {
            r.offer(i, &mut rng);
        }
        assert_eq!(r.len(), 100);
        assert!(r.overflowed());
        let mut items = r.into_items();
        items.sort_unstable();
        items.dedup();
        assert_eq!(items.len(), 100);
    }

    #[test]
    fn reservoir_short_stream() {
        let mut rng = sampler_rng(Some(3));
        let mut r = Reservoir::new(10, &mut rng);
        for i in 0..4u32 {
            assert!(r.offer(i, &mut rng));
        }
        assert!(!r.overflowed());
        assert_eq!(r.into_items(), vec![0, 1, 2, 3]);
    }
}
