//! analyze/typanalyze — вычисление статистики колонки по выборке.
//!
//! Анализатор выбирается один раз на колонку до выборки (analyzer_for):
//! - ScalarAnalyzer   — сортируемые типы (bool/int/float/text): MCV, гистограмма, корреляция
//! - DistinctAnalyzer — только равенство (composite): хеши XxHash64 + MCV
//! - ArrayAnalyzer    — массивы: MCELEM и гистограмма числа различных элементов
//! Пользовательские типы приносят свой TypeAnalyzer через ColumnDef::custom_analyzer.
//! Анализатор, не выставивший stats_valid, просто ничего не сохраняет.

use anyhow::Result;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;

use crate::access::tuple::{ColumnDef, ColumnType, Datum, HeapRow};
use crate::consts::{ROWS_PER_STAT_TARGET, WIDTH_THRESHOLD};

use super::stats::{AttributeStatistics, StatKind, StatOperator, StatSlot};

/// Доступ к значениям одной колонки в выборке.
pub struct ColumnSample<'a> {
    rows: &'a [HeapRow],
    attnum: usize,
}

static NULL_DATUM: Datum = Datum::Null;

impl<'a> ColumnSample<'a> {
    pub fn new(rows: &'a [HeapRow], attnum: usize) -> Self {
        Self { rows, attnum }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Значение i-й строки выборки; отсутствующая колонка читается как NULL.
    pub fn value(&self, i: usize) -> &'a Datum {
        self.rows
            .get(i)
            .and_then(|r| r.values.get(self.attnum))
            .unwrap_or(&NULL_DATUM)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Datum> + '_ {
        (0..self.rows.len()).map(move |i| self.value(i))
    }
}

pub trait TypeAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Сколько строк выборки нужно для заданного statistics target.
    fn min_rows(&self, stat_target: u32) -> usize {
        ROWS_PER_STAT_TARGET * stat_target as usize
    }

    /// Заполнить `stats`. Не выставленный stats_valid означает отказ (это не ошибка).
    fn compute(
        &self,
        stats: &mut AttributeStatistics,
        sample: &ColumnSample<'_>,
        total_rows: f64,
    ) -> Result<()>;
}

/// Анализатор по типу колонки.
pub fn analyzer_for(col: &ColumnDef) -> Arc<dyn TypeAnalyzer> {
    if let Some(a) = &col.custom_analyzer {
        return a.clone();
    }
    match &col.ty {
        ColumnType::Bool | ColumnType::Int | ColumnType::Float | ColumnType::Text => {
            Arc::new(ScalarAnalyzer)
        }
        ColumnType::Array(_) => Arc::new(ArrayAnalyzer),
        ColumnType::Composite => Arc::new(DistinctAnalyzer),
        ColumnType::Custom(_) => Arc::new(NoStatsAnalyzer),
    }
}

// ---------- общие оценки ----------

/// Базовые счётчики: null, средняя ширина, непустые значения (с номерами строк).
struct BasicCounts<'a> {
    nulls: usize,
    total_width: f64,
    values: Vec<(usize, &'a Datum)>,
    too_wide: usize,
}

fn basic_counts<'a>(sample: &ColumnSample<'a>) -> BasicCounts<'a> {
    let mut c = BasicCounts {
        nulls: 0,
        total_width: 0.0,
        values: Vec::with_capacity(sample.len()),
        too_wide: 0,
    };
    for (i, v) in sample.iter().enumerate() {
        if v.is_null() {
            c.nulls += 1;
            continue;
        }
        let w = v.width();
        c.total_width += w as f64;
        if w > WIDTH_THRESHOLD {
            // слишком широкие значения не участвуют в MCV/гистограмме
            c.too_wide += 1;
            continue;
        }
        c.values.push((i, v));
    }
    c
}

fn set_basic(stats: &mut AttributeStatistics, sample_rows: usize, c: &BasicCounts<'_>) {
    let nonnull = sample_rows - c.nulls;
    stats.stats_valid = true;
    stats.null_frac = c.nulls as f64 / sample_rows as f64;
    stats.avg_width = if nonnull > 0 {
        c.total_width / nonnull as f64
    } else {
        0.0
    };
}

/// Оценка числа различных значений (Haas–Stokes Duj1).
///
/// `ndistinct` — различных в выборке, `nmultiple` — из них встреченных более одного раза,
/// `nonnull` — непустых строк в выборке. Результат > 0 — абсолютное число, < 0 — доля от
/// числа строк (когда различных, похоже, пропорционально строкам).
pub fn estimate_distinct(
    ndistinct: usize,
    nmultiple: usize,
    nonnull: usize,
    too_wide: usize,
    total_rows: f64,
    null_frac: f64,
) -> f64 {
    if nonnull == 0 || total_rows <= 0.0 {
        return 0.0;
    }
    if nmultiple == 0 {
        // все значения уникальны
        return -(1.0 - null_frac);
    }
    if too_wide == 0 && nmultiple == ndistinct {
        // каждое значение встречено несколько раз — скорее всего, видели все
        return ndistinct as f64;
    }
    let f1 = (ndistinct - nmultiple + too_wide) as f64;
    let d = f1 + nmultiple as f64;
    let n = nonnull as f64;
    let big_n = total_rows * (1.0 - null_frac);
    let denom = (n - f1) + f1 * n / big_n.max(n);
    let mut est = if denom > 0.0 { n * d / denom } else { d };
    est = est.clamp(d, big_n.max(d));
    est = (est + 0.5).floor();
    if est > 0.1 * total_rows {
        -(est / total_rows)
    } else {
        est
    }
}

/// Отбор MCV: группы (значение, частота в выборке) по убыванию частоты.
///
/// Если все различные значения поместились в список и оценка конечна — берутся все.
/// Иначе только заметно более частые, чем в среднем (count ≥ 1.25 × среднее, не меньше 2).
fn choose_mcv<T: Clone>(
    groups: &[(T, usize)],
    nonnull: usize,
    ndistinct: usize,
    n_distinct_est: f64,
    limit: usize,
) -> Vec<(T, usize)> {
    let mut sorted: Vec<(T, usize)> = groups.to_vec();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    if sorted.len() == ndistinct && n_distinct_est > 0.0 && ndistinct <= limit {
        return sorted;
    }
    let avg = nonnull as f64 / ndistinct.max(1) as f64;
    let min_count = (avg * 1.25).max(2.0);
    sorted
        .into_iter()
        .take(limit)
        .filter(|(_, c)| *c as f64 >= min_count)
        .collect()
}

/// Равномерно выбрать `n` точек из отсортированного набора (включая оба конца).
fn equi_depth<T: Clone>(sorted: &[T], n: usize) -> Vec<T> {
    if sorted.len() < 2 || n < 2 {
        return Vec::new();
    }
    let n = n.min(sorted.len());
    let last = sorted.len() - 1;
    (0..n).map(|i| sorted[i * last / (n - 1)].clone()).collect()
}

// ---------- scalar ----------

pub struct ScalarAnalyzer;

impl TypeAnalyzer for ScalarAnalyzer {
    fn name(&self) -> &str {
        "scalar"
    }

    fn compute(
        &self,
        stats: &mut AttributeStatistics,
        sample: &ColumnSample<'_>,
        total_rows: f64,
    ) -> Result<()> {
        let n = sample.len();
        if n == 0 {
            return Ok(());
        }
        let mut c = basic_counts(sample);
        set_basic(stats, n, &c);
        let nonnull = n - c.nulls;
        if c.values.is_empty() {
            stats.n_distinct = if nonnull == 0 { 0.0 } else { -(1.0 - stats.null_frac) };
            return Ok(());
        }

        c.values.sort_by(|a, b| a.1.total_cmp(b.1).then(a.0.cmp(&b.0)));

        // группы одинаковых значений
        let mut groups: Vec<(&Datum, usize)> = Vec::new();
        for &(_, v) in &c.values {
            match groups.last_mut() {
                Some((g, cnt)) if g.total_cmp(v) == Ordering::Equal => *cnt += 1,
                _ => groups.push((v, 1)),
            }
        }
        let ndistinct = groups.len();
        let nmultiple = groups.iter().filter(|(_, cnt)| *cnt > 1).count();
        stats.n_distinct = estimate_distinct(
            ndistinct,
            nmultiple,
            nonnull,
            c.too_wide,
            total_rows,
            stats.null_frac,
        );

        let limit = stats.stat_target as usize;
        let mcv = choose_mcv(&groups, nonnull, ndistinct, stats.n_distinct, limit);
        if !mcv.is_empty() {
            let slot = StatSlot::new(StatKind::Mcv, StatOperator::Eq, stats.collation)
                .with_values(mcv.iter().map(|(v, _)| (*v).clone()).collect())
                .with_numbers(mcv.iter().map(|(_, cnt)| *cnt as f64 / n as f64).collect());
            stats.add_slot(slot)?;
        }

        // гистограмма по значениям вне MCV
        let rest: Vec<&Datum> = c
            .values
            .iter()
            .map(|(_, v)| *v)
            .filter(|v| !mcv.iter().any(|(m, _)| m.total_cmp(v) == Ordering::Equal))
            .collect();
        let rest_distinct = ndistinct - mcv.len();
        if rest_distinct >= 2 {
            let bounds = equi_depth(&rest, (limit + 1).min(rest_distinct));
            if bounds.len() >= 2 {
                let slot = StatSlot::new(StatKind::Histogram, StatOperator::Lt, stats.collation)
                    .with_values(bounds.into_iter().cloned().collect());
                stats.add_slot(slot)?;
            }
        }

        // корреляция: позиция в выборке (физический порядок) против позиции в сортировке
        if c.values.len() > 1 {
            let m = c.values.len() as f64;
            let (mut sx, mut sxx, mut sxy) = (0.0, 0.0, 0.0);
            for (logical, (physical, _)) in c.values.iter().enumerate() {
                let x = *physical as f64;
                sx += x;
                sxx += x * x;
                sxy += x * logical as f64;
            }
            // у логических позиций 0..m та же сумма квадратов, что у перестановки
            let sy = m * (m - 1.0) / 2.0;
            let syy = (m - 1.0) * m * (2.0 * m - 1.0) / 6.0;
            let cov = m * sxy - sx * sy;
            let var_x = m * sxx - sx * sx;
            let var_y = m * syy - sy * sy;
            let corr = if var_x > 0.0 && var_y > 0.0 {
                cov / (var_x * var_y).sqrt()
            } else {
                0.0
            };
            let slot = StatSlot::new(StatKind::Correlation, StatOperator::Lt, stats.collation)
                .with_numbers(vec![corr]);
            stats.add_slot(slot)?;
        }
        Ok(())
    }
}

// ---------- equality only ----------

fn datum_hash(d: &Datum) -> u64 {
    let mut h = twox_hash::XxHash64::with_seed(0);
    d.hash_into(&mut h);
    h.finish()
}

fn same_value(a: &Datum, b: &Datum) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b) && a.total_cmp(b) == Ordering::Equal
}

/// Группировка по хешу: (первое значение, число повторов), порядок первого появления.
fn hash_groups<'a>(values: impl Iterator<Item = &'a Datum>) -> Vec<(&'a Datum, usize)> {
    hash_groups_by(values, datum_hash)
}

/// Хеш только выбирает корзину; в группу попадают лишь равные значения.
fn hash_groups_by<'a>(
    values: impl Iterator<Item = &'a Datum>,
    hash: impl Fn(&Datum) -> u64,
) -> Vec<(&'a Datum, usize)> {
    let mut buckets: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut groups: Vec<(&Datum, usize)> = Vec::new();
    for v in values {
        let bucket = buckets.entry(hash(v)).or_default();
        match bucket.iter().copied().find(|&i| same_value(groups[i].0, v)) {
            Some(i) => groups[i].1 += 1,
            None => {
                bucket.push(groups.len());
                groups.push((v, 1));
            }
        }
    }
    groups
}

pub struct DistinctAnalyzer;

impl TypeAnalyzer for DistinctAnalyzer {
    fn name(&self) -> &str {
        "distinct"
    }

    fn compute(
        &self,
        stats: &mut AttributeStatistics,
        sample: &ColumnSample<'_>,
        total_rows: f64,
    ) -> Result<()> {
        let n = sample.len();
        if n == 0 {
            return Ok(());
        }
        let c = basic_counts(sample);
        set_basic(stats, n, &c);
        let nonnull = n - c.nulls;

        let groups = hash_groups(c.values.iter().map(|(_, v)| *v));
        let ndistinct = groups.len();
        let nmultiple = groups.iter().filter(|(_, cnt)| *cnt > 1).count();
        stats.n_distinct = estimate_distinct(
            ndistinct,
            nmultiple,
            nonnull,
            c.too_wide,
            total_rows,
            stats.null_frac,
        );

        let mcv = choose_mcv(&groups, nonnull, ndistinct, stats.n_distinct, stats.stat_target as usize);
        if !mcv.is_empty() {
            let slot = StatSlot::new(StatKind::Mcv, StatOperator::Eq, stats.collation)
                .with_values(mcv.iter().map(|(v, _)| (*v).clone()).collect())
                .with_numbers(mcv.iter().map(|(_, cnt)| *cnt as f64 / n as f64).collect());
            stats.add_slot(slot)?;
        }
        Ok(())
    }
}

// ---------- arrays ----------

pub struct ArrayAnalyzer;

impl TypeAnalyzer for ArrayAnalyzer {
    fn name(&self) -> &str {
        "array"
    }

    fn compute(
        &self,
        stats: &mut AttributeStatistics,
        sample: &ColumnSample<'_>,
        total_rows: f64,
    ) -> Result<()> {
        // сначала как для целых значений (равенство массивов)
        DistinctAnalyzer.compute(stats, sample, total_rows)?;
        if !stats.stats_valid {
            return Ok(());
        }

        let arrays: Vec<&Vec<Datum>> = sample
            .iter()
            .filter_map(|v| match v {
                Datum::Array(items) => Some(items),
                _ => None,
            })
            .collect();
        if arrays.is_empty() {
            return Ok(());
        }

        // частота элемента = доля массивов, где он встретился
        let mut elem_buckets: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut elems: Vec<(&Datum, usize)> = Vec::new();
        let mut null_elem_arrays = 0usize;
        let mut distinct_counts: Vec<usize> = Vec::with_capacity(arrays.len());
        for arr in &arrays {
            if arr.iter().any(Datum::is_null) {
                null_elem_arrays += 1;
            }
            let distinct = hash_groups(arr.iter().filter(|e| !e.is_null()));
            for &(e, _) in &distinct {
                let bucket = elem_buckets.entry(datum_hash(e)).or_default();
                match bucket.iter().copied().find(|&i| same_value(elems[i].0, e)) {
                    Some(i) => elems[i].1 += 1,
                    None => {
                        bucket.push(elems.len());
                        elems.push((e, 1));
                    }
                }
            }
            distinct_counts.push(distinct.len());
        }

        let narrays = arrays.len() as f64;
        let limit = stats.stat_target as usize * 10;
        elems.sort_by(|a, b| b.1.cmp(&a.1));
        elems.truncate(limit);
        if !elems.is_empty() {
            let freqs: Vec<f64> = elems.iter().map(|(_, c)| *c as f64 / narrays).collect();
            let min_f = freqs.iter().cloned().fold(f64::INFINITY, f64::min);
            let max_f = freqs.iter().cloned().fold(0.0, f64::max);
            let mut numbers = freqs;
            // хвост: min, max частота и доля массивов с NULL-элементами
            numbers.extend([min_f, max_f, null_elem_arrays as f64 / narrays]);
            let slot = StatSlot::new(StatKind::Mcelem, StatOperator::Eq, stats.collation)
                .with_values(elems.iter().map(|(v, _)| (*v).clone()).collect())
                .with_numbers(numbers);
            stats.add_slot(slot)?;
        }

        distinct_counts.sort_unstable();
        let avg = distinct_counts.iter().sum::<usize>() as f64 / narrays;
        let mut numbers: Vec<f64> = equi_depth(&distinct_counts, stats.stat_target as usize + 1)
            .into_iter()
            .map(|c| c as f64)
            .collect();
        if !numbers.is_empty() {
            numbers.push(avg);
            let slot = StatSlot::new(StatKind::DistinctElemHist, StatOperator::Eq, stats.collation)
                .with_numbers(numbers);
            stats.add_slot(slot)?;
        }
        Ok(())
    }
}

/// Тип без анализатора: статистика не собирается.
pub struct NoStatsAnalyzer;

impl TypeAnalyzer for NoStatsAnalyzer {
    fn name(&self) -> &str {
        "none"
    }

    fn compute(&self, _: &mut AttributeStatistics, _: &ColumnSample<'_>, _: f64) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tuple::RowHeader;
    use crate::xid::TransactionId;

    fn rows(vals: Vec<Datum>) -> Vec<HeapRow> {
        vals.into_iter()
            .map(|v| HeapRow {
                header: RowHeader::inserted_by(TransactionId(5)),
                values: vec![v],
            })
            .collect()
    }

    fn stats_for(ty: ColumnType, target: u32) -> AttributeStatistics {
        AttributeStatistics::new(0, &ColumnDef::new("c", ty), target)
    }

    #[test]
    fn unique_column_is_minus_one() {
        let r = rows((0..100).map(Datum::Int).collect());
        let mut st = stats_for(ColumnType::Int, 10);
        ScalarAnalyzer
            .compute(&mut st, &ColumnSample::new(&r, 0), 1000.0)
            .unwrap();
        assert!(st.stats_valid);
        assert_eq!(st.n_distinct, -1.0);
        assert!(st.slot(StatKind::Mcv).is_none());
        let hist = st.slot(StatKind::Histogram).unwrap();
        assert_eq!(hist.values.len(), 11);
        assert_eq!(hist.values[0], Datum::Int(0));
        assert_eq!(hist.values[10], Datum::Int(99));
        // физический порядок совпадает с логическим
        let corr = st.slot(StatKind::Correlation).unwrap().numbers[0];
        assert!((corr - 1.0).abs() < 1e-9);
    }

    #[test]
    fn small_domain_goes_to_mcv() {
        let mut v: Vec<Datum> = (0..300).map(|i| Datum::Int(i % 3)).collect();
        v.extend((0..100).map(|_| Datum::Null));
        let r = rows(v);
        let mut st = stats_for(ColumnType::Int, 10);
        ScalarAnalyzer
            .compute(&mut st, &ColumnSample::new(&r, 0), 4000.0)
            .unwrap();
        assert_eq!(st.null_frac, 0.25);
        assert_eq!(st.n_distinct, 3.0);
        let mcv = st.slot(StatKind::Mcv).unwrap();
        assert_eq!(mcv.values.len(), 3);
        assert!((mcv.numbers.iter().sum::<f64>() - 0.75).abs() < 1e-9);
        assert!(st.slot(StatKind::Histogram).is_none());
    }

    #[test]
    fn all_null_column() {
        let r = rows(vec![Datum::Null; 10]);
        let mut st = stats_for(ColumnType::Text, 10);
        ScalarAnalyzer
            .compute(&mut st, &ColumnSample::new(&r, 0), 10.0)
            .unwrap();
        assert!(st.stats_valid);
        assert_eq!(st.null_frac, 1.0);
        assert_eq!(st.n_distinct, 0.0);
        assert!(st.slots.is_empty());
    }

    #[test]
    fn array_elements() {
        let r = rows(
            (0..50)
                .map(|i| Datum::Array(vec![Datum::Int(1), Datum::Int(i % 5), Datum::Int(1)]))
                .collect(),
        );
        let mut st = stats_for(ColumnType::Array(Box::new(ColumnType::Int)), 10);
        ArrayAnalyzer
            .compute(&mut st, &ColumnSample::new(&r, 0), 50.0)
            .unwrap();
        let mcelem = st.slot(StatKind::Mcelem).unwrap();
        assert_eq!(mcelem.values[0], Datum::Int(1));
        assert_eq!(mcelem.numbers[0], 1.0);
        assert!(st.slot(StatKind::DistinctElemHist).is_some());
    }

    #[test]
    fn custom_type_declines() {
        let col = ColumnDef::new("c", ColumnType::Custom("geo".into()));
        let r = rows(vec![Datum::Int(1)]);
        let mut st = AttributeStatistics::new(0, &col, 10);
        analyzer_for(&col)
            .compute(&mut st, &ColumnSample::new(&r, 0), 1.0)
            .unwrap();
        assert!(!st.stats_valid);
    }

    #[test]
    fn distinct_estimate_scales_to_fraction() {
        // 1000 различных, 100 повторялись, выборка 3000 из 1e6
        let d = estimate_distinct(1000, 100, 3000, 0, 1_000_000.0, 0.0);
        assert!(d > 0.0);
        let d2 = estimate_distinct(2900, 50, 3000, 0, 10_000.0, 0.0);
        assert!(d2 < 0.0 && d2 >= -1.0);
    }

    #[test]
    fn distinct_estimate_without_row_count_is_unknown() {
        assert_eq!(estimate_distinct(1000, 100, 3000, 0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn colliding_hashes_keep_values_apart() {
        let vals = [
            Datum::Int(1),
            Datum::Text("a".into()),
            Datum::Int(1),
            Datum::Float(1.0),
            Datum::Text("a".into()),
            Datum::Int(2),
        ];
        // все значения в одной корзине
        let groups = hash_groups_by(vals.iter(), |_| 7);
        let counts: Vec<(Datum, usize)> = groups.into_iter().map(|(d, n)| (d.clone(), n)).collect();
        assert_eq!(
            counts,
            vec![
                (Datum::Int(1), 2),
                (Datum::Text("a".into()), 2),
                (Datum::Float(1.0), 1),
                (Datum::Int(2), 1),
            ]
        );
        assert_eq!(hash_groups(vals.iter()).len(), 4);
    }
}
