//! Константы движка vacuum/analyze (вынесены в одно место, как раньше consts для страниц/WAL).

// ----- Transaction ids -----

/// Невалидный идентификатор транзакции.
pub const INVALID_XID: u32 = 0;
/// Bootstrap-транзакция (инициализация каталога).
pub const BOOTSTRAP_XID: u32 = 1;
/// Замороженный xmin: строка видима всем без сравнения xid.
pub const FROZEN_XID: u32 = 2;
/// Первый "нормальный" xid; всё, что ниже, сравнивается как обычные числа.
pub const FIRST_NORMAL_XID: u32 = 3;

/// Невалидный MultiXactId.
pub const INVALID_MULTI: u32 = 0;
/// Первый нормальный MultiXactId.
pub const FIRST_MULTI: u32 = 1;

// ----- Heap layout (логическая модель, без физического формата) -----

/// Максимум строк (слотов) на странице для 8 КиБ страницы.
pub const MAX_ROWS_PER_PAGE: usize = 291;
/// Размер страницы по умолчанию (байт).
pub const DEFAULT_PAGE_SIZE: usize = 8192;
/// Накладные расходы заголовка страницы (байт).
pub const PAGE_HEADER_SIZE: usize = 24;
/// Размер line pointer'а (байт).
pub const ITEM_ID_SIZE: usize = 4;
/// Заголовок строки (байт).
pub const ROW_HEADER_SIZE: usize = 24;
/// Размер ItemPointer (page u32 + slot u16) в байтах для расчёта ёмкости DeadRowStore.
pub const ITEM_POINTER_SIZE: usize = 6;

// ----- Lazy vacuum -----

/// Не пропускаем all-visible страницы, если подряд их меньше этого порога
/// (последовательное чтение дешевле, чем "дырявое").
pub const SKIP_PAGES_THRESHOLD: u32 = 32;

/// Bypass индексного раунда: страниц с LP_DEAD меньше 2% от rel_pages.
pub const BYPASS_THRESHOLD_PAGES: f64 = 0.02;
/// Bypass: и dead items не больше, чем влезает в 32 МиБ.
pub const BYPASS_MAX_DEAD_BYTES: usize = 32 * 1024 * 1024;

/// Проверка failsafe каждые ~4 ГиБ просканированной кучи.
pub const FAILSAFE_EVERY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Space map для таблиц без индексов — примерно каждые 8 ГиБ.
pub const FSM_EVERY_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Усечение: минимум освобождаемых страниц...
pub const REL_TRUNCATE_MINIMUM: u32 = 1000;
/// ...или не меньше 1/16 отношения.
pub const REL_TRUNCATE_FRACTION: u32 = 16;

/// Доля от autovacuum_freeze_max_age, выше которой freeze_table_age не поднимается.
pub const FREEZE_TABLE_AGE_CAP: f64 = 0.95;

// ----- Parallel -----

/// Жёсткий верхний предел воркеров (независимо от конфигурации).
pub const MAX_PARALLEL_WORKER_LIMIT: usize = 1024;

// ----- Analyze -----

/// Число слотов статистики на колонку.
pub const STATISTIC_NUM_SLOTS: usize = 5;
/// min_rows = ROWS_PER_STAT_TARGET * statistics_target.
pub const ROWS_PER_STAT_TARGET: usize = 300;
/// Константа T из статьи Vitter'а: до t <= 22n используем Algorithm X.
pub const VITTER_Z_THRESHOLD: f64 = 22.0;
/// Значения шире этого не участвуют в MCV/гистограммах (считаются "toowide").
pub const WIDTH_THRESHOLD: usize = 1024;
