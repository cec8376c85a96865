//! options — параметры одного запуска VACUUM/ANALYZE.
//!
//! VacuumOptions — явный набор опций (вместо битовой маски), VacuumParams — неизменяемый
//! снимок конфигурации запуска. Проверка совместимости опций выполняется до начала работы.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::consts::MAX_PARALLEL_WORKER_LIMIT;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VacuumOption {
    Vacuum,
    Analyze,
    Verbose,
    Freeze,
    Full,
    SkipLocked,
    ProcessSideStorage,
    SkipSideStorage,
    DisablePageSkipping,
}

impl VacuumOption {
    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Набор опций запуска.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacuumOptions(u16);

impl VacuumOptions {
    pub fn empty() -> Self {
        Self(0)
    }

    /// VACUUM без доп. опций (side storage обрабатывается по умолчанию).
    pub fn vacuum() -> Self {
        Self::empty()
            .with(VacuumOption::Vacuum)
            .with(VacuumOption::ProcessSideStorage)
    }

    pub fn analyze() -> Self {
        Self::empty().with(VacuumOption::Analyze)
    }

    pub fn with(mut self, opt: VacuumOption) -> Self {
        self.0 |= opt.bit();
        self
    }

    pub fn without(mut self, opt: VacuumOption) -> Self {
        self.0 &= !opt.bit();
        self
    }

    pub fn contains(&self, opt: VacuumOption) -> bool {
        self.0 & opt.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = VacuumOption> + '_ {
        ALL_OPTIONS.iter().copied().filter(move |o| self.contains(*o))
    }
}

const ALL_OPTIONS: [VacuumOption; 9] = [
    VacuumOption::Vacuum,
    VacuumOption::Analyze,
    VacuumOption::Verbose,
    VacuumOption::Freeze,
    VacuumOption::Full,
    VacuumOption::SkipLocked,
    VacuumOption::ProcessSideStorage,
    VacuumOption::SkipSideStorage,
    VacuumOption::DisablePageSkipping,
];

/// Четырёхзначное предпочтение для index_cleanup/truncate.
/// Unspecified — берём значение из reloptions таблицы.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VacOptValue {
    #[default]
    Unspecified,
    Auto,
    Disabled,
    Enabled,
}

impl VacOptValue {
    /// Подставить табличный default вместо Unspecified.
    pub fn resolve(self, table_default: VacOptValue) -> VacOptValue {
        match self {
            VacOptValue::Unspecified => match table_default {
                VacOptValue::Unspecified => VacOptValue::Auto,
                v => v,
            },
            v => v,
        }
    }
}

impl fmt::Display for VacOptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VacOptValue::Unspecified => "unspecified",
            VacOptValue::Auto => "auto",
            VacOptValue::Disabled => "off",
            VacOptValue::Enabled => "on",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for VacOptValue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "unspecified" => Ok(VacOptValue::Unspecified),
            "auto" => Ok(VacOptValue::Auto),
            "0" | "off" | "false" | "no" => Ok(VacOptValue::Disabled),
            "1" | "on" | "true" | "yes" => Ok(VacOptValue::Enabled),
            other => Err(anyhow!("invalid option value '{}'", other)),
        }
    }
}

/// Запрос на число параллельных воркеров.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerRequest {
    /// Выбрать по числу подходящих индексов.
    #[default]
    Auto,
    Exactly(usize),
    Disabled,
}

/// Явные переопределения возрастов заморозки (None = из конфига).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeOverrides {
    pub freeze_min_age: Option<u32>,
    pub freeze_table_age: Option<u32>,
    pub multixact_freeze_min_age: Option<u32>,
    pub multixact_freeze_table_age: Option<u32>,
}

/// Неизменяемый снимок параметров одного запуска.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VacuumParams {
    pub options: VacuumOptions,
    pub ages: AgeOverrides,
    /// Anti-wraparound запуск (всегда aggressive).
    pub is_wraparound: bool,
    /// Минимальная длительность (мс), начиная с которой пишется сводка в лог.
    pub log_min_duration_ms: Option<u64>,
    pub index_cleanup: VacOptValue,
    pub truncate: VacOptValue,
    pub workers: WorkerRequest,
}

impl VacuumParams {
    pub fn new(options: VacuumOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: WorkerRequest) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_index_cleanup(mut self, v: VacOptValue) -> Self {
        self.index_cleanup = v;
        self
    }

    pub fn with_truncate(mut self, v: VacOptValue) -> Self {
        self.truncate = v;
        self
    }

    pub fn with_ages(mut self, ages: AgeOverrides) -> Self {
        self.ages = ages;
        self
    }

    pub fn with_wraparound(mut self, on: bool) -> Self {
        self.is_wraparound = on;
        self
    }

    pub fn has(&self, opt: VacuumOption) -> bool {
        self.options.contains(opt)
    }

    pub fn verbose(&self) -> bool {
        self.has(VacuumOption::Verbose)
    }

    /// Обрабатывать ли side storage (skip имеет приоритет).
    pub fn process_side_storage(&self) -> bool {
        self.has(VacuumOption::ProcessSideStorage) && !self.has(VacuumOption::SkipSideStorage)
    }

    /// FREEZE эквивалентен нулевым возрастам заморозки.
    pub fn effective_ages(&self) -> AgeOverrides {
        if self.has(VacuumOption::Freeze) {
            return AgeOverrides {
                freeze_min_age: Some(0),
                freeze_table_age: Some(0),
                multixact_freeze_min_age: Some(0),
                multixact_freeze_table_age: Some(0),
            };
        }
        self.ages
    }

    /// Проверка совместимости опций до начала работы.
    pub fn validate(&self) -> Result<()> {
        let vacuum = self.has(VacuumOption::Vacuum);
        let analyze = self.has(VacuumOption::Analyze);
        if !vacuum && !analyze {
            return Err(anyhow!("at least one of VACUUM or ANALYZE must be specified"));
        }
        if self.has(VacuumOption::Full) {
            if !vacuum {
                return Err(anyhow!("FULL requires VACUUM"));
            }
            if !matches!(self.workers, WorkerRequest::Disabled | WorkerRequest::Auto) {
                return Err(anyhow!("VACUUM FULL cannot be performed in parallel"));
            }
            if self.has(VacuumOption::DisablePageSkipping) {
                return Err(anyhow!("VACUUM option DISABLE_PAGE_SKIPPING cannot be used with FULL"));
            }
            if !self.process_side_storage() {
                return Err(anyhow!("side storage processing is required for VACUUM FULL"));
            }
        }
        if !vacuum {
            if self.has(VacuumOption::Freeze) || self.has(VacuumOption::DisablePageSkipping) {
                return Err(anyhow!("FREEZE and DISABLE_PAGE_SKIPPING require VACUUM"));
            }
        }
        if let WorkerRequest::Exactly(n) = self.workers {
            if n > MAX_PARALLEL_WORKER_LIMIT {
                return Err(anyhow!(
                    "parallel workers for vacuum must be between 0 and {}",
                    MAX_PARALLEL_WORKER_LIMIT
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_set_roundtrip() {
        let o = VacuumOptions::vacuum().with(VacuumOption::Verbose);
        assert!(o.contains(VacuumOption::Vacuum));
        assert!(o.contains(VacuumOption::Verbose));
        assert!(!o.contains(VacuumOption::Full));
        assert_eq!(o.iter().count(), 3);
        assert!(!o.without(VacuumOption::Verbose).contains(VacuumOption::Verbose));
    }

    #[test]
    fn unspecified_defers_to_table_default() {
        assert_eq!(
            VacOptValue::Unspecified.resolve(VacOptValue::Disabled),
            VacOptValue::Disabled
        );
        assert_eq!(
            VacOptValue::Unspecified.resolve(VacOptValue::Unspecified),
            VacOptValue::Auto
        );
        assert_eq!(
            VacOptValue::Enabled.resolve(VacOptValue::Disabled),
            VacOptValue::Enabled
        );
    }

    #[test]
    fn validation_rules() {
        assert!(VacuumParams::new(VacuumOptions::empty()).validate().is_err());
        let full = VacuumParams::new(VacuumOptions::vacuum().with(VacuumOption::Full))
            .with_workers(WorkerRequest::Exactly(2));
        assert!(full.validate().is_err());
        let full_skip = VacuumParams::new(
            VacuumOptions::vacuum()
                .with(VacuumOption::Full)
                .with(VacuumOption::SkipSideStorage),
        );
        assert!(full_skip.validate().is_err());
        assert!(VacuumParams::new(VacuumOptions::analyze()).validate().is_ok());
    }

    #[test]
    fn freeze_zeroes_ages() {
        let p = VacuumParams::new(VacuumOptions::vacuum().with(VacuumOption::Freeze));
        let a = p.effective_ages();
        assert_eq!(a.freeze_min_age, Some(0));
        assert_eq!(a.multixact_freeze_table_age, Some(0));
    }
}
