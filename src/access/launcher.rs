//! access/launcher — запуск параллельных воркеров.
//!
//! Лидер передаёт замыкание воркера (оно видит общий регион через заимствование) и своё
//! замыкание; запускатель стартует воркеров, выполняет лидера в текущем потоке и дожидается
//! всех. Каждый воркер возвращает свои счётчики I/O для слияния у лидера.

use anyhow::{anyhow, Result};
use log::warn;

use super::strategy::IoUsage;

/// Тело воркера: номер воркера -> счётчики I/O.
pub type WorkerFn<'a> = dyn Fn(usize) -> Result<IoUsage> + Sync + 'a;

#[derive(Debug, Default)]
pub struct LaunchReport {
    /// Сколько воркеров реально стартовало (может быть меньше запрошенного).
    pub launched: usize,
    /// Результат каждого стартовавшего воркера.
    pub results: Vec<Result<IoUsage>>,
}

pub trait WorkerLauncher: Send + Sync {
    /// Верхняя граница воркеров, которые запускатель способен дать.
    fn max_workers(&self) -> usize;

    fn launch(
        &self,
        nworkers: usize,
        worker: &WorkerFn<'_>,
        leader: &mut dyn FnMut() -> Result<()>,
    ) -> Result<LaunchReport>;
}

/// Воркеры — scoped-потоки ОС.
#[derive(Clone, Debug)]
pub struct ThreadLauncher {
    limit: usize,
}

impl ThreadLauncher {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Default for ThreadLauncher {
    fn default() -> Self {
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { limit: n }
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn max_workers(&self) -> usize {
        self.limit
    }

    fn launch(
        &self,
        nworkers: usize,
        worker: &WorkerFn<'_>,
        leader: &mut dyn FnMut() -> Result<()>,
    ) -> Result<LaunchReport> {
        let want = nworkers.min(self.limit);
        std::thread::scope(|s| {
            let mut handles = Vec::with_capacity(want);
            for i in 0..want {
                let spawned = std::thread::Builder::new()
                    .name(format!("lazyvac-worker-{}", i))
                    .spawn_scoped(s, move || worker(i));
                match spawned {
                    Ok(h) => handles.push(h),
                    Err(e) => {
                        warn!("could not start parallel worker {}: {}", i, e);
                        break;
                    }
                }
            }

            let leader_res = leader();

            let launched = handles.len();
            let results = handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(anyhow!("parallel vacuum worker panicked")))
                })
                .collect();

            leader_res?;
            Ok(LaunchReport { launched, results })
        })
    }
}
