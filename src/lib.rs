#![allow(non_snake_case)]

// Базовые модули
pub mod consts;
pub mod xid;
pub mod metrics;
pub mod config;
pub mod options;

// Интерфейсы внешних подсистем и модель строк/страниц
pub mod access; // src/access/{mod,tuple,visibility,strategy,launcher}.rs

// Движок
pub mod vacuum;  // src/vacuum/{mod,lazy,full,prune,dead_rows,cutoffs,cost,io,index,parallel,relstats,truncate}.rs
pub mod analyze; // src/analyze/{mod,sampler,stats,typanalyze}.rs

// In-memory реализации (тесты, CLI, пример встраивания)
pub mod mem; // src/mem/{mod,heap,index,catalog,xact,locks,builder}.rs

// Удобные реэкспорты
pub use access::{
    CancelToken, Cancelled, Catalog, HeapRelation, IndexRelation, LockMode, LockNotAvailable,
    RelationLocks, Relation, TransactionOracle, VacuumEnv, WorkerLauncher,
};
pub use analyze::{analyze_rel, AnalyzeOutcome};
pub use config::{VacuumConfig, VacuumConfigBuilder};
pub use options::{VacOptValue, VacuumOption, VacuumOptions, VacuumParams, WorkerRequest};
pub use vacuum::{vacuum, RunReport, VacuumOutcome};
pub use xid::{MultiXactId, TransactionId};
