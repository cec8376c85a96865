use anyhow::Result;

use LazyVac::config::VacuumConfig;

/// CLI: config — действующая конфигурация (LV_* env поверх значений по умолчанию).
pub fn exec() -> Result<()> {
    let cfg = VacuumConfig::from_env();
    println!("{}", cfg);
    Ok(())
}
