use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

mod cli;
mod cmd_analyze;
mod cmd_config;
mod cmd_vacuum;
mod util;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug lazyvac vacuum --rows 10000
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Vacuum {
            rows,
            dead_pct,
            indexes,
            workers,
            rows_per_page,
            empty_tail,
            freeze,
            verbose,
            full,
            analyze,
            no_truncate,
            index_cleanup,
            frozen_age,
            seed,
            json,
        } => cmd_vacuum::exec(cmd_vacuum::VacuumArgs {
            rows,
            dead_pct,
            indexes,
            workers,
            rows_per_page,
            empty_tail,
            freeze,
            verbose,
            full,
            analyze,
            no_truncate,
            index_cleanup,
            frozen_age,
            seed,
            json,
        }),

        cli::Cmd::Analyze {
            rows,
            target,
            rows_per_page,
            seed,
            verbose,
            json,
        } => cmd_analyze::exec(rows, target, rows_per_page, seed, verbose, json),

        cli::Cmd::Config => cmd_config::exec(),
    }
}
