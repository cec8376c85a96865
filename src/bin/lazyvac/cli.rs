use clap::{Parser, Subcommand};

/// CLI для LazyVac: прогон VACUUM / ANALYZE на синтетической таблице в памяти
#[derive(Parser, Debug)]
#[command(name = "lazyvac", version, about = "LazyVac CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Build a synthetic table and VACUUM it
    Vacuum {
        #[arg(long, default_value_t = 100_000)]
        rows: usize,
        /// Percent of rows deleted by a committed transaction
        #[arg(long, default_value_t = 20.0)]
        dead_pct: f64,
        #[arg(long, default_value_t = 2)]
        indexes: usize,
        /// Parallel index workers (0 disables, absent = auto)
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value_t = 100)]
        rows_per_page: usize,
        /// Empty pages appended at the end of the heap
        #[arg(long, default_value_t = 0)]
        empty_tail: u32,
        #[arg(long)]
        freeze: bool,
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        full: bool,
        /// Also ANALYZE after vacuum
        #[arg(long)]
        analyze: bool,
        #[arg(long)]
        no_truncate: bool,
        /// auto | on | off
        #[arg(long, default_value = "auto")]
        index_cleanup: String,
        /// Age of relfrozenxid relative to the next xid
        #[arg(long, default_value_t = 1_000)]
        frozen_age: u32,
        #[arg(long, default_value_t = 0x5EED)]
        seed: u64,
        #[arg(long)]
        json: bool,
    },
    /// Build a synthetic table and ANALYZE it
    Analyze {
        #[arg(long, default_value_t = 100_000)]
        rows: usize,
        /// default_statistics_target
        #[arg(long, default_value_t = 100)]
        target: u32,
        #[arg(long, default_value_t = 100)]
        rows_per_page: usize,
        /// Sampler seed (absent = random)
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print effective configuration (env + defaults)
    Config,
}
