//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::{OutputFormat, VerifierChoice};

pub(crate) const CLI_LONG_ABOUT: &str =
    "Counterexample-guided synthesis of neural Lyapunov, barrier, reach-while-stay\n\
    and reach-and-remain certificates.\n\n\
    Typical session:\n  \
    1. certa list\n  \
    2. certa run lyap_linear\n  \
    3. certa run hi_ord_8 --repeat 5 --concurrent --record hi_ord_8.json";

#[derive(Parser)]
#[command(name = "certa")]
#[command(about = "Certificate synthesis for dynamical systems")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List the catalogued benchmarks
    #[command(display_order = 10)]
    List {
        /// Output format: text | json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run a catalogued benchmark
    #[command(display_order = 20)]
    Run {
        /// Benchmark name (see `certa list`)
        name: String,

        /// Number of runs; run i uses seed + i
        #[arg(long, default_value_t = 1)]
        repeat: usize,

        /// Spread repeated runs over a thread pool
        #[arg(long, default_value_t = false)]
        concurrent: bool,

        /// Worker threads for --concurrent (0 uses one per core)
        #[arg(long, default_value_t = 0)]
        threads: usize,

        /// Write every run record to this JSON file
        #[arg(long)]
        record: Option<PathBuf>,

        /// Override the benchmark's base seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the CEGIS iteration budget
        #[arg(long)]
        max_iters: Option<usize>,

        /// Verification backend
        #[arg(long, value_enum)]
        verifier: Option<VerifierChoice>,

        /// Overall wall-clock budget per run in seconds (0 disables)
        #[arg(long)]
        timeout: Option<u64>,

        /// Per-query verifier budget in seconds
        #[arg(long)]
        verifier_timeout: Option<u64>,

        /// Output format: text | json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}
