//! Repeated runs of one configuration.
//!
//! Run `i` uses seed `config.seed + i`. With `concurrent` set the runs are
//! spread over a rayon pool; each owns its own [`Cegis`] instance.

use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::cegis::Cegis;
use crate::config::CegisConfig;
use crate::error::CegisError;
use crate::result::{CegisResult, CegisStatus};
use crate::system::System;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkOptions {
    pub repeat: usize,
    pub concurrent: bool,
    /// Worker threads for concurrent runs; `0` uses rayon's default.
    pub threads: usize,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            repeat: 1,
            concurrent: false,
            threads: 0,
        }
    }
}

/// One run of a benchmark.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub benchmark: String,
    pub seed: u64,
    #[serde(flatten)]
    pub result: CegisResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSummary {
    pub name: String,
    pub runs: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub mean_elapsed_ms: f64,
    pub mean_iterations: f64,
    pub records: Vec<RunRecord>,
}

impl BenchmarkSummary {
    fn from_records(name: &str, records: Vec<RunRecord>) -> Self {
        let runs = records.len();
        let successes = records
            .iter()
            .filter(|r| r.result.status == CegisStatus::Verified)
            .count();
        let mean = |f: &dyn Fn(&RunRecord) -> f64| {
            if runs == 0 {
                0.0
            } else {
                records.iter().map(f).sum::<f64>() / runs as f64
            }
        };
        let mean_elapsed_ms = mean(&|r| r.result.elapsed_ms as f64);
        let mean_iterations = mean(&|r| r.result.iterations as f64);
        Self {
            name: name.to_string(),
            runs,
            successes,
            success_rate: if runs == 0 {
                0.0
            } else {
                successes as f64 / runs as f64
            },
            mean_elapsed_ms,
            mean_iterations,
            records,
        }
    }
}

fn run_once(
    name: &str,
    config: &CegisConfig,
    system: &Arc<dyn System>,
    index: usize,
) -> Result<RunRecord, CegisError> {
    let mut config = config.clone();
    config.seed = config.seed.wrapping_add(index as u64);
    let seed = config.seed;
    let mut cegis = Cegis::new(config, Arc::clone(system))?;
    let result = cegis.solve()?;
    debug!(benchmark = name, seed, status = %result.status, "run finished");
    Ok(RunRecord {
        benchmark: name.to_string(),
        seed,
        result,
    })
}

/// Runs `config` `options.repeat` times and summarises the outcomes.
///
/// The first run error aborts the benchmark; sequential and concurrent
/// execution yield records in seed order.
pub fn run_benchmark(
    name: &str,
    config: &CegisConfig,
    system: Arc<dyn System>,
    options: &BenchmarkOptions,
) -> Result<BenchmarkSummary, CegisError> {
    config.validate(system.as_ref())?;
    info!(
        benchmark = name,
        repeat = options.repeat,
        concurrent = options.concurrent,
        "Running benchmark"
    );

    let records = if options.concurrent && options.repeat > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads)
            .build()
            .map_err(|e| CegisError::ConfigurationInvalid(format!("thread pool: {e}")))?;
        pool.install(|| {
            (0..options.repeat)
                .into_par_iter()
                .map(|i| run_once(name, config, &system, i))
                .collect::<Result<Vec<_>, _>>()
        })?
    } else {
        (0..options.repeat)
            .map(|i| run_once(name, config, &system, i))
            .collect::<Result<Vec<_>, _>>()?
    };

    let summary = BenchmarkSummary::from_records(name, records);
    info!(
        benchmark = name,
        runs = summary.runs,
        successes = summary.successes,
        mean_elapsed_ms = summary.mean_elapsed_ms,
        "Benchmark finished"
    );
    Ok(summary)
}
