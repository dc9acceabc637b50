// `certa run`: execute a catalogued benchmark one or more times.

use std::path::PathBuf;

use certa_engine::benchmark::{run_benchmark, BenchmarkOptions, BenchmarkSummary};
use certa_engine::config::CegisConfig;
use miette::IntoDiagnostic;
use serde_json::{json, Value};
use tracing::info;

use crate::commands::helpers::{render_summary_text, write_json_artifact};
use crate::types::{OutputFormat, VerifierChoice};

/// Command-line overrides applied on top of a catalogue entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct RunOverrides {
    pub(crate) seed: Option<u64>,
    pub(crate) max_iters: Option<usize>,
    pub(crate) verifier: Option<VerifierChoice>,
    pub(crate) timeout: Option<u64>,
    pub(crate) verifier_timeout: Option<u64>,
}

impl RunOverrides {
    pub(crate) fn apply(&self, config: &mut CegisConfig) {
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(max_iters) = self.max_iters {
            config.cegis_max_iters = max_iters;
        }
        if let Some(verifier) = self.verifier {
            config.verifier = verifier.into();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(secs) = self.verifier_timeout {
            config.verifier_timeout_secs = secs;
        }
    }
}

pub(crate) struct RunArgs {
    pub(crate) name: String,
    pub(crate) repeat: usize,
    pub(crate) concurrent: bool,
    pub(crate) threads: usize,
    pub(crate) record: Option<PathBuf>,
    pub(crate) overrides: RunOverrides,
    pub(crate) format: OutputFormat,
}

pub(crate) fn summary_json(system: &str, summary: &BenchmarkSummary) -> miette::Result<Value> {
    Ok(json!({
        "schema_version": 1,
        "benchmark": summary.name,
        "system": system,
        "summary": serde_json::to_value(summary).into_diagnostic()?,
    }))
}

pub(crate) fn run_run_command(args: RunArgs) -> miette::Result<()> {
    let Some(bench) = certa_models::find(&args.name) else {
        return Err(miette::miette!(
            "Unknown benchmark `{}` (see `certa list`)",
            args.name
        ));
    };
    if args.repeat == 0 {
        return Err(miette::miette!("--repeat must be at least 1"));
    }

    let mut config = bench.config;
    args.overrides.apply(&mut config);

    let options = BenchmarkOptions {
        repeat: args.repeat,
        concurrent: args.concurrent,
        threads: args.threads,
    };
    info!(
        benchmark = bench.name,
        certificate = %config.certificate,
        verifier = %config.verifier,
        seed = config.seed,
        "Starting benchmark"
    );
    let summary = run_benchmark(bench.name, &config, bench.system.clone(), &options)
        .map_err(|e| miette::miette!("{}: {e}", bench.name))?;

    let artifact = summary_json(bench.system.name(), &summary)?;
    if let Some(path) = &args.record {
        write_json_artifact(path, &artifact)?;
        info!(path = %path.display(), "Wrote run records");
    }
    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&artifact).into_diagnostic()?);
        }
        OutputFormat::Text => print!("{}", render_summary_text(&summary)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use certa_engine::config::{CertificateType, VerifierType};

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut config = CegisConfig::new(2, CertificateType::Lyapunov);
        config.seed = 5;
        config.cegis_max_iters = 7;
        let overrides = RunOverrides {
            max_iters: Some(2),
            verifier: Some(VerifierChoice::Dreal),
            ..RunOverrides::default()
        };
        overrides.apply(&mut config);
        assert_eq!(config.seed, 5);
        assert_eq!(config.cegis_max_iters, 2);
        assert_eq!(config.verifier, VerifierType::Dreal);
        assert_eq!(config.timeout_secs, 0);
    }

    #[test]
    fn zero_timeout_override_disables_the_budget() {
        let mut config = CegisConfig::new(2, CertificateType::Barrier);
        config.timeout_secs = 60;
        RunOverrides {
            timeout: Some(0),
            ..RunOverrides::default()
        }
        .apply(&mut config);
        assert_eq!(config.timeout_secs, 0);
    }

    #[test]
    fn unknown_benchmark_is_an_error() {
        let args = RunArgs {
            name: "missing".into(),
            repeat: 1,
            concurrent: false,
            threads: 0,
            record: None,
            overrides: RunOverrides::default(),
            format: OutputFormat::Text,
        };
        let err = run_run_command(args).expect_err("unknown name");
        assert!(err.to_string().contains("Unknown benchmark `missing`"));
    }

    #[cfg(not(feature = "z3"))]
    #[test]
    fn z3_verifier_without_the_feature_is_rejected() {
        let args = RunArgs {
            name: "lyap_discrete".into(),
            repeat: 1,
            concurrent: false,
            threads: 0,
            record: None,
            overrides: RunOverrides {
                verifier: Some(VerifierChoice::Z3),
                ..RunOverrides::default()
            },
            format: OutputFormat::Text,
        };
        let err = run_run_command(args).expect_err("z3 is not compiled in");
        let message = err.to_string();
        assert!(message.starts_with("lyap_discrete:"), "{message}");
        assert!(message.contains("z3"), "{message}");
    }
}
