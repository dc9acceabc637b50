// `certa list`: print the catalogue.

use miette::IntoDiagnostic;
use serde_json::{json, Value};

use crate::types::OutputFormat;

pub(crate) fn catalogue_json() -> Value {
    let entries: Vec<Value> = certa_models::catalogue()
        .iter()
        .map(|bench| {
            json!({
                "name": bench.name,
                "certificate": bench.config.certificate,
                "system": bench.system.name(),
                "n_vars": bench.config.n_vars,
                "controlled": bench.config.has_controller(),
                "summary": bench.summary,
            })
        })
        .collect();
    json!({ "schema_version": 1, "benchmarks": entries })
}

pub(crate) fn run_list_command(format: OutputFormat) -> miette::Result<()> {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&catalogue_json()).into_diagnostic()?
            );
        }
        OutputFormat::Text => {
            for bench in certa_models::catalogue() {
                println!(
                    "{:<16} {:<9} {:<20} {}",
                    bench.name,
                    bench.config.certificate.name(),
                    bench.system.name(),
                    bench.summary
                );
            }
        }
    }
    Ok(())
}
