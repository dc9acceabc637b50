// Shared helper functions used across CLI command handlers: JSON artifacts
// and text rendering of run summaries.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use certa_engine::benchmark::{BenchmarkSummary, RunRecord};
use miette::IntoDiagnostic;
use serde_json::Value;

pub(crate) fn write_json_artifact(path: &Path, value: &Value) -> miette::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).into_diagnostic()?;
    }
    fs::write(path, serde_json::to_string_pretty(value).into_diagnostic()?).into_diagnostic()?;
    Ok(())
}

fn render_record(out: &mut String, index: usize, record: &RunRecord) {
    let result = &record.result;
    let _ = writeln!(
        out,
        "run {} (seed {}): {} after {} iteration(s) in {} ms, loss {:.4e}",
        index + 1,
        record.seed,
        result.status,
        result.iterations,
        result.elapsed_ms,
        result.final_loss
    );
    if !result.is_verified() {
        let _ = writeln!(out, "  stopped: {}", result.termination.reason);
    }
    let _ = writeln!(out, "  certificate: {}", result.expression);
    if let Some(alt) = &result.expression_alt {
        let _ = writeln!(out, "  remain: {alt}");
    }
    if let Some(controller) = &result.controller {
        for (j, u) in controller.iter().enumerate() {
            let _ = writeln!(out, "  u{j}: {u}");
        }
    }
}

pub(crate) fn render_summary_text(summary: &BenchmarkSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "benchmark: {}", summary.name);
    for (i, record) in summary.records.iter().enumerate() {
        render_record(&mut out, i, record);
    }
    let _ = writeln!(
        out,
        "summary: {}/{} verified ({:.1}%), mean {:.1} ms, mean {:.1} iterations",
        summary.successes,
        summary.runs,
        summary.success_rate * 100.0,
        summary.mean_elapsed_ms,
        summary.mean_iterations
    );
    out
}
