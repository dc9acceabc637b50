use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::backends::smtlib_printer::{declaration, to_smtlib};
use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum DrealError {
    #[error("dReal I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dReal not found: {0}")]
    NotFound(String),
    #[error("dReal error: {0}")]
    SolverError(String),
    #[error("Failed to parse dReal output: {0}")]
    ParseError(String),
    #[error("no scope to pop")]
    EmptyScope,
}

/// dReal driven as a one-shot process per check.
///
/// dReal has no incremental interface, so declarations and assertions are
/// buffered and a complete script is piped to a fresh process on every
/// `check-sat`.
pub struct DrealSolver {
    command: String,
    precision: f64,
    timeout: Option<Duration>,
    decls: Vec<String>,
    bounds: Vec<String>,
    assertions: Vec<String>,
    scopes: Vec<(usize, usize, usize)>,
    last_output: String,
}

impl DrealSolver {
    pub fn new() -> Self {
        Self::with_command("dreal")
    }

    pub fn with_command(cmd: &str) -> Self {
        Self {
            command: cmd.to_string(),
            precision: 1e-3,
            timeout: None,
            decls: Vec::new(),
            bounds: Vec::new(),
            assertions: Vec::new(),
            scopes: Vec::new(),
            last_output: String::new(),
        }
    }

    pub fn with_timeout_secs(timeout_secs: u64) -> Self {
        let mut solver = Self::new();
        if timeout_secs > 0 {
            solver.timeout = Some(Duration::from_secs(timeout_secs));
        }
        solver
    }

    /// Kill the process after `timeout`; `None` waits indefinitely.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// δ used by dReal when weakening constraints.
    pub fn with_precision(mut self, precision: f64) -> Self {
        self.precision = precision;
        self
    }

    /// The script sent on the next check.
    pub fn script(&self) -> String {
        let mut out = String::from("(set-logic QF_NRA)\n");
        for line in self.decls.iter().chain(&self.bounds).chain(&self.assertions) {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("(check-sat)\n(exit)\n");
        out
    }

    fn run(&mut self) -> Result<SatResult, DrealError> {
        let script = self.script();
        let precision = self.precision.to_string();
        let mut child = Command::new(&self.command)
            .args(["--in", "--model", "--precision", precision.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DrealError::NotFound(format!("{}: {e}", self.command)))?;

        // Both pipes are drained on their own threads; a full stderr pipe
        // would otherwise block dReal before it answers on stdout.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| DrealError::SolverError("failed to capture dReal stdout".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DrealError::SolverError("failed to capture dReal stderr".into()))?;
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = String::new();
            let read = stdout.read_to_string(&mut buf).map(|_| buf);
            let _ = tx.send(read);
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DrealError::SolverError("failed to capture dReal stdin".into()))?;
        stdin.write_all(script.as_bytes())?;
        drop(stdin);

        let received = match self.timeout {
            Some(limit) => rx.recv_timeout(limit).ok(),
            None => rx.recv().ok(),
        };
        let Some(output) = received else {
            let _ = child.kill();
            let _ = child.wait();
            debug!(command = %self.command, "dReal killed after timeout");
            return Ok(SatResult::Unknown("timeout".into()));
        };
        let output = output?;
        let status = child.wait()?;
        let stderr = stderr_reader.join().unwrap_or_default();
        self.last_output = output;

        let first = self.last_output.lines().map(str::trim).find(|l| !l.is_empty());
        match first {
            Some("unsat") => Ok(SatResult::Unsat),
            Some(line) if line.starts_with("delta-sat") => Ok(SatResult::Sat),
            Some("unknown") => Ok(SatResult::Unknown("dReal returned unknown".into())),
            _ => Err(DrealError::SolverError(format!(
                "exit status {status}; stdout `{}`; stderr `{}`",
                self.last_output.trim(),
                stderr.trim()
            ))),
        }
    }
}

impl Default for DrealSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for DrealSolver {
    type Error = DrealError;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), DrealError> {
        self.decls.push(declaration(name, sort));
        Ok(())
    }

    fn bound_var(&mut self, name: &str, lower: f64, upper: f64) -> Result<(), DrealError> {
        let bound = SmtTerm::and(vec![
            SmtTerm::var(name).ge(SmtTerm::num(lower)),
            SmtTerm::var(name).le(SmtTerm::num(upper)),
        ]);
        self.bounds.push(format!("(assert {})", to_smtlib(&bound)));
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), DrealError> {
        self.assertions.push(format!("(assert {})", to_smtlib(term)));
        Ok(())
    }

    fn push(&mut self) -> Result<(), DrealError> {
        self.scopes
            .push((self.decls.len(), self.bounds.len(), self.assertions.len()));
        Ok(())
    }

    fn pop(&mut self) -> Result<(), DrealError> {
        let (d, b, a) = self.scopes.pop().ok_or(DrealError::EmptyScope)?;
        self.decls.truncate(d);
        self.bounds.truncate(b);
        self.assertions.truncate(a);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, DrealError> {
        self.run()
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), DrealError> {
        let result = self.run()?;
        if result != SatResult::Sat {
            return Ok((result, None));
        }
        let boxes = parse_dreal_model(&self.last_output)?;
        let mut values = HashMap::new();
        for &(name, _) in var_names {
            if let Some(v) = boxes.get(name) {
                values.insert(name.to_string(), ModelValue::Real(*v));
            }
        }
        Ok((SatResult::Sat, Some(Model { values })))
    }

    fn reset(&mut self) -> Result<(), DrealError> {
        self.decls.clear();
        self.bounds.clear();
        self.assertions.clear();
        self.scopes.clear();
        self.last_output.clear();
        Ok(())
    }
}

/// Parse `name : [lo, hi]` lines into interval midpoints.
fn parse_dreal_model(output: &str) -> Result<HashMap<String, f64>, DrealError> {
    let mut values = HashMap::new();
    for line in output.lines().skip_while(|l| !l.trim_start().starts_with("delta-sat")).skip(1) {
        let Some((name, range)) = line.split_once(':') else {
            continue;
        };
        let range = range.trim();
        let inner = range
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .ok_or_else(|| DrealError::ParseError(line.to_string()))?;
        let (lo, hi) = inner
            .split_once(',')
            .ok_or_else(|| DrealError::ParseError(line.to_string()))?;
        let lo = parse_bound(lo).ok_or_else(|| DrealError::ParseError(line.to_string()))?;
        let hi = parse_bound(hi).ok_or_else(|| DrealError::ParseError(line.to_string()))?;
        values.insert(name.trim().to_string(), 0.5 * (lo + hi));
    }
    Ok(values)
}

fn parse_bound(text: &str) -> Option<f64> {
    match text.trim() {
        "-inf" | "-INFTY" => Some(f64::NEG_INFINITY),
        "inf" | "INFTY" => Some(f64::INFINITY),
        other => other.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dreal_model_takes_box_midpoints() {
        let output = "delta-sat with delta = 0.001\nx0 : [-0.5, -0.25]\nx1 : [1, 1]\n";
        let values = parse_dreal_model(output).expect("well-formed output");
        assert_eq!(values.get("x0"), Some(&-0.375));
        assert_eq!(values.get("x1"), Some(&1.0));
    }

    #[test]
    fn parse_dreal_model_rejects_malformed_boxes() {
        let output = "delta-sat with delta = 0.001\nx0 : -0.5\n";
        assert!(matches!(
            parse_dreal_model(output),
            Err(DrealError::ParseError(_))
        ));
    }

    #[test]
    fn script_buffers_scopes() {
        let mut solver = DrealSolver::new();
        solver.declare_var("x", &SmtSort::Real).expect("declare");
        solver.bound_var("x", -1.0, 1.0).expect("bound");
        solver.push().expect("push");
        solver
            .assert(&SmtTerm::var("x").gt(SmtTerm::zero()))
            .expect("assert");
        assert!(solver.script().contains("(assert (> x 0.0))"));
        solver.pop().expect("pop");
        let script = solver.script();
        assert!(!script.contains("(> x 0.0)"));
        assert!(script.contains("(declare-fun x () Real)"));
        assert!(script.contains("(assert (and (>= x (- 1.0)) (<= x 1.0)))"));
        assert!(script.ends_with("(check-sat)\n(exit)\n"));
    }

    #[test]
    fn missing_binary_is_reported() {
        let mut solver = DrealSolver::with_command("certa-no-such-dreal-binary");
        solver.declare_var("x", &SmtSort::Real).expect("declare");
        assert!(matches!(solver.check_sat(), Err(DrealError::NotFound(_))));
    }

    /// Writes an executable stand-in for the dReal binary.
    #[cfg(unix)]
    fn fake_dreal(dir: &tempfile::TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("dreal");
        std::fs::write(&path, format!("#!/bin/sh\ncat > /dev/null\n{body}\n")).expect("write");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[test]
    fn chatty_stderr_does_not_stall_the_answer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let command = fake_dreal(
            &dir,
            "head -c 262144 /dev/zero | tr '\\0' x >&2\necho unsat",
        );
        let mut solver =
            DrealSolver::with_command(&command).timeout(Some(Duration::from_secs(20)));
        solver.declare_var("x", &SmtSort::Real).expect("declare");
        match solver.check_sat() {
            Ok(SatResult::Unsat) => {}
            other => panic!("Expected unsat, got: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn unexpected_output_reports_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let command = fake_dreal(&dir, "echo garbage\necho 'bad flag' >&2\nexit 2");
        let mut solver =
            DrealSolver::with_command(&command).timeout(Some(Duration::from_secs(20)));
        solver.declare_var("x", &SmtSort::Real).expect("declare");
        match solver.check_sat() {
            Err(DrealError::SolverError(msg)) => {
                assert!(msg.contains("garbage"), "{msg}");
                assert!(msg.contains("bad flag"), "{msg}");
            }
            other => panic!("Expected solver error, got: {other:?}"),
        }
    }
}
