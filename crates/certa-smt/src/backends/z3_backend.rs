use std::collections::HashMap;

use thiserror::Error;
use z3::SatResult as Z3SatResult;

use crate::backends::smtlib_printer::{declaration, to_smtlib};
use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("Z3 backend only accepts polynomial constraints, got `{0}`")]
    NonPolynomial(String),
}

/// Z3 over nonlinear real arithmetic.
///
/// Assertions are handed over as SMT-LIB text together with the current
/// declarations, so rational literals of any size reach Z3 exactly.
pub struct Z3Solver {
    solver: z3::Solver,
    real_vars: HashMap<String, z3::ast::Real>,
    decls: Vec<String>,
    scopes: Vec<usize>,
    _params: Option<z3::Params>,
}

impl Z3Solver {
    pub fn new() -> Self {
        z3::set_global_param("pp.decimal", "true");
        z3::set_global_param("pp.decimal_precision", "17");
        Self {
            solver: z3::Solver::new(),
            real_vars: HashMap::new(),
            decls: Vec::new(),
            scopes: Vec::new(),
            _params: None,
        }
    }

    pub fn with_timeout_secs(timeout_secs: u64) -> Self {
        let mut solver = Self::new();
        if timeout_secs == 0 {
            return solver;
        }
        let mut params = z3::Params::new();
        let timeout_ms = timeout_secs.saturating_mul(1000);
        params.set_u32("timeout", timeout_ms as u32);
        solver.solver.set_params(&params);
        solver._params = Some(params);
        solver
    }

    fn model_value(model: &z3::Model, var: &z3::ast::Real) -> Option<f64> {
        let value = model.eval(var, true)?;
        parse_z3_real(&value.to_string())
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for Z3Solver {
    type Error = Z3Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Z3Error> {
        if *sort == SmtSort::Real {
            self.real_vars
                .insert(name.to_string(), z3::ast::Real::new_const(name));
        }
        self.decls.push(declaration(name, sort));
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Z3Error> {
        if !term.is_polynomial() {
            return Err(Z3Error::NonPolynomial(term.to_string()));
        }
        for var in term.free_vars() {
            if !self.real_vars.contains_key(&var) {
                return Err(Z3Error::UnknownVariable(var));
            }
        }
        let mut source = self.decls.join("\n");
        source.push_str(&format!("\n(assert {})", to_smtlib(term)));
        self.solver.from_string(source);
        Ok(())
    }

    fn push(&mut self) -> Result<(), Z3Error> {
        self.solver.push();
        self.scopes.push(self.decls.len());
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Z3Error> {
        self.solver.pop(1);
        if let Some(n) = self.scopes.pop() {
            for decl in self.decls.drain(n..) {
                if let Some(name) = decl.split_whitespace().nth(1) {
                    self.real_vars.remove(name);
                }
            }
        }
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => Ok(SatResult::Sat),
            Z3SatResult::Unsat => Ok(SatResult::Unsat),
            Z3SatResult::Unknown => Ok(SatResult::Unknown(
                self.solver
                    .get_reason_unknown()
                    .unwrap_or_else(|| "Z3 returned unknown".into()),
            )),
        }
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Z3Error> {
        let result = self.check_sat()?;
        if result != SatResult::Sat {
            return Ok((result, None));
        }
        let z3_model = self
            .solver
            .get_model()
            .ok_or_else(|| Z3Error::Internal("SAT but no model available".into()))?;
        let mut values = HashMap::new();
        for &(name, _) in var_names {
            let var = self
                .real_vars
                .get(name)
                .ok_or_else(|| Z3Error::UnknownVariable(name.to_string()))?;
            if let Some(v) = Self::model_value(&z3_model, var) {
                values.insert(name.to_string(), ModelValue::Real(v));
            }
        }
        Ok((SatResult::Sat, Some(Model { values })))
    }

    fn reset(&mut self) -> Result<(), Z3Error> {
        self.solver.reset();
        // Z3 may drop per-solver parameters on reset; reapply timeout if configured.
        if let Some(params) = &self._params {
            self.solver.set_params(params);
        }
        self.real_vars.clear();
        self.decls.clear();
        self.scopes.clear();
        Ok(())
    }
}

/// Parse a Z3 real numeral: `1.5`, `0.3333?`, `(- 2.0)`, `(/ 1.0 3.0)`.
pub(crate) fn parse_z3_real(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        let inner = inner.trim();
        if let Some(rest) = inner.strip_prefix("- ") {
            return parse_z3_real(rest).map(|v| -v);
        }
        if let Some(rest) = inner.strip_prefix("/ ") {
            let (num, den) = split_operands(rest)?;
            return Some(parse_z3_real(num)? / parse_z3_real(den)?);
        }
        return None;
    }
    text.trim_end_matches('?').parse().ok()
}

/// Split `a b` where either side may be parenthesised.
fn split_operands(text: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1)?,
            ' ' if depth == 0 => return Some((&text[..i], text[i + 1..].trim())),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_z3_real_forms() {
        assert_eq!(parse_z3_real("1.5"), Some(1.5));
        assert_eq!(parse_z3_real("0.25?"), Some(0.25));
        assert_eq!(parse_z3_real("(- 2.0)"), Some(-2.0));
        assert_eq!(parse_z3_real("(/ 1.0 4.0)"), Some(0.25));
        assert_eq!(parse_z3_real("(/ (- 1.0) 4.0)"), Some(-0.25));
        assert_eq!(parse_z3_real("(root-obj x 1)"), None);
    }

    #[test]
    fn z3_nonlinear_sat_with_model() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("x", &SmtSort::Real)?;
        solver.declare_var("y", &SmtSort::Real)?;
        let x = SmtTerm::var("x");
        let y = SmtTerm::var("y");
        solver.assert(&(x.clone() * y.clone()).gt(SmtTerm::one()))?;
        solver.assert(&x.clone().lt(SmtTerm::int(2)))?;
        solver.assert(&x.clone().gt(SmtTerm::zero()))?;
        let (sat, model) = solver.check_sat_with_model(&[("x", &SmtSort::Real), ("y", &SmtSort::Real)])?;
        assert_eq!(sat, SatResult::Sat);
        let model = model.ok_or("model expected")?;
        let (xv, yv) = (
            model.get_real("x").ok_or("x")?,
            model.get_real("y").ok_or("y")?,
        );
        assert!(xv * yv > 1.0 - 1e-9);
        Ok(())
    }

    #[test]
    fn z3_positive_definite_quadratic_unsat() -> TestResult {
        let mut solver = Z3Solver::with_timeout_secs(10);
        solver.declare_var("x", &SmtSort::Real)?;
        solver.declare_var("y", &SmtSort::Real)?;
        let x = SmtTerm::var("x");
        let y = SmtTerm::var("y");
        let v = x.clone().powi(2) + y.clone().powi(2);
        solver.assert(&v.clone().gt(SmtTerm::zero()))?;
        solver.assert(&(v + x * y).le(SmtTerm::zero()))?;
        assert_eq!(solver.check_sat()?, SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn z3_rejects_transcendental_terms() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("x", &SmtSort::Real)?;
        let err = solver.assert(&SmtTerm::var("x").exp().gt(SmtTerm::one()));
        assert!(matches!(err, Err(Z3Error::NonPolynomial(_))));
        Ok(())
    }

    #[test]
    fn z3_timeout_configuration_survives_reset() -> TestResult {
        let mut solver = Z3Solver::with_timeout_secs(2);
        assert!(solver._params.is_some());
        solver.declare_var("x", &SmtSort::Real)?;
        solver.assert(&SmtTerm::var("x").eq(SmtTerm::one()))?;
        assert_eq!(solver.check_sat()?, SatResult::Sat);

        solver.reset()?;
        solver.declare_var("x", &SmtSort::Real)?;
        solver.assert(&SmtTerm::var("x").eq(SmtTerm::int(2)))?;
        assert_eq!(solver.check_sat()?, SatResult::Sat);
        assert!(solver._params.is_some());
        Ok(())
    }

    #[test]
    fn z3_push_pop_scopes_assertions() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("x", &SmtSort::Real)?;
        solver.assert(&SmtTerm::var("x").ge(SmtTerm::zero()))?;
        solver.push()?;
        solver.assert(&SmtTerm::var("x").lt(SmtTerm::zero()))?;
        assert_eq!(solver.check_sat()?, SatResult::Unsat);
        solver.pop()?;
        assert_eq!(solver.check_sat()?, SatResult::Sat);
        Ok(())
    }
}
