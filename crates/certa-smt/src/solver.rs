use std::collections::HashMap;

use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq)]
pub enum SatResult {
    Sat,
    Unsat,
    /// The backend gave up; the string says why (timeout, precision, ...).
    Unknown(String),
}

/// A model (variable assignments) extracted from a SAT result.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub values: HashMap<String, ModelValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelValue {
    Real(f64),
    Bool(bool),
}

impl Model {
    pub fn get_real(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ModelValue::Real(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ModelValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Real values for `names` in order, or `None` if any is missing.
    pub fn point(&self, names: &[String]) -> Option<Vec<f64>> {
        names.iter().map(|n| self.get_real(n)).collect()
    }
}

/// Abstract SMT solver interface.
pub trait SmtSolver {
    type Error: std::error::Error;

    /// Declare a new variable.
    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Self::Error>;

    /// Restrict a real variable to `[lower, upper]`.
    ///
    /// Search-based backends need a bounded box; others may ignore the hint
    /// because the bounds are also part of the asserted constraints.
    fn bound_var(&mut self, _name: &str, _lower: f64, _upper: f64) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Assert a constraint.
    fn assert(&mut self, term: &SmtTerm) -> Result<(), Self::Error>;

    /// Push a new scope.
    fn push(&mut self) -> Result<(), Self::Error>;

    /// Pop a scope.
    fn pop(&mut self) -> Result<(), Self::Error>;

    /// Check satisfiability.
    fn check_sat(&mut self) -> Result<SatResult, Self::Error>;

    /// Check satisfiability and extract a model if SAT.
    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Self::Error>;

    /// Reset the solver state.
    fn reset(&mut self) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;

    struct MockSolver {
        sat_result: SatResult,
        asserted: Vec<SmtTerm>,
        reset_calls: usize,
    }

    impl MockSolver {
        fn new(sat_result: SatResult) -> Self {
            Self {
                sat_result,
                asserted: Vec::new(),
                reset_calls: 0,
            }
        }
    }

    impl SmtSolver for MockSolver {
        type Error = io::Error;

        fn declare_var(&mut self, _name: &str, _sort: &SmtSort) -> Result<(), Self::Error> {
            Ok(())
        }

        fn assert(&mut self, term: &SmtTerm) -> Result<(), Self::Error> {
            self.asserted.push(term.clone());
            Ok(())
        }

        fn push(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn pop(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn check_sat(&mut self) -> Result<SatResult, Self::Error> {
            Ok(self.sat_result.clone())
        }

        fn check_sat_with_model(
            &mut self,
            _var_names: &[(&str, &SmtSort)],
        ) -> Result<(SatResult, Option<Model>), Self::Error> {
            Ok((self.sat_result.clone(), None))
        }

        fn reset(&mut self) -> Result<(), Self::Error> {
            self.reset_calls += 1;
            self.asserted.clear();
            Ok(())
        }
    }

    #[test]
    fn model_getters_return_typed_values_only() {
        let mut values = HashMap::new();
        values.insert("x".to_string(), ModelValue::Real(0.25));
        values.insert("flag".to_string(), ModelValue::Bool(true));
        let model = Model { values };

        assert_eq!(model.get_real("x"), Some(0.25));
        assert_eq!(model.get_bool("flag"), Some(true));
        assert_eq!(model.get_real("flag"), None);
        assert_eq!(model.get_bool("x"), None);
        assert_eq!(model.get_real("missing"), None);
    }

    #[test]
    fn model_point_requires_every_name() {
        let mut values = HashMap::new();
        values.insert("x0".to_string(), ModelValue::Real(1.0));
        values.insert("x1".to_string(), ModelValue::Real(-2.0));
        let model = Model { values };

        assert_eq!(
            model.point(&["x0".into(), "x1".into()]),
            Some(vec![1.0, -2.0])
        );
        assert_eq!(model.point(&["x0".into(), "x2".into()]), None);
    }

    #[test]
    fn default_bound_hint_is_accepted_and_reset_is_callable() {
        let mut solver = MockSolver::new(SatResult::Unknown("timeout".to_string()));
        solver.bound_var("x", -1.0, 1.0).expect("default hint is a no-op");
        solver
            .assert(&SmtTerm::var("x").gt(SmtTerm::zero()))
            .expect("assert should succeed");
        assert_eq!(solver.asserted.len(), 1);

        solver.reset().expect("reset should succeed");
        assert_eq!(solver.reset_calls, 1);
        assert!(solver.asserted.is_empty());
        assert_eq!(
            solver.check_sat().expect("check should succeed"),
            SatResult::Unknown("timeout".into())
        );
    }
}
