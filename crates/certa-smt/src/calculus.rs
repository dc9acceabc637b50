//! Symbolic differentiation, substitution and simplification of real terms.

use std::collections::HashMap;

use crate::terms::{Func, SmtTerm, TermError};

impl SmtTerm {
    /// Partial derivative with respect to `var`.
    ///
    /// The result is built through the normalising constructors, so
    /// derivatives of polynomials come back as flattened polynomials.
    pub fn derivative(&self, var: &str) -> Result<SmtTerm, TermError> {
        Ok(match self {
            SmtTerm::Var(name) if name == var => SmtTerm::one(),
            SmtTerm::Var(_) | SmtTerm::RealLit(_) => SmtTerm::zero(),
            SmtTerm::Add(ts) => {
                let mut parts = Vec::with_capacity(ts.len());
                for t in ts {
                    parts.push(t.derivative(var)?);
                }
                SmtTerm::sum(parts)
            }
            SmtTerm::Mul(ts) => {
                let mut parts = Vec::with_capacity(ts.len());
                for (i, t) in ts.iter().enumerate() {
                    let dt = t.derivative(var)?;
                    if dt.is_zero() {
                        continue;
                    }
                    let others = ts
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, u)| u.clone());
                    parts.push(SmtTerm::product(others.chain(std::iter::once(dt))));
                }
                SmtTerm::sum(parts)
            }
            SmtTerm::Neg(t) => -t.derivative(var)?,
            SmtTerm::Div(a, b) => {
                let da = a.derivative(var)?;
                let db = b.derivative(var)?;
                let numer = da * (**b).clone() - (**a).clone() * db;
                numer / (**b).clone().powi(2)
            }
            SmtTerm::Pow(_, 0) => SmtTerm::zero(),
            SmtTerm::Pow(t, n) => {
                let dt = t.derivative(var)?;
                SmtTerm::product([SmtTerm::int(i64::from(*n)), (**t).clone().powi(n - 1), dt])
            }
            SmtTerm::App(func, t) => {
                let dt = t.derivative(var)?;
                if dt.is_zero() {
                    return Ok(SmtTerm::zero());
                }
                let arg = (**t).clone();
                let outer = match func {
                    Func::Exp => arg.exp(),
                    Func::Log => SmtTerm::one() / arg,
                    Func::Sin => arg.cos(),
                    Func::Cos => -arg.sin(),
                    Func::Tanh => SmtTerm::one() - arg.tanh().powi(2),
                    Func::Sigmoid => {
                        let s = arg.sigmoid();
                        s.clone() * (SmtTerm::one() - s)
                    }
                    Func::Sqrt => SmtTerm::one() / (SmtTerm::int(2) * arg.sqrt()),
                };
                outer * dt
            }
            other => return Err(TermError::NotArithmetic(other.to_string())),
        })
    }

    /// Gradient with respect to each of `vars`, in order.
    pub fn gradient(&self, vars: &[String]) -> Result<Vec<SmtTerm>, TermError> {
        vars.iter().map(|v| self.derivative(v)).collect()
    }

    /// Replace variables by terms. Unmapped variables are kept.
    pub fn substitute(&self, map: &HashMap<String, SmtTerm>) -> SmtTerm {
        self.rebuild(&|name| map.get(name).cloned())
    }

    /// Bring a term into the normal form produced by the constructors.
    pub fn simplify(&self) -> SmtTerm {
        self.rebuild(&|_| None)
    }

    fn rebuild<F>(&self, leaf: &F) -> SmtTerm
    where
        F: Fn(&str) -> Option<SmtTerm>,
    {
        match self {
            SmtTerm::Var(name) => leaf(name).unwrap_or_else(|| self.clone()),
            SmtTerm::RealLit(_) | SmtTerm::BoolLit(_) => self.clone(),
            SmtTerm::Add(ts) => SmtTerm::sum(ts.iter().map(|t| t.rebuild(leaf))),
            SmtTerm::Mul(ts) => SmtTerm::product(ts.iter().map(|t| t.rebuild(leaf))),
            SmtTerm::Neg(t) => -t.rebuild(leaf),
            SmtTerm::Div(a, b) => a.rebuild(leaf) / b.rebuild(leaf),
            SmtTerm::Pow(t, n) => t.rebuild(leaf).powi(*n),
            SmtTerm::App(f, t) => SmtTerm::app(*f, t.rebuild(leaf)),
            SmtTerm::Eq(a, b) => a.rebuild(leaf).eq(b.rebuild(leaf)),
            SmtTerm::Lt(a, b) => a.rebuild(leaf).lt(b.rebuild(leaf)),
            SmtTerm::Le(a, b) => a.rebuild(leaf).le(b.rebuild(leaf)),
            SmtTerm::Gt(a, b) => a.rebuild(leaf).gt(b.rebuild(leaf)),
            SmtTerm::Ge(a, b) => a.rebuild(leaf).ge(b.rebuild(leaf)),
            SmtTerm::And(ts) => SmtTerm::and(ts.iter().map(|t| t.rebuild(leaf)).collect()),
            SmtTerm::Or(ts) => SmtTerm::or(ts.iter().map(|t| t.rebuild(leaf)).collect()),
            SmtTerm::Not(t) => t.rebuild(leaf).not(),
            SmtTerm::Implies(a, b) => a.rebuild(leaf).implies(b.rebuild(leaf)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> SmtTerm {
        SmtTerm::var("x")
    }

    fn y() -> SmtTerm {
        SmtTerm::var("y")
    }

    fn at(t: &SmtTerm, xv: f64, yv: f64) -> f64 {
        let env = |name: &str| match name {
            "x" => Some(xv),
            "y" => Some(yv),
            _ => None,
        };
        t.eval_real(&env).expect("all variables bound")
    }

    #[test]
    fn derivative_of_polynomial_is_exact() {
        let p = x().powi(3) + SmtTerm::int(2) * x() * y() - y();
        let dx = p.derivative("x").expect("arithmetic");
        let expected = SmtTerm::int(3) * x().powi(2) + SmtTerm::int(2) * y();
        assert_eq!(dx.simplify(), expected.simplify());
        assert!((at(&dx, 1.5, -2.0) - (3.0 * 2.25 - 4.0)).abs() < 1e-12);
    }

    #[test]
    fn derivative_of_constant_and_other_variable_is_zero() {
        assert!(SmtTerm::int(7).derivative("x").expect("arithmetic").is_zero());
        assert!(y().derivative("x").expect("arithmetic").is_zero());
    }

    #[test]
    fn chain_rule_through_elementary_functions() {
        let cases: [(SmtTerm, fn(f64) -> f64); 6] = [
            (x().exp(), |v: f64| v.exp()),
            (x().sin(), |v: f64| v.cos()),
            (x().cos(), |v: f64| -v.sin()),
            (x().tanh(), |v: f64| 1.0 - v.tanh().powi(2)),
            (x().log(), |v: f64| 1.0 / v),
            (x().sqrt(), |v: f64| 0.5 / v.sqrt()),
        ];
        for (term, expected) in cases {
            let d = term.derivative("x").expect("arithmetic");
            let v = 0.7;
            assert!(
                (at(&d, v, 0.0) - expected(v)).abs() < 1e-12,
                "derivative of {term} wrong"
            );
        }
    }

    #[test]
    fn sigmoid_derivative_matches_finite_difference() {
        let t = (SmtTerm::int(2) * x()).sigmoid();
        let d = t.derivative("x").expect("arithmetic");
        let h = 1e-6;
        let fd = (at(&t, 0.3 + h, 0.0) - at(&t, 0.3 - h, 0.0)) / (2.0 * h);
        assert!((at(&d, 0.3, 0.0) - fd).abs() < 1e-6);
    }

    #[test]
    fn quotient_rule() {
        let t = x() / (y() + SmtTerm::int(2));
        let dy = t.derivative("y").expect("arithmetic");
        assert!((at(&dy, 3.0, 1.0) - (-3.0 / 9.0)).abs() < 1e-12);
    }

    #[test]
    fn derivative_rejects_boolean_terms() {
        assert!(x().gt(y()).derivative("x").is_err());
    }

    #[test]
    fn gradient_orders_partials_like_the_variables() {
        let t = x() * y();
        let grad = t.gradient(&["x".into(), "y".into()]).expect("arithmetic");
        assert_eq!(grad, vec![y(), x()]);
    }

    #[test]
    fn substitute_composes_terms() {
        let mut map = HashMap::new();
        map.insert("x".to_string(), y() + SmtTerm::one());
        let t = (SmtTerm::int(2) * x() - SmtTerm::int(2)).substitute(&map);
        assert_eq!(t, SmtTerm::int(2) * y());
    }

    #[test]
    fn simplify_normalises_raw_variants() {
        let raw = SmtTerm::Add(vec![
            SmtTerm::Mul(vec![SmtTerm::int(1), x()]),
            SmtTerm::Neg(Box::new(x())),
            SmtTerm::Add(vec![y(), SmtTerm::int(0)]),
        ]);
        assert_eq!(raw.simplify(), y());
    }
}
