//! Branch-and-prune satisfiability over bounded real boxes.
//!
//! The search is δ-complete in the dReal sense: `Unsat` is a proof that
//! no point of the box satisfies the assertions, while `Sat` comes with a
//! witness that satisfies every inequality exactly and every equality up
//! to [`IntervalConfig::equality_tolerance`]. Boxes that shrink below
//! [`IntervalConfig::precision`] without being decided make the answer
//! `Unknown`, never `Unsat`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use num::traits::{Signed, ToPrimitive, Zero};
use num::rational::BigRational;
use thiserror::Error;
use tracing::{debug, trace};

use crate::interval::{next_down, next_up, Interval, Truth};
use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::{Func, SmtTerm, TermError};

/// Reason string reported when the wall-clock budget runs out.
pub const UNKNOWN_TIMEOUT: &str = "timeout";
/// Reason prefix reported when boxes stay undecided at full precision.
pub const UNKNOWN_PRECISION: &str = "precision";
/// Reason prefix reported when the box budget runs out.
pub const UNKNOWN_BOX_BUDGET: &str = "box budget";

#[derive(Debug, Error)]
pub enum IntervalError {
    #[error("unsupported sort {0} for variable {1}")]
    UnsupportedSort(SmtSort, String),
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("variable {0} has no finite bounds")]
    Unbounded(String),
    #[error("no scope to pop")]
    EmptyScope,
    #[error(transparent)]
    Term(#[from] TermError),
}

/// Search limits for [`IntervalSolver`].
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalConfig {
    /// Boxes narrower than this in every dimension are not split further.
    pub precision: f64,
    /// Slack allowed when checking an equality at a witness point.
    pub equality_tolerance: f64,
    /// Upper bound on the number of boxes examined by one check.
    pub max_boxes: usize,
    /// Wall-clock budget for one check.
    pub timeout: Option<Duration>,
    /// Tighten atom enclosures with the mean-value form.
    pub mean_value: bool,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            precision: 1e-4,
            equality_tolerance: 1e-3,
            max_boxes: 5_000_000,
            timeout: None,
            mean_value: true,
        }
    }
}

/// Counters from the most recent check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub boxes: usize,
    pub pruned: usize,
    pub undecided: usize,
}

/// Arithmetic compiled against variable indices.
#[derive(Debug, Clone)]
enum Node {
    Var(usize),
    Const { enclosure: Interval, value: f64 },
    Add(Vec<Node>),
    Mul(Vec<Node>),
    Neg(Box<Node>),
    Div(Box<Node>, Box<Node>),
    Pow(Box<Node>, u32),
    App(Func, Box<Node>),
}

impl Node {
    fn enclose(&self, bx: &[Interval]) -> Interval {
        match self {
            Node::Var(i) => bx[*i],
            Node::Const { enclosure, .. } => *enclosure,
            Node::Add(ns) => ns
                .iter()
                .fold(Interval::point(0.0), |acc, n| acc.add(&n.enclose(bx))),
            Node::Mul(ns) => ns
                .iter()
                .fold(Interval::point(1.0), |acc, n| acc.mul(&n.enclose(bx))),
            Node::Neg(n) => n.enclose(bx).neg(),
            Node::Div(a, b) => a.enclose(bx).div(&b.enclose(bx)),
            Node::Pow(n, k) => n.enclose(bx).powi(*k),
            Node::App(f, n) => {
                let x = n.enclose(bx);
                match f {
                    Func::Exp => x.exp(),
                    Func::Log => x.ln(),
                    Func::Sin => x.sin(),
                    Func::Cos => x.cos(),
                    Func::Tanh => x.tanh(),
                    Func::Sigmoid => x.sigmoid(),
                    Func::Sqrt => x.sqrt(),
                }
            }
        }
    }

    fn value(&self, x: &[f64]) -> f64 {
        match self {
            Node::Var(i) => x[*i],
            Node::Const { value, .. } => *value,
            Node::Add(ns) => ns.iter().map(|n| n.value(x)).sum(),
            Node::Mul(ns) => ns.iter().map(|n| n.value(x)).product(),
            Node::Neg(n) => -n.value(x),
            Node::Div(a, b) => a.value(x) / b.value(x),
            Node::Pow(n, k) => {
                let base = n.value(x);
                (0..*k).fold(1.0, |acc, _| acc * base)
            }
            Node::App(f, n) => f.apply(n.value(x)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rel {
    Lt,
    Le,
    Eq,
    Ne,
}

/// Atom `expr REL 0` plus the gradient of `expr` for the mean-value form.
#[derive(Debug, Clone)]
struct Atom {
    rel: Rel,
    expr: Node,
    gradient: Option<Vec<Node>>,
}

/// Constraint in negation normal form.
#[derive(Debug, Clone)]
enum Constraint {
    Const(bool),
    Atom(Atom),
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
}

struct Compiler<'a> {
    index: &'a HashMap<String, usize>,
    names: &'a [String],
    mean_value: bool,
}

impl Compiler<'_> {
    fn arith(&self, term: &SmtTerm) -> Result<Node, IntervalError> {
        Ok(match term {
            SmtTerm::Var(name) => Node::Var(
                *self
                    .index
                    .get(name)
                    .ok_or_else(|| IntervalError::UnknownVariable(name.clone()))?,
            ),
            SmtTerm::RealLit(c) => constant_node(c),
            SmtTerm::Add(ts) => Node::Add(ts.iter().map(|t| self.arith(t)).collect::<Result<_, _>>()?),
            SmtTerm::Mul(ts) => Node::Mul(ts.iter().map(|t| self.arith(t)).collect::<Result<_, _>>()?),
            SmtTerm::Neg(t) => Node::Neg(Box::new(self.arith(t)?)),
            SmtTerm::Div(a, b) => Node::Div(Box::new(self.arith(a)?), Box::new(self.arith(b)?)),
            SmtTerm::Pow(t, n) => Node::Pow(Box::new(self.arith(t)?), *n),
            SmtTerm::App(f, t) => Node::App(*f, Box::new(self.arith(t)?)),
            other => return Err(TermError::NotArithmetic(other.to_string()).into()),
        })
    }

    fn atom(&self, lhs: &SmtTerm, rhs: &SmtTerm, rel: Rel, flip: bool) -> Result<Constraint, IntervalError> {
        let diff = if flip {
            rhs.clone() - lhs.clone()
        } else {
            lhs.clone() - rhs.clone()
        };
        if let Some(c) = diff.as_rational() {
            let holds = match rel {
                Rel::Lt => c.is_negative(),
                Rel::Le => !c.is_positive(),
                Rel::Eq => c.is_zero(),
                Rel::Ne => !c.is_zero(),
            };
            return Ok(Constraint::Const(holds));
        }
        let expr = self.arith(&diff)?;
        let gradient = if self.mean_value {
            match diff.gradient(self.names) {
                Ok(partials) => Some(
                    partials
                        .iter()
                        .map(|p| self.arith(p))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                Err(_) => None,
            }
        } else {
            None
        };
        Ok(Constraint::Atom(Atom { rel, expr, gradient }))
    }

    /// Compile `term` (or its negation when `negate`) into NNF.
    fn constraint(&self, term: &SmtTerm, negate: bool) -> Result<Constraint, IntervalError> {
        Ok(match (term, negate) {
            (SmtTerm::BoolLit(b), _) => Constraint::Const(*b != negate),
            (SmtTerm::Not(t), _) => self.constraint(t, !negate)?,
            (SmtTerm::And(ts), false) | (SmtTerm::Or(ts), true) => Constraint::And(
                ts.iter()
                    .map(|t| self.constraint(t, negate))
                    .collect::<Result<_, _>>()?,
            ),
            (SmtTerm::Or(ts), false) | (SmtTerm::And(ts), true) => Constraint::Or(
                ts.iter()
                    .map(|t| self.constraint(t, negate))
                    .collect::<Result<_, _>>()?,
            ),
            (SmtTerm::Implies(a, b), false) => {
                Constraint::Or(vec![self.constraint(a, true)?, self.constraint(b, false)?])
            }
            (SmtTerm::Implies(a, b), true) => {
                Constraint::And(vec![self.constraint(a, false)?, self.constraint(b, true)?])
            }
            // a < b  <=>  a - b < 0;  not(a < b)  <=>  b - a <= 0
            (SmtTerm::Lt(a, b), false) => self.atom(a, b, Rel::Lt, false)?,
            (SmtTerm::Lt(a, b), true) => self.atom(a, b, Rel::Le, true)?,
            (SmtTerm::Le(a, b), false) => self.atom(a, b, Rel::Le, false)?,
            (SmtTerm::Le(a, b), true) => self.atom(a, b, Rel::Lt, true)?,
            (SmtTerm::Gt(a, b), false) => self.atom(a, b, Rel::Lt, true)?,
            (SmtTerm::Gt(a, b), true) => self.atom(a, b, Rel::Le, false)?,
            (SmtTerm::Ge(a, b), false) => self.atom(a, b, Rel::Le, true)?,
            (SmtTerm::Ge(a, b), true) => self.atom(a, b, Rel::Lt, false)?,
            (SmtTerm::Eq(a, b), false) => self.atom(a, b, Rel::Eq, false)?,
            (SmtTerm::Eq(a, b), true) => self.atom(a, b, Rel::Ne, false)?,
            (other, _) => return Err(TermError::NotBoolean(other.to_string()).into()),
        })
    }
}

fn constant_node(c: &BigRational) -> Node {
    let value = c.to_f64().unwrap_or(f64::NAN);
    let exact = BigRational::from_float(value).is_some_and(|r| &r == c);
    let enclosure = if exact {
        Interval::point(value)
    } else {
        Interval::new(next_down(value), next_up(value))
    };
    Node::Const { enclosure, value }
}

impl Atom {
    fn truth(&self, bx: &[Interval], mean_value: bool) -> Truth {
        let natural = self.expr.enclose(bx);
        let t = classify(self.rel, &natural);
        if t != Truth::Unknown || !mean_value {
            return t;
        }
        match &self.gradient {
            Some(gradient) => {
                let mv = mean_value_form(&self.expr, gradient, bx);
                classify(self.rel, &natural.meet(&mv))
            }
            None => t,
        }
    }

    fn holds_at(&self, x: &[f64], tolerance: f64) -> bool {
        let v = self.expr.value(x);
        match self.rel {
            Rel::Lt => v < 0.0,
            Rel::Le => v <= 0.0,
            Rel::Eq => v.abs() <= tolerance,
            Rel::Ne => v != 0.0,
        }
    }
}

fn classify(rel: Rel, iv: &Interval) -> Truth {
    if iv.lo.is_nan() || iv.hi.is_nan() {
        return Truth::Unknown;
    }
    match rel {
        Rel::Lt => iv.lt_zero(),
        Rel::Le => iv.le_zero(),
        Rel::Eq => iv.eq_zero(),
        Rel::Ne => match iv.eq_zero() {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        },
    }
}

/// `f(c) + Σ ∂f/∂x_i(B) · (B_i - c_i)` with `c` the box midpoint.
fn mean_value_form(expr: &Node, gradient: &[Node], bx: &[Interval]) -> Interval {
    let centre: Vec<Interval> = bx.iter().map(|iv| Interval::point(iv.mid())).collect();
    let mut acc = expr.enclose(&centre);
    for (i, partial) in gradient.iter().enumerate() {
        let slope = partial.enclose(bx);
        let offset = bx[i].sub(&centre[i]);
        acc = acc.add(&slope.mul(&offset));
    }
    acc
}

impl Constraint {
    fn truth(&self, bx: &[Interval], mean_value: bool) -> Truth {
        match self {
            Constraint::Const(b) => {
                if *b {
                    Truth::True
                } else {
                    Truth::False
                }
            }
            Constraint::Atom(a) => a.truth(bx, mean_value),
            Constraint::And(cs) => {
                let mut acc = Truth::True;
                for c in cs {
                    acc = acc.and(c.truth(bx, mean_value));
                    if acc == Truth::False {
                        break;
                    }
                }
                acc
            }
            Constraint::Or(cs) => {
                let mut acc = Truth::False;
                for c in cs {
                    acc = acc.or(c.truth(bx, mean_value));
                    if acc == Truth::True {
                        break;
                    }
                }
                acc
            }
        }
    }

    fn holds_at(&self, x: &[f64], tolerance: f64) -> bool {
        match self {
            Constraint::Const(b) => *b,
            Constraint::Atom(a) => a.holds_at(x, tolerance),
            Constraint::And(cs) => cs.iter().all(|c| c.holds_at(x, tolerance)),
            Constraint::Or(cs) => cs.iter().any(|c| c.holds_at(x, tolerance)),
        }
    }
}

enum Search {
    Unsat,
    Sat(Vec<f64>),
    Unknown(String),
}

/// Self-contained δ-complete solver for bounded real constraints.
pub struct IntervalSolver {
    config: IntervalConfig,
    vars: Vec<String>,
    bounds: HashMap<String, (f64, f64)>,
    assertions: Vec<SmtTerm>,
    scopes: Vec<(usize, usize)>,
    witness: Option<Vec<f64>>,
    stats: SearchStats,
}

impl Default for IntervalSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalSolver {
    pub fn new() -> Self {
        Self::with_config(IntervalConfig::default())
    }

    pub fn with_config(config: IntervalConfig) -> Self {
        Self {
            config,
            vars: Vec::new(),
            bounds: HashMap::new(),
            assertions: Vec::new(),
            scopes: Vec::new(),
            witness: None,
            stats: SearchStats::default(),
        }
    }

    pub fn with_timeout_secs(timeout_secs: u64) -> Self {
        let mut config = IntervalConfig::default();
        if timeout_secs > 0 {
            config.timeout = Some(Duration::from_secs(timeout_secs));
        }
        Self::with_config(config)
    }

    pub fn config(&self) -> &IntervalConfig {
        &self.config
    }

    pub fn last_stats(&self) -> &SearchStats {
        &self.stats
    }

    fn initial_box(&self) -> Result<Vec<Interval>, IntervalError> {
        self.vars
            .iter()
            .map(|name| match self.bounds.get(name) {
                Some(&(lo, hi)) if lo.is_finite() && hi.is_finite() => Ok(Interval::new(lo, hi)),
                _ => Err(IntervalError::Unbounded(name.clone())),
            })
            .collect()
    }

    fn compile(&self) -> Result<Constraint, IntervalError> {
        let index: HashMap<String, usize> = self
            .vars
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        let compiler = Compiler {
            index: &index,
            names: &self.vars,
            mean_value: self.config.mean_value,
        };
        let parts = self
            .assertions
            .iter()
            .map(|a| compiler.constraint(a, false))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Constraint::And(parts))
    }

    fn search(&mut self, formula: &Constraint, root: Vec<Interval>) -> Search {
        let started = Instant::now();
        let deadline = self.config.timeout.map(|t| started + t);
        let tol = self.config.equality_tolerance;
        let mv = self.config.mean_value;
        let mut stats = SearchStats::default();
        let mut stack = vec![root];
        let mut outcome = None;

        while let Some(bx) = stack.pop() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                outcome = Some(Search::Unknown(UNKNOWN_TIMEOUT.to_string()));
                break;
            }
            if stats.boxes >= self.config.max_boxes {
                outcome = Some(Search::Unknown(format!(
                    "{UNKNOWN_BOX_BUDGET}: {} boxes examined",
                    stats.boxes
                )));
                break;
            }
            stats.boxes += 1;
            match formula.truth(&bx, mv) {
                Truth::False => stats.pruned += 1,
                Truth::True => {
                    outcome = Some(Search::Sat(bx.iter().map(Interval::mid).collect()));
                    break;
                }
                Truth::Unknown => {
                    let centre: Vec<f64> = bx.iter().map(Interval::mid).collect();
                    if formula.holds_at(&centre, tol) {
                        outcome = Some(Search::Sat(centre));
                        break;
                    }
                    let widest = bx
                        .iter()
                        .enumerate()
                        .max_by(|(_, a), (_, b)| a.width().total_cmp(&b.width()))
                        .map(|(i, _)| i);
                    match widest {
                        Some(i) if bx[i].width() > self.config.precision => {
                            let (lower, upper) = bx[i].bisect();
                            let mut right = bx.clone();
                            right[i] = upper;
                            let mut left = bx;
                            left[i] = lower;
                            stack.push(right);
                            stack.push(left);
                        }
                        _ => stats.undecided += 1,
                    }
                }
            }
        }

        let outcome = outcome.unwrap_or_else(|| {
            if stats.undecided > 0 {
                Search::Unknown(format!(
                    "{UNKNOWN_PRECISION}: {} boxes undecided at width {}",
                    stats.undecided, self.config.precision
                ))
            } else {
                Search::Unsat
            }
        });
        debug!(
            boxes = stats.boxes,
            pruned = stats.pruned,
            undecided = stats.undecided,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "interval search finished"
        );
        self.stats = stats;
        outcome
    }

    fn run(&mut self) -> Result<SatResult, IntervalError> {
        self.witness = None;
        let root = self.initial_box()?;
        let formula = self.compile()?;
        trace!(vars = self.vars.len(), assertions = self.assertions.len(), "interval check");
        Ok(match self.search(&formula, root) {
            Search::Unsat => SatResult::Unsat,
            Search::Sat(point) => {
                self.witness = Some(point);
                SatResult::Sat
            }
            Search::Unknown(reason) => SatResult::Unknown(reason),
        })
    }
}

impl SmtSolver for IntervalSolver {
    type Error = IntervalError;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), IntervalError> {
        if *sort != SmtSort::Real {
            return Err(IntervalError::UnsupportedSort(*sort, name.to_string()));
        }
        if !self.vars.iter().any(|v| v == name) {
            self.vars.push(name.to_string());
        }
        Ok(())
    }

    fn bound_var(&mut self, name: &str, lower: f64, upper: f64) -> Result<(), IntervalError> {
        if !self.vars.iter().any(|v| v == name) {
            return Err(IntervalError::UnknownVariable(name.to_string()));
        }
        let (lo, hi) = if lower <= upper { (lower, upper) } else { (upper, lower) };
        self.bounds.insert(name.to_string(), (lo, hi));
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), IntervalError> {
        if term.sort() != SmtSort::Bool {
            return Err(TermError::NotBoolean(term.to_string()).into());
        }
        self.assertions.push(term.clone());
        Ok(())
    }

    fn push(&mut self) -> Result<(), IntervalError> {
        self.scopes.push((self.vars.len(), self.assertions.len()));
        Ok(())
    }

    fn pop(&mut self) -> Result<(), IntervalError> {
        let (vars, assertions) = self.scopes.pop().ok_or(IntervalError::EmptyScope)?;
        for name in self.vars.drain(vars..) {
            self.bounds.remove(&name);
        }
        self.assertions.truncate(assertions);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, IntervalError> {
        self.run()
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), IntervalError> {
        let result = self.run()?;
        let model = match (&result, &self.witness) {
            (SatResult::Sat, Some(point)) => {
                let mut values = HashMap::new();
                for (name, _) in var_names {
                    let i = self
                        .vars
                        .iter()
                        .position(|v| v == name)
                        .ok_or_else(|| IntervalError::UnknownVariable(name.to_string()))?;
                    values.insert(name.to_string(), ModelValue::Real(point[i]));
                }
                Some(Model { values })
            }
            _ => None,
        };
        Ok((result, model))
    }

    fn reset(&mut self) -> Result<(), IntervalError> {
        self.vars.clear();
        self.bounds.clear();
        self.assertions.clear();
        self.scopes.clear();
        self.witness = None;
        self.stats = SearchStats::default();
        Ok(())
    }
}
