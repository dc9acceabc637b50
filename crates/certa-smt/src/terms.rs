use std::collections::BTreeSet;
use std::fmt;
use std::ops;

use num::bigint::BigInt;
use num::rational::BigRational;
use num::traits::{One, Signed, ToPrimitive, Zero};
use thiserror::Error;

use crate::sorts::SmtSort;

/// Errors raised when a term is used at the wrong sort or evaluated
/// without a complete valuation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TermError {
    #[error("expected an arithmetic term, found `{0}`")]
    NotArithmetic(String),
    #[error("expected a boolean term, found `{0}`")]
    NotBoolean(String),
    #[error("no value bound for variable `{0}`")]
    UnboundVariable(String),
}

/// Elementary functions understood by the real-arithmetic backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Func {
    Exp,
    Log,
    Sin,
    Cos,
    Tanh,
    Sigmoid,
    Sqrt,
}

impl Func {
    pub fn name(self) -> &'static str {
        match self {
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tanh => "tanh",
            Func::Sigmoid => "sigmoid",
            Func::Sqrt => "sqrt",
        }
    }

    pub fn apply(self, x: f64) -> f64 {
        match self {
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tanh => x.tanh(),
            Func::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Func::Sqrt => x.sqrt(),
        }
    }
}

/// Abstract SMT term over the reals, solver-agnostic.
///
/// Arithmetic built through the constructor methods and operator impls is
/// kept in a light normal form: sums and products are flattened, rational
/// constants are folded, and like terms in a sum are merged. Terms built
/// directly from the variants can be brought into the same form with
/// [`SmtTerm::simplify`].
#[derive(Debug, Clone, PartialEq)]
pub enum SmtTerm {
    /// Variable reference by name.
    Var(String),
    /// Exact rational literal.
    RealLit(BigRational),
    /// Boolean literal.
    BoolLit(bool),

    // Arithmetic
    Add(Vec<SmtTerm>),
    Mul(Vec<SmtTerm>),
    Neg(Box<SmtTerm>),
    Div(Box<SmtTerm>, Box<SmtTerm>),
    Pow(Box<SmtTerm>, u32),
    App(Func, Box<SmtTerm>),

    // Comparison
    Eq(Box<SmtTerm>, Box<SmtTerm>),
    Lt(Box<SmtTerm>, Box<SmtTerm>),
    Le(Box<SmtTerm>, Box<SmtTerm>),
    Gt(Box<SmtTerm>, Box<SmtTerm>),
    Ge(Box<SmtTerm>, Box<SmtTerm>),

    // Boolean logic
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Box<SmtTerm>),
    Implies(Box<SmtTerm>, Box<SmtTerm>),
}

/// Exact rational for the shortest decimal that round-trips `value`.
///
/// Returns `None` for NaN and infinities.
pub fn decimal_rational(value: f64) -> Option<BigRational> {
    if !value.is_finite() {
        return None;
    }
    // `Display` for f64 never uses exponent notation.
    let text = value.to_string();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.as_str()),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    let mantissa: BigInt = format!("{whole}{frac}").parse().ok()?;
    let scale = num::pow(BigInt::from(10u32), frac.len());
    let magnitude = BigRational::new(mantissa, scale);
    Some(if negative { -magnitude } else { magnitude })
}

/// Round `value` to `digits` decimal places as an exact rational.
pub fn rounded_rational(value: f64, digits: u32) -> Option<BigRational> {
    if !value.is_finite() {
        return None;
    }
    let scale = 10f64.powi(digits as i32);
    let scaled = (value * scale).round();
    let numer = BigInt::from(scaled as i128);
    let denom = num::pow(BigInt::from(10u32), digits as usize);
    Some(BigRational::new(numer, denom))
}

#[allow(clippy::should_implement_trait)]
impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::Var(name.into())
    }

    pub fn real(value: BigRational) -> Self {
        SmtTerm::RealLit(value)
    }

    pub fn int(n: i64) -> Self {
        SmtTerm::RealLit(BigRational::from_integer(BigInt::from(n)))
    }

    /// Decimal literal for a finite float. Non-finite values map to zero,
    /// so callers must filter them first.
    pub fn num(value: f64) -> Self {
        SmtTerm::RealLit(decimal_rational(value).unwrap_or_else(BigRational::zero))
    }

    pub fn zero() -> Self {
        SmtTerm::RealLit(BigRational::zero())
    }

    pub fn one() -> Self {
        SmtTerm::RealLit(BigRational::one())
    }

    pub fn bool(b: bool) -> Self {
        SmtTerm::BoolLit(b)
    }

    /// Flattened, constant-folded sum with like terms merged.
    pub fn sum(terms: impl IntoIterator<Item = SmtTerm>) -> Self {
        let mut constant = BigRational::zero();
        let mut merged: Vec<(SmtTerm, BigRational)> = Vec::new();
        let mut pending: Vec<SmtTerm> = terms.into_iter().collect();
        pending.reverse();
        while let Some(term) = pending.pop() {
            if let SmtTerm::Add(children) = term {
                pending.extend(children.into_iter().rev());
                continue;
            }
            match split_coefficient(term) {
                (c, None) => constant += c,
                (c, Some(rest)) => match merged.iter_mut().find(|(t, _)| *t == rest) {
                    Some((_, coeff)) => *coeff += c,
                    None => merged.push((rest, c)),
                },
            }
        }
        let mut out: Vec<SmtTerm> = merged
            .into_iter()
            .filter(|(_, c)| !c.is_zero())
            .map(|(t, c)| attach_coefficient(c, t))
            .collect();
        if !constant.is_zero() {
            out.push(SmtTerm::RealLit(constant));
        }
        match out.len() {
            0 => SmtTerm::zero(),
            1 => out.pop().unwrap_or_else(SmtTerm::zero),
            _ => SmtTerm::Add(out),
        }
    }

    /// Flattened, constant-folded product. A constant times a sum is
    /// distributed so affine expressions stay affine.
    pub fn product(terms: impl IntoIterator<Item = SmtTerm>) -> Self {
        let mut constant = BigRational::one();
        let mut factors: Vec<SmtTerm> = Vec::new();
        let mut pending: Vec<SmtTerm> = terms.into_iter().collect();
        pending.reverse();
        while let Some(term) = pending.pop() {
            match term {
                SmtTerm::Mul(children) => pending.extend(children.into_iter().rev()),
                SmtTerm::RealLit(c) => constant *= c,
                SmtTerm::Neg(inner) => {
                    constant = -constant;
                    pending.push(*inner);
                }
                other => factors.push(other),
            }
        }
        if constant.is_zero() {
            return SmtTerm::zero();
        }
        match factors.len() {
            0 => SmtTerm::RealLit(constant),
            1 => {
                let factor = factors.pop().unwrap_or_else(SmtTerm::one);
                scale(constant, factor)
            }
            _ => attach_coefficient(constant, SmtTerm::Mul(factors)),
        }
    }

    pub fn powi(self, n: u32) -> Self {
        match (self, n) {
            (_, 0) => SmtTerm::one(),
            (t, 1) => t,
            (SmtTerm::RealLit(c), n) => SmtTerm::RealLit(num::pow(c, n as usize)),
            (SmtTerm::Pow(base, k), n) => SmtTerm::Pow(base, k * n),
            (t, n) => SmtTerm::Pow(Box::new(t), n),
        }
    }

    pub fn app(func: Func, arg: SmtTerm) -> Self {
        SmtTerm::App(func, Box::new(arg))
    }

    pub fn exp(self) -> Self {
        Self::app(Func::Exp, self)
    }

    pub fn log(self) -> Self {
        Self::app(Func::Log, self)
    }

    pub fn sin(self) -> Self {
        Self::app(Func::Sin, self)
    }

    pub fn cos(self) -> Self {
        Self::app(Func::Cos, self)
    }

    pub fn tanh(self) -> Self {
        Self::app(Func::Tanh, self)
    }

    pub fn sigmoid(self) -> Self {
        Self::app(Func::Sigmoid, self)
    }

    pub fn sqrt(self) -> Self {
        Self::app(Func::Sqrt, self)
    }

    pub fn eq(self, other: SmtTerm) -> Self {
        SmtTerm::Eq(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: SmtTerm) -> Self {
        SmtTerm::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: SmtTerm) -> Self {
        SmtTerm::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: SmtTerm) -> Self {
        SmtTerm::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: SmtTerm) -> Self {
        SmtTerm::Ge(Box::new(self), Box::new(other))
    }

    pub fn and(terms: Vec<SmtTerm>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                SmtTerm::BoolLit(true) => {}
                SmtTerm::BoolLit(false) => return SmtTerm::BoolLit(false),
                SmtTerm::And(children) => flat.extend(children),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => SmtTerm::BoolLit(true),
            1 => flat.pop().unwrap_or(SmtTerm::BoolLit(true)),
            _ => SmtTerm::And(flat),
        }
    }

    pub fn or(terms: Vec<SmtTerm>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                SmtTerm::BoolLit(false) => {}
                SmtTerm::BoolLit(true) => return SmtTerm::BoolLit(true),
                SmtTerm::Or(children) => flat.extend(children),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => SmtTerm::BoolLit(false),
            1 => flat.pop().unwrap_or(SmtTerm::BoolLit(false)),
            _ => SmtTerm::Or(flat),
        }
    }

    pub fn not(self) -> Self {
        match self {
            SmtTerm::BoolLit(b) => SmtTerm::BoolLit(!b),
            SmtTerm::Not(inner) => *inner,
            other => SmtTerm::Not(Box::new(other)),
        }
    }

    pub fn implies(self, other: SmtTerm) -> Self {
        SmtTerm::Implies(Box::new(self), Box::new(other))
    }

    pub fn as_rational(&self) -> Option<&BigRational> {
        match self {
            SmtTerm::RealLit(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_rational().is_some_and(Zero::is_zero)
    }

    /// Sort of the term, inferred from its head symbol.
    pub fn sort(&self) -> SmtSort {
        match self {
            SmtTerm::BoolLit(_)
            | SmtTerm::Eq(..)
            | SmtTerm::Lt(..)
            | SmtTerm::Le(..)
            | SmtTerm::Gt(..)
            | SmtTerm::Ge(..)
            | SmtTerm::And(_)
            | SmtTerm::Or(_)
            | SmtTerm::Not(_)
            | SmtTerm::Implies(..) => SmtSort::Bool,
            _ => SmtSort::Real,
        }
    }

    /// Names of all variables occurring in the term.
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            SmtTerm::Var(name) => {
                out.insert(name.clone());
            }
            SmtTerm::RealLit(_) | SmtTerm::BoolLit(_) => {}
            SmtTerm::Add(ts) | SmtTerm::Mul(ts) | SmtTerm::And(ts) | SmtTerm::Or(ts) => {
                ts.iter().for_each(|t| t.collect_vars(out))
            }
            SmtTerm::Neg(t) | SmtTerm::Pow(t, _) | SmtTerm::App(_, t) | SmtTerm::Not(t) => {
                t.collect_vars(out)
            }
            SmtTerm::Div(a, b)
            | SmtTerm::Eq(a, b)
            | SmtTerm::Lt(a, b)
            | SmtTerm::Le(a, b)
            | SmtTerm::Gt(a, b)
            | SmtTerm::Ge(a, b)
            | SmtTerm::Implies(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    /// True when the term uses only `+`, `*`, negation, natural powers and
    /// division by constants.
    pub fn is_polynomial(&self) -> bool {
        match self {
            SmtTerm::Var(_) | SmtTerm::RealLit(_) | SmtTerm::BoolLit(_) => true,
            SmtTerm::App(..) => false,
            SmtTerm::Div(a, b) => a.is_polynomial() && b.as_rational().is_some(),
            SmtTerm::Add(ts) | SmtTerm::Mul(ts) | SmtTerm::And(ts) | SmtTerm::Or(ts) => {
                ts.iter().all(SmtTerm::is_polynomial)
            }
            SmtTerm::Neg(t) | SmtTerm::Pow(t, _) | SmtTerm::Not(t) => t.is_polynomial(),
            SmtTerm::Eq(a, b)
            | SmtTerm::Lt(a, b)
            | SmtTerm::Le(a, b)
            | SmtTerm::Gt(a, b)
            | SmtTerm::Ge(a, b)
            | SmtTerm::Implies(a, b) => a.is_polynomial() && b.is_polynomial(),
        }
    }

    /// Number of nodes in the term tree.
    pub fn size(&self) -> usize {
        1 + match self {
            SmtTerm::Var(_) | SmtTerm::RealLit(_) | SmtTerm::BoolLit(_) => 0,
            SmtTerm::Add(ts) | SmtTerm::Mul(ts) | SmtTerm::And(ts) | SmtTerm::Or(ts) => {
                ts.iter().map(SmtTerm::size).sum()
            }
            SmtTerm::Neg(t) | SmtTerm::Pow(t, _) | SmtTerm::App(_, t) | SmtTerm::Not(t) => t.size(),
            SmtTerm::Div(a, b)
            | SmtTerm::Eq(a, b)
            | SmtTerm::Lt(a, b)
            | SmtTerm::Le(a, b)
            | SmtTerm::Gt(a, b)
            | SmtTerm::Ge(a, b)
            | SmtTerm::Implies(a, b) => a.size() + b.size(),
        }
    }

    /// Evaluate an arithmetic term in floating point.
    pub fn eval_real<F>(&self, env: &F) -> Result<f64, TermError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        Ok(match self {
            SmtTerm::Var(name) => env(name).ok_or_else(|| TermError::UnboundVariable(name.clone()))?,
            SmtTerm::RealLit(c) => c.to_f64().unwrap_or(f64::NAN),
            SmtTerm::Add(ts) => {
                let mut acc = 0.0;
                for t in ts {
                    acc += t.eval_real(env)?;
                }
                acc
            }
            SmtTerm::Mul(ts) => {
                let mut acc = 1.0;
                for t in ts {
                    acc *= t.eval_real(env)?;
                }
                acc
            }
            SmtTerm::Neg(t) => -t.eval_real(env)?,
            SmtTerm::Div(a, b) => a.eval_real(env)? / b.eval_real(env)?,
            SmtTerm::Pow(t, n) => {
                let base = t.eval_real(env)?;
                (0..*n).fold(1.0, |acc, _| acc * base)
            }
            SmtTerm::App(f, t) => f.apply(t.eval_real(env)?),
            other => return Err(TermError::NotArithmetic(other.to_string())),
        })
    }

    /// Evaluate a boolean term in floating point.
    pub fn eval_bool<F>(&self, env: &F) -> Result<bool, TermError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        Ok(match self {
            SmtTerm::BoolLit(b) => *b,
            SmtTerm::Eq(a, b) => a.eval_real(env)? == b.eval_real(env)?,
            SmtTerm::Lt(a, b) => a.eval_real(env)? < b.eval_real(env)?,
            SmtTerm::Le(a, b) => a.eval_real(env)? <= b.eval_real(env)?,
            SmtTerm::Gt(a, b) => a.eval_real(env)? > b.eval_real(env)?,
            SmtTerm::Ge(a, b) => a.eval_real(env)? >= b.eval_real(env)?,
            SmtTerm::And(ts) => {
                for t in ts {
                    if !t.eval_bool(env)? {
                        return Ok(false);
                    }
                }
                true
            }
            SmtTerm::Or(ts) => {
                for t in ts {
                    if t.eval_bool(env)? {
                        return Ok(true);
                    }
                }
                false
            }
            SmtTerm::Not(t) => !t.eval_bool(env)?,
            SmtTerm::Implies(a, b) => !a.eval_bool(env)? || b.eval_bool(env)?,
            other => return Err(TermError::NotBoolean(other.to_string())),
        })
    }
}

/// Split a summand into its rational coefficient and the remaining factor.
fn split_coefficient(term: SmtTerm) -> (BigRational, Option<SmtTerm>) {
    match term {
        SmtTerm::RealLit(c) => (c, None),
        SmtTerm::Neg(inner) => {
            let (c, rest) = split_coefficient(*inner);
            (-c, rest)
        }
        SmtTerm::Mul(mut factors) if matches!(factors.first(), Some(SmtTerm::RealLit(_))) => {
            let c = match factors.remove(0) {
                SmtTerm::RealLit(c) => c,
                _ => BigRational::one(),
            };
            let rest = if factors.len() == 1 {
                factors.pop().unwrap_or_else(SmtTerm::one)
            } else {
                SmtTerm::Mul(factors)
            };
            (c, Some(rest))
        }
        other => (BigRational::one(), Some(other)),
    }
}

/// `c * term` without distributing over sums.
fn attach_coefficient(c: BigRational, term: SmtTerm) -> SmtTerm {
    if c.is_one() {
        return term;
    }
    if (-c.clone()).is_one() {
        return SmtTerm::Neg(Box::new(term));
    }
    match term {
        SmtTerm::Mul(mut factors) => {
            factors.insert(0, SmtTerm::RealLit(c));
            SmtTerm::Mul(factors)
        }
        other => SmtTerm::Mul(vec![SmtTerm::RealLit(c), other]),
    }
}

/// `c * term`, distributing over sums.
fn scale(c: BigRational, term: SmtTerm) -> SmtTerm {
    match term {
        SmtTerm::Add(children) => SmtTerm::sum(
            children
                .into_iter()
                .map(|child| SmtTerm::product([SmtTerm::RealLit(c.clone()), child])),
        ),
        other => attach_coefficient(c, other),
    }
}

impl ops::Add for SmtTerm {
    type Output = SmtTerm;

    fn add(self, rhs: SmtTerm) -> SmtTerm {
        SmtTerm::sum([self, rhs])
    }
}

impl ops::Sub for SmtTerm {
    type Output = SmtTerm;

    fn sub(self, rhs: SmtTerm) -> SmtTerm {
        SmtTerm::sum([self, -rhs])
    }
}

impl ops::Mul for SmtTerm {
    type Output = SmtTerm;

    fn mul(self, rhs: SmtTerm) -> SmtTerm {
        SmtTerm::product([self, rhs])
    }
}

impl ops::Div for SmtTerm {
    type Output = SmtTerm;

    fn div(self, rhs: SmtTerm) -> SmtTerm {
        if let SmtTerm::RealLit(c) = &rhs {
            if !c.is_zero() {
                return SmtTerm::product([SmtTerm::RealLit(c.recip()), self]);
            }
        }
        if self.is_zero() {
            return SmtTerm::zero();
        }
        SmtTerm::Div(Box::new(self), Box::new(rhs))
    }
}

impl ops::Neg for SmtTerm {
    type Output = SmtTerm;

    fn neg(self) -> SmtTerm {
        match self {
            SmtTerm::RealLit(c) => SmtTerm::RealLit(-c),
            SmtTerm::Neg(inner) => *inner,
            other => scale(-BigRational::one(), other),
        }
    }
}

impl fmt::Display for SmtTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::backends::smtlib_printer::to_smtlib(self))
    }
}

/// Absolute value of a rational literal, used by the printers.
pub(crate) fn rational_parts(c: &BigRational) -> (bool, BigInt, BigInt) {
    (c.is_negative(), c.numer().abs(), c.denom().clone())
}
