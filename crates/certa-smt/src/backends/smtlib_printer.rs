use std::fmt::Write;

use crate::sorts::SmtSort;
use crate::terms::{rational_parts, Func, SmtTerm};

/// Print an SmtTerm as SMT-LIB2 format.
///
/// Powers are expanded into products and `sigmoid` into its `exp` form,
/// so the output only uses symbols every real-arithmetic solver accepts.
pub fn to_smtlib(term: &SmtTerm) -> String {
    let mut out = String::new();
    write_term(&mut out, term);
    out
}

fn write_list(out: &mut String, op: &str, terms: &[SmtTerm], empty: &str) {
    match terms {
        [] => out.push_str(empty),
        [single] => write_term(out, single),
        _ => {
            out.push('(');
            out.push_str(op);
            for t in terms {
                out.push(' ');
                write_term(out, t);
            }
            out.push(')');
        }
    }
}

fn write_binary(out: &mut String, op: &str, lhs: &SmtTerm, rhs: &SmtTerm) {
    out.push('(');
    out.push_str(op);
    out.push(' ');
    write_term(out, lhs);
    out.push(' ');
    write_term(out, rhs);
    out.push(')');
}

fn write_term(out: &mut String, term: &SmtTerm) {
    match term {
        SmtTerm::Var(name) => out.push_str(name),
        SmtTerm::RealLit(c) => {
            let (negative, numer, denom) = rational_parts(c);
            let magnitude = if denom == num::BigInt::from(1) {
                format!("{numer}.0")
            } else {
                format!("(/ {numer}.0 {denom}.0)")
            };
            if negative {
                let _ = write!(out, "(- {magnitude})");
            } else {
                out.push_str(&magnitude);
            }
        }
        SmtTerm::BoolLit(b) => out.push_str(if *b { "true" } else { "false" }),
        SmtTerm::Add(terms) => write_list(out, "+", terms, "0.0"),
        SmtTerm::Mul(terms) => write_list(out, "*", terms, "1.0"),
        SmtTerm::Neg(inner) => {
            out.push_str("(- ");
            write_term(out, inner);
            out.push(')');
        }
        SmtTerm::Div(lhs, rhs) => write_binary(out, "/", lhs, rhs),
        SmtTerm::Pow(base, n) => match n {
            0 => out.push_str("1.0"),
            1 => write_term(out, base),
            _ => {
                out.push_str("(*");
                for _ in 0..*n {
                    out.push(' ');
                    write_term(out, base);
                }
                out.push(')');
            }
        },
        SmtTerm::App(Func::Sigmoid, arg) => {
            out.push_str("(/ 1.0 (+ 1.0 (exp (- ");
            write_term(out, arg);
            out.push_str("))))");
        }
        SmtTerm::App(func, arg) => {
            out.push('(');
            out.push_str(func.name());
            out.push(' ');
            write_term(out, arg);
            out.push(')');
        }
        SmtTerm::Eq(lhs, rhs) => write_binary(out, "=", lhs, rhs),
        SmtTerm::Lt(lhs, rhs) => write_binary(out, "<", lhs, rhs),
        SmtTerm::Le(lhs, rhs) => write_binary(out, "<=", lhs, rhs),
        SmtTerm::Gt(lhs, rhs) => write_binary(out, ">", lhs, rhs),
        SmtTerm::Ge(lhs, rhs) => write_binary(out, ">=", lhs, rhs),
        SmtTerm::And(terms) => write_list(out, "and", terms, "true"),
        SmtTerm::Or(terms) => write_list(out, "or", terms, "false"),
        SmtTerm::Not(inner) => {
            out.push_str("(not ");
            write_term(out, inner);
            out.push(')');
        }
        SmtTerm::Implies(lhs, rhs) => write_binary(out, "=>", lhs, rhs),
    }
}

/// Print a sort as SMT-LIB2 format.
pub fn sort_to_smtlib(sort: &SmtSort) -> &'static str {
    match sort {
        SmtSort::Bool => "Bool",
        SmtSort::Real => "Real",
    }
}

/// A `declare-fun` line for a constant.
pub fn declaration(name: &str, sort: &SmtSort) -> String {
    format!("(declare-fun {name} () {})", sort_to_smtlib(sort))
}
