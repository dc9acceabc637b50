#![doc = include_str!("../README.md")]

//! Real-arithmetic terms, symbolic calculus and satisfiability backends
//! for certificate verification.
//!
//! Terms are built once and handed to any [`solver::SmtSolver`]: the
//! built-in interval branch-and-prune solver, Z3 (behind the `z3`
//! feature) or a dReal process.

pub mod backends;
pub mod calculus;
pub mod interval;
pub mod solver;
pub mod sorts;
pub mod terms;
