#![doc = include_str!("../README.md")]

//! Certificate synthesis engine.
//!
//! This crate runs the counterexample-guided loop: sampling regions,
//! training candidate networks, translating them to exact terms,
//! discharging the certificate's obligations and refining the data with
//! counterexamples.

pub mod benchmark;
pub mod candidate;
pub mod cegis;
pub mod certificate;
pub mod config;
pub mod counterexample;
pub mod data;
pub mod domains;
pub mod error;
pub mod learner;
pub mod network;
pub mod result;
pub mod system;
pub mod translator;
pub mod verifier;
