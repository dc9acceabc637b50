#![doc = include_str!("../README.md")]

pub mod catalogue;
pub mod systems;

pub use catalogue::{catalogue, find, names, Benchmark};
