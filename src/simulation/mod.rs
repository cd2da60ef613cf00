//! Synthetic inputs for benches, property tests and the CLI.

pub mod statement_gen;
