//! canvas-eval library
//!
//! Prompt datasets and environment assembly on top of `validator-core`; the binary adds the
//! command line.

pub mod dataset;
pub mod environment;

pub use environment::{build_rows, EvalEnvironment, PromptRow};
pub use validator_core;
