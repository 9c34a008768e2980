//! Scripted test batches
//!
//! Selects `.rhai` scripts, runs each through a `ScriptExecutor` and
//! aggregates pass/fail/error verdicts into a `RunReport`.

mod config;
mod report;
mod runner;

pub use config::*;
pub use report::*;
pub use runner::{
    banner, result_line, run_in_background, RunEvent, RunState, ScriptExecutor, TestRunner,
};
