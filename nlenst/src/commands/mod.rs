//! Command modules for the nlenst CLI.
//!
//! This module contains implementations for all available subcommands.
//! Each subcommand is implemented in its own file following a standardized pattern.

pub mod explain;
pub mod run;

// Re-export command types and functions
pub use explain::{run_explain, ExplainArgs};
pub use run::{run_launch, RunArgs};
