//! Tether Operator - controller process wiring
//!
//! Connects the cluster watch, the registry and the hub health monitor under
//! one cancellation token.

#![deny(missing_docs)]

pub mod cli;
pub mod runner;

pub use cli::Cli;
pub use runner::run_controller;
