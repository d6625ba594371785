//! # Cli
//!
//! Command line definition and the subcommands runners.
#[allow(clippy::module_inception)]
pub(crate) mod cli;
pub(crate) mod run;

pub(crate) use cli::*;
