//! rcode: open local or remote paths in a desktop editor
//!
//! Provides the `rcode` and `rcursor` command lines on top of `rc-core`.

pub mod cli;
pub mod commands;
pub mod output;

pub use cli::run_main;
