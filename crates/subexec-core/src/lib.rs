//! Configuration loading and the `ToolRunner` facade over `subexec-exec`.

pub mod config;
pub mod runner;

pub use config::{Config, resolve_config_path};
pub use runner::{Plan, RunOptions, ToolRunner};
