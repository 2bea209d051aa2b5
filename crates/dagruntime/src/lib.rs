//! Execution runtime
//!
//! This crate provides the worker pool that runs compiled task graphs, the
//! plugin manager that fills the registry and the `Runtime` tying both to
//! the graphs it creates.

mod error;
mod executor;
mod plugin;
mod runtime;

pub use error::{PluginError, RuntimeError};
pub use executor::{Executor, WORKER_THREADS};
pub use plugin::{Plugin, PluginManager, ABI_VERSION};
pub use runtime::{Runtime, RuntimeConfig};
