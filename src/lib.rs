//! rusty-tools - policy core for running shell commands on behalf of an agent
//!
//! This library decides whether a shell command may run and runs it safely:
//! - [`policy`]: immutable policy snapshots published by a [`PolicyStore`]
//! - [`security`]: excluded-path matching, validation, approval and execution
//! - [`tools`]: a registry mapping tool names to validate/execute implementations
//! - [`config`]: the persisted YAML configuration document
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rusty_tools::config::ToolsConfig;
//! use rusty_tools::policy::{Policy, PolicyStore};
//! use rusty_tools::security::AutoApprove;
//! use rusty_tools::tools::{BASH_TOOL, ToolOutcome, ToolRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let policy = Policy::from_config(&ToolsConfig::default())?;
//!     let store = Arc::new(PolicyStore::in_memory(policy));
//!     let registry = ToolRegistry::with_defaults(store, Arc::new(AutoApprove));
//!
//!     if let ToolOutcome::Completed(result) = registry.execute(BASH_TOOL, "ls", None).await? {
//!         print!("{}", result.output_lossy());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod policy;
pub mod security;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub use error::{ConfigError, ErrorKind, ExecutionError, StoreError, ToolError};
pub use policy::{Change, Policy, PolicyStore};
pub use security::{ValidationVerdict, VerdictReason, validate};
pub use tools::{ToolOutcome, ToolRegistry};
