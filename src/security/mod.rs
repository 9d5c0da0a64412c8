//! Command policy enforcement.
//!
//! [`validate`] decides, [`ApprovalGate`] confirms, [`Executor`] runs.
//! Excluded-path matching lives in [`path_guard`].

mod approval;
mod executor;
pub mod path_guard;
mod validator;

pub use approval::{ApprovalGate, AutoApprove, AutoDeny, PromptApproval, parse_answer};
pub use executor::{
    CommandRunner, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_SHELL, DEFAULT_TIMEOUT, ExecutionResult,
    Executor, ExecutorConfig, RunLimits,
};
pub use path_guard::{ExcludeSet, contains_excluded_path};
pub use validator::{ValidationVerdict, VerdictReason, validate};
