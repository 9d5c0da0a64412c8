//! Error taxonomy for policy loading, mutation and command execution.
//!
//! Only [`ConfigError`] is fatal. Denials, approval refusals and timeouts are
//! ordinary outcomes and travel as values (see [`crate::tools::ToolOutcome`]),
//! never through these types.

use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;

/// Stable classification used for CLI exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Denied,
    ApprovalDenied,
    Execution,
    Io,
    TimedOut,
    Usage,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Config => 2,
            Self::Denied => 3,
            Self::ApprovalDenied => 4,
            Self::Execution => 5,
            Self::Io => 6,
            Self::TimedOut => 124,
            Self::Usage => 64,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Config => "config",
            Self::Denied => "denied",
            Self::ApprovalDenied => "approval_denied",
            Self::Execution => "execution",
            Self::Io => "io",
            Self::TimedOut => "timed_out",
            Self::Usage => "usage",
        };
        write!(f, "{text}")
    }
}

/// Malformed policy or configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid whitelist pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid excluded path '{path}': {reason}")]
    InvalidExcludePath { path: String, reason: String },
    #[error("{what} cannot be empty")]
    EmptyEntry { what: &'static str },
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Failure to run an already-approved command.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("refusing to execute an empty command")]
    EmptyCommand,
    #[error("failed to spawn '{shell}': {source}")]
    Spawn {
        shell: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error while running command: {0}")]
    Io(#[from] io::Error),
}

/// Failure of a [`crate::policy::PolicyStore`] mutation.
///
/// In every case the previously published policy stays in effect.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to persist policy: {0:#}")]
    Persist(anyhow::Error),
    #[error("policy mutation lock poisoned")]
    Poisoned,
}

/// Failure reported by the tool registry.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyCommand | Self::Spawn { .. } => ErrorKind::Execution,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Persist(_) | Self::Poisoned => ErrorKind::Io,
        }
    }
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTool(_) => ErrorKind::Usage,
            Self::Execution(err) => err.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let kinds = [
            ErrorKind::Config,
            ErrorKind::Denied,
            ErrorKind::ApprovalDenied,
            ErrorKind::Execution,
            ErrorKind::Io,
            ErrorKind::TimedOut,
            ErrorKind::Usage,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn store_error_wraps_config_error() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = StoreError::from(ConfigError::InvalidPattern {
            pattern: "(".to_string(),
            source,
        });
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("invalid whitelist pattern '('"));
    }
}
