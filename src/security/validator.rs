//! Allow/deny decision for a candidate shell command.
//!
//! Checks run in a fixed order and the first one that decides wins:
//! disabled tools, excluded paths, exact whitelist, whitelist patterns.
//! Nothing here performs I/O or mutates the policy.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use super::path_guard::find_excluded_path;
use crate::policy::Policy;

/// Why a command was allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    ToolsDisabled,
    ExcludedPath,
    NotWhitelisted,
    WhitelistedExact,
    WhitelistedPattern,
}

impl VerdictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolsDisabled => "tools_disabled",
            Self::ExcludedPath => "excluded_path",
            Self::NotWhitelisted => "not_whitelisted",
            Self::WhitelistedExact => "whitelisted_exact",
            Self::WhitelistedPattern => "whitelisted_pattern",
        }
    }

    /// Human-readable explanation shown to the operator.
    pub fn describe(self) -> &'static str {
        match self {
            Self::ToolsDisabled => "tools are disabled",
            Self::ExcludedPath => "command references an excluded path",
            Self::NotWhitelisted => "command is not whitelisted",
            Self::WhitelistedExact => "command is whitelisted",
            Self::WhitelistedPattern => "command matches a whitelist pattern",
        }
    }
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub allowed: bool,
    pub reason: VerdictReason,
    /// The whitelist entry, pattern source or excluded path that decided the verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
}

impl ValidationVerdict {
    fn allow(reason: VerdictReason, rule: &str) -> Self {
        Self {
            allowed: true,
            reason,
            matched_rule: Some(rule.to_string()),
        }
    }

    fn deny(reason: VerdictReason, rule: Option<&str>) -> Self {
        Self {
            allowed: false,
            reason,
            matched_rule: rule.map(String::from),
        }
    }
}

impl fmt::Display for ValidationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.allowed { "allowed" } else { "denied" };
        write!(f, "{status}: {}", self.reason.describe())?;
        if let Some(rule) = &self.matched_rule {
            write!(f, " ({rule})")?;
        }
        Ok(())
    }
}

/// Decide whether `command` may run under `policy`.
pub fn validate(command: &str, policy: &Policy) -> ValidationVerdict {
    let verdict = decide(command, policy);
    debug!(
        command,
        allowed = verdict.allowed,
        reason = %verdict.reason,
        matched_rule = verdict.matched_rule.as_deref(),
        "command validated"
    );
    if !verdict.allowed {
        info!(command, reason = %verdict.reason, "command denied");
    }
    verdict
}

fn decide(command: &str, policy: &Policy) -> ValidationVerdict {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return ValidationVerdict::deny(VerdictReason::NotWhitelisted, None);
    }

    if !policy.enabled() {
        return ValidationVerdict::deny(VerdictReason::ToolsDisabled, None);
    }

    if let Some(entry) = find_excluded_path(trimmed, policy.exclude_paths()) {
        return ValidationVerdict::deny(VerdictReason::ExcludedPath, Some(entry));
    }

    let commands = policy.whitelist_commands();
    if commands.contains(trimmed) {
        return ValidationVerdict::allow(VerdictReason::WhitelistedExact, trimmed);
    }

    if !contains_shell_composition(trimmed) && !contains_expansion(trimmed) {
        if let Some(entry) = commands
            .iter()
            .find(|entry| has_argument_prefix(trimmed, entry))
        {
            return ValidationVerdict::allow(VerdictReason::WhitelistedExact, entry);
        }
    }

    if let Some(pattern) = policy
        .whitelist_patterns()
        .iter()
        .find(|pattern| pattern.is_match(trimmed))
    {
        return ValidationVerdict::allow(VerdictReason::WhitelistedPattern, pattern.source());
    }

    ValidationVerdict::deny(VerdictReason::NotWhitelisted, None)
}

/// `command` is `entry` followed by whitespace and arguments.
fn has_argument_prefix(command: &str, entry: &str) -> bool {
    command
        .strip_prefix(entry)
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_whitespace)
}

/// Pipes, lists, redirects, background jobs and command substitution.
fn contains_shell_composition(command: &str) -> bool {
    command.contains(['|', ';', '&', '<', '>', '`', '\n']) || command.contains("$(")
}

/// Globs, braces, parameter expansion and escapes: the shell, not the text,
/// decides which paths such a word names.
fn contains_expansion(command: &str) -> bool {
    command.contains(['*', '?', '[', '{', '$', '\\'])
}
