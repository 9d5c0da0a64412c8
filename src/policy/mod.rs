//! Immutable policy snapshot and the store that publishes it.
//!
//! A [`Policy`] is compiled once from the `tools` configuration section.
//! Regular expressions and excluded-path globs are compiled at construction,
//! so a bad pattern fails here and never at validation time.

mod store;

use std::collections::BTreeSet;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::config::{SafetyConfig, ToolsConfig, WhitelistConfig};
use crate::error::ConfigError;
use crate::security::path_guard::ExcludeSet;

pub use store::{Change, NoPersistence, PolicyPersistence, PolicyStore};

/// A whitelist regular expression together with the source it was written as.
#[derive(Debug, Clone)]
pub struct WhitelistPattern {
    source: String,
    regex: Regex,
}

impl WhitelistPattern {
    /// Compile `source` so that it must match the whole command.
    pub fn new(source: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(&format!("^(?:{source})$")).map_err(|err| {
            ConfigError::InvalidPattern {
                pattern: source.to_string(),
                source: err,
            }
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, command: &str) -> bool {
        self.regex.is_match(command)
    }
}

/// Point-in-time view of every validation rule.
#[derive(Debug, Clone)]
pub struct Policy {
    enabled: bool,
    whitelist_commands: BTreeSet<String>,
    whitelist_patterns: Vec<WhitelistPattern>,
    exclude_paths: ExcludeSet,
    require_approval: bool,
    timeout: Option<Duration>,
    max_output_bytes: Option<usize>,
}

/// Serializable listing of a policy, as shown by `tools list --format json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySummary {
    pub enabled: bool,
    pub commands: Vec<String>,
    pub patterns: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub safety: SafetySummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetySummary {
    pub require_approval: bool,
}

impl Policy {
    pub fn from_config(config: &ToolsConfig) -> Result<Self, ConfigError> {
        let whitelist_commands = config
            .whitelist
            .commands
            .iter()
            .map(|command| command.trim())
            .filter(|command| !command.is_empty())
            .map(String::from)
            .collect();

        let whitelist_patterns = config
            .whitelist
            .patterns
            .iter()
            .map(|pattern| WhitelistPattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enabled: config.enabled,
            whitelist_commands,
            whitelist_patterns,
            exclude_paths: ExcludeSet::new(&config.exclude_paths)?,
            require_approval: config.safety.require_approval,
            timeout: config.timeout.map(Duration::from_secs),
            max_output_bytes: config.max_output_bytes,
        })
    }

    /// The configuration section this policy would be persisted as.
    pub fn to_config(&self) -> ToolsConfig {
        ToolsConfig {
            enabled: self.enabled,
            timeout: self.timeout.map(|timeout| timeout.as_secs()),
            max_output_bytes: self.max_output_bytes,
            whitelist: WhitelistConfig {
                commands: self.whitelist_commands.iter().cloned().collect(),
                patterns: self
                    .whitelist_patterns
                    .iter()
                    .map(|pattern| pattern.source.clone())
                    .collect(),
            },
            exclude_paths: self.exclude_paths.entries().iter().cloned().collect(),
            safety: SafetyConfig {
                require_approval: self.require_approval,
            },
        }
    }

    pub fn summary(&self) -> PolicySummary {
        let config = self.to_config();
        PolicySummary {
            enabled: config.enabled,
            commands: config.whitelist.commands,
            patterns: config.whitelist.patterns,
            exclude_paths: config.exclude_paths,
            safety: SafetySummary {
                require_approval: config.safety.require_approval,
            },
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn require_approval(&self) -> bool {
        self.require_approval
    }

    pub fn whitelist_commands(&self) -> &BTreeSet<String> {
        &self.whitelist_commands
    }

    /// Patterns in configured order.
    pub fn whitelist_patterns(&self) -> &[WhitelistPattern] {
        &self.whitelist_patterns
    }

    pub fn exclude_paths(&self) -> &ExcludeSet {
        &self.exclude_paths
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_output_bytes(&self) -> Option<usize> {
        self.max_output_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools_config() -> ToolsConfig {
        ToolsConfig {
            enabled: true,
            timeout: Some(12),
            max_output_bytes: Some(4096),
            whitelist: WhitelistConfig {
                commands: vec!["ls".into(), " pwd ".into(), "ls".into(), "".into()],
                patterns: vec!["^git .*".into(), "^docker ps$".into()],
            },
            exclude_paths: vec!["/etc/".into(), "/etc".into(), "*.env".into()],
            safety: SafetyConfig {
                require_approval: false,
            },
        }
    }

    #[test]
    fn test_commands_are_trimmed_and_deduplicated() {
        let policy = Policy::from_config(&tools_config()).unwrap();
        let commands: Vec<&str> = policy.whitelist_commands().iter().map(String::as_str).collect();
        assert_eq!(commands, vec!["ls", "pwd"]);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let mut config = tools_config();
        config.whitelist.patterns.push("git (status".into());

        let err = Policy::from_config(&config).unwrap_err();
        match err {
            ConfigError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "git (status"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_patterns_keep_order_and_match_whole_command() {
        let policy = Policy::from_config(&tools_config()).unwrap();
        let sources: Vec<&str> = policy
            .whitelist_patterns()
            .iter()
            .map(WhitelistPattern::source)
            .collect();
        assert_eq!(sources, vec!["^git .*", "^docker ps$"]);

        let docker = &policy.whitelist_patterns()[1];
        assert!(docker.is_match("docker ps"));
        assert!(!docker.is_match("docker ps -a"));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let pattern = WhitelistPattern::new("ls|pwd").unwrap();
        assert!(pattern.is_match("pwd"));
        assert!(!pattern.is_match("pwd; rm -rf /"));
        assert!(!pattern.is_match("rm -rf / ; ls"));
    }

    #[test]
    fn test_round_trip_through_config() {
        let policy = Policy::from_config(&tools_config()).unwrap();
        let config = policy.to_config();
        let again = Policy::from_config(&config).unwrap();

        assert_eq!(again.to_config(), config);
        assert_eq!(config.exclude_paths, vec!["*.env".to_string(), "/etc".to_string()]);
        assert_eq!(config.timeout, Some(12));
        assert_eq!(config.max_output_bytes, Some(4096));
        assert!(!config.safety.require_approval);
    }

    #[test]
    fn test_summary_shape() {
        let policy = Policy::from_config(&tools_config()).unwrap();
        let json = serde_json::to_value(policy.summary()).unwrap();

        assert_eq!(json["enabled"], true);
        assert_eq!(json["commands"][0], "ls");
        assert_eq!(json["patterns"][1], "^docker ps$");
        assert_eq!(json["exclude_paths"][1], "/etc");
        assert_eq!(json["safety"]["require_approval"], false);
    }
}
