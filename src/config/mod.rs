//! Persisted configuration document.
//!
//! The application owns a YAML document; this crate only reads and writes its
//! `tools` section. Every other top-level section is carried through a save
//! untouched.

mod file;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use file::{CONFIG_ENV_VAR, ConfigFile, DEFAULT_CONFIG_PATH};

/// Whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Sections owned by other parts of the application.
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

/// The `tools` section: everything the shell policy is built from.
///
/// Missing fields fall back to [`ToolsConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub enabled: bool,
    /// Execution deadline in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Cap on captured combined output, in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_bytes: Option<usize>,
    pub whitelist: WhitelistConfig,
    pub exclude_paths: Vec<String>,
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitelistConfig {
    pub commands: Vec<String>,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub require_approval: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            require_approval: true,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: None,
            max_output_bytes: None,
            whitelist: WhitelistConfig {
                commands: ["ls", "pwd", "echo", "wc", "sort", "uniq"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                patterns: [
                    "^git branch( --show-current)?$",
                    "^git status$",
                    "^git diff( [a-zA-Z0-9/_.-]+)*$",
                    "^git remote -v$",
                    "^git log --oneline -n [0-9]+$",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
            exclude_paths: [".git/", ".rusty-tools/", "*.env"]
                .into_iter()
                .map(String::from)
                .collect(),
            safety: SafetyConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_tools_section_uses_defaults() {
        let raw = "tools:\n  enabled: false\n  safety:\n    require_approval: false\n";
        let config: Config = serde_yaml::from_str(raw).unwrap();

        assert!(!config.tools.enabled);
        assert!(!config.tools.safety.require_approval);
        assert_eq!(config.tools.whitelist, ToolsConfig::default().whitelist);
        assert_eq!(config.tools.timeout, None);
    }

    #[test]
    fn test_missing_tools_section() {
        let config: Config = serde_yaml::from_str("gateway:\n  url: http://localhost:8080\n").unwrap();
        assert_eq!(config.tools, ToolsConfig::default());
        assert!(config.other.contains_key("gateway"));
    }

    #[test]
    fn test_other_sections_survive_round_trip() {
        let raw = "chat:\n  default_model: gpt\ntools:\n  enabled: true\n  timeout: 10\n";
        let config: Config = serde_yaml::from_str(raw).unwrap();
        let rendered = serde_yaml::to_string(&config).unwrap();
        let reloaded: Config = serde_yaml::from_str(&rendered).unwrap();

        assert_eq!(reloaded, config);
        assert_eq!(reloaded.tools.timeout, Some(10));
        assert!(rendered.contains("default_model"));
    }
}
