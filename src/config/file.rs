//! YAML file persistence for the configuration document.
//!
//! Saves go through a temp file and a rename so a crash never leaves a
//! half-written config behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tracing::debug;

use super::{Config, ToolsConfig};
use crate::error::ConfigError;
use crate::policy::PolicyPersistence;

pub const DEFAULT_CONFIG_PATH: &str = ".rusty-tools/config.yaml";

/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_ENV_VAR: &str = "RUSTY_TOOLS_CONFIG";

#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or the built-in defaults when the file does not exist.
    pub fn load_or_default(&self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "config file missing, using defaults");
            return Ok(Config::default());
        }
        self.load()
    }

    pub fn load(&self) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        // An empty file is a valid, empty document.
        if raw.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, config: &Config) -> anyhow::Result<()> {
        let rendered = serde_yaml::to_string(config).context("Failed to serialize config")?;
        write_atomic(&self.path, rendered.as_bytes())
    }
}

impl PolicyPersistence for ConfigFile {
    /// Replace the `tools` section, keeping every other section as it is on disk.
    fn persist(&self, tools: &ToolsConfig) -> anyhow::Result<()> {
        let mut config = self
            .load_or_default()
            .with_context(|| format!("Refusing to overwrite {}", self.path.display()))?;
        config.tools = tools.clone();
        self.save(&config)?;
        debug!(path = %self.path.display(), "config saved");
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }
    Ok(())
}

fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    ensure_parent_dir(path)?;
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, data).with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "Failed to replace {} with {}",
            path.display(),
            tmp.display()
        )
    })?;
    Ok(())
}
