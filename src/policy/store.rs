//! Publication point for the current [`Policy`].
//!
//! Readers get a cheap `Arc` snapshot and never wait on a mutation. Writers
//! are serialized; each mutation compiles the new policy, persists it, and
//! only then swaps it in. If either step fails the old snapshot stays live.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::{error, info};

use super::Policy;
use crate::config::ToolsConfig;
use crate::error::{ConfigError, StoreError};
use crate::security::path_guard::normalize_exclude_path;

/// Where a mutated policy is written before it is published.
pub trait PolicyPersistence: Send + Sync {
    fn persist(&self, tools: &ToolsConfig) -> anyhow::Result<()>;
}

/// Keeps policy changes in memory only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

impl PolicyPersistence for NoPersistence {
    fn persist(&self, _tools: &ToolsConfig) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Outcome of adding or removing a set entry. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Added,
    AlreadyPresent,
    Removed,
    NotFound,
}

pub struct PolicyStore {
    current: ArcSwap<Policy>,
    mutation: Mutex<()>,
    persistence: Box<dyn PolicyPersistence>,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("current", &self.current.load())
            .finish_non_exhaustive()
    }
}

impl PolicyStore {
    pub fn new(policy: Policy, persistence: impl PolicyPersistence + 'static) -> Self {
        Self {
            current: ArcSwap::from_pointee(policy),
            mutation: Mutex::new(()),
            persistence: Box::new(persistence),
        }
    }

    /// Store that never writes anywhere.
    pub fn in_memory(policy: Policy) -> Self {
        Self::new(policy, NoPersistence)
    }

    /// The currently published snapshot.
    pub fn current(&self) -> Arc<Policy> {
        self.current.load_full()
    }

    /// Apply `change` to a copy of the current configuration and publish it.
    ///
    /// At most one mutation runs at a time. When `change` leaves the
    /// configuration as it was, nothing is persisted or swapped.
    pub fn mutate<T>(&self, change: impl FnOnce(&mut ToolsConfig) -> T) -> Result<T, StoreError> {
        let _guard = self.mutation.lock().map_err(|_| StoreError::Poisoned)?;

        let before = self.current.load().to_config();
        let mut config = before.clone();
        let outcome = change(&mut config);

        let next = Policy::from_config(&config)?;
        let next_config = next.to_config();
        if next_config == before {
            return Ok(outcome);
        }

        if let Err(err) = self.persistence.persist(&next_config) {
            error!(error = %format!("{err:#}"), "failed to persist policy, keeping previous snapshot");
            return Err(StoreError::Persist(err));
        }
        self.current.store(Arc::new(next));
        Ok(outcome)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.mutate(|config| config.enabled = enabled)?;
        info!(enabled, "tools enablement updated");
        Ok(())
    }

    pub fn set_require_approval(&self, require_approval: bool) -> Result<(), StoreError> {
        self.mutate(|config| config.safety.require_approval = require_approval)?;
        info!(require_approval, "safety approval updated");
        Ok(())
    }

    /// Add an excluded path. Adding one that is already present is a no-op.
    pub fn add_excluded_path(&self, path: &str) -> Result<Change, StoreError> {
        let normalized = normalize_exclude_path(path)?;
        let change = self.mutate(|config| {
            if config.exclude_paths.contains(&normalized) {
                Change::AlreadyPresent
            } else {
                config.exclude_paths.push(normalized.clone());
                Change::Added
            }
        })?;
        info!(path = %normalized, ?change, "excluded path add");
        Ok(change)
    }

    pub fn remove_excluded_path(&self, path: &str) -> Result<Change, StoreError> {
        let normalized = normalize_exclude_path(path)?;
        let change = self.mutate(|config| remove_entry(&mut config.exclude_paths, &normalized))?;
        info!(path = %normalized, ?change, "excluded path remove");
        Ok(change)
    }

    pub fn add_whitelist_command(&self, command: &str) -> Result<Change, StoreError> {
        let command = non_empty(command.trim(), "whitelist command")?.to_string();
        let change = self.mutate(|config| add_entry(&mut config.whitelist.commands, &command))?;
        info!(%command, ?change, "whitelist command add");
        Ok(change)
    }

    pub fn remove_whitelist_command(&self, command: &str) -> Result<Change, StoreError> {
        let command = command.trim().to_string();
        let change = self.mutate(|config| remove_entry(&mut config.whitelist.commands, &command))?;
        info!(%command, ?change, "whitelist command remove");
        Ok(change)
    }

    /// Append a pattern. An invalid regular expression aborts the mutation.
    pub fn add_whitelist_pattern(&self, pattern: &str) -> Result<Change, StoreError> {
        non_empty(pattern.trim(), "whitelist pattern")?;
        let change = self.mutate(|config| add_entry(&mut config.whitelist.patterns, pattern))?;
        info!(%pattern, ?change, "whitelist pattern add");
        Ok(change)
    }

    pub fn remove_whitelist_pattern(&self, pattern: &str) -> Result<Change, StoreError> {
        let change = self.mutate(|config| remove_entry(&mut config.whitelist.patterns, pattern))?;
        info!(%pattern, ?change, "whitelist pattern remove");
        Ok(change)
    }
}

fn non_empty<'a>(value: &'a str, what: &'static str) -> Result<&'a str, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::EmptyEntry { what });
    }
    Ok(value)
}

fn add_entry(entries: &mut Vec<String>, value: &str) -> Change {
    if entries.iter().any(|entry| entry == value) {
        return Change::AlreadyPresent;
    }
    entries.push(value.to_string());
    Change::Added
}

fn remove_entry(entries: &mut Vec<String>, value: &str) -> Change {
    match entries.iter().position(|entry| entry == value) {
        Some(idx) => {
            entries.remove(idx);
            Change::Removed
        }
        None => Change::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::config::{SafetyConfig, WhitelistConfig};

    fn policy() -> Policy {
        Policy::from_config(&ToolsConfig {
            enabled: true,
            timeout: None,
            max_output_bytes: None,
            whitelist: WhitelistConfig {
                commands: vec!["ls".into()],
                patterns: vec!["^git status$".into()],
            },
            exclude_paths: vec!["/etc".into()],
            safety: SafetyConfig {
                require_approval: true,
            },
        })
        .unwrap()
    }

    #[derive(Clone, Default)]
    struct Recording {
        saved: Arc<Mutex<Vec<ToolsConfig>>>,
    }

    impl PolicyPersistence for Recording {
        fn persist(&self, tools: &ToolsConfig) -> anyhow::Result<()> {
            self.saved.lock().unwrap().push(tools.clone());
            Ok(())
        }
    }

    struct Failing;

    impl PolicyPersistence for Failing {
        fn persist(&self, _tools: &ToolsConfig) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_add_excluded_path_is_idempotent() {
        let store = PolicyStore::in_memory(policy());

        assert_eq!(store.add_excluded_path("/var/secrets").unwrap(), Change::Added);
        assert_eq!(
            store.add_excluded_path("/var/secrets/").unwrap(),
            Change::AlreadyPresent
        );

        let paths = store.current().to_config().exclude_paths;
        assert_eq!(paths, vec!["/etc".to_string(), "/var/secrets".to_string()]);
    }

    #[test]
    fn test_remove_missing_path_reports_not_found() {
        let recording = Recording::default();
        let store = PolicyStore::new(policy(), recording.clone());
        let before = store.current();

        assert_eq!(store.remove_excluded_path("/nowhere").unwrap(), Change::NotFound);
        assert!(Arc::ptr_eq(&before, &store.current()));
        assert!(recording.saved.lock().unwrap().is_empty());

        assert_eq!(store.remove_excluded_path("/etc/").unwrap(), Change::Removed);
        assert!(store.current().exclude_paths().is_empty());
    }

    #[test]
    fn test_mutation_persists_before_publishing() {
        let recording = Recording::default();
        let store = PolicyStore::new(policy(), recording.clone());

        store.set_enabled(false).unwrap();

        let saved = recording.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert!(!saved[0].enabled);
        assert!(!store.current().enabled());
    }

    #[test]
    fn test_failed_persistence_keeps_previous_policy() {
        let store = PolicyStore::new(policy(), Failing);

        let err = store.set_require_approval(false).unwrap_err();
        assert!(matches!(err, StoreError::Persist(_)));
        assert!(store.current().require_approval());
    }

    #[test]
    fn test_invalid_pattern_aborts_mutation() {
        let recording = Recording::default();
        let store = PolicyStore::new(policy(), recording.clone());

        let err = store.add_whitelist_pattern("^git (").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
        assert_eq!(store.current().whitelist_patterns().len(), 1);
        assert!(recording.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn test_whitelist_command_changes() {
        let store = PolicyStore::in_memory(policy());

        assert_eq!(store.add_whitelist_command(" cat ").unwrap(), Change::Added);
        assert_eq!(store.add_whitelist_command("cat").unwrap(), Change::AlreadyPresent);
        assert!(store.current().whitelist_commands().contains("cat"));
        assert_eq!(store.remove_whitelist_command("cat").unwrap(), Change::Removed);
        assert_eq!(store.remove_whitelist_command("cat").unwrap(), Change::NotFound);
    }

    #[test]
    fn test_empty_whitelist_entries_are_rejected() {
        let recording = Recording::default();
        let store = PolicyStore::new(policy(), recording.clone());

        for err in [
            store.add_whitelist_command("   ").unwrap_err(),
            store.add_whitelist_pattern("").unwrap_err(),
        ] {
            assert!(matches!(err, StoreError::Config(ConfigError::EmptyEntry { .. })));
        }
        assert_eq!(store.current().whitelist_commands().len(), 1);
        assert!(recording.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn test_old_snapshot_is_unchanged_after_swap() {
        let store = PolicyStore::in_memory(policy());
        let old = store.current();

        store.set_enabled(false).unwrap();

        assert!(old.enabled());
        assert!(!store.current().enabled());
    }

    #[test]
    fn test_concurrent_mutations_are_serialized() {
        let calls = Arc::new(AtomicUsize::new(0));

        struct Counting(Arc<AtomicUsize>);
        impl PolicyPersistence for Counting {
            fn persist(&self, _tools: &ToolsConfig) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let store = Arc::new(PolicyStore::new(policy(), Counting(calls.clone())));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    store.add_excluded_path(&format!("/data/{i}")).unwrap();
                    // readers run alongside writers
                    assert!(store.current().exclude_paths().len() >= 2);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.current().exclude_paths().len(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }
}
