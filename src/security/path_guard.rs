//! Excluded-path detection for candidate shell commands.
//!
//! Matching is name-based. The command is split into shell words with quotes
//! and escapes removed, `{a,b}` alternatives are expanded, and each word is
//! cut at operators and assignment separators into path candidates. A
//! candidate that bash would still expand (glob, parameter, sequence) is
//! judged by the literal text before the first expansion character.
//! Nothing here touches the filesystem.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use path_clean::PathClean;

use crate::error::ConfigError;

/// Characters that cut a shell word into path candidates, in addition to whitespace.
const WORD_SEPARATORS: &[char] = &['|', ';', '&', '<', '>', '(', ')', '`', '=', ':', ','];

/// Characters after which bash may turn the rest of a word into other text.
const EXPANSION_META: &[char] = &['*', '?', '[', '{', '$', '\\'];

const GLOB_META: &[char] = &['*', '?', '['];

const MAX_BRACE_EXPANSIONS: usize = 64;

/// Reported as the matching entry when a command cannot be split into words.
pub const UNBALANCED_QUOTING: &str = "<unbalanced quoting>";

/// Compiled set of excluded paths, built once per policy.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    entries: BTreeSet<String>,
    prefixes: Vec<String>,
    globs: Vec<String>,
    glob_set: GlobSet,
}

impl ExcludeSet {
    /// Normalize and compile `paths`. Duplicates collapse.
    pub fn new<I, S>(paths: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = BTreeSet::new();
        for raw in paths {
            entries.insert(normalize_exclude_path(raw.as_ref())?);
        }

        let mut prefixes = Vec::new();
        let mut globs = Vec::new();
        let mut builder = GlobSetBuilder::new();
        for entry in &entries {
            if entry.contains(GLOB_META) {
                let glob = Glob::new(entry).map_err(|err| ConfigError::InvalidExcludePath {
                    path: entry.clone(),
                    reason: err.to_string(),
                })?;
                builder.add(glob);
                globs.push(entry.clone());
            } else {
                prefixes.push(entry.clone());
            }
        }
        let glob_set = builder
            .build()
            .map_err(|err| ConfigError::InvalidExcludePath {
                path: globs.join(", "),
                reason: err.to_string(),
            })?;

        Ok(Self {
            entries,
            prefixes,
            globs,
            glob_set,
        })
    }

    pub fn empty() -> Self {
        Self {
            entries: BTreeSet::new(),
            prefixes: Vec::new(),
            globs: Vec::new(),
            glob_set: GlobSet::empty(),
        }
    }

    /// Normalized entries, as they are persisted.
    pub fn entries(&self) -> &BTreeSet<String> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the entry that the path candidate `token` may refer to, if any.
    fn matching_entry(&self, token: &str) -> Option<&str> {
        self.entry_covering(&clean(token)).or_else(|| {
            let literal = &token[..token.find(EXPANSION_META)?];
            self.entry_reachable_from(literal)
        })
    }

    /// The entry `token` equals or sits below.
    fn entry_covering(&self, token: &str) -> Option<&str> {
        if let Some(prefix) = self.prefixes.iter().find(|p| path_is_under(token, p)) {
            return Some(prefix.as_str());
        }
        if self.globs.is_empty() {
            return None;
        }

        Path::new(token)
            .ancestors()
            .filter(|ancestor| !ancestor.as_os_str().is_empty())
            .find_map(|ancestor| {
                let mut hits = self.glob_set.matches(ancestor);
                if hits.is_empty() {
                    if let Some(name) = ancestor.file_name() {
                        hits = self.glob_set.matches(name);
                    }
                }
                hits.first().and_then(|idx| self.globs.get(*idx))
            })
            .map(String::as_str)
    }

    /// An entry that some expansion of a word starting with `literal` could name.
    fn entry_reachable_from(&self, literal: &str) -> Option<&str> {
        if literal.is_empty() {
            return None;
        }
        let partial = literal.rsplit('/').next().unwrap_or_default();
        let mut stem = clean(literal).into_owned();
        if literal.ends_with('/') && !stem.ends_with('/') {
            stem.push('/');
        }

        self.prefixes
            .iter()
            .find(|entry| {
                if path_is_under(&stem, entry) {
                    return true;
                }
                let absolute = entry.starts_with('/');
                if absolute == stem.starts_with('/') && format!("{entry}/").starts_with(&stem) {
                    return true;
                }
                // Relative entries can also start at any component.
                !absolute && !matches!(partial, "" | "." | "..") && entry.starts_with(partial)
            })
            .map(String::as_str)
    }
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// Normalize a user-supplied excluded path.
///
/// Trims whitespace, drops a trailing `/` or `/*`, and lexically resolves
/// `.`, `..` and repeated separators. `/` stays `/`.
pub fn normalize_exclude_path(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix("/*").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidExcludePath {
            path: raw.to_string(),
            reason: "path cannot be empty".to_string(),
        });
    }
    Ok(clean(trimmed).into_owned())
}

/// Report whether `command` references any excluded path.
pub fn contains_excluded_path(command: &str, excludes: &ExcludeSet) -> bool {
    find_excluded_path(command, excludes).is_some()
}

/// Like [`contains_excluded_path`], returning the excluded entry that matched.
///
/// Stops at the first match. A command with unbalanced quoting cannot be
/// split reliably and matches as [`UNBALANCED_QUOTING`].
pub fn find_excluded_path<'a>(command: &str, excludes: &'a ExcludeSet) -> Option<&'a str> {
    if excludes.is_empty() {
        return None;
    }
    let Ok(words) = shell_words::split(&strip_dollar_quotes(command)) else {
        return Some(UNBALANCED_QUOTING);
    };

    words
        .iter()
        .flat_map(|word| expand_braces(word))
        .find_map(|word| {
            word.split(|c: char| c.is_whitespace() || WORD_SEPARATORS.contains(&c))
                .filter(|token| !token.is_empty())
                .find_map(|token| excludes.matching_entry(token))
        })
}

/// Turn `$'..'` and `$".."` into plain quotes so their contents stay one word.
fn strip_dollar_quotes(command: &str) -> Cow<'_, str> {
    if !command.contains("$'") && !command.contains("$\"") {
        return Cow::Borrowed(command);
    }
    Cow::Owned(command.replace("$'", "'").replace("$\"", "\""))
}

/// Expand `{a,b}` alternatives, including nested ones.
///
/// Sequence expressions (`{a..c}`) and anything past the expansion limit stay
/// as written.
fn expand_braces(word: &str) -> Vec<String> {
    let mut done = Vec::new();
    let mut pending = vec![word.to_string()];
    while let Some(word) = pending.pop() {
        match split_brace_group(&word) {
            Some((head, alternatives, tail))
                if done.len() + pending.len() + alternatives.len() <= MAX_BRACE_EXPANSIONS =>
            {
                pending.extend(
                    alternatives
                        .iter()
                        .map(|alternative| format!("{head}{alternative}{tail}")),
                );
            }
            _ => done.push(word),
        }
    }
    done
}

/// First `{x,y}` group in `word` as (text before, alternatives, text after).
fn split_brace_group(word: &str) -> Option<(&str, Vec<&str>, &str)> {
    let mut from = 0;
    while let Some(offset) = word[from..].find('{') {
        let open = from + offset;
        let mut depth = 0usize;
        let mut start = open + 1;
        let mut alternatives = Vec::new();
        for (idx, c) in word[open..].char_indices() {
            let idx = open + idx;
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        // `{x}` has no alternatives and is left alone by bash.
                        if alternatives.is_empty() {
                            break;
                        }
                        alternatives.push(&word[start..idx]);
                        return Some((&word[..open], alternatives, &word[idx + 1..]));
                    }
                }
                ',' if depth == 1 => {
                    alternatives.push(&word[start..idx]);
                    start = idx + 1;
                }
                _ => {}
            }
        }
        from = open + 1;
    }
    None
}

/// Lexically clean a path-like token, borrowing when it is already clean.
fn clean(token: &str) -> Cow<'_, str> {
    let needs_cleaning = token.contains("//")
        || token.contains("/.")
        || token.starts_with("./")
        || token == "."
        || (token.len() > 1 && token.ends_with('/'));
    if !needs_cleaning {
        return Cow::Borrowed(token);
    }
    Cow::Owned(Path::new(token).clean().to_string_lossy().into_owned())
}

/// `token` equals `entry` or sits below it on a `/` boundary.
///
/// Relative entries also match when they appear as a path component run
/// inside a longer path (`.git` matches `repo/.git/config`).
fn path_is_under(token: &str, entry: &str) -> bool {
    if entry == "/" {
        return token.starts_with('/');
    }
    if is_prefix_on_boundary(token, entry) {
        return true;
    }
    if entry.starts_with('/') {
        return false;
    }
    token.match_indices(entry).any(|(idx, _)| {
        idx > 0 && token.as_bytes()[idx - 1] == b'/' && is_prefix_on_boundary(&token[idx..], entry)
    })
}

fn is_prefix_on_boundary(token: &str, entry: &str) -> bool {
    token
        .strip_prefix(entry)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
