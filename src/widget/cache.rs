//! Shell cache keyed by `(source_path, locale)`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::document::Shell;

/// Cache key for a bundled shell. Locale is an explicit component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShellKey {
    /// Widget path on the source host, e.g. `/widgets/greet`.
    pub source_path: String,
    /// Locale segment, e.g. `ko`.
    pub locale: String,
}

impl ShellKey {
    /// Build a key from its parts.
    #[must_use]
    pub fn new(source_path: &str, locale: &str) -> Self {
        Self {
            source_path: source_path.to_owned(),
            locale: locale.to_owned(),
        }
    }
}

/// Immutable pre-injection shells shared by every bundling call.
///
/// Concurrent bundles of the same key may both write; the content is
/// equivalent, so the last write wins.
#[derive(Debug, Default)]
pub struct ShellCache {
    entries: RwLock<HashMap<ShellKey, Shell>>,
}

impl ShellCache {
    /// Look up a shell.
    #[must_use]
    pub fn get(&self, key: &ShellKey) -> Option<Shell> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Store a shell, replacing any previous entry for the key.
    pub fn insert(&self, key: ShellKey, shell: Shell) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, shell);
    }

    /// Number of cached shells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
