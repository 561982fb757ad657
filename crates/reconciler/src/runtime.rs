//! Runtime registry: runtime alias to container image.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Registered runtimes, injected into the reconciler at construction.
///
/// Lookups are case-insensitive substring matches. An entry matches when its
/// name contains the alias (`py` finds `python`); failing that, when the
/// alias contains its name (`python3.9` finds `python`). Entries are scanned
/// in name order and the first match wins, so overlapping names such as
/// `node` and `nodejs` make the result depend on naming rather than intent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeRegistry {
    /// Lower-cased runtime name to image reference.
    entries: BTreeMap<String, String>,
}

impl RuntimeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a name-to-image mapping. Blank names are skipped.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        entries
            .into_iter()
            .fold(Self::new(), |registry, (name, image)| {
                registry.with_runtime(name.as_ref(), image)
            })
    }

    /// Register a runtime. A blank name would match every alias and is
    /// ignored.
    #[must_use]
    pub fn with_runtime(mut self, name: &str, image: impl Into<String>) -> Self {
        let name = name.trim().to_lowercase();
        if !name.is_empty() {
            self.entries.insert(name, image.into());
        }
        self
    }

    /// Image for a runtime alias.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeNotRegistered`] if no entry matches.
    pub fn image_for(&self, alias: &str) -> Result<&str> {
        let needle = alias.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::runtime_not_registered(alias));
        }

        self.entries
            .iter()
            .find(|(name, _)| name.contains(&needle))
            .or_else(|| self.entries.iter().find(|(name, _)| needle.contains(name.as_str())))
            .map(|(_, image)| image.as_str())
            .ok_or_else(|| Error::runtime_not_registered(alias))
    }

    /// Registered runtimes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, image)| (name.as_str(), image.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
