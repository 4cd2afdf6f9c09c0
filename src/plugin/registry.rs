//! Plugin discovery and loading.
//!
//! Candidates are enumerated from search locations: the registration
//! table compiled into the binary (the bundled distribution) and any
//! extra plugin directories, whose file stems name the units they
//! provide. Discovery is deterministic (lexically sorted, deduplicated)
//! and restartable. Loading a candidate that no factory backs is a
//! typed, non-fatal error unless strict mode is requested.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use super::Plugin;

/// Constructs a plugin instance for one report run.
pub type PluginFactory = fn() -> Box<dyn Plugin>;

/// Errors raised while discovering or loading plugin candidates.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A candidate name with no registered factory behind it.
    #[error("no plugin registered under '{0}'")]
    UnknownCandidate(String),

    /// A search location that could not be enumerated.
    #[error("failed to read plugin location {path}: {source}")]
    Location {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where plugin candidates are looked for.
#[derive(Debug, Clone)]
pub enum SearchLocation {
    /// The registration table compiled into this binary.
    Builtin,
    /// A directory whose file stems name plugin units.
    Dir(PathBuf),
}

/// Registration table mapping candidate names to factories.
pub struct PluginRegistry {
    table: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { table: BTreeMap::new() }
    }

    /// The registry pre-populated with the built-in plugins.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (name, factory) in super::builtin::all() {
            registry.register(name, factory);
        }
        registry
    }

    /// Register a factory under a candidate name.
    pub fn register(&mut self, name: &str, factory: PluginFactory) {
        self.table.insert(name.to_string(), factory);
    }

    /// Names of every registered factory.
    pub fn registered_names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Enumerate candidate names from the given locations.
    ///
    /// The result is lexically sorted and deduplicated regardless of
    /// location order, so registration order downstream is stable.
    pub fn discover(
        &self,
        locations: &[SearchLocation],
    ) -> Result<Vec<String>, DiscoveryError> {
        let mut candidates = Vec::new();
        for location in locations {
            match location {
                SearchLocation::Builtin => {
                    candidates.extend(self.table.keys().cloned());
                }
                SearchLocation::Dir(path) => {
                    let entries = std::fs::read_dir(path).map_err(|source| {
                        DiscoveryError::Location { path: path.clone(), source }
                    })?;
                    for entry in entries {
                        let entry = entry.map_err(|source| DiscoveryError::Location {
                            path: path.clone(),
                            source,
                        })?;
                        if !entry.path().is_file() {
                            continue;
                        }
                        if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                            candidates.push(stem.to_string());
                        }
                    }
                }
            }
        }
        candidates.sort();
        candidates.dedup();
        Ok(candidates)
    }

    /// Instantiate the plugin behind a candidate name.
    pub fn load(&self, candidate: &str) -> Result<Box<dyn Plugin>, DiscoveryError> {
        self.table
            .get(candidate)
            .map(|factory| factory())
            .ok_or_else(|| DiscoveryError::UnknownCandidate(candidate.to_string()))
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{PluginContext, PluginDeclaration};
    use tempfile::TempDir;

    struct Dummy;

    impl Plugin for Dummy {
        fn declaration(&self) -> PluginDeclaration {
            PluginDeclaration::new("dummy", "dummy plugin")
        }

        fn setup(&self, _ctx: &mut PluginContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn dummy_factory() -> Box<dyn Plugin> {
        Box::new(Dummy)
    }

    #[test]
    fn test_builtin_discovery_is_sorted() {
        let registry = PluginRegistry::builtin();
        let candidates = registry.discover(&[SearchLocation::Builtin]).unwrap();
        let mut sorted = candidates.clone();
        sorted.sort();
        assert_eq!(candidates, sorted);
        assert!(!candidates.is_empty());
    }

    #[test]
    fn test_discovery_is_restartable() {
        let registry = PluginRegistry::builtin();
        let first = registry.discover(&[SearchLocation::Builtin]).unwrap();
        let second = registry.discover(&[SearchLocation::Builtin]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_directory_candidates_merge_and_dedup() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("zeta.plugin"), b"").unwrap();
        std::fs::write(dir.path().join("alpha.plugin"), b"").unwrap();
        std::fs::write(dir.path().join("alpha.conf"), b"").unwrap();

        let mut registry = PluginRegistry::new();
        registry.register("alpha", dummy_factory);

        let candidates = registry
            .discover(&[SearchLocation::Builtin, SearchLocation::Dir(dir.path().to_path_buf())])
            .unwrap();
        assert_eq!(candidates, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_unknown_candidate_is_typed_error() {
        let registry = PluginRegistry::new();
        let err = registry.load("ghost").unwrap_err();
        assert!(matches!(err, DiscoveryError::UnknownCandidate(name) if name == "ghost"));
    }

    #[test]
    fn test_missing_directory_is_location_error() {
        let registry = PluginRegistry::new();
        let err = registry
            .discover(&[SearchLocation::Dir(PathBuf::from("/nonexistent/plugin/dir"))])
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Location { .. }));
    }

    #[test]
    fn test_load_registered_candidate() {
        let mut registry = PluginRegistry::new();
        registry.register("dummy", dummy_factory);
        let plugin = registry.load("dummy").unwrap();
        assert_eq!(plugin.declaration().name, "dummy");
    }
}
