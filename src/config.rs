//! On-disk configuration.
//!
//! A small TOML file can pre-disable plugins and seed plugin tunables
//! before the command line is consulted. A missing file is not an
//! error; a malformed one is reported and ignored so a bad config can
//! never keep a report from being generated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Default location consulted when `--config-file` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sosrep.conf";

/// Resolve the configuration path: an explicit override wins, then the
/// system file, then the per-user file.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let system = PathBuf::from(DEFAULT_CONFIG_PATH);
    if system.exists() {
        return system;
    }
    dirs::config_dir().map_or(system, |dir| dir.join("sosrep").join("sosrep.conf"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub plugins: PluginsSection,
    /// Plugin tunables keyed as `plugin.option`.
    pub tunables: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginsSection {
    /// Comma-separated plugin names to skip, same syntax as `-n`.
    pub disable: String,
}

impl FileConfig {
    /// Reads configuration from `path`. Missing and unreadable files
    /// both yield the defaults; only parse failures are reported.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), %err, "ignoring malformed config file");
                Self::default()
            }
        }
    }

    /// Plugin names disabled by the config file.
    pub fn disabled_plugins(&self) -> Vec<String> {
        self.plugins
            .disable
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    /// Tunables flattened to the `plugin.option=value` strings the
    /// engine parses, in key order. Config values are applied before
    /// command-line ones so the latter win.
    pub fn tunable_strings(&self) -> Vec<String> {
        self.tunables
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{key}={rendered}")
            })
            .collect()
    }
}
