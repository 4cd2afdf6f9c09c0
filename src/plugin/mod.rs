//! Plugin contract and per-plugin bookkeeping.
//!
//! A plugin is a self-contained unit declaring what host data to collect
//! for one subsystem. Plugins never perform collection I/O themselves:
//! `setup` declares copy specs, forbidden paths and commands, and the
//! engine resolves those declarations against the archive.

pub mod builtin;
mod context;
mod registry;

pub use context::PluginContext;
pub use registry::{DiscoveryError, PluginFactory, PluginRegistry, SearchLocation};

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::exec::{ExitDisposition, DEFAULT_TIMEOUT};
use crate::policy::{CapabilityTag, Policy};

/// A plugin option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl OptionValue {
    /// Parse a raw `-k plugin.option=value` right-hand side.
    ///
    /// The off-words map to false, integers are tried next, anything
    /// else stays a string.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "off" | "disable" | "disabled" | "false" => return Self::Bool(false),
            "on" | "enable" | "enabled" | "true" => return Self::Bool(true),
            _ => {}
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Self::Int(n);
        }
        Self::Str(raw.to_string())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("on"),
            Self::Bool(false) => f.write_str("off"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Declared option: name, description and default value.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
    pub default: OptionValue,
}

impl OptionSpec {
    pub fn new(name: &str, description: &str, default: OptionValue) -> Self {
        Self { name: name.to_string(), description: description.to_string(), default }
    }
}

/// An option with its current value (initially the default).
#[derive(Debug, Clone)]
pub struct PluginOption {
    pub spec: OptionSpec,
    pub value: OptionValue,
}

/// Static description of a plugin, created at registration time.
#[derive(Debug, Clone)]
pub struct PluginDeclaration {
    pub name: String,
    pub description: String,
    pub version: String,
    /// Collecting this plugin's data needs elevated privileges.
    pub requires_root: bool,
    /// Loaded without explicit enablement.
    pub default_enabled: bool,
    /// Platform families this plugin is valid for.
    pub tags: Vec<CapabilityTag>,
    pub options: Vec<OptionSpec>,
    /// Presence of any of these files marks the plugin applicable.
    pub trigger_files: Vec<String>,
    /// Presence of any of these packages marks the plugin applicable.
    pub trigger_packages: Vec<String>,
}

impl PluginDeclaration {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            version: "unversioned".to_string(),
            requires_root: true,
            default_enabled: true,
            tags: Vec::new(),
            options: Vec::new(),
            trigger_files: Vec::new(),
            trigger_packages: Vec::new(),
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn requires_root(mut self, requires_root: bool) -> Self {
        self.requires_root = requires_root;
        self
    }

    pub fn default_enabled(mut self, default_enabled: bool) -> Self {
        self.default_enabled = default_enabled;
        self
    }

    pub fn tag(mut self, tag: CapabilityTag) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn option(mut self, name: &str, description: &str, default: OptionValue) -> Self {
        self.options.push(OptionSpec::new(name, description, default));
        self
    }

    pub fn trigger_file(mut self, path: &str) -> Self {
        self.trigger_files.push(path.to_string());
        self
    }

    pub fn trigger_package(mut self, package: &str) -> Self {
        self.trigger_packages.push(package.to_string());
        self
    }
}

/// Record of a file copied into the archive.
#[derive(Debug, Clone)]
pub struct CopiedFile {
    pub src: PathBuf,
    pub dest: String,
    pub symlink: bool,
    pub points_to: Option<PathBuf>,
}

/// Record of an executed external command.
#[derive(Debug)]
pub struct ExecutedCommand {
    pub cmdline: String,
    /// Destination file inside the archive, if output was recorded.
    pub output_file: Option<String>,
    pub status: ExitDisposition,
    pub runtime: Duration,
}

/// A command queued during setup, run by the engine during collection.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub cmdline: String,
    pub suggested_filename: Option<String>,
    pub root_symlink: Option<String>,
    pub timeout: Duration,
}

impl QueuedCommand {
    pub fn new(cmdline: &str) -> Self {
        Self {
            cmdline: cmdline.to_string(),
            suggested_filename: None,
            root_symlink: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn filename(mut self, filename: &str) -> Self {
        self.suggested_filename = Some(filename.to_string());
        self
    }

    pub fn root_symlink(mut self, link_name: &str) -> Self {
        self.root_symlink = Some(link_name.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A deferred glob-pattern declaration of paths to archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySpec {
    pub pattern: String,
    /// Substring rename rule (old, new) applied to destinations.
    pub rename: Option<(String, String)>,
    /// Cumulative size limit in bytes across the expanded matches.
    pub size_limit: Option<u64>,
}

/// A string queued for `sos_strings/<plugin>/<filename>`.
#[derive(Debug, Clone)]
pub struct StringEntry {
    pub content: String,
    pub filename: String,
}

/// Mutable collections a plugin accumulates during its lifecycle.
#[derive(Debug, Default)]
pub struct PluginState {
    pub copied_files: Vec<CopiedFile>,
    pub executed_commands: Vec<ExecutedCommand>,
    pub queued_commands: Vec<QueuedCommand>,
    pub copy_specs: Vec<CopySpec>,
    pub copy_strings: Vec<StringEntry>,
    pub forbidden_paths: Vec<String>,
    pub alerts: Vec<String>,
    pub diagnose_msgs: Vec<String>,
    pub custom_text: String,
    pub options: Vec<PluginOption>,
}

impl PluginState {
    /// Initialize option values from a declaration's defaults.
    pub fn with_options(specs: &[OptionSpec]) -> Self {
        Self {
            options: specs
                .iter()
                .map(|spec| PluginOption { spec: spec.clone(), value: spec.default.clone() })
                .collect(),
            ..Self::default()
        }
    }

    /// Set a named option; false if the plugin declares no such option.
    pub fn set_option(&mut self, name: &str, value: OptionValue) -> bool {
        for option in &mut self.options {
            if option.spec.name == name {
                option.value = value;
                return true;
            }
        }
        false
    }

    /// Current value of a named option.
    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.iter().find(|o| o.spec.name == name).map(|o| &o.value)
    }

    /// Destination recorded for a source path, if it was copied.
    ///
    /// Copy records are appended before any rename re-query, so a
    /// renamed destination resolves from history rather than from the
    /// substitution rule again.
    pub fn dest_for_src(&self, src: &Path) -> Option<&str> {
        self.copied_files.iter().find(|f| f.src == src).map(|f| f.dest.as_str())
    }
}

/// A unit of data collection for one subsystem.
pub trait Plugin {
    /// Describe this plugin: identity, options, capability tags.
    fn declaration(&self) -> PluginDeclaration;

    /// Soft gate: whether the defining package or file is present on
    /// this host. Overridden by explicit enablement flags.
    fn check_enabled(&self, policy: &dyn Policy) -> bool {
        let decl = self.declaration();
        if decl.trigger_files.is_empty() && decl.trigger_packages.is_empty() {
            return true;
        }
        decl.trigger_files.iter().any(|f| Path::new(f).exists())
            || decl.trigger_packages.iter().any(|p| policy.pkg_by_name(p).is_some())
    }

    /// Check configuration sanity before collection begins.
    fn diagnose(&self, _ctx: &mut PluginContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Declare copy specs, forbidden paths and commands to collect.
    fn setup(&self, ctx: &mut PluginContext<'_>) -> anyhow::Result<()>;

    /// Optional analysis over collected data.
    fn analyze(&self, _ctx: &mut PluginContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Post-processing over already-archived content, typically
    /// redaction.
    fn postproc(&self, _ctx: &mut PluginContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").field("name", &self.declaration().name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_value_parsing() {
        assert_eq!(OptionValue::parse("off"), OptionValue::Bool(false));
        assert_eq!(OptionValue::parse("Disabled"), OptionValue::Bool(false));
        assert_eq!(OptionValue::parse("on"), OptionValue::Bool(true));
        assert_eq!(OptionValue::parse("15"), OptionValue::Int(15));
        assert_eq!(OptionValue::parse("-3"), OptionValue::Int(-3));
        assert_eq!(OptionValue::parse("eth0"), OptionValue::Str("eth0".to_string()));
    }

    #[test]
    fn test_declaration_defaults() {
        let decl = PluginDeclaration::new("demo", "demo plugin");
        assert!(decl.requires_root);
        assert!(decl.default_enabled);
        assert_eq!(decl.version, "unversioned");
        assert!(decl.tags.is_empty());
    }

    #[test]
    fn test_state_option_handling() {
        let specs = vec![OptionSpec::new("size_limit", "limit", OptionValue::Int(25))];
        let mut state = PluginState::with_options(&specs);

        assert_eq!(state.option("size_limit"), Some(&OptionValue::Int(25)));
        assert!(state.set_option("size_limit", OptionValue::Int(5)));
        assert_eq!(state.option("size_limit"), Some(&OptionValue::Int(5)));
        assert!(!state.set_option("bogus", OptionValue::Bool(true)));
        assert_eq!(state.option("bogus"), None);
    }

    #[test]
    fn test_dest_for_src_uses_history() {
        let mut state = PluginState::default();
        state.copied_files.push(CopiedFile {
            src: PathBuf::from("/etc/app.conf"),
            dest: "configurations/app.conf".to_string(),
            symlink: false,
            points_to: None,
        });
        assert_eq!(
            state.dest_for_src(Path::new("/etc/app.conf")),
            Some("configurations/app.conf")
        );
        assert_eq!(state.dest_for_src(Path::new("/etc/other.conf")), None);
    }
}
