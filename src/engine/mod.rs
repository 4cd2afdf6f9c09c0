//! Run orchestration.
//!
//! The engine owns the platform policy, the plugin set and the archive
//! for one report run. A run walks every loaded plugin through a fixed
//! lifecycle (diagnose, setup, collect, analyze, postproc) with
//! per-phase fault isolation, then seals and compresses the archive and
//! writes a checksum next to it.

mod resolve;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::archive::{finalize_compression, Archive, ArchiveError, ArchiveFormat, CompressionMethod};
use crate::config::{FileConfig, DEFAULT_CONFIG_PATH};
use crate::exec::CommandRunner;
use crate::plugin::{
    DiscoveryError, OptionValue, Plugin, PluginContext, PluginDeclaration, PluginRegistry,
    PluginState, SearchLocation,
};
use crate::policy::{HashAlgorithm, Policy};
use crate::report::{PlainTextReport, Report, Section, SectionEntry};

use resolve::Resolver;

/// Errors that abort a run before any collection happens.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A plugin named on the command line that no location provides.
    #[error("a non-existing plugin ({0}) was specified on the command line")]
    UnknownPlugin(String),

    /// Nothing survived the eligibility gates.
    #[error("no valid plugins were enabled")]
    NoPluginsLoaded,

    /// A tunable addressed an option the plugin does not declare.
    #[error("plugin '{plugin}' has no option '{option}'")]
    UnknownOption { plugin: String, option: String },

    /// A tunable that is not of the form `plugin.option[=value]`.
    #[error("invalid plugin option '{0}', expected plugin.option[=value]")]
    MalformedOption(String),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a discovered plugin was not selected for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Tags do not intersect the policy's eligible set.
    InvalidPlatform,
    /// Needs elevated privileges the current user lacks.
    RequiresRoot,
    /// Named by `-n` or disabled in the config file.
    Excluded,
    /// Soft gate: defining file or package absent from this host.
    Inactive,
    /// Loads only on explicit enablement.
    NotDefaultEnabled,
    /// Filtered out by `-o`.
    NotOnly,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::InvalidPlatform => "not valid for this platform",
            Self::RequiresRoot => "requires elevated privilege",
            Self::Excluded => "excluded on request",
            Self::Inactive => "defining package or file not present",
            Self::NotDefaultEnabled => "not enabled by default",
            Self::NotOnly => "not in the only-plugins list",
        };
        f.write_str(reason)
    }
}

/// Everything configurable about one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Never prompt; missing answers stay empty.
    pub batch: bool,
    /// Suppress console narration (logging is unaffected).
    pub silent: bool,
    /// Strict mode: plugin hook errors abort instead of being isolated.
    pub debug: bool,
    pub diagnose: bool,
    pub analyze: bool,
    pub report: bool,
    pub enable_plugins: Vec<String>,
    pub only_plugins: Vec<String>,
    pub skip_plugins: Vec<String>,
    /// Raw `plugin.option[=value]` tunables from the command line.
    pub plugin_options: Vec<String>,
    /// Turn on every boolean plugin option.
    pub all_bool_options: bool,
    pub compression: CompressionMethod,
    pub plugin_dirs: Vec<PathBuf>,
    pub config_file: PathBuf,
    pub tmp_dir: PathBuf,
    pub operator_name: Option<String>,
    pub ticket_number: Option<String>,
    /// Run log file archived as `sos_logs/sos.log` during final work.
    pub log_path: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch: false,
            silent: false,
            debug: false,
            diagnose: false,
            analyze: false,
            report: true,
            enable_plugins: Vec::new(),
            only_plugins: Vec::new(),
            skip_plugins: Vec::new(),
            plugin_options: Vec::new(),
            all_bool_options: false,
            compression: CompressionMethod::Auto,
            plugin_dirs: Vec::new(),
            config_file: PathBuf::from(DEFAULT_CONFIG_PATH),
            tmp_dir: std::env::temp_dir(),
            operator_name: None,
            ticket_number: None,
            log_path: None,
        }
    }
}

/// A plugin selected for the run, with its mutable state.
struct LoadedPlugin {
    name: String,
    declaration: PluginDeclaration,
    plugin: Box<dyn Plugin>,
    state: PluginState,
}

/// Orchestrates one report run.
pub struct ReportEngine {
    options: RunOptions,
    policy: Box<dyn Policy>,
    runner: CommandRunner,
    cancelled: Arc<AtomicBool>,
    /// Every candidate name any location provided.
    known: Vec<String>,
    plugins: Vec<LoadedPlugin>,
    skipped: Vec<(String, SkipReason)>,
}

impl std::fmt::Debug for ReportEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportEngine").finish_non_exhaustive()
    }
}

impl ReportEngine {
    /// Build an engine for this host: detect the policy once, then load
    /// plugins through the eligibility gates.
    pub fn new(options: RunOptions) -> Result<Self, EngineError> {
        let policy = crate::policy::detect();
        Self::with_registry(options, policy, PluginRegistry::builtin())
    }

    /// Build an engine with an explicit policy and registry.
    pub fn with_registry(
        options: RunOptions,
        policy: Box<dyn Policy>,
        registry: PluginRegistry,
    ) -> Result<Self, EngineError> {
        let config = FileConfig::load(&options.config_file);
        let mut engine = Self {
            options,
            policy,
            runner: CommandRunner::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            known: Vec::new(),
            plugins: Vec::new(),
            skipped: Vec::new(),
        };
        engine.load_plugins(&registry, &config)?;
        engine.apply_tunables(&config.tunable_strings(), false)?;
        let cli_tunables = engine.options.plugin_options.clone();
        engine.apply_tunables(&cli_tunables, true)?;
        if engine.options.all_bool_options {
            engine.enable_all_bool_options();
        }
        Ok(engine)
    }

    /// Install the SIGINT handler setting the cooperative cancel flag.
    /// Call at most once per process.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let cancelled = Arc::clone(&self.cancelled);
        ctrlc::set_handler(move || {
            cancelled.store(true, Ordering::SeqCst);
        })
    }

    fn cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn load_plugins(
        &mut self,
        registry: &PluginRegistry,
        config: &FileConfig,
    ) -> Result<(), EngineError> {
        let mut locations = vec![SearchLocation::Builtin];
        locations.extend(self.options.plugin_dirs.iter().cloned().map(SearchLocation::Dir));

        let mut candidates = Vec::new();
        for location in &locations {
            match registry.discover(std::slice::from_ref(location)) {
                Ok(found) => candidates.extend(found),
                Err(e) if self.options.debug => return Err(e.into()),
                Err(e) => warn!(error = %e, "skipping unreadable plugin location"),
            }
        }
        candidates.sort();
        candidates.dedup();
        self.known = candidates;

        let mut excluded = self.options.skip_plugins.clone();
        excluded.extend(config.disabled_plugins());

        let known = self.known.clone();
        for candidate in &known {
            let plugin = match registry.load(candidate) {
                Ok(plugin) => plugin,
                Err(e) if self.options.debug => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "skipping unloadable plugin candidate");
                    continue;
                }
            };
            let declaration = plugin.declaration();
            let explicit = self.options.enable_plugins.contains(candidate)
                || self.options.only_plugins.contains(candidate);

            let skip = if !self.policy.validate_plugin(&declaration.tags) {
                Some(SkipReason::InvalidPlatform)
            } else if declaration.requires_root && !self.policy.is_privileged() {
                Some(SkipReason::RequiresRoot)
            } else if excluded.contains(candidate) {
                Some(SkipReason::Excluded)
            } else if !explicit && !plugin.check_enabled(self.policy.as_ref()) {
                Some(SkipReason::Inactive)
            } else if !explicit && !declaration.default_enabled {
                Some(SkipReason::NotDefaultEnabled)
            } else if !self.options.only_plugins.is_empty()
                && !self.options.only_plugins.contains(candidate)
            {
                Some(SkipReason::NotOnly)
            } else {
                None
            };

            match skip {
                Some(reason) => {
                    debug!(plugin = candidate, %reason, "plugin skipped");
                    self.skipped.push((candidate.clone(), reason));
                }
                None => {
                    let state = PluginState::with_options(&declaration.options);
                    self.plugins.push(LoadedPlugin {
                        name: candidate.clone(),
                        declaration,
                        plugin,
                        state,
                    });
                }
            }
        }

        for named in self
            .options
            .enable_plugins
            .iter()
            .chain(&self.options.only_plugins)
            .chain(&self.options.skip_plugins)
        {
            if !self.known.contains(named) {
                return Err(EngineError::UnknownPlugin(named.clone()));
            }
        }
        Ok(())
    }

    /// Apply `plugin.option[=value]` tunables. Strict application (the
    /// command line) makes bad names fatal; lenient application (the
    /// config file) only warns, so a stale config never blocks a run.
    fn apply_tunables(&mut self, raw: &[String], strict: bool) -> Result<(), EngineError> {
        for item in raw {
            let (target, value) = match item.split_once('=') {
                Some((target, value)) => (target, OptionValue::parse(value)),
                None => (item.as_str(), OptionValue::Bool(true)),
            };
            let Some((plugin_name, option_name)) = target.split_once('.') else {
                if strict {
                    return Err(EngineError::MalformedOption(item.clone()));
                }
                warn!(tunable = item, "ignoring malformed tunable");
                continue;
            };

            match self.plugins.iter_mut().find(|p| p.name == plugin_name) {
                Some(plugin) => {
                    if !plugin.state.set_option(option_name, value) {
                        if strict {
                            return Err(EngineError::UnknownOption {
                                plugin: plugin_name.to_string(),
                                option: option_name.to_string(),
                            });
                        }
                        warn!(plugin = plugin_name, option = option_name, "unknown tunable");
                    }
                }
                None if strict && !self.known.contains(&plugin_name.to_string()) => {
                    return Err(EngineError::UnknownPlugin(plugin_name.to_string()));
                }
                None => {
                    debug!(plugin = plugin_name, tunable = item, "tunable for inactive plugin");
                }
            }
        }
        Ok(())
    }

    fn enable_all_bool_options(&mut self) {
        for plugin in &mut self.plugins {
            let bool_options: Vec<String> = plugin
                .state
                .options
                .iter()
                .filter(|o| matches!(o.value, OptionValue::Bool(_)))
                .map(|o| o.spec.name.clone())
                .collect();
            for name in bool_options {
                plugin.state.set_option(&name, OptionValue::Bool(true));
            }
        }
    }

    /// Names of the plugins selected for this run.
    pub fn selected_plugins(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|p| p.name.as_str())
    }

    /// Skipped plugins with their reasons.
    pub fn skipped_plugins(&self) -> &[(String, SkipReason)] {
        &self.skipped
    }

    /// Human-readable listing of enabled and disabled plugins and their
    /// options.
    pub fn list_plugins(&self) -> String {
        let mut out = String::new();
        if self.plugins.is_empty() {
            out.push_str("No plugins are currently enabled.\n");
        } else {
            out.push_str("The following plugins are currently enabled:\n\n");
            for plugin in &self.plugins {
                out.push_str(&format!(
                    " {:<18} {}\n",
                    plugin.name, plugin.declaration.description
                ));
            }
        }
        if !self.skipped.is_empty() {
            out.push_str("\nThe following plugins are currently disabled:\n\n");
            for (name, reason) in &self.skipped {
                out.push_str(&format!(" {name:<18} {reason}\n"));
            }
        }
        let mut any_options = false;
        for plugin in &self.plugins {
            for option in &plugin.state.options {
                if !any_options {
                    out.push_str("\nThe following plugin options are available:\n\n");
                    any_options = true;
                }
                out.push_str(&format!(
                    " {:<28} {:<8} {}\n",
                    format!("{}.{}", plugin.name, option.spec.name),
                    option.value.to_string(),
                    option.spec.description
                ));
            }
        }
        out
    }

    /// Machine-readable plugin listing.
    pub fn list_plugins_json(&self) -> serde_json::Result<String> {
        #[derive(serde::Serialize)]
        struct OptionRow<'a> {
            name: &'a str,
            value: String,
            description: &'a str,
        }

        #[derive(serde::Serialize)]
        struct Row<'a> {
            name: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            description: Option<&'a str>,
            enabled: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            skip_reason: Option<String>,
            options: Vec<OptionRow<'a>>,
        }

        let mut rows: Vec<Row<'_>> = self
            .plugins
            .iter()
            .map(|plugin| Row {
                name: &plugin.name,
                description: Some(&plugin.declaration.description),
                enabled: true,
                skip_reason: None,
                options: plugin
                    .state
                    .options
                    .iter()
                    .map(|option| OptionRow {
                        name: &option.spec.name,
                        value: option.value.to_string(),
                        description: &option.spec.description,
                    })
                    .collect(),
            })
            .collect();
        for (name, reason) in &self.skipped {
            rows.push(Row {
                name,
                description: None,
                enabled: false,
                skip_reason: Some(reason.to_string()),
                options: Vec::new(),
            });
        }
        serde_json::to_string_pretty(&rows)
    }

    fn say(&self, message: &str) {
        if !self.options.silent {
            println!("{message}");
        }
    }

    /// Execute the full run.
    ///
    /// Returns the path of the final artifact, or `None` when the
    /// operator declined or cancelled before completion.
    pub fn run(&mut self) -> anyhow::Result<Option<PathBuf>> {
        if self.plugins.is_empty() {
            return Err(EngineError::NoPluginsLoaded.into());
        }

        if !self.options.batch {
            self.say(&self.policy.banner());
            self.say("This process may take a while to complete.");
            self.say("No changes will be made to your system.\n");
            if !prompt_continue() || self.cancel_requested() {
                info!("run declined by operator");
                return Ok(None);
            }
        }

        if self.options.diagnose {
            self.run_phase("diagnose", None, |plugin, ctx| plugin.diagnose(ctx))?;
            let messages: Vec<String> = self
                .plugins
                .iter()
                .flat_map(|p| p.state.diagnose_msgs.iter().cloned())
                .collect();
            if !messages.is_empty() {
                self.say("One or more checks have detected problems:\n");
                for message in &messages {
                    self.say(&format!("  * {message}"));
                }
                if !self.options.batch && !prompt_continue() {
                    info!("run declined after diagnostics");
                    return Ok(None);
                }
            }
        }
        if self.cancel_requested() {
            warn!("run cancelled");
            return Ok(None);
        }

        let ident = self.policy.collect_identification(
            self.options.batch,
            self.options.operator_name.clone(),
            self.options.ticket_number.clone(),
        );
        let base_name = self.policy.archive_base_name(&ident);
        let format = self
            .options
            .compression
            .archive_format()
            .unwrap_or_else(|| self.policy.preferred_archive_format());
        let mut archive = Archive::create(&self.options.tmp_dir, &base_name, format);
        info!(archive = base_name, policy = self.policy.name(), "starting collection");

        self.run_phase("setup", Some(&mut archive), |plugin, ctx| plugin.setup(ctx))?;
        if self.cancel_requested() {
            warn!("run cancelled after setup");
            return Ok(None);
        }

        self.say("  Running plugins. Please wait ...\n");
        for plugin in &mut self.plugins {
            debug!(plugin = %plugin.name, "collecting");
            Resolver::new(&plugin.name, &mut archive, &self.runner).resolve(&mut plugin.state);
        }
        if self.cancel_requested() {
            warn!("run cancelled after collection");
            return Ok(None);
        }

        if self.options.analyze {
            self.run_phase("analyze", Some(&mut archive), |plugin, ctx| plugin.analyze(ctx))?;
        }
        self.run_phase("postproc", Some(&mut archive), |plugin, ctx| plugin.postproc(ctx))?;
        if self.cancel_requested() {
            warn!("run cancelled before final work");
            return Ok(None);
        }

        if self.options.report {
            let report = build_report(&self.plugins);
            let text = PlainTextReport(&report).to_string();
            if let Err(e) = archive.add_string(&text, "sos_reports/sos.txt") {
                warn!(error = %e, "cannot archive plain-text report");
            }
        }
        if let Err(e) = archive.add_string(&self.version_manifest(), "version.txt") {
            warn!(error = %e, "cannot archive version manifest");
        }

        let final_path = self.final_work(archive, format)?;
        Ok(Some(final_path))
    }

    /// Run one lifecycle hook across every plugin with fault isolation:
    /// a failing hook is logged and the run continues, unless strict
    /// mode is on.
    fn run_phase(
        &mut self,
        phase: &str,
        mut archive: Option<&mut Archive>,
        hook: impl Fn(&dyn Plugin, &mut PluginContext<'_>) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let debug_mode = self.options.debug;
        let policy = self.policy.as_ref();
        let runner = &self.runner;
        for plugin in &mut self.plugins {
            let mut ctx = PluginContext::new(
                &plugin.name,
                &mut plugin.state,
                archive.as_deref_mut(),
                runner,
                policy,
            );
            if let Err(e) = hook(plugin.plugin.as_ref(), &mut ctx) {
                if debug_mode {
                    return Err(e.context(format!("plugin '{}' failed during {phase}", plugin.name)));
                }
                error!(plugin = %plugin.name, phase, error = ?e, "plugin hook failed, continuing");
            }
        }
        Ok(())
    }

    fn version_manifest(&self) -> String {
        let mut text = format!("sosrep {}\n\n", crate::VERSION);
        for plugin in &self.plugins {
            text.push_str(&format!("{} {}\n", plugin.name, plugin.declaration.version));
        }
        text
    }

    /// Seal the archive, compress it and write the checksum.
    fn final_work(&mut self, mut archive: Archive, format: ArchiveFormat) -> anyhow::Result<PathBuf> {
        if let Some(log_path) = &self.options.log_path {
            match std::fs::read(log_path) {
                Ok(bytes) => {
                    if let Err(e) = archive.add_bytes(bytes, "sos_logs/sos.log") {
                        warn!(error = %e, "cannot archive run log");
                    }
                }
                Err(e) => debug!(error = %e, "run log not readable"),
            }
        }

        let container = archive.close()?;
        let final_path =
            finalize_compression(&container, format, self.options.compression, &self.runner)?;
        let digest = write_checksum(&final_path, self.policy.preferred_hash())?;

        self.say(&format!(
            "\nYour report has been generated and saved in:\n  {}\n",
            final_path.display()
        ));
        self.say(&format!("The checksum ({}) is: {digest}", self.policy.preferred_hash().name()));
        Ok(final_path)
    }
}

/// Compute and persist the artifact checksum as `<artifact>.<algorithm>`.
fn write_checksum(path: &Path, algorithm: HashAlgorithm) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = match algorithm {
        HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(&bytes)),
        HashAlgorithm::Sha512 => format!("{:x}", Sha512::digest(&bytes)),
    };
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    std::fs::write(
        format!("{}.{}", path.display(), algorithm.name()),
        format!("{digest}  {filename}\n"),
    )?;
    Ok(digest)
}

fn build_report(plugins: &[LoadedPlugin]) -> Report {
    let mut report = Report::new();
    for plugin in plugins {
        let mut section = Section::new(&plugin.name);
        for command in &plugin.state.executed_commands {
            section.add(SectionEntry::Command {
                cmdline: command.cmdline.clone(),
                href: command.output_file.clone(),
            });
        }
        for file in &plugin.state.copied_files {
            section.add(SectionEntry::CopiedFile {
                name: file.src.display().to_string(),
                href: file.dest.clone(),
            });
        }
        for entry in &plugin.state.copy_strings {
            section.add(SectionEntry::CreatedFile {
                name: format!("sos_strings/{}/{}", plugin.name, entry.filename),
            });
        }
        for alert in &plugin.state.alerts {
            section.add(SectionEntry::Alert(alert.clone()));
        }
        if !plugin.state.custom_text.is_empty() {
            section.add(SectionEntry::Note(plugin.state.custom_text.clone()));
        }
        report.add(section);
    }
    report
}

/// ENTER continues, EOF declines.
fn prompt_continue() -> bool {
    println!("Press ENTER to continue, or CTRL-C to quit.");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).is_ok()
}
