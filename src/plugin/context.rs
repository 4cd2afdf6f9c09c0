//! Phase context handed to plugin hooks.
//!
//! Wraps the plugin's mutable state together with the run-scoped
//! collaborators (archive, command runner, policy) a hook may need.
//! Declaration helpers only queue work; the engine resolves queues
//! during the collection phase.

use std::path::Path;
use std::time::Duration;

use crate::archive::Archive;
use crate::exec::{CommandOutcome, CommandRunner};
use crate::plugin::{CopySpec, OptionValue, PluginState, QueuedCommand, StringEntry};
use crate::policy::Policy;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Per-phase view a plugin hook operates through.
pub struct PluginContext<'a> {
    name: &'a str,
    pub(crate) state: &'a mut PluginState,
    archive: Option<&'a mut Archive>,
    runner: &'a CommandRunner,
    policy: &'a dyn Policy,
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(
        name: &'a str,
        state: &'a mut PluginState,
        archive: Option<&'a mut Archive>,
        runner: &'a CommandRunner,
        policy: &'a dyn Policy,
    ) -> Self {
        Self { name, state, archive, runner, policy }
    }

    /// The plugin's name.
    pub fn name(&self) -> &str {
        self.name
    }

    /// The active platform policy.
    pub fn policy(&self) -> &dyn Policy {
        self.policy
    }

    /// Whether a package is installed on this host.
    pub fn is_installed(&self, package: &str) -> bool {
        self.policy.pkg_by_name(package).is_some()
    }

    fn push_spec(&mut self, pattern: &str, rename: Option<(String, String)>, size_limit: Option<u64>) {
        if pattern.is_empty() {
            tracing::warn!(plugin = self.name, "ignoring empty copy spec");
            return;
        }
        let spec = CopySpec { pattern: pattern.to_string(), rename, size_limit };
        if !self.state.copy_specs.contains(&spec) {
            self.state.copy_specs.push(spec);
        }
    }

    /// Queue a file, directory or shell glob to be copied.
    pub fn add_copy_spec(&mut self, pattern: &str) {
        self.push_spec(pattern, None, None);
    }

    /// Queue several copy specs at once.
    pub fn add_copy_specs(&mut self, patterns: &[&str]) {
        for pattern in patterns {
            self.add_copy_spec(pattern);
        }
    }

    /// Queue a copy spec whose destinations have `old` replaced by
    /// `new`.
    pub fn add_copy_spec_sub(&mut self, pattern: &str, old: &str, new: &str) {
        self.push_spec(pattern, Some((old.to_string(), new.to_string())), None);
    }

    /// Queue a copy spec with a cumulative size limit in mebibytes.
    ///
    /// Matches are taken in sorted order; the file that would overflow
    /// the limit is truncated to the remaining budget (tail kept) and
    /// later matches are never queued.
    pub fn add_copy_spec_limit(&mut self, pattern: &str, limit_mib: u64) {
        self.push_spec(pattern, None, Some(limit_mib * BYTES_PER_MIB));
    }

    /// Exclude a path glob from copying, overriding any copy spec.
    pub fn add_forbidden_path(&mut self, pattern: &str) {
        let pattern = pattern.to_string();
        if !self.state.forbidden_paths.contains(&pattern) {
            self.state.forbidden_paths.push(pattern);
        }
    }

    /// Queue a command whose output is collected into the archive.
    pub fn collect_output(&mut self, cmdline: &str) {
        self.collect(QueuedCommand::new(cmdline));
    }

    /// Queue a prepared command declaration.
    pub fn collect(&mut self, command: QueuedCommand) {
        self.state.queued_commands.push(command);
    }

    /// Queue a string for `sos_strings/<plugin>/<filename>`.
    pub fn add_string_as_file(&mut self, content: &str, filename: &str) {
        self.state
            .copy_strings
            .push(StringEntry { content: content.to_string(), filename: filename.to_string() });
    }

    /// Execute a command immediately, independent of output gathering.
    pub fn call_ext_prog(&self, cmdline: &str) -> std::io::Result<CommandOutcome> {
        self.runner.run(cmdline, None)
    }

    /// Execute a command immediately with an explicit timeout.
    pub fn call_ext_prog_timeout(
        &self,
        cmdline: &str,
        timeout: Duration,
    ) -> std::io::Result<CommandOutcome> {
        self.runner.run(cmdline, Some(timeout))
    }

    /// Execute a command and report only whether it succeeded.
    pub fn check_ext_prog(&self, cmdline: &str) -> bool {
        self.call_ext_prog(cmdline).map(|outcome| outcome.success()).unwrap_or(false)
    }

    /// Record a configuration sanity warning, shown before collection.
    pub fn add_diagnose(&mut self, message: &str) {
        self.state.diagnose_msgs.push(message.to_string());
    }

    /// Record an alert for the final report.
    pub fn add_alert(&mut self, message: &str) {
        self.state.alerts.push(message.to_string());
    }

    /// Append free-form narrative text for the final report.
    pub fn add_custom_text(&mut self, text: &str) {
        self.state.custom_text.push_str(text);
    }

    /// Current value of a declared option.
    pub fn get_option(&self, name: &str) -> Option<&OptionValue> {
        self.state.option(name)
    }

    /// Whether a boolean option is on. Missing or non-boolean options
    /// read as off.
    pub fn option_enabled(&self, name: &str) -> bool {
        self.get_option(name).and_then(OptionValue::as_bool).unwrap_or(false)
    }

    /// Integer option value, falling back to `default`.
    pub fn option_int(&self, name: &str, default: i64) -> i64 {
        self.get_option(name).and_then(OptionValue::as_int).unwrap_or(default)
    }

    /// Lines of a file matching a regular expression.
    pub fn file_grep(&self, pattern: &str, path: &Path) -> Vec<String> {
        let Ok(regex) = regex::Regex::new(pattern) else {
            return Vec::new();
        };
        match std::fs::read_to_string(path) {
            Ok(content) => {
                content.lines().filter(|line| regex.is_match(line)).map(str::to_string).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Apply a regex substitution to a file already in the archive.
    ///
    /// `srcpath` is the path the file was copied from; the archived
    /// content is re-read, substituted and re-added. Returns the number
    /// of replacements made; any failure counts as zero, matching the
    /// collection loop's attitude that redaction must never abort a run.
    pub fn regex_sub(&mut self, srcpath: &Path, pattern: &str, replacement: &str) -> usize {
        let Some(dest) = self.state.dest_for_src(srcpath).map(str::to_string) else {
            return 0;
        };
        let Some(archive) = self.archive.as_deref_mut() else {
            return 0;
        };
        let regex = match regex::Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                tracing::debug!(plugin = self.name, pattern, error = %e, "bad redaction regex");
                return 0;
            }
        };
        let content = match archive.open_for_read(&dest) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::debug!(plugin = self.name, dest, error = %e, "cannot re-read for redaction");
                return 0;
            }
        };
        let replacements = regex.find_iter(&content).count();
        if replacements == 0 {
            return 0;
        }
        let redacted = regex.replace_all(&content, replacement);
        if let Err(e) = archive.add_string(&redacted, &dest) {
            tracing::debug!(plugin = self.name, dest, error = %e, "cannot write redacted content");
            return 0;
        }
        replacements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveFormat;
    use crate::plugin::CopiedFile;
    use crate::policy::GenericPolicy;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn with_context<R>(f: impl FnOnce(&mut PluginContext<'_>) -> R) -> (PluginState, R) {
        let mut state = PluginState::default();
        let runner = CommandRunner::new();
        let policy = GenericPolicy;
        let result = {
            let mut ctx = PluginContext::new("demo", &mut state, None, &runner, &policy);
            f(&mut ctx)
        };
        (state, result)
    }

    #[test]
    fn test_copy_specs_are_deduplicated() {
        let (state, ()) = with_context(|ctx| {
            ctx.add_copy_spec("/etc/hosts");
            ctx.add_copy_spec("/etc/hosts");
            ctx.add_copy_spec_sub("/etc/hosts", "etc", "configurations");
        });
        assert_eq!(state.copy_specs.len(), 2);
    }

    #[test]
    fn test_size_limit_converted_to_bytes() {
        let (state, ()) = with_context(|ctx| ctx.add_copy_spec_limit("/var/log/syslog*", 8));
        assert_eq!(state.copy_specs[0].size_limit, Some(8 * 1024 * 1024));
    }

    #[test]
    fn test_empty_copy_spec_ignored() {
        let (state, ()) = with_context(|ctx| ctx.add_copy_spec(""));
        assert!(state.copy_specs.is_empty());
    }

    #[test]
    fn test_queued_command_declaration() {
        let (state, ()) = with_context(|ctx| {
            ctx.collect_output("uname -a");
            ctx.collect(
                QueuedCommand::new("date")
                    .filename("date_utc")
                    .root_symlink("date")
                    .timeout(Duration::from_secs(30)),
            );
        });
        assert_eq!(state.queued_commands.len(), 2);
        assert_eq!(state.queued_commands[1].suggested_filename.as_deref(), Some("date_utc"));
        assert_eq!(state.queued_commands[1].timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_regex_sub_rewrites_archived_content() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::create(dir.path(), "sosreport-test", ArchiveFormat::Tar);
        archive.add_string("password=hunter2\nuser=bob\n", "etc/app.conf").unwrap();

        let mut state = PluginState::default();
        state.copied_files.push(CopiedFile {
            src: PathBuf::from("/etc/app.conf"),
            dest: "etc/app.conf".to_string(),
            symlink: false,
            points_to: None,
        });

        let runner = CommandRunner::new();
        let policy = GenericPolicy;
        let mut ctx =
            PluginContext::new("demo", &mut state, Some(&mut archive), &runner, &policy);

        let count = ctx.regex_sub(Path::new("/etc/app.conf"), r"password=\S+", "password=******");
        assert_eq!(count, 1);
        let content = archive.open_for_read("etc/app.conf").unwrap();
        assert_eq!(content, b"password=******\nuser=bob\n");
    }

    #[test]
    fn test_regex_sub_without_copy_record_is_zero() {
        let (_, count) = with_context(|ctx| {
            ctx.regex_sub(Path::new("/etc/never-copied.conf"), "x", "y")
        });
        assert_eq!(count, 0);
    }
}
