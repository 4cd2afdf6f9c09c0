//! Resolution of queued plugin declarations into archive content.
//!
//! Plugins only declare work; after `setup` the engine expands copy
//! specs, writes queued strings and executes queued commands here.
//! Resolution failures are recorded and skipped so one unreadable file
//! or broken command never voids a plugin's remaining declarations.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::archive::Archive;
use crate::exec::{CommandRunner, ExitDisposition};
use crate::plugin::{CopiedFile, ExecutedCommand, PluginState, QueuedCommand};

/// Longest filename derived from a command line.
const MAX_MANGLED_LEN: usize = 64;

static BIN_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(usr/)?(bin|sbin)/").expect("static regex"));
static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\-\./]+").expect("static regex"));

/// Derive a safe archive filename from a command line.
///
/// The well-known binary prefix is dropped, unsafe character runs
/// collapse to underscores, path separators become dots and the result
/// is trimmed and bounded in length.
pub(crate) fn mangle_command(cmdline: &str) -> String {
    let stripped = BIN_PREFIX.replace(cmdline, "");
    let safe = UNSAFE_CHARS.replace_all(&stripped, "_");
    let flattened = safe.replace('/', ".");
    let trimmed = flattened.trim_matches([' ', '.', '_', '-']);
    trimmed.chars().take(MAX_MANGLED_LEN).collect()
}

/// Whether a path is covered by any forbidden glob.
///
/// A pattern suppresses both direct matches and anything underneath a
/// matched directory.
pub(crate) fn is_forbidden(path: &Path, forbidden: &[String]) -> bool {
    let path_str = path.to_string_lossy();
    forbidden.iter().any(|pattern| {
        if glob::Pattern::new(pattern).map(|p| p.matches(&path_str)).unwrap_or(false) {
            return true;
        }
        glob::glob(pattern)
            .map(|paths| paths.flatten().any(|matched| path.starts_with(&matched)))
            .unwrap_or(false)
    })
}

fn dest_for(src: &Path, rename: Option<&(String, String)>) -> String {
    let raw = src.to_string_lossy().into_owned();
    match rename {
        Some((old, new)) => raw.replace(old.as_str(), new.as_str()),
        None => raw,
    }
}

fn expand_glob(pattern: &str) -> Vec<PathBuf> {
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!(pattern, error = %e, "invalid copy spec pattern");
            return Vec::new();
        }
    };
    let mut matches: Vec<PathBuf> = paths.flatten().collect();
    matches.sort();
    matches
}

/// Resolves one plugin's declarations against the archive.
pub(crate) struct Resolver<'a> {
    plugin: &'a str,
    archive: &'a mut Archive,
    runner: &'a CommandRunner,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(plugin: &'a str, archive: &'a mut Archive, runner: &'a CommandRunner) -> Self {
        Self { plugin, archive, runner }
    }

    /// Resolve every queue: copy specs, then strings, then commands.
    pub(crate) fn resolve(&mut self, state: &mut PluginState) {
        self.resolve_copy_specs(state);
        self.resolve_strings(state);
        self.resolve_commands(state);
    }

    fn resolve_copy_specs(&mut self, state: &mut PluginState) {
        let specs = state.copy_specs.clone();
        for spec in specs {
            let matches = expand_glob(&spec.pattern);
            if matches.is_empty() {
                debug!(plugin = self.plugin, pattern = %spec.pattern, "copy spec matched nothing");
                continue;
            }
            match spec.size_limit {
                Some(limit) => {
                    self.copy_limited(state, &matches, limit, spec.rename.as_ref());
                }
                None => {
                    for path in &matches {
                        self.copy_path(state, path, spec.rename.as_ref());
                    }
                }
            }
        }
    }

    /// Copy matches in sorted order under a cumulative byte budget.
    ///
    /// The first file that would overflow is truncated to the remaining
    /// budget, keeping its tail, under `<dest>.tailed`; everything after
    /// it is dropped.
    fn copy_limited(
        &mut self,
        state: &mut PluginState,
        matches: &[PathBuf],
        limit: u64,
        rename: Option<&(String, String)>,
    ) {
        let mut used = 0u64;
        for path in matches {
            if is_forbidden(path, &state.forbidden_paths) {
                debug!(plugin = self.plugin, path = %path.display(), "forbidden path skipped");
                continue;
            }
            let meta = match std::fs::metadata(path) {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(plugin = self.plugin, path = %path.display(), error = %e, "cannot stat");
                    continue;
                }
            };
            if !meta.is_file() {
                debug!(
                    plugin = self.plugin,
                    path = %path.display(),
                    "size-limited spec only collects regular files"
                );
                continue;
            }
            if used + meta.len() <= limit {
                self.copy_path(state, path, rename);
                used += meta.len();
                continue;
            }
            let remaining = limit - used;
            if remaining > 0 {
                self.copy_tail(state, path, remaining, rename);
            }
            break;
        }
    }

    fn copy_tail(
        &mut self,
        state: &mut PluginState,
        src: &Path,
        budget: u64,
        rename: Option<&(String, String)>,
    ) {
        let bytes = match std::fs::read(src) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(plugin = self.plugin, path = %src.display(), error = %e, "cannot read");
                return;
            }
        };
        let keep = usize::try_from(budget).unwrap_or(usize::MAX).min(bytes.len());
        let tail = bytes[bytes.len() - keep..].to_vec();
        let dest = format!("{}.tailed", dest_for(src, rename));
        match self.archive.add_bytes(tail, &dest) {
            Ok(()) => state.copied_files.push(CopiedFile {
                src: src.to_path_buf(),
                dest,
                symlink: false,
                points_to: None,
            }),
            Err(e) => {
                warn!(plugin = self.plugin, dest, error = %e, "cannot archive truncated file");
            }
        }
    }

    /// Copy one matched path: file, directory or symlink.
    fn copy_path(&mut self, state: &mut PluginState, src: &Path, rename: Option<&(String, String)>) {
        if is_forbidden(src, &state.forbidden_paths) {
            debug!(plugin = self.plugin, path = %src.display(), "forbidden path skipped");
            return;
        }
        if state.dest_for_src(src).is_some() {
            return;
        }
        let meta = match std::fs::symlink_metadata(src) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(plugin = self.plugin, path = %src.display(), error = %e, "cannot stat");
                return;
            }
        };
        if meta.file_type().is_symlink() {
            self.copy_symlink(state, src, rename);
            return;
        }
        if meta.is_dir() {
            // Recurse ourselves so the forbidden filter sees every file.
            for entry in walkdir::WalkDir::new(src).follow_links(false).sort_by_file_name() {
                match entry {
                    Ok(entry) if !entry.file_type().is_dir() => {
                        self.copy_path(state, entry.path(), rename);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(plugin = self.plugin, error = %e, "directory walk entry failed");
                    }
                }
            }
            return;
        }

        let dest = dest_for(src, rename);
        match self.archive.add_file(src, Some(&dest)) {
            Ok(()) => state.copied_files.push(CopiedFile {
                src: src.to_path_buf(),
                dest,
                symlink: false,
                points_to: None,
            }),
            Err(e) => {
                warn!(plugin = self.plugin, path = %src.display(), error = %e, "cannot archive file");
            }
        }
    }

    /// Archive a symlink verbatim and collect its target too, so the
    /// link resolves after extraction. A link to a directory is skipped.
    fn copy_symlink(
        &mut self,
        state: &mut PluginState,
        src: &Path,
        rename: Option<&(String, String)>,
    ) {
        let target = match std::fs::read_link(src) {
            Ok(target) => target,
            Err(e) => {
                debug!(plugin = self.plugin, path = %src.display(), error = %e, "cannot read link");
                return;
            }
        };
        let resolved = if target.is_absolute() {
            target
        } else {
            src.parent().unwrap_or_else(|| Path::new("/")).join(target)
        };
        if resolved.is_dir() {
            debug!(
                plugin = self.plugin,
                path = %src.display(),
                target = %resolved.display(),
                "skipping symlink to directory"
            );
            return;
        }

        let dest = dest_for(src, rename);
        match self.archive.add_file(src, Some(&dest)) {
            Ok(()) => state.copied_files.push(CopiedFile {
                src: src.to_path_buf(),
                dest,
                symlink: true,
                points_to: Some(resolved.clone()),
            }),
            Err(e) => {
                warn!(plugin = self.plugin, path = %src.display(), error = %e, "cannot archive link");
                return;
            }
        }
        if resolved.exists() {
            self.copy_path(state, &resolved, rename);
        }
    }

    fn resolve_strings(&mut self, state: &mut PluginState) {
        for entry in state.copy_strings.clone() {
            let dest = format!("sos_strings/{}/{}", self.plugin, entry.filename);
            if let Err(e) = self.archive.add_string(&entry.content, &dest) {
                warn!(plugin = self.plugin, dest, error = %e, "cannot archive string");
            }
        }
    }

    fn resolve_commands(&mut self, state: &mut PluginState) {
        for command in std::mem::take(&mut state.queued_commands) {
            self.run_command(state, command);
        }
    }

    fn run_command(&mut self, state: &mut PluginState, command: QueuedCommand) {
        let outcome = match self.runner.run(&command.cmdline, Some(command.timeout)) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(plugin = self.plugin, cmdline = %command.cmdline, error = %e, "spawn failed");
                return;
            }
        };

        // A missing binary is a fact about the host worth recording, but
        // its (empty) output is not.
        if outcome.status == ExitDisposition::NotFound {
            debug!(plugin = self.plugin, cmdline = %command.cmdline, "command not found");
            state.executed_commands.push(ExecutedCommand {
                cmdline: outcome.cmdline,
                output_file: None,
                status: outcome.status,
                runtime: outcome.runtime,
            });
            return;
        }
        if outcome.status == ExitDisposition::TimedOut {
            warn!(
                plugin = self.plugin,
                cmdline = %command.cmdline,
                timeout = ?command.timeout,
                "command timed out"
            );
        }

        let filename = command
            .suggested_filename
            .unwrap_or_else(|| mangle_command(&command.cmdline));
        let dest = self.unique_dest(&filename);
        if let Err(e) = self.archive.add_string(&outcome.output, &dest) {
            warn!(plugin = self.plugin, dest, error = %e, "cannot archive command output");
            return;
        }
        if let Some(link_name) = &command.root_symlink {
            if let Err(e) = self.archive.add_symlink(&dest, link_name) {
                debug!(plugin = self.plugin, link_name, error = %e, "cannot create root symlink");
            }
        }
        state.executed_commands.push(ExecutedCommand {
            cmdline: outcome.cmdline,
            output_file: Some(dest),
            status: outcome.status,
            runtime: outcome.runtime,
        });
    }

    /// First free destination for a command output filename. Repeated
    /// invocations of the same command get `_2`, `_3` and so on.
    fn unique_dest(&self, filename: &str) -> String {
        let base = format!("sos_commands/{}/{}", self.plugin, filename);
        if !self.archive.contains(&base) {
            return base;
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{base}_{n}");
            if !self.archive.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}
