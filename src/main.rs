//! sosrep - generate a diagnostic report archive for this host.
//!
//! Collects configuration files and command output through a set of
//! plugins and packages everything into a compressed, checksummed
//! archive.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sosrep::archive::CompressionMethod;
use sosrep::config;
use sosrep::engine::{ReportEngine, RunOptions};

/// Generate a diagnostic report archive for this host
#[derive(Parser)]
#[command(name = "sosrep")]
#[command(author, version, long_about = None)]
struct Cli {
    /// List available plugins and their options, then exit
    #[arg(short = 'l', long)]
    list_plugins: bool,

    /// Output format for --list-plugins (text, json)
    #[arg(long, default_value = "text")]
    format: String,

    /// Plugins to skip (comma-separated)
    #[arg(short = 'n', long, value_delimiter = ',')]
    skip_plugins: Vec<String>,

    /// Plugins to enable even when inactive or opt-in (comma-separated)
    #[arg(short = 'e', long, value_delimiter = ',')]
    enable_plugins: Vec<String>,

    /// Run only these plugins (comma-separated)
    #[arg(short = 'o', long, value_delimiter = ',')]
    only_plugins: Vec<String>,

    /// Set a plugin option: plugin.option[=value] (repeatable)
    #[arg(short = 'k', long = "plugin-option")]
    plugin_options: Vec<String>,

    /// Turn on every boolean plugin option
    #[arg(short = 'a', long)]
    all_options: bool,

    /// Never prompt; run non-interactively
    #[arg(long)]
    batch: bool,

    /// Suppress console output (logging is unaffected)
    #[arg(long)]
    silent: bool,

    /// Increase logging verbosity (repeatable)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Strict mode: plugin failures abort the run
    #[arg(long)]
    debug: bool,

    /// Run plugin diagnostics before collecting
    #[arg(long)]
    diagnose: bool,

    /// Run plugin analysis after collecting
    #[arg(long)]
    analyze: bool,

    /// Skip the plain-text report inside the archive
    #[arg(long)]
    no_report: bool,

    /// Case or ticket number recorded in the archive name
    #[arg(long)]
    ticket_number: Option<String>,

    /// Operator name recorded in the report
    #[arg(long)]
    name: Option<String>,

    /// Configuration file to read instead of the default
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Directory the archive is written to
    #[arg(long)]
    tmp_dir: Option<PathBuf>,

    /// Extra directory to search for plugins (repeatable)
    #[arg(long = "plugin-dir")]
    plugin_dirs: Vec<PathBuf>,

    /// Compression type (auto, zip, gzip, bzip2, xz)
    #[arg(short = 'z', long, default_value = "auto")]
    compression_type: String,
}

fn init_logging(cli: &Cli) -> Result<Option<PathBuf>> {
    let filter = match (cli.silent, cli.verbose) {
        (true, _) => EnvFilter::new("error"),
        (false, 0) => EnvFilter::new("warn"),
        (false, 1) => EnvFilter::new("info"),
        (false, 2) => EnvFilter::new("debug"),
        (false, _) => EnvFilter::new("trace"),
    };

    // The run log outlives the process only as an archive member, so a
    // kept temp file is deleted once the engine has copied it in.
    let log_file = tempfile::Builder::new()
        .prefix("sosrep-")
        .suffix(".log")
        .tempfile()
        .context("cannot create run log file")?;
    let (file, log_path) = log_file.keep().context("cannot keep run log file")?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr).with_filter(filter))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(EnvFilter::new("debug")),
        )
        .init();

    Ok(Some(log_path))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let compression: CompressionMethod = cli
        .compression_type
        .parse()
        .map_err(|raw| anyhow::anyhow!("unknown compression type '{raw}'"))?;

    let log_path = init_logging(&cli)?;

    let options = RunOptions {
        batch: cli.batch,
        silent: cli.silent,
        debug: cli.debug,
        diagnose: cli.diagnose,
        analyze: cli.analyze,
        report: !cli.no_report,
        enable_plugins: cli.enable_plugins,
        only_plugins: cli.only_plugins,
        skip_plugins: cli.skip_plugins,
        plugin_options: cli.plugin_options,
        all_bool_options: cli.all_options,
        compression,
        plugin_dirs: cli.plugin_dirs,
        config_file: config::resolve_config_path(cli.config_file),
        tmp_dir: cli.tmp_dir.unwrap_or_else(std::env::temp_dir),
        operator_name: cli.name,
        ticket_number: cli.ticket_number,
        log_path: log_path.clone(),
    };

    let result = run(options, cli.list_plugins, &cli.format);

    if let Some(path) = log_path {
        let _ = std::fs::remove_file(path);
    }
    result
}

fn run(options: RunOptions, list_plugins: bool, format: &str) -> Result<()> {
    let mut engine = ReportEngine::new(options)?;

    if list_plugins {
        match format {
            "json" => println!("{}", engine.list_plugins_json()?),
            _ => println!("{}", engine.list_plugins()),
        }
        return Ok(());
    }

    if let Err(e) = engine.install_signal_handler() {
        tracing::warn!(error = %e, "cannot install signal handler");
    }

    engine.run().context("report generation failed")?;
    Ok(())
}
