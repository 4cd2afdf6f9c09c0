//! # sosrep
//!
//! Plugin-driven host diagnostic report generator. sosrep runs a set of
//! plugins against the local host, each declaring files to copy and
//! commands to capture for one subsystem, and packages the results into
//! a single compressed, checksummed archive suitable for attaching to a
//! support case.
//!
//! ## How a run works
//!
//! 1. A platform [`policy`](crate::policy) is detected once and governs
//!    plugin eligibility, archive naming and checksum choice.
//! 2. Plugins are discovered, gated and configured by the
//!    [`engine`](crate::engine).
//! 3. Each plugin walks a fixed lifecycle; a failing plugin is isolated
//!    and never aborts the run.
//! 4. The [`archive`](crate::archive) is sealed, compressed and a
//!    checksum written next to it.

pub mod archive;
pub mod config;
pub mod engine;
pub mod exec;
pub mod plugin;
pub mod policy;
pub mod report;

pub use archive::{Archive, ArchiveError, ArchiveFormat, CompressionMethod};
pub use engine::{EngineError, ReportEngine, RunOptions, SkipReason};
pub use exec::{CommandOutcome, CommandRunner, ExitDisposition};
pub use plugin::{Plugin, PluginContext, PluginDeclaration, PluginRegistry};
pub use policy::{CapabilityTag, Policy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "sosrep";
