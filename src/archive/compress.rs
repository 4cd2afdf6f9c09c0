//! Terminal compression of the closed archive.
//!
//! Compression is one-way: the compressor replaces the uncompressed
//! container. `auto` walks a fixed priority list of external tools and
//! takes the first that succeeds; an explicit method short-circuits to
//! that single tool. Zip containers are already compressed and pass
//! through untouched.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{ArchiveError, ArchiveFormat};
use crate::exec::CommandRunner;

/// Compression methods accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Try compressors in priority order, first success wins.
    Auto,
    /// Use the zip container format (no post-compression step).
    Zip,
    Gzip,
    Bzip2,
    Xz,
}

impl CompressionMethod {
    /// The archive format this method implies.
    pub fn archive_format(self) -> Option<ArchiveFormat> {
        match self {
            Self::Zip => Some(ArchiveFormat::Zip),
            Self::Gzip | Self::Bzip2 | Self::Xz => Some(ArchiveFormat::Tar),
            Self::Auto => None,
        }
    }
}

impl FromStr for CompressionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "zip" => Ok(Self::Zip),
            "gzip" => Ok(Self::Gzip),
            "bzip2" => Ok(Self::Bzip2),
            "xz" => Ok(Self::Xz),
            other => Err(other.to_string()),
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Zip => "zip",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        };
        f.write_str(name)
    }
}

/// A single compressor candidate: tool name and output extension.
struct Compressor {
    tool: &'static str,
    extension: &'static str,
}

/// Priority order for `auto`.
const CANDIDATES: &[Compressor] = &[
    Compressor { tool: "xz", extension: "xz" },
    Compressor { tool: "bzip2", extension: "bz2" },
    Compressor { tool: "gzip", extension: "gz" },
];

/// Compress the closed container at `path`, returning the final artifact.
///
/// Each candidate failure is swallowed and the next one tried; if every
/// candidate fails the last error propagates, since an unusable archive
/// must never be produced silently.
pub fn finalize_compression(
    path: &Path,
    format: ArchiveFormat,
    method: CompressionMethod,
    runner: &CommandRunner,
) -> Result<PathBuf, ArchiveError> {
    if format == ArchiveFormat::Zip {
        return Ok(path.to_path_buf());
    }

    let candidates: Vec<&Compressor> = match method {
        CompressionMethod::Auto => CANDIDATES.iter().collect(),
        CompressionMethod::Gzip => CANDIDATES.iter().filter(|c| c.tool == "gzip").collect(),
        CompressionMethod::Bzip2 => CANDIDATES.iter().filter(|c| c.tool == "bzip2").collect(),
        CompressionMethod::Xz => CANDIDATES.iter().filter(|c| c.tool == "xz").collect(),
        CompressionMethod::Zip => Vec::new(),
    };

    let mut last_error = String::from("no compressor candidates");
    for candidate in candidates {
        match try_compress(path, candidate, runner) {
            Ok(compressed) => return Ok(compressed),
            Err(e) => {
                tracing::debug!(tool = candidate.tool, error = %e, "compressor attempt failed");
                last_error = format!("{}: {e}", candidate.tool);
            }
        }
    }
    Err(ArchiveError::Compression(last_error))
}

fn try_compress(
    path: &Path,
    candidate: &Compressor,
    runner: &CommandRunner,
) -> Result<PathBuf, String> {
    let cmdline = format!("{} -f '{}'", candidate.tool, path.display());
    let outcome = runner.run(&cmdline, None).map_err(|e| e.to_string())?;
    if !outcome.success() {
        return Err(format!("{} ({})", outcome.status, outcome.output.trim()));
    }
    let compressed = PathBuf::from(format!("{}.{}", path.display(), candidate.extension));
    if !compressed.exists() {
        return Err(format!("expected output {} missing", compressed.display()));
    }
    Ok(compressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tool_available(tool: &str) -> bool {
        CommandRunner::new()
            .run(&format!("command -v {tool}"), None)
            .map(|o| o.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_parse_methods() {
        assert_eq!("auto".parse::<CompressionMethod>().unwrap(), CompressionMethod::Auto);
        assert_eq!("xz".parse::<CompressionMethod>().unwrap(), CompressionMethod::Xz);
        assert!("lz4".parse::<CompressionMethod>().is_err());
    }

    #[test]
    fn test_zip_format_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.zip");
        std::fs::write(&path, b"zip bytes").unwrap();

        let out = finalize_compression(
            &path,
            ArchiveFormat::Zip,
            CompressionMethod::Zip,
            &CommandRunner::new(),
        )
        .unwrap();
        assert_eq!(out, path);
        assert!(path.exists());
    }

    #[test]
    fn test_gzip_replaces_original() {
        if !tool_available("gzip") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.tar");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let out = finalize_compression(
            &path,
            ArchiveFormat::Tar,
            CompressionMethod::Gzip,
            &CommandRunner::new(),
        )
        .unwrap();
        assert_eq!(out.extension().unwrap(), "gz");
        assert!(out.exists());
        assert!(!path.exists(), "compression must replace, never duplicate");
    }
}
