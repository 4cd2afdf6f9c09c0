//! Content-addressable archive writer.
//!
//! All collected artifacts funnel into a single [`Archive`]. Entries are
//! staged as an ordered name-to-content mapping and written out as a tar
//! or zip container on [`Archive::close`]. Every destination path is
//! rewritten under one synthetic top-level directory named after the
//! archive itself, so the output is self-contained when extracted.

mod compress;

pub use compress::{finalize_compression, CompressionMethod};

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Errors raised by the archive writer.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Destination path escapes the archive root or is empty.
    #[error("invalid destination path '{0}'")]
    InvalidDestination(String),

    /// No entry exists at the given destination.
    #[error("no archive entry at '{0}'")]
    NoSuchEntry(String),

    /// Writes after close are a bug in the calling code.
    #[error("archive is already closed")]
    Closed,

    /// Zip container error.
    #[error("zip write failed: {0}")]
    Zip(String),

    /// Every compressor candidate failed.
    #[error("compression failed: {0}")]
    Compression(String),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Physical container format for the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Plain tar, compressed after close.
    Tar,
    /// Zip with deflate; considered pre-compressed.
    Zip,
}

impl ArchiveFormat {
    /// File extension for the uncompressed container.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Zip => "zip",
        }
    }
}

enum EntryData {
    Bytes(Vec<u8>),
    Symlink(PathBuf),
}

struct Entry {
    /// Full in-archive path, including the synthetic root directory.
    name: String,
    data: EntryData,
}

/// Append-only content store backing the report.
pub struct Archive {
    base_name: String,
    output_path: PathBuf,
    format: ArchiveFormat,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    closed: bool,
}

impl Archive {
    /// Create a new archive named `base_name` under `tmp_dir`.
    ///
    /// Nothing touches the filesystem until [`Archive::close`].
    pub fn create(tmp_dir: &Path, base_name: &str, format: ArchiveFormat) -> Self {
        let output_path = tmp_dir.join(format!("{base_name}.{}", format.extension()));
        Self {
            base_name: base_name.to_string(),
            output_path,
            format,
            entries: Vec::new(),
            index: HashMap::new(),
            closed: false,
        }
    }

    /// The synthetic top-level directory shared by every entry.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Where the uncompressed container will be written.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// The container format.
    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Rewrite a destination relative to the synthetic root directory.
    ///
    /// Leading separators are stripped; `..` components are rejected so a
    /// plugin can never place content outside the archive root.
    fn rewrite_dest(&self, dest: &str) -> Result<String, ArchiveError> {
        let mut parts = Vec::new();
        for component in Path::new(dest).components() {
            match component {
                Component::Normal(part) => match part.to_str() {
                    Some(part) => parts.push(part),
                    None => return Err(ArchiveError::InvalidDestination(dest.to_string())),
                },
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ArchiveError::InvalidDestination(dest.to_string()));
                }
            }
        }
        if parts.is_empty() {
            return Err(ArchiveError::InvalidDestination(dest.to_string()));
        }
        Ok(format!("{}/{}", self.base_name, parts.join("/")))
    }

    fn insert(&mut self, name: String, data: EntryData) -> Result<(), ArchiveError> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        // Re-adding a destination replaces the staged content in place,
        // which is how redaction rewrites already-archived files.
        if let Some(&pos) = self.index.get(&name) {
            self.entries[pos].data = data;
        } else {
            self.index.insert(name.clone(), self.entries.len());
            self.entries.push(Entry { name, data });
        }
        Ok(())
    }

    /// Add a string under `dest`.
    pub fn add_string(&mut self, content: &str, dest: &str) -> Result<(), ArchiveError> {
        self.add_bytes(content.as_bytes().to_vec(), dest)
    }

    /// Add raw bytes under `dest`.
    pub fn add_bytes(&mut self, bytes: Vec<u8>, dest: &str) -> Result<(), ArchiveError> {
        let name = self.rewrite_dest(dest)?;
        self.insert(name, EntryData::Bytes(bytes))
    }

    /// Add a file or directory from the filesystem.
    ///
    /// Directories are expanded recursively, preserving their relative
    /// structure under the rewritten destination. A symlink source is
    /// recorded as a symlink entry with its target verbatim. `dest`
    /// defaults to the source path.
    pub fn add_file(&mut self, src: &Path, dest: Option<&str>) -> Result<(), ArchiveError> {
        let dest_owned;
        let dest = match dest {
            Some(dest) => dest,
            None => {
                dest_owned = src.to_string_lossy().into_owned();
                &dest_owned
            }
        };

        let meta = std::fs::symlink_metadata(src)?;
        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(src)?;
            let name = self.rewrite_dest(dest)?;
            return self.insert(name, EntryData::Symlink(target));
        }
        if meta.is_dir() {
            for entry in walkdir::WalkDir::new(src).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
                })?;
                if entry.file_type().is_dir() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(src)
                    .map_err(|_| ArchiveError::InvalidDestination(dest.to_string()))?;
                let sub_dest = Path::new(dest).join(rel);
                self.add_file(entry.path(), Some(&sub_dest.to_string_lossy()))?;
            }
            return Ok(());
        }

        let bytes = std::fs::read(src)?;
        self.add_bytes(bytes, dest)
    }

    /// Record a symlink entry at `link_name` pointing at `target`.
    ///
    /// The target is an in-archive destination; it is stored relative so
    /// the link resolves after extraction.
    pub fn add_symlink(&mut self, target: &str, link_name: &str) -> Result<(), ArchiveError> {
        let name = self.rewrite_dest(link_name)?;
        let target = self.rewrite_dest(target)?;
        // Both live under the archive root; link from the root level.
        let rel_target = target
            .strip_prefix(&format!("{}/", self.base_name))
            .unwrap_or(&target)
            .to_string();
        self.insert(name, EntryData::Symlink(PathBuf::from(rel_target)))
    }

    /// Whether an entry exists at `dest`.
    pub fn contains(&self, dest: &str) -> bool {
        self.rewrite_dest(dest).map(|name| self.index.contains_key(&name)).unwrap_or(false)
    }

    /// Re-read previously archived content.
    ///
    /// Works at any point before [`Archive::close`]; redaction uses this
    /// to rewrite already-collected files.
    pub fn open_for_read(&self, dest: &str) -> Result<Vec<u8>, ArchiveError> {
        let name = self.rewrite_dest(dest)?;
        let pos = self
            .index
            .get(&name)
            .copied()
            .ok_or_else(|| ArchiveError::NoSuchEntry(dest.to_string()))?;
        match &self.entries[pos].data {
            EntryData::Bytes(bytes) => Ok(bytes.clone()),
            EntryData::Symlink(target) => Ok(target.to_string_lossy().into_owned().into_bytes()),
        }
    }

    /// Number of staged entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the container to disk and seal the archive.
    pub fn close(&mut self) -> Result<PathBuf, ArchiveError> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        match self.format {
            ArchiveFormat::Tar => self.write_tar()?,
            ArchiveFormat::Zip => self.write_zip()?,
        }
        self.closed = true;
        tracing::info!(path = %self.output_path.display(), entries = self.entries.len(), "archive closed");
        Ok(self.output_path.clone())
    }

    fn write_tar(&self) -> Result<(), ArchiveError> {
        let file = File::create(&self.output_path)?;
        let mut builder = tar::Builder::new(file);
        let mtime = chrono::Utc::now().timestamp().max(0) as u64;

        for entry in &self.entries {
            match &entry.data {
                EntryData::Bytes(bytes) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_size(bytes.len() as u64);
                    header.set_mode(0o644);
                    header.set_mtime(mtime);
                    header.set_cksum();
                    builder.append_data(&mut header, &entry.name, bytes.as_slice())?;
                }
                EntryData::Symlink(target) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_mtime(mtime);
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_cksum();
                    builder.append_link(&mut header, &entry.name, target)?;
                }
            }
        }

        let mut file = builder.into_inner()?;
        file.flush()?;
        Ok(())
    }

    fn write_zip(&self) -> Result<(), ArchiveError> {
        let file = File::create(&self.output_path)?;
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for entry in &self.entries {
            match &entry.data {
                EntryData::Bytes(bytes) => {
                    writer
                        .start_file(entry.name.as_str(), options)
                        .map_err(|e| ArchiveError::Zip(e.to_string()))?;
                    writer.write_all(bytes)?;
                }
                EntryData::Symlink(target) => {
                    writer
                        .add_symlink(entry.name.as_str(), target.to_string_lossy(), options)
                        .map_err(|e| ArchiveError::Zip(e.to_string()))?;
                }
            }
        }

        writer.finish().map_err(|e| ArchiveError::Zip(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tar_archive(dir: &TempDir) -> Archive {
        Archive::create(dir.path(), "sosreport-test", ArchiveFormat::Tar)
    }

    #[test]
    fn test_round_trip_before_close() {
        let dir = TempDir::new().unwrap();
        let mut archive = tar_archive(&dir);

        archive.add_string("hello", "notes/a.txt").unwrap();
        assert_eq!(archive.open_for_read("notes/a.txt").unwrap(), b"hello");

        let src = dir.path().join("source.txt");
        std::fs::write(&src, b"from disk").unwrap();
        archive.add_file(&src, Some("copied/source.txt")).unwrap();
        assert_eq!(archive.open_for_read("copied/source.txt").unwrap(), b"from disk");
    }

    #[test]
    fn test_single_root_directory() {
        let dir = TempDir::new().unwrap();
        let mut archive = tar_archive(&dir);

        archive.add_string("x", "/etc/hosts").unwrap();
        archive.add_string("y", "sos_logs/sos.log").unwrap();
        let path = archive.close().unwrap();

        let file = File::open(path).unwrap();
        let mut reader = tar::Archive::new(file);
        for entry in reader.entries().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path().unwrap().into_owned();
            assert!(path.starts_with("sosreport-test/"), "entry {path:?} outside root");
        }
    }

    #[test]
    fn test_distinct_destinations_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let mut archive = tar_archive(&dir);

        archive.add_string("one", "a/b.txt").unwrap();
        archive.add_string("two", "a/b-renamed.txt").unwrap();
        assert_eq!(archive.open_for_read("a/b.txt").unwrap(), b"one");
        assert_eq!(archive.open_for_read("a/b-renamed.txt").unwrap(), b"two");
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn test_readding_destination_replaces_content() {
        let dir = TempDir::new().unwrap();
        let mut archive = tar_archive(&dir);

        archive.add_string("secret=hunter2", "etc/app.conf").unwrap();
        archive.add_string("secret=******", "etc/app.conf").unwrap();
        assert_eq!(archive.open_for_read("etc/app.conf").unwrap(), b"secret=******");
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_parent_components_rejected() {
        let dir = TempDir::new().unwrap();
        let mut archive = tar_archive(&dir);
        let err = archive.add_string("x", "../escape").unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidDestination(_)));
    }

    #[test]
    fn test_directory_sources_recurse() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("conf.d");
        std::fs::create_dir_all(tree.join("nested")).unwrap();
        std::fs::write(tree.join("a.conf"), b"a").unwrap();
        std::fs::write(tree.join("nested/b.conf"), b"b").unwrap();

        let mut archive = tar_archive(&dir);
        archive.add_file(&tree, Some("etc/conf.d")).unwrap();

        assert_eq!(archive.open_for_read("etc/conf.d/a.conf").unwrap(), b"a");
        assert_eq!(archive.open_for_read("etc/conf.d/nested/b.conf").unwrap(), b"b");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_target_recorded_verbatim() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("real.txt");
        std::fs::write(&target, b"real").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink("real.txt", &link).unwrap();

        let mut archive = tar_archive(&dir);
        archive.add_file(&link, Some("etc/link.txt")).unwrap();
        assert_eq!(archive.open_for_read("etc/link.txt").unwrap(), b"real.txt");
    }

    #[test]
    fn test_writes_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let mut archive = tar_archive(&dir);
        archive.add_string("x", "a.txt").unwrap();
        archive.close().unwrap();
        assert!(matches!(archive.add_string("y", "b.txt"), Err(ArchiveError::Closed)));
    }

    #[test]
    fn test_zip_container_written() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::create(dir.path(), "sosreport-test", ArchiveFormat::Zip);
        archive.add_string("hello", "notes/a.txt").unwrap();
        let path = archive.close().unwrap();

        let file = File::open(path).unwrap();
        let mut reader = zip::ZipArchive::new(file).unwrap();
        let mut entry = reader.by_name("sosreport-test/notes/a.txt").unwrap();
        let mut content = String::new();
        std::io::Read::read_to_string(&mut entry, &mut content).unwrap();
        assert_eq!(content, "hello");
    }
}
