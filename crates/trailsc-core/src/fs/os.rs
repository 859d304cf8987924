use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::warn;
use walkdir::WalkDir;

use super::{EntryKind, FileSystem, FsEntry, FsError, FsMetadata, Result, normalize};

/// Read-only view of an on-disk directory.
#[derive(Clone, Debug)]
pub struct OsFs {
    root: PathBuf,
}

impl OsFs {
    /// Fails unless `root` is a readable directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta = fs::metadata(&root).map_err(|err| FsError::io(&root, err))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(root));
        }
        fs::read_dir(&root).map_err(|err| FsError::io(&root, err))?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.root.join(normalize(path)?))
    }
}

impl FileSystem for OsFs {
    fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).map_err(|err| FsError::io(path, err))?;
        Ok(convert_metadata(&meta))
    }

    fn read(&self, path: &Path) -> Result<Bytes> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).map_err(|err| FsError::io(path, err))?;
        if meta.is_dir() {
            return Err(FsError::IsDirectory(path.to_path_buf()));
        }
        fs::read(&full)
            .map(Bytes::from)
            .map_err(|err| FsError::io(path, err))
    }

    /// Only a failure on `root` itself is an error; entries below it that
    /// cannot be read or stat'ed are logged and left out.
    fn walk(&self, root: &Path) -> Result<Vec<FsEntry>> {
        let start = self.resolve(root)?;
        let mut entries = Vec::new();
        for entry in WalkDir::new(&start) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => return Err(walk_error(err, &start)),
                Err(err) => {
                    warn!(path = ?err.path(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| FsError::InvalidPath(entry.path().to_path_buf()))?
                .to_path_buf();
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(err) if entry.depth() == 0 => return Err(walk_error(err, &start)),
                Err(err) => {
                    warn!(path = %relative.display(), error = %err, "skipping entry without metadata");
                    continue;
                }
            };
            entries.push(FsEntry {
                path: relative,
                metadata: convert_metadata(&meta),
            });
        }
        Ok(entries)
    }
}

fn walk_error(err: walkdir::Error, start: &Path) -> FsError {
    let path = err.path().unwrap_or(start).to_path_buf();
    match err.into_io_error() {
        Some(source) => FsError::io(&path, source),
        None => FsError::InvalidPath(path),
    }
}

fn convert_metadata(meta: &fs::Metadata) -> FsMetadata {
    let kind = if meta.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    };
    FsMetadata {
        kind,
        len: if meta.is_dir() { 0 } else { meta.len() },
        mode: mode_bits(meta),
        modified: meta.modified().ok(),
    }
}

#[cfg(unix)]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}
