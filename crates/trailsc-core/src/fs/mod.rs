//! Minimal filesystem abstraction used by the archiver and the HTTP layer.
//!
//! Paths handed to a [`FileSystem`] are always relative to that filesystem's
//! root. `..`, absolute and drive-prefixed paths are rejected up front so a
//! request can never reach outside the served tree.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;

pub mod layered;
pub mod mem;
pub mod os;

pub use layered::{LayeredFs, Snapshot, Staging};
pub use mem::MemFs;
pub use os::OsFs;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("invalid path `{}`", .0.display())]
    InvalidPath(PathBuf),
    #[error("`{}` does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("`{}` is a directory", .0.display())]
    IsDirectory(PathBuf),
    #[error("`{}` is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("i/o error on `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            FsError::NotFound(path.to_path_buf())
        } else {
            FsError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsMetadata {
    pub kind: EntryKind,
    pub len: u64,
    /// Unix mode bits as reported by the layer (file type bits may be present).
    pub mode: u32,
    pub modified: Option<SystemTime>,
}

impl FsMetadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

#[derive(Clone, Debug)]
pub struct FsEntry {
    pub path: PathBuf,
    pub metadata: FsMetadata,
}

pub trait FileSystem: Send + Sync {
    fn metadata(&self, path: &Path) -> Result<FsMetadata>;

    fn read(&self, path: &Path) -> Result<Bytes>;

    /// Lists `root` followed by every entry beneath it, in the layer's natural order.
    fn walk(&self, root: &Path) -> Result<Vec<FsEntry>>;

    fn is_file(&self, path: &Path) -> bool {
        self.metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
    }
}

/// Reduces `path` to its normal components; the empty path is the root.
pub fn normalize(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FsError::InvalidPath(path.to_path_buf()));
            }
        }
    }
    Ok(out)
}
