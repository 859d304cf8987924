//! Tar / tar.gz serialization of a directory subtree.
//!
//! Every entry is renamed under a container prefix: walking `root` with
//! container `trails-config` turns `root/osquery/a.conf` into
//! `trails-config/osquery/a.conf`. Entries keep the walk order of the
//! underlying [`FileSystem`].

use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fs::{FileSystem, FsEntry, FsError, normalize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BundleFormat {
    Tar,
    Gzip,
    Zip,
}

impl BundleFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Gzip => "tar.gz",
            Self::Zip => "zip",
        }
    }
}

impl fmt::Display for BundleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tar => "tar",
            Self::Gzip => "gzip",
            Self::Zip => "zip",
        };
        f.write_str(name)
    }
}

impl FromStr for BundleFormat {
    type Err = ArchiveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "tar" => Ok(Self::Tar),
            "gzip" | "gz" | "tar.gz" | "tgz" => Ok(Self::Gzip),
            "zip" => Ok(Self::Zip),
            other => Err(ArchiveError::Unimplemented(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("bundle format `{0}` is not implemented")]
    Unimplemented(String),
    #[error("failed to walk bundle root: {0}")]
    Walk(#[from] FsError),
    #[error("failed to write archive entry `{}`: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Serialized archive bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Archive {
    format: BundleFormat,
    bytes: Vec<u8>,
}

impl Archive {
    pub fn format(&self) -> BundleFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(self.bytes.as_slice())
    }
}

/// Archives `root` (relative to `fs`) with every entry placed under `container`.
pub fn build_archive(
    fs: &dyn FileSystem,
    root: &Path,
    container: &str,
    format: BundleFormat,
) -> Result<Archive, ArchiveError> {
    let bytes = match format {
        BundleFormat::Tar => tar_bytes(fs, root, container)?,
        BundleFormat::Gzip => gzip(tar_bytes(fs, root, container)?, container)?,
        BundleFormat::Zip => return Err(ArchiveError::Unimplemented(format.to_string())),
    };
    Ok(Archive { format, bytes })
}

fn tar_bytes(fs: &dyn FileSystem, root: &Path, container: &str) -> Result<Vec<u8>, ArchiveError> {
    let root = normalize(root)?;
    let entries = fs.walk(&root)?;
    let owner = process_owner();
    let mut builder = Builder::new(Vec::new());

    for entry in entries {
        let relative = entry
            .path
            .strip_prefix(&root)
            .map_err(|_| FsError::InvalidPath(entry.path.clone()))?;
        let name = if relative.as_os_str().is_empty() {
            PathBuf::from(container)
        } else {
            Path::new(container).join(relative)
        };
        append_entry(fs, &mut builder, &entry, &name, owner)?;
    }

    builder.into_inner().map_err(|source| ArchiveError::Write {
        path: PathBuf::from(container),
        source,
    })
}

fn append_entry(
    fs: &dyn FileSystem,
    builder: &mut Builder<Vec<u8>>,
    entry: &FsEntry,
    name: &Path,
    (uid, gid): (u64, u64),
) -> Result<(), ArchiveError> {
    let mut header = Header::new_gnu();
    header.set_mode(entry.metadata.mode & 0o777);
    header.set_uid(uid);
    header.set_gid(gid);
    header.set_mtime(entry_mtime(entry.metadata.modified));

    let write_err = |source: std::io::Error| ArchiveError::Write {
        path: name.to_path_buf(),
        source,
    };

    if entry.metadata.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        return builder
            .append_data(&mut header, name, std::io::empty())
            .map_err(write_err);
    }

    header.set_entry_type(EntryType::Regular);
    let data = match fs.read(&entry.path) {
        Ok(data) => data,
        Err(err) => {
            warn!(path = %entry.path.display(), error = %err, "unreadable file bundled without content");
            Default::default()
        }
    };
    debug!(path = %name.display(), size = data.len(), "bundling");
    header.set_size(data.len() as u64);
    builder
        .append_data(&mut header, name, data.as_ref())
        .map_err(write_err)
}

fn gzip(tar: Vec<u8>, container: &str) -> Result<Vec<u8>, ArchiveError> {
    let write_err = |source: std::io::Error| ArchiveError::Write {
        path: PathBuf::from(container),
        source,
    };
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).map_err(write_err)?;
    encoder.finish().map_err(write_err)
}

/// Zero or missing timestamps are replaced by the build time.
fn entry_mtime(modified: Option<SystemTime>) -> u64 {
    let secs = modified
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    if secs != 0 {
        return secs;
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn process_owner() -> (u64, u64) {
    (
        u64::from(nix::unistd::getuid().as_raw()),
        u64::from(nix::unistd::getgid().as_raw()),
    )
}

#[cfg(not(unix))]
fn process_owner() -> (u64, u64) {
    (0, 0)
}
