use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;

use super::{FileSystem, FsEntry, FsMetadata, MemFs, OsFs, Result};

/// Read-only OS base with an in-memory overlay on top.
///
/// Lookups consult the overlay first and fall back to the base. The only way
/// to write is through [`Staging`], which works on a private copy of the
/// overlay and publishes it in one atomic swap, so a reader holding a
/// [`Snapshot`] never sees a half-written set of files.
#[derive(Debug)]
pub struct LayeredFs {
    base: OsFs,
    overlay: ArcSwap<MemFs>,
}

impl LayeredFs {
    pub fn new(base: OsFs) -> Self {
        Self {
            base,
            overlay: ArcSwap::from_pointee(MemFs::new()),
        }
    }

    pub fn base(&self) -> &OsFs {
        &self.base
    }

    /// Pins the current overlay for a consistent series of reads.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            base: &self.base,
            overlay: self.overlay.load_full(),
        }
    }

    /// Starts a write transaction seeded with the current overlay.
    ///
    /// Concurrent stagings are last-commit-wins; callers serialize them.
    pub fn stage(&self) -> Staging<'_> {
        Staging {
            target: self,
            overlay: MemFs::clone(&self.overlay.load()),
        }
    }
}

impl FileSystem for LayeredFs {
    fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        self.snapshot().metadata(path)
    }

    fn read(&self, path: &Path) -> Result<Bytes> {
        self.snapshot().read(path)
    }

    fn walk(&self, root: &Path) -> Result<Vec<FsEntry>> {
        self.snapshot().walk(root)
    }
}

pub struct Snapshot<'a> {
    base: &'a OsFs,
    overlay: Arc<MemFs>,
}

impl FileSystem for Snapshot<'_> {
    fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        layered_metadata(self.base, &self.overlay, path)
    }

    fn read(&self, path: &Path) -> Result<Bytes> {
        layered_read(self.base, &self.overlay, path)
    }

    fn walk(&self, root: &Path) -> Result<Vec<FsEntry>> {
        layered_walk(self.base, &self.overlay, root)
    }
}

/// Pending overlay writes. Dropping without [`Staging::commit`] discards them.
pub struct Staging<'a> {
    target: &'a LayeredFs,
    overlay: MemFs,
}

impl Staging<'_> {
    pub fn create_dir_all(&mut self, path: &Path) -> Result<()> {
        self.overlay.create_dir_all(path)
    }

    pub fn write_file(&mut self, path: &Path, data: impl Into<Bytes>, mode: u32) -> Result<()> {
        self.overlay.write_file(path, data, mode)
    }

    pub fn commit(self) {
        self.target.overlay.store(Arc::new(self.overlay));
    }
}

impl FileSystem for Staging<'_> {
    fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        layered_metadata(&self.target.base, &self.overlay, path)
    }

    fn read(&self, path: &Path) -> Result<Bytes> {
        layered_read(&self.target.base, &self.overlay, path)
    }

    fn walk(&self, root: &Path) -> Result<Vec<FsEntry>> {
        layered_walk(&self.target.base, &self.overlay, root)
    }
}

fn layered_metadata(base: &OsFs, overlay: &MemFs, path: &Path) -> Result<FsMetadata> {
    match overlay.metadata(path) {
        Err(err) if err.is_not_found() => base.metadata(path),
        other => other,
    }
}

fn layered_read(base: &OsFs, overlay: &MemFs, path: &Path) -> Result<Bytes> {
    match overlay.read(path) {
        Err(err) if err.is_not_found() => base.read(path),
        other => other,
    }
}

fn layered_walk(base: &OsFs, overlay: &MemFs, root: &Path) -> Result<Vec<FsEntry>> {
    let upper = match overlay.walk(root) {
        Ok(entries) => entries,
        Err(err) if err.is_not_found() => Vec::new(),
        Err(err) => return Err(err),
    };
    let mut entries = match base.walk(root) {
        Ok(entries) => entries,
        Err(err) if err.is_not_found() && !upper.is_empty() => Vec::new(),
        Err(err) => return Err(err),
    };
    let shadowed: HashSet<_> = upper.iter().map(|entry| entry.path.clone()).collect();
    for entry in &mut entries {
        if shadowed.contains(&entry.path)
            && let Ok(metadata) = overlay.metadata(&entry.path)
            && metadata.is_file()
        {
            entry.metadata = metadata;
        }
    }
    let seen: HashSet<_> = entries.iter().map(|entry| entry.path.clone()).collect();
    entries.extend(upper.into_iter().filter(|entry| !seen.contains(&entry.path)));
    Ok(entries)
}
