use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;

use super::{EntryKind, FileSystem, FsEntry, FsError, FsMetadata, Result, normalize};

const DIR_MODE: u32 = 0o040_755;
const FILE_TYPE_BITS: u32 = 0o100_000;

/// In-memory tree used as the writable overlay.
///
/// Cloning is cheap enough to stage a rebuild: directory nodes are tiny and
/// file contents are reference counted.
#[derive(Clone, Debug, Default)]
pub struct MemFs {
    nodes: BTreeMap<PathBuf, MemNode>,
}

#[derive(Clone, Debug)]
enum MemNode {
    Dir {
        modified: SystemTime,
    },
    File {
        data: Bytes,
        mode: u32,
        modified: SystemTime,
    },
}

impl MemNode {
    fn metadata(&self) -> FsMetadata {
        match self {
            MemNode::Dir { modified } => FsMetadata {
                kind: EntryKind::Dir,
                len: 0,
                mode: DIR_MODE,
                modified: Some(*modified),
            },
            MemNode::File {
                data,
                mode,
                modified,
            } => FsMetadata {
                kind: EntryKind::File,
                len: data.len() as u64,
                mode: FILE_TYPE_BITS | (mode & 0o7777),
                modified: Some(*modified),
            },
        }
    }
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn create_dir_all(&mut self, path: &Path) -> Result<()> {
        let path = normalize(path)?;
        let now = SystemTime::now();
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            match self.nodes.get(&current) {
                Some(MemNode::Dir { .. }) => {}
                Some(MemNode::File { .. }) => return Err(FsError::NotADirectory(current)),
                None => {
                    self.nodes
                        .insert(current.clone(), MemNode::Dir { modified: now });
                }
            }
        }
        Ok(())
    }

    /// Creates or truncates `path`. The parent directory must already exist.
    pub fn write_file(&mut self, path: &Path, data: impl Into<Bytes>, mode: u32) -> Result<()> {
        let path = normalize(path)?;
        if path.as_os_str().is_empty() {
            return Err(FsError::IsDirectory(path));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            match self.nodes.get(parent) {
                Some(MemNode::Dir { .. }) => {}
                Some(MemNode::File { .. }) => {
                    return Err(FsError::NotADirectory(parent.to_path_buf()));
                }
                None => return Err(FsError::NotFound(parent.to_path_buf())),
            }
        }
        if let Some(MemNode::Dir { .. }) = self.nodes.get(&path) {
            return Err(FsError::IsDirectory(path));
        }
        self.nodes.insert(
            path,
            MemNode::File {
                data: data.into(),
                mode,
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn node(&self, path: &Path) -> Result<Option<&MemNode>> {
        let path = normalize(path)?;
        Ok(self.nodes.get(&path))
    }
}

impl FileSystem for MemFs {
    fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        if normalize(path)?.as_os_str().is_empty() {
            return Ok(FsMetadata {
                kind: EntryKind::Dir,
                len: 0,
                mode: DIR_MODE,
                modified: None,
            });
        }
        self.node(path)?
            .map(MemNode::metadata)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }

    fn read(&self, path: &Path) -> Result<Bytes> {
        match self.node(path)? {
            Some(MemNode::File { data, .. }) => Ok(data.clone()),
            Some(MemNode::Dir { .. }) => Err(FsError::IsDirectory(path.to_path_buf())),
            None if normalize(path)?.as_os_str().is_empty() => {
                Err(FsError::IsDirectory(path.to_path_buf()))
            }
            None => Err(FsError::NotFound(path.to_path_buf())),
        }
    }

    fn walk(&self, root: &Path) -> Result<Vec<FsEntry>> {
        let root = normalize(root)?;
        let metadata = self.metadata(&root)?;
        let mut entries = vec![FsEntry {
            path: root.clone(),
            metadata,
        }];
        if !entries[0].metadata.is_dir() {
            return Ok(entries);
        }
        let descendants = self
            .nodes
            .range::<Path, _>((Bound::Excluded(root.as_path()), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(&root))
            .map(|(path, node)| FsEntry {
                path: path.clone(),
                metadata: node.metadata(),
            });
        entries.extend(descendants);
        Ok(entries)
    }
}
