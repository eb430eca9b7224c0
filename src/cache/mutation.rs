//! Mutating file operations, as seen by the directory cache.

use super::{join_path, normalize_path, parent_path};

/// A completed file operation that changes directory contents.
///
/// `root` is the directory the operation was issued from; file names are
/// relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileMutation {
    /// A file or folder was created in `root`.
    Create { root: String, name: String },
    Delete { root: String, files: Vec<String> },
    /// `to` may point into another directory (e.g. `../backup/world`).
    Rename { root: String, from: String, to: String },
    Chmod { root: String, files: Vec<String> },
    /// An archive of `files` was written into `root`.
    Compress { root: String, files: Vec<String> },
    /// `file` was extracted into `root`.
    Decompress { root: String, file: String },
}

impl FileMutation {
    pub fn root(&self) -> &str {
        match self {
            FileMutation::Create { root, .. }
            | FileMutation::Delete { root, .. }
            | FileMutation::Rename { root, .. }
            | FileMutation::Chmod { root, .. }
            | FileMutation::Compress { root, .. }
            | FileMutation::Decompress { root, .. } => root,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FileMutation::Create { .. } => "create",
            FileMutation::Delete { .. } => "delete",
            FileMutation::Rename { .. } => "rename",
            FileMutation::Chmod { .. } => "chmod",
            FileMutation::Compress { .. } => "compress",
            FileMutation::Decompress { .. } => "decompress",
        }
    }

    /// Directories whose cached listings this operation makes stale. Each
    /// one is invalidated together with everything below it.
    pub fn affected_directories(&self) -> Vec<String> {
        let root = normalize_path(self.root());
        let mut dirs = vec![root.clone()];
        if let FileMutation::Rename { to, .. } = self {
            let target_parent = parent_path(&join_path(&root, to));
            if target_parent != root {
                dirs.push(target_parent);
            }
        }
        dirs
    }
}

impl std::fmt::Display for FileMutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {}", self.kind(), self.root())
    }
}
