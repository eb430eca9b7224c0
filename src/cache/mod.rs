//! Directory listing cache
//!
//! Per-path listings populated by successful directory-listing calls and
//! invalidated by mutating file operations.

mod mutation;
mod view;

pub use mutation::FileMutation;
pub use view::DirectoryView;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::FileEntry;

/// Most entries kept for one directory.
pub const DEFAULT_LISTING_LIMIT: usize = 500;

/// A cached directory listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryListing {
    /// Normalised directory path.
    pub path: String,
    pub entries: Vec<FileEntry>,
    /// The directory had more entries than the limit; only the first ones
    /// are kept.
    pub truncated: bool,
    /// Entry count reported by the panel before truncation.
    pub total: usize,
    pub fetched_at: DateTime<Utc>,
}

/// Local cache of directory listings, keyed by normalised path.
#[derive(Debug)]
pub struct DirectoryCache {
    pub(crate) listings: HashMap<String, DirectoryListing>,
    pub(crate) limit: usize,
    /// Bumped by every invalidation, so a fetch that started before one can
    /// tell its result is stale.
    pub(crate) generation: u64,
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_LISTING_LIMIT)
    }
}

impl DirectoryCache {
    pub fn new(limit: usize) -> Self {
        Self {
            listings: HashMap::new(),
            limit: limit.max(1),
            generation: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cached listing for `path`, or `None` on a miss.
    pub fn get(&self, path: &str) -> Option<&DirectoryListing> {
        self.listings.get(&normalize_path(path))
    }

    /// Store a fresh listing, truncated to the limit.
    pub fn populate(&mut self, path: &str, mut entries: Vec<FileEntry>) -> &DirectoryListing {
        let path = normalize_path(path);
        let total = entries.len();
        let truncated = total > self.limit;
        if truncated {
            debug!(%path, total, limit = self.limit, "directory listing truncated");
            entries.truncate(self.limit);
        }
        let listing = DirectoryListing {
            path: path.clone(),
            entries,
            truncated,
            total,
            fetched_at: Utc::now(),
        };
        self.listings.insert(path.clone(), listing);
        &self.listings[&path]
    }

    /// Drop the listing for `path` and every cached directory below it.
    /// Returns how many listings were removed.
    pub fn invalidate(&mut self, path: &str) -> usize {
        let root = normalize_path(path);
        let before = self.listings.len();
        self.listings.retain(|cached, _| !is_within(cached, &root));
        self.generation += 1;
        let removed = before - self.listings.len();
        if removed > 0 {
            debug!(path = %root, removed, "directory listings invalidated");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.listings.clear();
        self.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

/// Canonical form of a server-side path: absolute, `/`-separated, no `.` or
/// `..` segments and no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Join a file name onto a directory and normalise the result.
pub fn join_path(directory: &str, name: &str) -> String {
    if name.starts_with('/') {
        normalize_path(name)
    } else {
        normalize_path(&format!("{}/{}", directory, name))
    }
}

/// Parent directory of a normalised path. The root is its own parent.
pub fn parent_path(path: &str) -> String {
    let path = normalize_path(path);
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Whether normalised `path` is `root` or lies below it.
fn is_within(path: &str, root: &str) -> bool {
    if root == "/" {
        return true;
    }
    path == root || (path.starts_with(root) && path.as_bytes().get(root.len()) == Some(&b'/'))
}
