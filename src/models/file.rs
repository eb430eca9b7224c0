//! Directory listing entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file or directory from the directory-listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// Symbolic mode, e.g. `drwxr-xr-x`.
    #[serde(default)]
    pub mode: String,
    /// Octal mode bits, e.g. `755`.
    #[serde(default)]
    pub mode_bits: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default = "default_true")]
    pub is_file: bool,
    #[serde(default)]
    pub is_symlink: bool,
    #[serde(default)]
    pub mimetype: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl FileEntry {
    pub fn is_directory(&self) -> bool {
        !self.is_file
    }

    /// Whether the panel can open this entry in its text editor.
    pub fn is_editable(&self) -> bool {
        self.is_file
            && (self.mimetype.starts_with("text/")
                || self.mimetype == "application/json"
                || self.mimetype == "inode/x-empty")
    }

    /// Format file size for display (e.g., "1.2 KB", "3.4 MB")
    pub fn format_size(&self) -> String {
        let bytes = self.size;
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KB", bytes as f64 / 1024.0)
        } else if bytes < 1024 * 1024 * 1024 {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }
}
