//! Scratch storage locations.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Environment variable overriding the scratch directory.
pub const SCRATCH_ENV: &str = "DISKTREE_SCRATCH";

/// Default scratch directory for conversions, extractions and mount points.
pub static DISKTREE_SCRATCH: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var(SCRATCH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/tmp"))
});

/// Standard paths used during one inspection.
#[derive(Debug, Clone)]
pub struct DisktreePaths {
    /// Base directory for all scratch artifacts.
    pub scratch: PathBuf,
}

impl DisktreePaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths rooted at a custom scratch directory.
    #[must_use]
    pub fn with_scratch(scratch: impl Into<PathBuf>) -> Self {
        Self {
            scratch: scratch.into(),
        }
    }

    /// Scratch base directory.
    #[must_use]
    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Prefix used for converted raw images.
    #[must_use]
    pub const fn convert_prefix() -> &'static str {
        "disktree-raw-"
    }

    /// Prefix used for archive extraction and decompression.
    #[must_use]
    pub const fn extract_prefix() -> &'static str {
        "disktree-extract-"
    }

    /// Prefix used for mount points.
    #[must_use]
    pub const fn mount_prefix() -> &'static str {
        "disktree-mnt-"
    }

    /// Create the scratch directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.scratch)
    }
}

impl Default for DisktreePaths {
    fn default() -> Self {
        Self {
            scratch: DISKTREE_SCRATCH.clone(),
        }
    }
}
