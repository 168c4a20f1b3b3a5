//! Inspection configuration.

use std::path::{Path, PathBuf};

use disktree_common::DisktreePaths;

/// Inspection configuration options.
#[derive(Debug, Clone)]
pub struct InspectConfig {
    /// Scratch storage locations.
    pub paths: DisktreePaths,
    /// CPU architectures on which image conversion runs with one worker.
    pub single_worker_arches: Vec<String>,
    /// Architecture of this host.
    pub arch: String,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            paths: DisktreePaths::new(),
            single_worker_arches: vec!["aarch64".to_string()],
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

impl InspectConfig {
    /// Set the scratch directory.
    #[must_use]
    pub fn with_scratch(mut self, scratch: impl Into<PathBuf>) -> Self {
        self.paths = DisktreePaths::with_scratch(scratch);
        self
    }

    /// Pretend to run on another architecture.
    #[must_use]
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Scratch base directory.
    #[must_use]
    pub fn scratch(&self) -> &Path {
        self.paths.scratch()
    }

    /// Whether image conversion must be restricted to a single worker here.
    ///
    /// Multi-threaded `qemu-img convert` can hang on some architectures.
    #[must_use]
    pub fn single_worker_conversion(&self) -> bool {
        self.single_worker_arches.iter().any(|a| *a == self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aarch64_converts_with_one_worker() {
        let config = InspectConfig::default().with_arch("aarch64");
        assert!(config.single_worker_conversion());
        assert!(!config.with_arch("x86_64").single_worker_conversion());
    }

    #[test]
    fn custom_scratch() {
        let config = InspectConfig::default().with_scratch("/srv/scratch");
        assert_eq!(config.scratch(), Path::new("/srv/scratch"));
    }
}
