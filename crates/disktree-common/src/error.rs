//! Common error types for the disktree engine.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`DisktreeError`].
pub type DisktreeResult<T> = Result<T, DisktreeError>;

/// Errors raised while preparing or tearing down an inspection tree.
#[derive(Error, Diagnostic, Debug)]
pub enum DisktreeError {
    /// The inspection target does not exist.
    #[error("Target not found: {}", path.display())]
    #[diagnostic(code(disktree::target::not_found))]
    TargetNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// An external tool could not be started at all.
    #[error("Failed to execute {program}: {source}")]
    #[diagnostic(
        code(disktree::tool::spawn),
        help("Make sure {program} is installed and in PATH")
    )]
    ToolSpawn {
        /// The program that failed to start.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited unsuccessfully.
    #[error("{command} failed ({status}): {stderr}")]
    #[diagnostic(code(disktree::tool::failed))]
    ToolFailed {
        /// The rendered command line.
        command: String,
        /// Exit status description.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// A volume group operation failed; `message` is the tool's stderr verbatim.
    #[error("Volume group {operation} failed for '{vg}': {message}")]
    #[diagnostic(code(disktree::lvm::volume_group))]
    VolumeGroup {
        /// The attempted operation (lookup, activate, enumerate, deactivate).
        operation: &'static str,
        /// Volume group name, or the physical volume device for lookups.
        vg: String,
        /// Error text reported by the tool.
        message: String,
    },

    /// The partition table reports a unit other than sectors.
    #[error("Unsupported partition table unit: {unit}")]
    #[diagnostic(
        code(disktree::partition::unit),
        help("Only sector-addressed partition tables are supported")
    )]
    UnsupportedPartitionUnit {
        /// The unit reported by the partition probe.
        unit: String,
    },

    /// The first sorted fstab entry is not the root filesystem.
    #[error("The first mountpoint in sorted fstab entries is not '/' (found '{found}')")]
    #[diagnostic(code(disktree::fstab::missing_root))]
    MissingRootEntry {
        /// Mountpoint of the first entry.
        found: String,
    },

    /// An fstab entry references a UUID no discovered filesystem carries.
    #[error("No filesystem with UUID {uuid} for mountpoint {mountpoint}")]
    #[diagnostic(code(disktree::fstab::unresolved))]
    UnresolvedFstabEntry {
        /// The upper-cased UUID from the fstab.
        uuid: String,
        /// Where the entry wanted to be mounted.
        mountpoint: String,
    },

    /// More than one discovered filesystem carries the same UUID.
    #[error("UUID {uuid} is carried by {count} filesystems")]
    #[diagnostic(code(disktree::fstab::ambiguous))]
    AmbiguousFstabEntry {
        /// The duplicated UUID.
        uuid: String,
        /// How many filesystems carry it.
        count: usize,
    },

    /// No root filesystem could be assembled.
    #[error("The root filesystem tree is not mounted")]
    #[diagnostic(
        code(disktree::mount::no_root),
        help("None of the discovered filesystems contains a usable etc/fstab")
    )]
    NoRootFilesystem,

    /// Compression encoding recognised but not supported.
    #[error("Unsupported compression: {encoding}")]
    #[diagnostic(code(disktree::target::compression))]
    UnsupportedCompression {
        /// The encoding name.
        encoding: String,
    },

    /// A tool produced output we could not interpret.
    #[error("Malformed {what} output: {message}")]
    #[diagnostic(code(disktree::tool::malformed))]
    MalformedOutput {
        /// Which output was being parsed.
        what: &'static str,
        /// Parse failure details.
        message: String,
    },

    /// Releasing an acquired resource failed.
    #[error("Teardown failed: {source}")]
    #[diagnostic(
        code(disktree::teardown),
        help("Loop devices, volume groups or mounts may have been left behind; check losetup -a, vgs and findmnt")
    )]
    Teardown {
        /// The first release failure.
        #[source]
        source: Box<DisktreeError>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(disktree::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(disktree::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(disktree::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(
        code(disktree::unsupported),
        help("Loop devices, LVM and mounts require Linux")
    )]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },
}

impl DisktreeError {
    /// Wrap a release failure, leaving already wrapped errors alone.
    #[must_use]
    pub fn teardown(err: Self) -> Self {
        match err {
            Self::Teardown { .. } => err,
            other => Self::Teardown {
                source: Box::new(other),
            },
        }
    }
}

impl From<serde_json::Error> for DisktreeError {
    fn from(err: serde_json::Error) -> Self {
        DisktreeError::Serialization(err.to_string())
    }
}
