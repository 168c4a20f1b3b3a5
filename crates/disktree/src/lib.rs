//! # disktree
//!
//! disktree turns a disk image, or a directory, tarball or OSTree tree standing
//! in for one, into a mounted read-only directory tree that inspectors can read.
//!
//! ## Features
//!
//! - **Image materialization**: qcow2, vmdk and friends are converted to raw
//! - **Partition tables**: GPT and MBR, with MBR partition UUIDs synthesized
//! - **LVM**: volume groups are activated and logical volumes probed
//! - **fstab driven assembly**: the root filesystem and everything it mounts
//! - **Guaranteed teardown**: every loop device, volume group and mount is
//!   released in reverse order on every exit path
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//!
//! use disktree::config::InspectConfig;
//! use disktree::host::SystemHost;
//! use disktree::report::default_readers;
//!
//! # fn example() -> disktree_common::DisktreeResult<()> {
//! let host = SystemHost::new();
//! let config = InspectConfig::default();
//! let report = disktree::inspect(&host, &config, Path::new("disk.qcow2"), &default_readers())?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod filesystem;
pub mod host;
pub mod image;
pub mod report;
pub mod scope;
pub mod target;

use std::path::Path;

use disktree_common::DisktreeResult;

use crate::config::InspectConfig;
use crate::host::Host;
use crate::report::{Report, TreeReader};
use crate::scope::scoped;
use crate::target::{PreparedTree, prepare};

/// Prepare `target`, run `work` against the finished tree, then tear it down.
///
/// The report holds whatever preparation contributed and is handed to `work`
/// for readers to extend.
///
/// # Errors
///
/// Returns the first preparation or `work` error, or a teardown error if
/// everything else succeeded.
pub fn with_tree<T>(
    host: &dyn Host,
    config: &InspectConfig,
    target: &Path,
    work: impl FnOnce(&PreparedTree, &mut Report) -> DisktreeResult<T>,
) -> DisktreeResult<T> {
    config.paths.create_dirs()?;
    scoped(host, |stack| {
        let mut report = Report::new();
        let prepared = prepare(stack, config, target, &mut report)?;
        tracing::info!(tree = %prepared.tree.display(), is_ostree = prepared.is_ostree, "Tree ready");
        work(&prepared, &mut report)
    })
}

/// Prepare `target`, run every reader over it and return the report.
///
/// # Errors
///
/// Returns the first preparation, reader or teardown error. No report is
/// returned on failure.
pub fn inspect(
    host: &dyn Host,
    config: &InspectConfig,
    target: &Path,
    readers: &[Box<dyn TreeReader>],
) -> DisktreeResult<Report> {
    with_tree(host, config, target, |prepared, report| {
        for reader in readers {
            report.explore(reader.as_ref(), &prepared.tree, prepared.is_ostree)?;
        }
        Ok(std::mem::take(report))
    })
}
