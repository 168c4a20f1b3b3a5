//! Disk image preparation.
//!
//! This module handles:
//! - Container format detection and conversion to raw
//! - Loop device attachment
//! - Boot sector and partition table inspection
//! - LVM physical volume discovery
//!
//! [`prepare_image`] runs the whole pipeline and leaves a read-only view of
//! the assembled tree, with every resource it acquired owned by the caller's
//! [`ResourceStack`].

pub mod bootloader;
pub mod format;
pub mod loopdev;
pub mod lvm;
pub mod partition;

use std::path::{Path, PathBuf};

use disktree_common::DisktreeResult;

use crate::config::InspectConfig;
use crate::filesystem::{Backing, FileSystem, FileSystemMounter, readonly_view, resolve_as};
use crate::report::Report;
use crate::scope::ResourceStack;

pub use bootloader::Bootloader;
pub use format::{ImageFormat, RawImage};
pub use lvm::{LogicalVolume, LvmDetails, LvmPartition};
pub use partition::{Partition, PartitionTable};

/// Turn a disk image into a mounted, read-only tree.
///
/// Adds the `image-format`, `bootloader` and partition table elements to
/// `report`.
///
/// # Errors
///
/// Returns the first fatal error; everything acquired up to that point is
/// still owned by `stack`.
pub fn prepare_image(
    stack: &mut ResourceStack<'_>,
    config: &InspectConfig,
    image: &Path,
    report: &mut Report,
) -> DisktreeResult<PathBuf> {
    let host = stack.host();

    let format = format::probe(host, image)?;
    report.add("image-format", serde_json::to_value(&format)?);
    let raw = format::materialize(stack, config, image, &format)?;

    let device = loopdev::attach(stack, &raw.path, 0, raw.size)?;
    report.add(
        "bootloader",
        serde_json::to_value(bootloader::detect(host, &device)?)?,
    );

    let filesystems = match partition::read(host, &device)? {
        Some(mut table) => {
            let filesystems = discover_partitions(stack, &raw, &mut table)?;
            for (name, value) in table.report_elements()? {
                report.add(name, value);
            }
            filesystems
        }
        None => resolve_as(host, &device, Backing::Direct)?
            .filesystem
            .into_iter()
            .collect(),
    };

    let mounter = FileSystemMounter::new(filesystems);
    let root = mounter.mount_all(stack, config)?;
    readonly_view(stack, config, &root)
}

/// Attach every partition, probe it and collect its filesystems.
fn discover_partitions(
    stack: &mut ResourceStack<'_>,
    raw: &RawImage,
    table: &mut PartitionTable,
) -> DisktreeResult<Vec<FileSystem>> {
    let host = stack.host();
    let mut filesystems = Vec::new();

    for part in &mut table.partitions {
        let device = loopdev::attach(stack, &raw.path, part.start, part.size)?;
        let resolution = resolve_as(host, &device, Backing::Direct)?;
        part.set_probe(&resolution.probe);

        if part.is_lvm() {
            let found = lvm::discover(stack, &device)?;
            filesystems.extend(found.filesystems);
            part.lvm = Some(found.details);
        } else if let Some(fs) = resolution.filesystem {
            filesystems.push(fs);
        } else {
            tracing::debug!(partuuid = %part.partuuid, "Partition holds no filesystem");
        }
    }

    Ok(filesystems)
}
