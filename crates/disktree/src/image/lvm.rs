//! LVM physical volume discovery.
//!
//! A partition typed as a physical volume is looked up to find its volume
//! group, the group is activated and owned by the [`ResourceStack`], and each
//! logical volume is probed for a filesystem.

use std::path::{Path, PathBuf};

use disktree_common::{DisktreeError, DisktreeResult, Invocation};
use serde::Serialize;

use crate::filesystem::{Backing, FileSystem, resolve_as};
use crate::host::Host;
use crate::scope::{Resource, ResourceStack};

/// Logical volumes whose name starts with this are tried first as root.
pub const ROOT_PREFIX: &str = "root";

/// One logical volume of an activated volume group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalVolume {
    /// Volume name.
    pub name: String,
    /// Filesystem UUID, once probed.
    pub uuid: Option<String>,
    /// Filesystem type, once probed.
    pub fstype: Option<String>,
    /// Device node.
    pub device: PathBuf,
    /// Kernel major number.
    #[serde(skip)]
    pub major: u32,
    /// Kernel minor number.
    #[serde(skip)]
    pub minor: u32,
}

impl LogicalVolume {
    /// Whether this volume is a root candidate.
    #[must_use]
    pub fn is_root_candidate(&self) -> bool {
        self.name.starts_with(ROOT_PREFIX)
    }
}

/// LVM details recorded on a physical volume partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LvmDetails {
    /// Volume group name.
    pub vg: String,
    /// Logical volumes, root candidates first.
    pub volumes: Vec<LogicalVolume>,
}

/// A discovered physical volume whose group is active.
#[derive(Debug, Clone)]
pub struct LvmPartition {
    /// Volume group and its volumes.
    pub details: LvmDetails,
    /// Mountable filesystems on the volumes, in volume order.
    pub filesystems: Vec<FileSystem>,
}

/// Move root candidates to the front, keeping relative order otherwise.
pub fn root_first(volumes: &mut [LogicalVolume]) {
    volumes.sort_by_key(|lv| !lv.is_root_candidate());
}

/// Find the volume group a physical volume belongs to.
///
/// # Errors
///
/// Returns an error if `pvdisplay` fails or reports no group.
pub fn volume_group_for_device(host: &dyn Host, device: &Path) -> DisktreeResult<String> {
    let invocation = Invocation::new("pvdisplay")
        .args(["-C", "--noheadings", "-o", "vg_name"])
        .arg(device);
    let output = host.run(&invocation)?;
    if !output.success() {
        return Err(DisktreeError::VolumeGroup {
            operation: "lookup",
            vg: device.display().to_string(),
            message: output.stderr,
        });
    }

    let vg = output.stdout.trim();
    if vg.is_empty() {
        return Err(DisktreeError::MalformedOutput {
            what: "pvdisplay",
            message: format!("no volume group for {}", device.display()),
        });
    }
    Ok(vg.to_string())
}

/// Activate a volume group and hand its deactivation to `stack`.
///
/// # Errors
///
/// Returns the tool's error text if activation fails.
pub fn activate(stack: &mut ResourceStack<'_>, vg: &str) -> DisktreeResult<()> {
    let invocation = Invocation::new("vgchange").arg("-ay").arg(vg);
    let output = stack.host().run(&invocation)?;
    if !output.success() {
        return Err(DisktreeError::VolumeGroup {
            operation: "activate",
            vg: vg.to_string(),
            message: output.stderr,
        });
    }
    stack.push(Resource::VolumeGroup(vg.to_string()));
    tracing::debug!(vg, "Activated volume group");
    Ok(())
}

/// Deactivate a volume group.
///
/// # Errors
///
/// Returns the tool's error text if deactivation fails.
pub fn deactivate(host: &dyn Host, vg: &str) -> DisktreeResult<()> {
    let invocation = Invocation::new("vgchange").arg("-an").arg(vg);
    let output = host.run(&invocation)?;
    if !output.success() {
        return Err(DisktreeError::VolumeGroup {
            operation: "deactivate",
            vg: vg.to_string(),
            message: output.stderr,
        });
    }
    Ok(())
}

/// Parse `lvdisplay -C --noheadings --separator ';'` output with the
/// `lv_name,path,lv_kernel_major,lv_kernel_minor` columns.
///
/// # Errors
///
/// Returns an error if a line does not have four columns or the numbers
/// do not parse.
pub fn parse_lvdisplay(output: &str) -> DisktreeResult<Vec<LogicalVolume>> {
    let malformed = |line: &str| DisktreeError::MalformedOutput {
        what: "lvdisplay",
        message: format!("unexpected line '{line}'"),
    };

    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(';').map(str::trim).collect();
            let [name, path, major, minor] = fields.as_slice() else {
                return Err(malformed(line));
            };
            Ok(LogicalVolume {
                name: (*name).to_string(),
                uuid: None,
                fstype: None,
                device: PathBuf::from(path),
                major: major.parse().map_err(|_| malformed(line))?,
                minor: minor.parse().map_err(|_| malformed(line))?,
            })
        })
        .collect()
}

/// List the logical volumes of an active volume group.
///
/// # Errors
///
/// Returns the tool's error text if enumeration fails.
pub fn list_volumes(host: &dyn Host, vg: &str) -> DisktreeResult<Vec<LogicalVolume>> {
    let invocation = Invocation::new("lvdisplay")
        .args(["-C", "--noheadings", "-o"])
        .arg("lv_name,path,lv_kernel_major,lv_kernel_minor")
        .args(["--separator", ";"])
        .arg(vg);
    let output = host.run(&invocation)?;
    if !output.success() {
        return Err(DisktreeError::VolumeGroup {
            operation: "enumerate",
            vg: vg.to_string(),
            message: output.stderr,
        });
    }
    parse_lvdisplay(&output.stdout)
}

/// Activate the volume group on `device` and probe its logical volumes.
///
/// # Errors
///
/// Returns an error if any LVM tool fails, a device node cannot be created,
/// or probing fails to run.
pub fn discover(stack: &mut ResourceStack<'_>, device: &Path) -> DisktreeResult<LvmPartition> {
    let host = stack.host();
    let vg = volume_group_for_device(host, device)?;
    activate(stack, &vg)?;

    let mut volumes = list_volumes(host, &vg)?;
    root_first(&mut volumes);

    let mut filesystems = Vec::new();
    for lv in &mut volumes {
        host.ensure_block_device(&lv.device, lv.major, lv.minor)?;
        let resolution = resolve_as(host, &lv.device, Backing::DeviceMapper)?;
        lv.uuid.clone_from(&resolution.probe.uuid);
        lv.fstype.clone_from(&resolution.probe.fstype);
        filesystems.extend(resolution.filesystem);
    }

    tracing::info!(
        vg = %vg,
        volumes = volumes.len(),
        filesystems = filesystems.len(),
        "Discovered logical volumes"
    );
    Ok(LvmPartition {
        details: LvmDetails { vg, volumes },
        filesystems,
    })
}
