//! Turning block devices into mountable filesystems.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use disktree_common::{DisktreeResult, Invocation};
use serde::Serialize;

use crate::host::Host;

/// Filesystem types that identify a device but cannot be mounted.
const UNMOUNTABLE: &[&str] = &["swap", "LVM2_member", "crypto_LUKS", "linux_raid_member"];

/// Identification data returned by the filesystem probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Probe {
    /// Filesystem label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Filesystem UUID as reported.
    pub uuid: Option<String>,
    /// Filesystem type.
    pub fstype: Option<String>,
}

impl Probe {
    /// Parse `blkid --output export` style `KEY=VALUE` lines.
    #[must_use]
    pub fn parse_export(output: &str) -> Self {
        let vars: HashMap<&str, &str> = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k, v.trim_matches('"')))
            .collect();

        Self {
            label: vars.get("LABEL").map(|s| (*s).to_string()),
            uuid: vars.get("UUID").map(|s| (*s).to_string()),
            fstype: vars.get("TYPE").map(|s| (*s).to_string()),
        }
    }
}

/// Probe a device for its filesystem UUID and type.
///
/// A device the probe finds nothing on yields an empty [`Probe`].
///
/// # Errors
///
/// Returns an error if the probe tool cannot be run.
pub fn probe(host: &dyn Host, device: &Path) -> DisktreeResult<Probe> {
    let invocation = Invocation::new("blkid")
        .args(["-c", "/dev/null", "--output", "export"])
        .arg(device);
    let output = host.run(&invocation)?;
    if !output.success() {
        tracing::debug!(device = %device.display(), "Nothing found on device");
        return Ok(Probe::default());
    }
    Ok(Probe::parse_export(&output.stdout))
}

/// How a device reaches the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// A loop device over the image file.
    Direct,
    /// A device-mapper device (LVM logical volume) stacked on a loop device.
    DeviceMapper,
}

impl Backing {
    /// Guess the backing from a device path.
    #[must_use]
    pub fn from_device_path(device: &Path) -> Self {
        let path = device.to_string_lossy();
        if path.starts_with("/dev/mapper/") || path.starts_with("/dev/dm-") {
            Self::DeviceMapper
        } else {
            Self::Direct
        }
    }

    /// Options that keep a journaling filesystem from replaying its journal.
    ///
    /// Journal recovery through device-mapper onto a read-only loop device can
    /// crash the kernel, so it is suppressed there and only there.
    #[must_use]
    pub fn safety_options(self, fstype: &str) -> Vec<String> {
        match (self, fstype) {
            (Self::DeviceMapper, "xfs") => vec!["norecovery".to_string()],
            (Self::DeviceMapper, "ext3" | "ext4") => vec!["noload".to_string()],
            _ => Vec::new(),
        }
    }
}

/// A mountable filesystem found on a partition or logical volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystem {
    /// Upper-cased filesystem UUID.
    pub uuid: String,
    /// Filesystem type as probed.
    pub fstype: String,
    /// Device node to mount.
    pub device: PathBuf,
    /// Options this filesystem always needs.
    pub mount_options: Vec<String>,
}

impl FileSystem {
    /// Build a filesystem from probe data, if it is mountable at all.
    #[must_use]
    pub fn from_probe(device: &Path, probe: &Probe, backing: Backing) -> Option<Self> {
        let uuid = probe.uuid.as_deref()?;
        let fstype = probe.fstype.as_deref()?;
        if UNMOUNTABLE.contains(&fstype) {
            tracing::debug!(device = %device.display(), fstype, "Skipping unmountable filesystem");
            return None;
        }

        Some(Self {
            uuid: uuid.to_uppercase(),
            fstype: fstype.to_string(),
            device: device.to_path_buf(),
            mount_options: backing.safety_options(fstype),
        })
    }

    /// Options for mounting this filesystem under an fstab entry.
    #[must_use]
    pub fn combined_options(&self, entry_options: &[String]) -> Vec<String> {
        entry_options
            .iter()
            .chain(&self.mount_options)
            .cloned()
            .collect()
    }
}

/// What probing a device found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Raw identification data, recorded in the report even when unmountable.
    pub probe: Probe,
    /// The mountable filesystem, if any.
    pub filesystem: Option<FileSystem>,
}

/// Resolve a device into a filesystem, inferring the backing from its path.
///
/// # Errors
///
/// Returns an error if the probe tool cannot be run.
pub fn resolve(host: &dyn Host, device: &Path) -> DisktreeResult<Option<FileSystem>> {
    Ok(resolve_as(host, device, Backing::from_device_path(device))?.filesystem)
}

/// Resolve a device with a known backing.
///
/// # Errors
///
/// Returns an error if the probe tool cannot be run.
pub fn resolve_as(host: &dyn Host, device: &Path, backing: Backing) -> DisktreeResult<Resolution> {
    let probe = probe(host, device)?;
    let filesystem = FileSystem::from_probe(device, &probe, backing);
    Ok(Resolution { probe, filesystem })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;
    use disktree_common::ToolOutput;

    #[test]
    fn parse_export_output() {
        let probe = Probe::parse_export(
            "DEVNAME=/dev/loop1\nUUID=\"6e0b7a8e-4d55\"\nBLOCK_SIZE=512\nTYPE=xfs\n",
        );
        assert_eq!(probe.uuid.as_deref(), Some("6e0b7a8e-4d55"));
        assert_eq!(probe.fstype.as_deref(), Some("xfs"));
        assert_eq!(probe.label, None);
    }

    #[test]
    fn empty_partition_resolves_to_none() {
        let host = FakeHost::new();
        let fs = resolve(&host, Path::new("/dev/loop3")).unwrap();
        assert!(fs.is_none());
    }

    #[test]
    fn direct_partition_gets_no_safety_options() {
        let host = FakeHost::new();
        host.respond("blkid", ToolOutput::ok("UUID=abcd-ef\nTYPE=xfs\n"));
        let fs = resolve(&host, Path::new("/dev/loop1")).unwrap().unwrap();
        assert_eq!(fs.uuid, "ABCD-EF");
        assert!(fs.mount_options.is_empty());
    }

    #[test]
    fn device_mapper_suppresses_recovery() {
        let host = FakeHost::new();
        host.respond("blkid", ToolOutput::ok("UUID=abcd-ef\nTYPE=xfs\n"));
        let resolution =
            resolve_as(&host, Path::new("/dev/vg0/root"), Backing::DeviceMapper).unwrap();
        assert_eq!(resolution.probe.fstype.as_deref(), Some("xfs"));
        let fs = resolution.filesystem.unwrap();
        assert_eq!(fs.mount_options, vec!["norecovery"]);

        assert_eq!(Backing::DeviceMapper.safety_options("ext4"), vec!["noload"]);
        assert!(Backing::DeviceMapper.safety_options("vfat").is_empty());
    }

    #[test]
    fn backing_from_path() {
        assert_eq!(
            Backing::from_device_path(Path::new("/dev/mapper/vg0-root")),
            Backing::DeviceMapper
        );
        assert_eq!(Backing::from_device_path(Path::new("/dev/dm-2")), Backing::DeviceMapper);
        assert_eq!(Backing::from_device_path(Path::new("/dev/loop4")), Backing::Direct);
    }

    #[test]
    fn unmountable_device_keeps_its_probe() {
        let host = FakeHost::new();
        host.respond("blkid", ToolOutput::ok("UUID=pv-1\nTYPE=LVM2_member\n"));
        let resolution = resolve_as(&host, Path::new("/dev/loop3"), Backing::Direct).unwrap();
        assert_eq!(resolution.probe.uuid.as_deref(), Some("pv-1"));
        assert!(resolution.filesystem.is_none());
    }

    #[test]
    fn swap_is_not_a_filesystem() {
        let probe = Probe {
            label: None,
            uuid: Some("1234".into()),
            fstype: Some("swap".into()),
        };
        assert!(FileSystem::from_probe(Path::new("/dev/loop2"), &probe, Backing::Direct).is_none());
    }

    #[test]
    fn entry_options_come_first() {
        let fs = FileSystem {
            uuid: "A".into(),
            fstype: "xfs".into(),
            device: PathBuf::from("/dev/vg0/root"),
            mount_options: vec!["norecovery".into()],
        };
        assert_eq!(
            fs.combined_options(&["defaults".to_string()]),
            vec!["defaults", "norecovery"]
        );
    }
}
