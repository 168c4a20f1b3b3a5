//! Boot sector inspection.

use std::fmt;
use std::path::Path;

use disktree_common::DisktreeResult;
use serde::Serialize;

use crate::host::Host;

const BOOT_SECTOR: usize = 512;

/// Bootloader found in the first sector of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bootloader {
    /// GRUB boot code.
    Grub,
    /// Anything else, including no boot code at all.
    Unknown,
}

impl Bootloader {
    /// Identify the bootloader from the leading bytes of a device.
    #[must_use]
    pub fn from_boot_sector(sector: &[u8]) -> Self {
        if sector.windows(4).any(|w| w == b"GRUB") {
            Self::Grub
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for Bootloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grub => write!(f, "grub"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Read the boot sector of `device` and identify its bootloader.
///
/// # Errors
///
/// Returns an error if the device cannot be read.
pub fn detect(host: &dyn Host, device: &Path) -> DisktreeResult<Bootloader> {
    let sector = host.read_head(device, BOOT_SECTOR)?;
    let bootloader = Bootloader::from_boot_sector(&sector);
    tracing::debug!(device = %device.display(), %bootloader, "Read boot sector");
    Ok(bootloader)
}
