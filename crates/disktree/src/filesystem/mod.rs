//! Filesystem discovery and mounting.
//!
//! This module handles:
//! - Mount syscalls and fstab option translation
//! - Filesystem probing on block devices
//! - fstab parsing
//! - Mount planning and tree assembly

pub mod fstab;
pub mod mounter;
pub mod mounts;
pub mod resolve;

pub use fstab::{FSTAB_PATH, FstabEntry, parse_fstab, read_fstab};
pub use mounter::{FileSystemMounter, MountPlan, MountStep, readonly_view};
pub use mounts::{MountOptions, bind_mount_readonly, ensure_block_device, mount, unmount};
pub use resolve::{Backing, FileSystem, Probe, Resolution, probe, resolve, resolve_as};
