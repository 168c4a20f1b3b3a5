//! The boundary between disktree and the operating system.
//!
//! Every effect the engine has on the machine (running `losetup`, LVM or
//! `sfdisk`, mounting, unmounting, creating device nodes) is a call on a
//! [`Host`]. [`SystemHost`] performs them for real.

#[cfg(test)]
pub(crate) mod fake;

use std::io::Read;
use std::path::Path;

use disktree_common::{DisktreeResult, Invocation, ToolOutput};

use crate::filesystem::{self, MountOptions};

/// Operating-system services used by the engine.
pub trait Host {
    /// Run an external tool to completion.
    ///
    /// A non-zero exit is reported through [`ToolOutput`], not as an error.
    fn run(&self, invocation: &Invocation) -> DisktreeResult<ToolOutput>;

    /// Mount `device` on the existing directory `target`.
    fn mount(
        &self,
        device: &Path,
        target: &Path,
        fstype: &str,
        options: &MountOptions,
    ) -> DisktreeResult<()>;

    /// Bind `source` onto `target` and make the bind read-only.
    fn bind_readonly(&self, source: &Path, target: &Path, recursive: bool) -> DisktreeResult<()>;

    /// Lazily unmount whatever is mounted on `target`.
    fn unmount(&self, target: &Path) -> DisktreeResult<()>;

    /// Make sure a block special file for `major:minor` exists at `path`.
    fn ensure_block_device(&self, path: &Path, major: u32, minor: u32) -> DisktreeResult<()>;

    /// Read up to `len` leading bytes of a device or file.
    fn read_head(&self, device: &Path, len: usize) -> DisktreeResult<Vec<u8>>;
}

/// The real host: external tools via `std::process`, syscalls via rustix.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl SystemHost {
    /// Create a system host.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Host for SystemHost {
    fn run(&self, invocation: &Invocation) -> DisktreeResult<ToolOutput> {
        invocation.output()
    }

    fn mount(
        &self,
        device: &Path,
        target: &Path,
        fstype: &str,
        options: &MountOptions,
    ) -> DisktreeResult<()> {
        filesystem::mount(device, target, fstype, options)
    }

    fn bind_readonly(&self, source: &Path, target: &Path, recursive: bool) -> DisktreeResult<()> {
        filesystem::bind_mount_readonly(source, target, recursive)
    }

    fn unmount(&self, target: &Path) -> DisktreeResult<()> {
        filesystem::unmount(target)
    }

    fn ensure_block_device(&self, path: &Path, major: u32, minor: u32) -> DisktreeResult<()> {
        filesystem::ensure_block_device(path, major, minor)
    }

    fn read_head(&self, device: &Path, len: usize) -> DisktreeResult<Vec<u8>> {
        let file = std::fs::File::open(device)?;
        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }
}
