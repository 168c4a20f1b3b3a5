//! Scoped ownership of everything an inspection acquires.
//!
//! Loop devices, activated volume groups, mounts and scratch directories are
//! pushed onto a [`ResourceStack`] right after they were successfully
//! acquired. Releasing the stack undoes them in strict reverse order, so a
//! loop device is never detached while a volume group on it is active and a
//! directory is never removed while something is still mounted below it.

use std::fmt;
use std::path::{Path, PathBuf};

use disktree_common::{DisktreeError, DisktreeResult};
use tempfile::TempDir;

use crate::host::Host;
use crate::image::{loopdev, lvm};

/// One acquired OS-level resource.
pub enum Resource {
    /// An attached loop device.
    LoopDevice(PathBuf),
    /// An activated LVM volume group.
    VolumeGroup(String),
    /// A mount point with something mounted on it.
    Mount(PathBuf),
    /// A scratch directory removed on release.
    ScratchDir(TempDir),
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoopDevice(dev) => write!(f, "loop device {}", dev.display()),
            Self::VolumeGroup(vg) => write!(f, "volume group {vg}"),
            Self::Mount(target) => write!(f, "mount {}", target.display()),
            Self::ScratchDir(dir) => write!(f, "scratch dir {}", dir.path().display()),
        }
    }
}

impl Resource {
    fn release(self, host: &dyn Host) -> DisktreeResult<()> {
        tracing::debug!(resource = ?self, "Releasing");
        match self {
            Self::LoopDevice(dev) => loopdev::detach(host, &dev),
            Self::VolumeGroup(vg) => lvm::deactivate(host, &vg),
            Self::Mount(target) => host.unmount(&target),
            Self::ScratchDir(dir) => dir.close().map_err(DisktreeError::Io),
        }
    }
}

/// Stack of acquired resources released in reverse acquisition order.
pub struct ResourceStack<'h> {
    host: &'h dyn Host,
    held: Vec<Resource>,
}

impl<'h> ResourceStack<'h> {
    /// Create an empty stack bound to a host.
    #[must_use]
    pub fn new(host: &'h dyn Host) -> Self {
        Self {
            host,
            held: Vec::new(),
        }
    }

    /// The host resources are acquired from.
    #[must_use]
    pub fn host(&self) -> &'h dyn Host {
        self.host
    }

    /// Take ownership of an acquired resource.
    pub fn push(&mut self, resource: Resource) {
        tracing::trace!(resource = ?resource, "Acquired");
        self.held.push(resource);
    }

    /// Create a scratch directory under `base` owned by this stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn scratch_dir(&mut self, base: &Path, prefix: &str) -> DisktreeResult<PathBuf> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(base)?;
        let path = dir.path().to_path_buf();
        self.push(Resource::ScratchDir(dir));
        Ok(path)
    }

    /// Number of resources currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Whether nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release everything, newest first.
    ///
    /// Every resource gets exactly one release attempt even when an earlier
    /// release failed; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`DisktreeError::Teardown`] wrapping the first release failure.
    pub fn release(mut self) -> DisktreeResult<()> {
        self.release_all()
    }

    fn release_all(&mut self) -> DisktreeResult<()> {
        let mut first = None;
        while let Some(resource) = self.held.pop() {
            let what = format!("{resource:?}");
            if let Err(err) = resource.release(self.host) {
                tracing::warn!(resource = %what, error = %err, "Failed to release resource");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), |err| Err(DisktreeError::teardown(err)))
    }
}

impl Drop for ResourceStack<'_> {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        if let Err(err) = self.release_all() {
            tracing::error!(error = %err, "Teardown failed while unwinding");
        }
    }
}

/// Run `work` with a fresh stack, then release it.
///
/// An error from `work` wins over a teardown error; a teardown error after
/// successful work is returned as is.
///
/// # Errors
///
/// Returns the error from `work`, or the teardown error.
pub fn scoped<T>(
    host: &dyn Host,
    work: impl FnOnce(&mut ResourceStack<'_>) -> DisktreeResult<T>,
) -> DisktreeResult<T> {
    let mut stack = ResourceStack::new(host);
    let outcome = work(&mut stack);
    let teardown = stack.release();

    match (outcome, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(teardown)) => {
            tracing::error!(error = %teardown, "Teardown also failed");
            Err(err)
        }
    }
}
