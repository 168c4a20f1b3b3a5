//! Assembling a full tree from discovered filesystems and their fstab.

use std::path::{Path, PathBuf};

use disktree_common::{DisktreeError, DisktreePaths, DisktreeResult};

use super::fstab::{FstabEntry, read_fstab};
use super::mounts::MountOptions;
use super::resolve::FileSystem;
use crate::config::InspectConfig;
use crate::host::Host;
use crate::scope::{Resource, ResourceStack, scoped};

/// One planned mount: which filesystem goes where, with which options.
#[derive(Debug, Clone)]
pub struct MountStep<'a> {
    /// The filesystem to mount.
    pub filesystem: &'a FileSystem,
    /// The fstab entry it satisfies.
    pub entry: &'a FstabEntry,
    /// fstab options followed by the filesystem's own options.
    pub options: Vec<String>,
}

impl MountStep<'_> {
    /// Where this step mounts below `root`.
    #[must_use]
    pub fn target(&self, root: &Path) -> PathBuf {
        let relative = self.entry.mountpoint.trim_start_matches('/');
        if relative.is_empty() {
            root.to_path_buf()
        } else {
            root.join(relative)
        }
    }

    /// Filesystem type handed to the kernel.
    #[must_use]
    pub fn fstype(&self) -> &str {
        if self.entry.fstype == "auto" {
            &self.filesystem.fstype
        } else {
            &self.entry.fstype
        }
    }
}

/// Ordered mounts: root first, then increasing mountpoint.
#[derive(Debug, Clone)]
pub struct MountPlan<'a> {
    steps: Vec<MountStep<'a>>,
}

impl<'a> MountPlan<'a> {
    /// Plan mounts for sorted fstab entries.
    ///
    /// # Errors
    ///
    /// Fails if the first mountable entry is not `/`, if `/` appears twice,
    /// if a mountpoint contains `..`, or if an entry's UUID does not resolve
    /// to exactly one filesystem.
    pub fn build(entries: &'a [FstabEntry], mounter: &'a FileSystemMounter) -> DisktreeResult<Self> {
        let mut steps: Vec<MountStep<'a>> = Vec::new();

        for entry in entries {
            if !entry.is_mountable() {
                tracing::debug!(
                    mountpoint = %entry.mountpoint,
                    fstype = %entry.fstype,
                    "Skipping fstab entry that does not belong in the tree"
                );
                continue;
            }

            if entry.escapes_tree() {
                return Err(DisktreeError::MalformedOutput {
                    what: "fstab",
                    message: format!("mountpoint '{}' leaves the tree", entry.mountpoint),
                });
            }
            if steps.is_empty() && !entry.is_root() {
                return Err(DisktreeError::MissingRootEntry {
                    found: entry.mountpoint.clone(),
                });
            }
            if !steps.is_empty() && entry.is_root() {
                return Err(DisktreeError::MalformedOutput {
                    what: "fstab",
                    message: "more than one entry mounts '/'".to_string(),
                });
            }

            let filesystem = mounter.get(&entry.uuid, &entry.mountpoint)?;
            steps.push(MountStep {
                filesystem,
                entry,
                options: filesystem.combined_options(&entry.options),
            });
        }

        if steps.is_empty() {
            return Err(DisktreeError::NoRootFilesystem);
        }
        Ok(Self { steps })
    }

    /// The planned steps, root first.
    #[must_use]
    pub fn steps(&self) -> &[MountStep<'a>] {
        &self.steps
    }

    /// Number of mounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether nothing is planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Mounts every discovered filesystem according to the fstab it carries.
#[derive(Debug, Clone, Default)]
pub struct FileSystemMounter {
    filesystems: Vec<FileSystem>,
}

impl FileSystemMounter {
    /// Collect candidates from every partition and logical volume.
    #[must_use]
    pub fn new(filesystems: Vec<FileSystem>) -> Self {
        Self { filesystems }
    }

    /// All candidates, in discovery order.
    #[must_use]
    pub fn filesystems(&self) -> &[FileSystem] {
        &self.filesystems
    }

    /// The single filesystem carrying `uuid`.
    ///
    /// # Errors
    ///
    /// Fails when no filesystem or more than one carries the UUID.
    pub fn get(&self, uuid: &str, mountpoint: &str) -> DisktreeResult<&FileSystem> {
        let mut matches = self.filesystems.iter().filter(|fs| fs.uuid == uuid);
        let first = matches
            .next()
            .ok_or_else(|| DisktreeError::UnresolvedFstabEntry {
                uuid: uuid.to_string(),
                mountpoint: mountpoint.to_string(),
            })?;
        let extra = matches.count();
        if extra > 0 {
            return Err(DisktreeError::AmbiguousFstabEntry {
                uuid: uuid.to_string(),
                count: extra + 1,
            });
        }
        Ok(first)
    }

    /// Mount candidates one at a time until one carries an fstab.
    ///
    /// Each candidate is mounted read-only on a scratch directory and
    /// unmounted again before the next one is tried.
    ///
    /// # Errors
    ///
    /// Fails if a candidate cannot be mounted or released.
    pub fn find_fstab(
        &self,
        host: &dyn Host,
        config: &InspectConfig,
    ) -> DisktreeResult<Option<Vec<FstabEntry>>> {
        for fs in &self.filesystems {
            let found = scoped(host, |scan| {
                let dir = scan.scratch_dir(config.scratch(), DisktreePaths::mount_prefix())?;
                host.mount(
                    &fs.device,
                    &dir,
                    &fs.fstype,
                    &MountOptions::from_fstab(&fs.mount_options),
                )?;
                scan.push(Resource::Mount(dir.clone()));
                read_fstab(&dir)
            })?;

            if let Some(entries) = found {
                tracing::info!(
                    device = %fs.device.display(),
                    uuid = %fs.uuid,
                    entries = entries.len(),
                    "Found fstab"
                );
                return Ok(Some(entries));
            }
        }
        Ok(None)
    }

    /// Assemble the whole tree and return its root.
    ///
    /// Every mount is pushed onto `stack` so the tree is torn down in reverse
    /// order when the stack is released.
    ///
    /// # Errors
    ///
    /// Fails when no fstab or root entry exists, when an entry cannot be
    /// resolved, or when a mount fails.
    pub fn mount_all(
        &self,
        stack: &mut ResourceStack<'_>,
        config: &InspectConfig,
    ) -> DisktreeResult<PathBuf> {
        let host = stack.host();
        let entries = self
            .find_fstab(host, config)?
            .ok_or(DisktreeError::NoRootFilesystem)?;
        let plan = MountPlan::build(&entries, self)?;

        let mut root: Option<PathBuf> = None;
        for step in plan.steps() {
            let target = match &root {
                Some(root) => contained_target(root, &step.target(root))?,
                None => stack.scratch_dir(config.scratch(), DisktreePaths::mount_prefix())?,
            };

            host.mount(
                &step.filesystem.device,
                &target,
                step.fstype(),
                &MountOptions::from_fstab(&step.options),
            )?;
            stack.push(Resource::Mount(target.clone()));

            tracing::debug!(
                device = %step.filesystem.device.display(),
                mountpoint = %step.entry.mountpoint,
                "Mounted"
            );
            if root.is_none() {
                tracing::info!(root = %target.display(), "Root filesystem mounted");
                root = Some(target);
            }
        }

        root.ok_or(DisktreeError::NoRootFilesystem)
    }
}

/// Make sure a nested mount target, with symlinks resolved, lies below `root`.
fn contained_target(root: &Path, target: &Path) -> DisktreeResult<PathBuf> {
    let resolved = std::fs::canonicalize(target)?;
    if !resolved.starts_with(std::fs::canonicalize(root)?) {
        return Err(DisktreeError::MalformedOutput {
            what: "fstab",
            message: format!(
                "mountpoint {} resolves to {} outside the tree",
                target.display(),
                resolved.display()
            ),
        });
    }
    Ok(target.to_path_buf())
}

/// Expose `source` through a recursive read-only bind mount in scratch storage.
///
/// # Errors
///
/// Returns an error if the scratch directory or the bind mount cannot be
/// created.
pub fn readonly_view(
    stack: &mut ResourceStack<'_>,
    config: &InspectConfig,
    source: &Path,
) -> DisktreeResult<PathBuf> {
    let view = stack.scratch_dir(config.scratch(), DisktreePaths::mount_prefix())?;
    stack.host().bind_readonly(source, &view, true)?;
    stack.push(Resource::Mount(view.clone()));
    tracing::debug!(source = %source.display(), view = %view.display(), "Read-only view ready");
    Ok(view)
}
