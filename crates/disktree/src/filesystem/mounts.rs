//! Mount operations.

use std::path::Path;

use disktree_common::{DisktreeError, DisktreeResult};

/// Options that exist only for mount(8)/systemd and never reach the kernel.
const USERSPACE_OPTIONS: &[&str] = &[
    "defaults", "rw", "auto", "noauto", "user", "nouser", "users", "owner", "group", "nofail",
    "_netdev",
];

/// Kernel flag options with no effect on a read-only mount. mount(8) turns
/// these into flags, so they are never valid filesystem data.
const IGNORED_FLAG_OPTIONS: &[&str] = &[
    "lazytime", "nolazytime", "iversion", "noiversion", "mand", "nomand", "loud", "silent",
    "nosymfollow", "symfollow",
];

/// Mount options.
///
/// Every mount disktree makes is read-only; `readonly` is only cleared for
/// option parsing tests.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct MountOptions {
    /// Read-only mount.
    pub readonly: bool,
    /// No exec.
    pub noexec: bool,
    /// No suid.
    pub nosuid: bool,
    /// No dev.
    pub nodev: bool,
    /// Do not update access times.
    pub noatime: bool,
    /// Do not update directory access times.
    pub nodiratime: bool,
    /// Relative access time updates.
    pub relatime: bool,
    /// Always update access times.
    pub strictatime: bool,
    /// Synchronous writes.
    pub sync: bool,
    /// Synchronous directory updates.
    pub dirsync: bool,
    /// Filesystem specific options passed as mount data.
    pub data: Vec<String>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self::read_only()
    }
}

impl MountOptions {
    /// Plain read-only mount with no extra options.
    #[must_use]
    pub const fn read_only() -> Self {
        Self {
            readonly: true,
            noexec: false,
            nosuid: false,
            nodev: false,
            noatime: false,
            nodiratime: false,
            relatime: false,
            strictatime: false,
            sync: false,
            dirsync: false,
            data: Vec::new(),
        }
    }

    /// Build read-only options from an fstab style option list.
    ///
    /// Flag options become kernel flags, userspace-only options are dropped
    /// and anything else is handed to the filesystem as data.
    #[must_use]
    pub fn from_fstab<S: AsRef<str>>(options: &[S]) -> Self {
        let mut opts = Self::read_only();
        for option in options {
            let option = option.as_ref().trim();
            match option {
                "" => {}
                "ro" => opts.readonly = true,
                "noexec" => opts.noexec = true,
                "nosuid" => opts.nosuid = true,
                "nodev" => opts.nodev = true,
                "noatime" => opts.noatime = true,
                "nodiratime" => opts.nodiratime = true,
                "relatime" => opts.relatime = true,
                "strictatime" => opts.strictatime = true,
                "sync" => opts.sync = true,
                "dirsync" => opts.dirsync = true,
                "exec" => opts.noexec = false,
                "suid" => opts.nosuid = false,
                "dev" => opts.nodev = false,
                "atime" => opts.noatime = false,
                "diratime" => opts.nodiratime = false,
                "norelatime" => opts.relatime = false,
                "nostrictatime" => opts.strictatime = false,
                "async" => opts.sync = false,
                o if USERSPACE_OPTIONS.contains(&o)
                    || IGNORED_FLAG_OPTIONS.contains(&o)
                    || o.starts_with("x-")
                    || o.starts_with("comment=") =>
                {
                    tracing::trace!(option = o, "Dropping mount option");
                }
                o => {
                    if !opts.data.iter().any(|d| d == o) {
                        opts.data.push(o.to_string());
                    }
                }
            }
        }
        opts
    }

    /// Filesystem data string (comma separated).
    #[must_use]
    pub fn data(&self) -> String {
        self.data.join(",")
    }

    /// Convert to rustix mount flags.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn flags(&self) -> rustix::mount::MountFlags {
        use rustix::mount::MountFlags;

        let mut flags = MountFlags::empty();
        if self.readonly {
            flags |= MountFlags::RDONLY;
        }
        if self.noexec {
            flags |= MountFlags::NOEXEC;
        }
        if self.nosuid {
            flags |= MountFlags::NOSUID;
        }
        if self.nodev {
            flags |= MountFlags::NODEV;
        }
        if self.noatime {
            flags |= MountFlags::NOATIME;
        }
        if self.nodiratime {
            flags |= MountFlags::NODIRATIME;
        }
        if self.relatime {
            flags |= MountFlags::RELATIME;
        }
        if self.strictatime {
            flags |= MountFlags::STRICTATIME;
        }
        if self.sync {
            flags |= MountFlags::SYNCHRONOUS;
        }
        if self.dirsync {
            flags |= MountFlags::DIRSYNC;
        }
        flags
    }
}

#[cfg(target_os = "linux")]
fn syscall_error(op: &str, path: &Path, errno: rustix::io::Errno) -> DisktreeError {
    DisktreeError::Io(std::io::Error::new(
        errno.kind(),
        format!("{op} {}: {errno}", path.display()),
    ))
}

/// Mount a block device read-only.
#[cfg(target_os = "linux")]
pub fn mount(
    device: &Path,
    target: &Path,
    fstype: &str,
    options: &MountOptions,
) -> DisktreeResult<()> {
    tracing::debug!(
        device = %device.display(),
        target = %target.display(),
        fstype,
        ?options,
        "Mounting filesystem"
    );

    let data = std::ffi::CString::new(options.data())
        .map_err(|_| syscall_error("mount", target, rustix::io::Errno::INVAL))?;
    rustix::mount::mount(device, target, fstype, options.flags(), data.as_c_str())
        .map_err(|e| syscall_error("mount", target, e))?;

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn mount(
    _device: &Path,
    _target: &Path,
    _fstype: &str,
    _options: &MountOptions,
) -> DisktreeResult<()> {
    Err(DisktreeError::Unsupported {
        feature: "mount".to_string(),
    })
}

/// Mount table of the calling process.
#[cfg(target_os = "linux")]
const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Undo the octal escapes (`\040` and friends) of a mountinfo field.
#[cfg(target_os = "linux")]
fn unescape_mountinfo(field: &str) -> std::path::PathBuf {
    use std::os::unix::ffi::OsStringExt;

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            if let Some(byte) = field
                .get(i + 1..i + 4)
                .and_then(|octal| u8::from_str_radix(octal, 8).ok())
            {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    std::ffi::OsString::from_vec(out).into()
}

/// Mounts strictly below `top`, with their per-mount options, in table order.
#[cfg(target_os = "linux")]
fn submounts(mountinfo: &str, top: &Path) -> Vec<(std::path::PathBuf, MountOptions)> {
    mountinfo
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace().skip(4);
            let point = unescape_mountinfo(fields.next()?);
            let options: Vec<&str> = fields.next()?.split(',').collect();
            Some((point, MountOptions::from_fstab(&options)))
        })
        .filter(|(point, _)| point != top && point.starts_with(top))
        .collect()
}

/// Bind mount a path and make the bind read-only.
///
/// A bind mount inherits the writability of its source, so the read-only
/// flag has to be applied by a second remount of the bind itself. For a
/// recursive bind every submount is remounted as well, keeping its own
/// flags.
#[cfg(target_os = "linux")]
pub fn bind_mount_readonly(source: &Path, target: &Path, recursive: bool) -> DisktreeResult<()> {
    use rustix::mount::{MountFlags, mount};

    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        recursive,
        "Creating read-only bind mount"
    );

    let mut flags = MountFlags::BIND;
    if recursive {
        flags |= MountFlags::REC;
    }
    mount(source, target, "", flags, c"").map_err(|e| syscall_error("bind", target, e))?;

    if let Err(e) = remount_readonly(target, recursive) {
        // Do not leave a writable bind behind.
        if let Err(undo) = rustix::mount::unmount(target, rustix::mount::UnmountFlags::DETACH) {
            tracing::error!(target = %target.display(), error = %undo, "Failed to undo bind mount");
        }
        return Err(e);
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn remount_readonly(target: &Path, recursive: bool) -> DisktreeResult<()> {
    use rustix::mount::{MountFlags, mount_remount};

    mount_remount(target, MountFlags::BIND | MountFlags::RDONLY, "")
        .map_err(|e| syscall_error("remount read-only", target, e))?;
    if !recursive {
        return Ok(());
    }

    let top = std::fs::canonicalize(target)?;
    let mountinfo = std::fs::read_to_string(MOUNTINFO)?;
    for (point, options) in submounts(&mountinfo, &top) {
        tracing::trace!(mountpoint = %point.display(), "Remounting submount read-only");
        mount_remount(&point, MountFlags::BIND | options.flags(), "")
            .map_err(|e| syscall_error("remount read-only", &point, e))?;
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn bind_mount_readonly(_source: &Path, _target: &Path, _recursive: bool) -> DisktreeResult<()> {
    Err(DisktreeError::Unsupported {
        feature: "bind mounts".to_string(),
    })
}

/// Lazily unmount a filesystem.
#[cfg(target_os = "linux")]
pub fn unmount(target: &Path) -> DisktreeResult<()> {
    use rustix::mount::UnmountFlags;

    tracing::debug!(target = %target.display(), "Unmounting filesystem");

    rustix::mount::unmount(target, UnmountFlags::DETACH)
        .map_err(|e| syscall_error("umount", target, e))?;

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn unmount(_target: &Path) -> DisktreeResult<()> {
    Err(DisktreeError::Unsupported {
        feature: "unmount".to_string(),
    })
}

/// Create a block special file unless something already exists at `path`.
#[cfg(target_os = "linux")]
pub fn ensure_block_device(path: &Path, major: u32, minor: u32) -> DisktreeResult<()> {
    use rustix::fs::{FileType, Mode, makedev, mknodat};

    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!(device = %path.display(), major, minor, "Creating device node");

    mknodat(
        rustix::fs::CWD,
        path,
        FileType::BlockDevice,
        Mode::from_raw_mode(0o600),
        makedev(major, minor),
    )
    .map_err(|e| syscall_error("mknod", path, e))?;

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn ensure_block_device(_path: &Path, _major: u32, _minor: u32) -> DisktreeResult<()> {
    Err(DisktreeError::Unsupported {
        feature: "device nodes".to_string(),
    })
}
