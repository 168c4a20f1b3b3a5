//! Loop device attachment.

use std::path::{Path, PathBuf};

use disktree_common::{DisktreeError, DisktreeResult, Invocation};

use crate::host::Host;
use crate::scope::{Resource, ResourceStack};

/// Attach `size` bytes of `file` starting at `offset` as a read-only loop
/// device, owned by `stack`.
///
/// # Errors
///
/// Returns an error if `losetup` fails or does not report a device.
pub fn attach(
    stack: &mut ResourceStack<'_>,
    file: &Path,
    offset: u64,
    size: u64,
) -> DisktreeResult<PathBuf> {
    let invocation = Invocation::new("losetup")
        .args(["--find", "--show", "--read-only", "--offset"])
        .arg(offset.to_string())
        .arg("--sizelimit")
        .arg(size.to_string())
        .arg(file);
    let output = stack.host().run(&invocation)?.check(&invocation)?;

    let device = output.stdout.trim();
    if device.is_empty() {
        return Err(DisktreeError::MalformedOutput {
            what: "losetup",
            message: "no loop device reported".to_string(),
        });
    }

    let device = PathBuf::from(device);
    stack.push(Resource::LoopDevice(device.clone()));
    tracing::debug!(
        device = %device.display(),
        file = %file.display(),
        offset,
        size,
        "Attached loop device"
    );
    Ok(device)
}

/// Detach a loop device.
///
/// # Errors
///
/// Returns an error if `losetup` fails.
pub fn detach(host: &dyn Host, device: &Path) -> DisktreeResult<()> {
    let invocation = Invocation::new("losetup").arg("--detach").arg(device);
    host.run(&invocation)?.check(&invocation)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    #[test]
    fn attach_is_read_only_and_bounded() {
        let host = FakeHost::new();
        let mut stack = ResourceStack::new(&host);
        let dev = attach(&mut stack, Path::new("/img/disk.raw"), 1_048_576, 4096).unwrap();
        assert_eq!(dev, PathBuf::from("/dev/loop0"));
        assert_eq!(
            host.journal()[0],
            "run losetup --find --show --read-only --offset 1048576 --sizelimit 4096 /img/disk.raw"
        );
        stack.release().unwrap();
        assert!(host.leaks().is_empty());
    }

    #[test]
    fn failed_attach_holds_nothing() {
        let host = FakeHost::new();
        host.fail_on("losetup --find");
        let mut stack = ResourceStack::new(&host);
        let err = attach(&mut stack, Path::new("/img/disk.raw"), 0, 10).unwrap_err();
        assert!(matches!(err, DisktreeError::ToolFailed { .. }));
        assert!(stack.is_empty());
    }

    #[test]
    fn detach_unknown_device_fails() {
        let host = FakeHost::new();
        assert!(detach(&host, Path::new("/dev/loop9")).is_err());
    }
}
