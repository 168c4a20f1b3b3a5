//! Integration tests for the disktree binary.
use assert_cmd::Command;
use predicates::prelude::*;
use std::error::Error;
use tempfile::TempDir;

fn disktree(scratch: &TempDir) -> Result<Command, Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("disktree")?;
    cmd.env("DISKTREE_SCRATCH", scratch.path());
    Ok(cmd)
}

#[test]
fn test_help_lists_commands() -> Result<(), Box<dyn Error>> {
    let scratch = TempDir::new()?;
    disktree(&scratch)?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("classify"));
    Ok(())
}

#[test]
fn test_classify_targets() -> Result<(), Box<dyn Error>> {
    let scratch = TempDir::new()?;
    let dir = TempDir::new()?;

    let tarball = dir.path().join("root.tar.zst");
    std::fs::write(&tarball, b"")?;
    disktree(&scratch)?
        .arg("classify")
        .arg(&tarball)
        .assert()
        .success()
        .stdout("tarball (zstd)\n");

    let image = dir.path().join("disk.qcow2");
    std::fs::write(&image, b"")?;
    disktree(&scratch)?
        .arg("classify")
        .arg(&image)
        .assert()
        .success()
        .stdout("image\n");

    std::fs::create_dir(dir.path().join("refs"))?;
    disktree(&scratch)?
        .arg("classify")
        .arg(dir.path())
        .assert()
        .success()
        .stdout("ostree/repo\n");
    Ok(())
}

#[test]
fn test_missing_target_fails() -> Result<(), Box<dyn Error>> {
    let scratch = TempDir::new()?;
    disktree(&scratch)?
        .args(["classify", "/nonexistent/disk.raw"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Target not found"));
    Ok(())
}

#[test]
fn test_unsupported_compression_fails_without_report() -> Result<(), Box<dyn Error>> {
    let scratch = TempDir::new()?;
    let dir = TempDir::new()?;
    let target = dir.path().join("disk.raw.Z");
    std::fs::write(&target, b"\x1f\x9d")?;

    disktree(&scratch)?
        .arg("inspect")
        .arg(&target)
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("compress"));

    assert_eq!(std::fs::read_dir(scratch.path())?.count(), 0);
    Ok(())
}
