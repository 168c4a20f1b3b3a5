//! Inspection target classification and preparation.
//!
//! A target is a directory, an OSTree commit or repository, a tarball, a
//! compressed file or a disk image. Archives are unpacked into scratch
//! storage and dispatched again; everything else ends up as a read-only tree.

pub mod archive;
pub mod ostree;

use std::fmt;
use std::path::{Path, PathBuf};

use disktree_common::{DisktreeError, DisktreeResult};

use crate::config::InspectConfig;
use crate::filesystem::readonly_view;
use crate::image::prepare_image;
use crate::report::Report;
use crate::scope::ResourceStack;

/// Compression encoding of a file, recognised by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compression {
    /// gzip (`.gz`).
    Gzip,
    /// xz (`.xz`).
    Xz,
    /// bzip2 (`.bz2`).
    Bzip2,
    /// Zstandard (`.zst`).
    Zstd,
    /// Recognised but not handled (`compress`, `br`).
    Unsupported(String),
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gzip => write!(f, "gzip"),
            Self::Xz => write!(f, "xz"),
            Self::Bzip2 => write!(f, "bzip2"),
            Self::Zstd => write!(f, "zstd"),
            Self::Unsupported(encoding) => write!(f, "{encoding}"),
        }
    }
}

/// What a target is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// A directory with `compose.json`: the repository lives in `repo/`.
    OstreeCommit,
    /// A directory with `refs/`: an OSTree repository.
    OstreeRepo,
    /// Any other directory.
    Directory,
    /// A tar archive, possibly compressed.
    Tarball(Option<Compression>),
    /// A compressed file of some other kind.
    Compressed(Compression),
    /// Anything else is treated as a disk image.
    Image,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OstreeCommit => write!(f, "ostree/commit"),
            Self::OstreeRepo => write!(f, "ostree/repo"),
            Self::Directory => write!(f, "directory"),
            Self::Tarball(None) => write!(f, "tarball"),
            Self::Tarball(Some(c)) => write!(f, "tarball ({c})"),
            Self::Compressed(c) => write!(f, "compressed ({c})"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// Tar suffixes and the compression they imply.
fn tar_compression_for(name: &str) -> Option<Option<Compression>> {
    [
        (".tar", None),
        (".tar.gz", Some(Compression::Gzip)),
        (".tgz", Some(Compression::Gzip)),
        (".tar.xz", Some(Compression::Xz)),
        (".txz", Some(Compression::Xz)),
        (".tar.bz2", Some(Compression::Bzip2)),
        (".tbz2", Some(Compression::Bzip2)),
        (".tar.zst", Some(Compression::Zstd)),
    ]
    .into_iter()
    .find(|(suffix, _)| name.ends_with(suffix))
    .map(|(_, compression)| compression)
}

/// Compression suffixes and the encodings they name. Case matters: `.Z` is
/// `compress`, `.z` is not recognised.
fn compression_for(name: &str) -> Option<(&'static str, Compression)> {
    [
        (".gz", Compression::Gzip),
        (".xz", Compression::Xz),
        (".bz2", Compression::Bzip2),
        (".zst", Compression::Zstd),
        (".Z", Compression::Unsupported("compress".to_string())),
        (".br", Compression::Unsupported("br".to_string())),
    ]
    .into_iter()
    .find(|(suffix, _)| name.ends_with(suffix))
}

/// Classify a target by cheap checks on the filesystem and its name.
///
/// # Errors
///
/// Returns [`DisktreeError::TargetNotFound`] if the target does not exist.
pub fn classify(target: &Path) -> DisktreeResult<TargetKind> {
    if !target.exists() {
        return Err(DisktreeError::TargetNotFound {
            path: target.to_path_buf(),
        });
    }

    if target.is_dir() {
        if target.join("compose.json").is_file() {
            return Ok(TargetKind::OstreeCommit);
        }
        if target.join("refs").is_dir() {
            return Ok(TargetKind::OstreeRepo);
        }
        return Ok(TargetKind::Directory);
    }

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(compression) = tar_compression_for(&name) {
        return Ok(TargetKind::Tarball(compression));
    }
    if let Some((_, compression)) = compression_for(&name) {
        return Ok(TargetKind::Compressed(compression));
    }
    Ok(TargetKind::Image)
}

/// Strip a recognised compression suffix from a file name.
#[must_use]
pub fn strip_compression_suffix(name: &str) -> &str {
    compression_for(name).map_or(name, |(suffix, _)| &name[..name.len() - suffix.len()])
}

/// A tree ready for readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTree {
    /// Read-only root of the tree.
    pub tree: PathBuf,
    /// Whether the tree is an OSTree checkout.
    pub is_ostree: bool,
}

/// Prepare any target as a read-only tree owned by `stack`.
///
/// # Errors
///
/// Returns the first fatal error of whichever preparation path the target
/// takes.
pub fn prepare(
    stack: &mut ResourceStack<'_>,
    config: &InspectConfig,
    target: &Path,
    report: &mut Report,
) -> DisktreeResult<PreparedTree> {
    let kind = classify(target)?;
    tracing::info!(target = %target.display(), %kind, "Preparing target");

    match kind {
        TargetKind::Directory => Ok(PreparedTree {
            tree: readonly_view(stack, config, target)?,
            is_ostree: false,
        }),
        TargetKind::Tarball(compression) => {
            let dir = archive::unpack(stack, config, target, compression.as_ref())?;
            prepare(stack, config, &dir, report)
        }
        TargetKind::Compressed(compression) => {
            let file = archive::decompress(stack, config, target, &compression)?;
            prepare(stack, config, &file, report)
        }
        TargetKind::OstreeCommit | TargetKind::OstreeRepo => Ok(PreparedTree {
            tree: ostree::prepare(stack, config, target, &kind, report)?,
            is_ostree: true,
        }),
        TargetKind::Image => Ok(PreparedTree {
            tree: prepare_image(stack, config, target, report)?,
            is_ostree: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;
    use crate::scope::scoped;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn classify_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            ("root.tar", TargetKind::Tarball(None)),
            ("root.tar.gz", TargetKind::Tarball(Some(Compression::Gzip))),
            ("root.tgz", TargetKind::Tarball(Some(Compression::Gzip))),
            ("root.tar.xz", TargetKind::Tarball(Some(Compression::Xz))),
            ("root.tar.bz2", TargetKind::Tarball(Some(Compression::Bzip2))),
            ("root.tar.zst", TargetKind::Tarball(Some(Compression::Zstd))),
            ("disk.raw.xz", TargetKind::Compressed(Compression::Xz)),
            ("disk.qcow2.zst", TargetKind::Compressed(Compression::Zstd)),
            (
                "disk.raw.Z",
                TargetKind::Compressed(Compression::Unsupported("compress".into())),
            ),
            (
                "disk.raw.br",
                TargetKind::Compressed(Compression::Unsupported("br".into())),
            ),
            ("disk.qcow2", TargetKind::Image),
            ("disk.raw.z", TargetKind::Image),
        ];
        for (name, expected) in cases {
            let path = touch(dir.path(), name);
            assert_eq!(classify(&path).unwrap(), expected, "{name}");
        }
    }

    #[test]
    fn classify_directories() {
        let commit = tempfile::tempdir().unwrap();
        touch(commit.path(), "compose.json");
        std::fs::create_dir(commit.path().join("refs")).unwrap();
        assert_eq!(classify(commit.path()).unwrap(), TargetKind::OstreeCommit);

        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir(repo.path().join("refs")).unwrap();
        assert_eq!(classify(repo.path()).unwrap(), TargetKind::OstreeRepo);

        let plain = tempfile::tempdir().unwrap();
        assert_eq!(classify(plain.path()).unwrap(), TargetKind::Directory);
    }

    #[test]
    fn missing_target_is_fatal() {
        let err = classify(Path::new("/nonexistent/disk.qcow2")).unwrap_err();
        assert!(matches!(err, DisktreeError::TargetNotFound { .. }));
    }

    #[test]
    fn suffix_stripping() {
        assert_eq!(strip_compression_suffix("disk.raw.xz"), "disk.raw");
        assert_eq!(strip_compression_suffix("disk.qcow2"), "disk.qcow2");
    }

    #[test]
    fn directory_gets_a_read_only_view() {
        let host = FakeHost::new();
        let scratch = tempfile::tempdir().unwrap();
        let config = InspectConfig::default().with_scratch(scratch.path());
        let target = tempfile::tempdir().unwrap();
        let mut report = Report::new();

        let prepared = scoped(&host, |stack| {
            let prepared = prepare(stack, &config, target.path(), &mut report)?;
            let bind = format!("rbind {} {}", target.path().display(), prepared.tree.display());
            assert_eq!(host.journal(), vec![bind]);
            Ok(prepared)
        })
        .unwrap();

        assert!(!prepared.is_ostree);
        assert!(host.leaks().is_empty());
        assert!(report.is_empty());
    }

    #[test]
    fn unsupported_compression_acquires_nothing() {
        let host = FakeHost::new();
        let scratch = tempfile::tempdir().unwrap();
        let config = InspectConfig::default().with_scratch(scratch.path());
        let dir = tempfile::tempdir().unwrap();
        let target = touch(dir.path(), "disk.raw.Z");
        let mut report = Report::new();

        let err = scoped(&host, |stack| prepare(stack, &config, &target, &mut report)).unwrap_err();
        assert!(
            matches!(err, DisktreeError::UnsupportedCompression { encoding } if encoding == "compress")
        );
        assert!(host.journal().is_empty());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}
