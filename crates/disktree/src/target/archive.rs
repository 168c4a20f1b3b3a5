//! Tarball extraction and decompression into scratch storage.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use disktree_common::{DisktreeError, DisktreePaths, DisktreeResult};

use super::{Compression, strip_compression_suffix};
use crate::config::InspectConfig;
use crate::scope::ResourceStack;

/// Open `path` through the decoder for `compression`.
fn open_decoder(path: &Path, compression: Option<&Compression>) -> DisktreeResult<Box<dyn Read>> {
    let open = || File::open(path);
    let reader: Box<dyn Read> = match compression {
        None => Box::new(open()?),
        Some(Compression::Gzip) => Box::new(flate2::read::GzDecoder::new(open()?)),
        Some(Compression::Xz) => Box::new(xz2::read::XzDecoder::new(open()?)),
        Some(Compression::Bzip2) => Box::new(bzip2::read::BzDecoder::new(open()?)),
        Some(Compression::Zstd) => Box::new(zstd::stream::read::Decoder::new(open()?)?),
        Some(Compression::Unsupported(encoding)) => {
            return Err(DisktreeError::UnsupportedCompression {
                encoding: encoding.clone(),
            });
        }
    };
    Ok(reader)
}

/// Unpack a tarball into a scratch directory and return the tree.
///
/// # Errors
///
/// Returns an error for unsupported compression, or if the archive cannot
/// be read or unpacked.
pub fn unpack(
    stack: &mut ResourceStack<'_>,
    config: &InspectConfig,
    tarball: &Path,
    compression: Option<&Compression>,
) -> DisktreeResult<PathBuf> {
    let reader = open_decoder(tarball, compression)?;
    let dir = stack.scratch_dir(config.scratch(), DisktreePaths::extract_prefix())?;
    let tree = dir.join("tree");
    std::fs::create_dir(&tree)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_unpack_xattrs(true);
    archive.unpack(&tree)?;

    tracing::info!(tarball = %tarball.display(), tree = %tree.display(), "Unpacked tarball");
    Ok(tree)
}

/// Decompress a file into a scratch directory, dropping its compression
/// suffix, and return the decompressed path.
///
/// # Errors
///
/// Returns an error for unsupported compression, or if the file cannot be
/// decompressed.
pub fn decompress(
    stack: &mut ResourceStack<'_>,
    config: &InspectConfig,
    file: &Path,
    compression: &Compression,
) -> DisktreeResult<PathBuf> {
    let mut reader = open_decoder(file, Some(compression))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let dir = stack.scratch_dir(config.scratch(), DisktreePaths::extract_prefix())?;
    let target = dir.join(strip_compression_suffix(&name));
    let mut out = File::create(&target)?;
    let bytes = std::io::copy(&mut reader, &mut out)?;

    tracing::info!(
        file = %file.display(),
        %compression,
        output = %target.display(),
        bytes,
        "Decompressed target"
    );
    Ok(target)
}
