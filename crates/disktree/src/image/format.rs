//! Image container format detection and conversion to raw.

use std::path::{Path, PathBuf};

use disktree_common::{DisktreeError, DisktreePaths, DisktreeResult, Invocation};
use serde::{Deserialize, Serialize};

use crate::config::InspectConfig;
use crate::host::Host;
use crate::scope::ResourceStack;

/// File name of the converted image inside its scratch directory.
const RAW_NAME: &str = "image.raw";

/// Container format of an image, as recorded in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageFormat {
    /// Format name (`raw`, `qcow2`, `vmdk`, ...).
    #[serde(rename = "type")]
    pub format_type: String,
    /// qcow2 compatibility level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compat: Option<String>,
    /// Size of the disk the image represents, in bytes.
    #[serde(skip)]
    pub virtual_size: u64,
}

#[derive(Debug, Deserialize)]
struct QemuImgInfo {
    format: String,
    #[serde(rename = "virtual-size")]
    virtual_size: u64,
    #[serde(rename = "format-specific")]
    format_specific: Option<FormatSpecific>,
}

#[derive(Debug, Deserialize)]
struct FormatSpecific {
    data: Option<FormatData>,
}

#[derive(Debug, Deserialize)]
struct FormatData {
    compat: Option<String>,
}

impl ImageFormat {
    /// Parse `qemu-img info --output=json` output.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not describe an image.
    pub fn parse(json: &str) -> DisktreeResult<Self> {
        let info: QemuImgInfo =
            serde_json::from_str(json).map_err(|e| DisktreeError::MalformedOutput {
                what: "qemu-img info",
                message: e.to_string(),
            })?;

        let compat = if info.format == "qcow2" {
            info.format_specific
                .and_then(|fs| fs.data)
                .and_then(|data| data.compat)
        } else {
            None
        };

        Ok(Self {
            format_type: info.format,
            compat,
            virtual_size: info.virtual_size,
        })
    }

    /// Whether the image can be attached as it is.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.format_type == "raw"
    }
}

/// Detect the container format of `image`.
///
/// # Errors
///
/// Returns an error if `qemu-img info` fails or its output cannot be parsed.
pub fn probe(host: &dyn Host, image: &Path) -> DisktreeResult<ImageFormat> {
    let invocation = Invocation::new("qemu-img")
        .args(["info", "--output=json"])
        .arg(image);
    let output = host.run(&invocation)?.check(&invocation)?;
    let format = ImageFormat::parse(&output.stdout)?;
    tracing::debug!(
        image = %image.display(),
        format = %format.format_type,
        size = format.virtual_size,
        "Detected image format"
    );
    Ok(format)
}

/// A raw image ready for loop attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    /// Path of the raw bytes.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Build the conversion command line.
#[must_use]
pub fn conversion(config: &InspectConfig, source: &Path, target: &Path) -> Invocation {
    let invocation = Invocation::new("qemu-img").args(["convert", "-O", "raw"]);
    let invocation = if config.single_worker_conversion() {
        invocation.args(["-m", "1"])
    } else {
        invocation
    };
    invocation.arg(source).arg(target)
}

/// Produce a raw copy of `image` unless it already is raw.
///
/// The converted copy lives in a scratch directory owned by `stack`.
///
/// # Errors
///
/// Returns an error if the scratch directory cannot be created or the
/// conversion tool fails.
pub fn materialize(
    stack: &mut ResourceStack<'_>,
    config: &InspectConfig,
    image: &Path,
    format: &ImageFormat,
) -> DisktreeResult<RawImage> {
    if format.is_raw() {
        return Ok(RawImage {
            path: image.to_path_buf(),
            size: format.virtual_size,
        });
    }

    let dir = stack.scratch_dir(config.scratch(), DisktreePaths::convert_prefix())?;
    let target = dir.join(RAW_NAME);
    let invocation = conversion(config, image, &target);
    stack.host().run(&invocation)?.check(&invocation)?;

    tracing::info!(
        image = %image.display(),
        from = %format.format_type,
        raw = %target.display(),
        "Converted image to raw"
    );
    Ok(RawImage {
        path: target,
        size: format.virtual_size,
    })
}
