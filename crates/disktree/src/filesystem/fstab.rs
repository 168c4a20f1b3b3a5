//! Filesystem table parsing.

use std::path::{Component, Path};

use disktree_common::{DisktreeError, DisktreeResult};
use serde::Serialize;

/// Location of the filesystem table inside a tree.
pub const FSTAB_PATH: &str = "etc/fstab";

/// One uncommented line of an fstab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FstabEntry {
    /// Upper-cased value of the source field after `=`.
    pub uuid: String,
    /// Where the filesystem is mounted.
    pub mountpoint: String,
    /// Filesystem type.
    pub fstype: String,
    /// Comma separated options, split.
    pub options: Vec<String>,
}

impl FstabEntry {
    /// Parse a single non-comment line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line has fewer than three fields.
    pub fn parse_line(line: &str) -> DisktreeResult<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(DisktreeError::MalformedOutput {
                what: "fstab",
                message: format!("expected at least 3 fields in '{}'", line.trim()),
            });
        }

        let source = fields[0];
        let uuid = source
            .split_once('=')
            .map_or(source, |(_, value)| value)
            .trim_matches('"')
            .to_uppercase();
        let options = fields
            .get(3)
            .map_or_else(|| vec!["defaults".to_string()], |o| {
                o.split(',').map(str::to_string).collect()
            });

        Ok(Self {
            uuid,
            mountpoint: fields[1].to_string(),
            fstype: fields[2].to_string(),
            options,
        })
    }

    /// Whether this entry describes something that can be mounted into the tree.
    #[must_use]
    pub fn is_mountable(&self) -> bool {
        self.fstype != "swap" && self.mountpoint.starts_with('/')
    }

    /// Whether the mountpoint climbs out of the tree through `..`.
    #[must_use]
    pub fn escapes_tree(&self) -> bool {
        Path::new(&self.mountpoint)
            .components()
            .any(|c| c == Component::ParentDir)
    }

    /// Whether this is the root filesystem entry.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.mountpoint == "/"
    }
}

/// Parse fstab content, sorted by mountpoint.
///
/// # Errors
///
/// Returns an error if a line is malformed.
pub fn parse_fstab(content: &str) -> DisktreeResult<Vec<FstabEntry>> {
    let mut entries = content
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(FstabEntry::parse_line)
        .collect::<DisktreeResult<Vec<_>>>()?;

    entries.sort_by(|a, b| {
        a.mountpoint
            .cmp(&b.mountpoint)
            .then_with(|| a.uuid.cmp(&b.uuid))
    });
    Ok(entries)
}

/// Read `etc/fstab` from a tree.
///
/// Returns `None` when the file does not exist or has no entries.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn read_fstab(tree: &Path) -> DisktreeResult<Option<Vec<FstabEntry>>> {
    let path = tree.join(FSTAB_PATH);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(tree = %tree.display(), "No fstab in tree");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let entries = parse_fstab(&content)?;
    if entries.is_empty() {
        tracing::debug!(path = %path.display(), "fstab has no entries");
        return Ok(None);
    }
    Ok(Some(entries))
}
