//! In-memory host for tests.
//!
//! Journals every call, tracks which loop devices, volume groups and mounts
//! are held so leaks can be asserted, and materialises configured file trees
//! into mount targets so fstab discovery works on real directories.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use disktree_common::{DisktreeError, DisktreeResult, Invocation, ToolOutput};

use super::Host;
use crate::filesystem::MountOptions;

#[derive(Default)]
pub(crate) struct FakeHost {
    journal: RefCell<Vec<String>>,
    responses: RefCell<Vec<(String, ToolOutput)>>,
    trees: RefCell<HashMap<PathBuf, Vec<(String, String)>>>,
    heads: RefCell<HashMap<PathBuf, Vec<u8>>>,
    fail_patterns: RefCell<Vec<String>>,
    next_loop: Cell<u32>,
    attached: RefCell<BTreeSet<String>>,
    active: RefCell<BTreeSet<String>>,
    mounted: RefCell<HashMap<PathBuf, Vec<PathBuf>>>,
    mount_options: RefCell<HashMap<PathBuf, MountOptions>>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer any command line containing `pattern` with `output`.
    pub(crate) fn respond(&self, pattern: &str, output: ToolOutput) -> &Self {
        self.responses
            .borrow_mut()
            .push((pattern.to_string(), output));
        self
    }

    /// Files to create when `device` is mounted; a trailing `/` makes a directory.
    pub(crate) fn with_tree(&self, device: &str, files: &[(&str, &str)]) -> &Self {
        self.trees.borrow_mut().insert(
            PathBuf::from(device),
            files
                .iter()
                .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
                .collect(),
        );
        self
    }

    pub(crate) fn with_head(&self, device: &str, bytes: &[u8]) -> &Self {
        self.heads
            .borrow_mut()
            .insert(PathBuf::from(device), bytes.to_vec());
        self
    }

    /// Fail every journaled call containing `pattern`.
    pub(crate) fn fail_on(&self, pattern: &str) -> &Self {
        self.fail_patterns.borrow_mut().push(pattern.to_string());
        self
    }

    pub(crate) fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }

    /// Index of the first journal line starting with `prefix`.
    pub(crate) fn position(&self, prefix: &str) -> Option<usize> {
        self.journal
            .borrow()
            .iter()
            .position(|line| line.starts_with(prefix))
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.journal
            .borrow()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    /// Options the device currently mounted on `target` was mounted with.
    pub(crate) fn options_at(&self, target: &Path) -> Option<MountOptions> {
        self.mount_options.borrow().get(target).cloned()
    }

    pub(crate) fn mark_attached(&self, device: &str) {
        self.attached.borrow_mut().insert(device.to_string());
    }

    pub(crate) fn mark_active(&self, vg: &str) {
        self.active.borrow_mut().insert(vg.to_string());
    }

    pub(crate) fn mark_mounted(&self, target: &str) {
        self.mounted
            .borrow_mut()
            .insert(PathBuf::from(target), Vec::new());
    }

    /// Everything still held: loop devices, active volume groups, mounts.
    pub(crate) fn leaks(&self) -> Vec<String> {
        let mut leaks: Vec<String> = self
            .attached
            .borrow()
            .iter()
            .map(|d| format!("loop {d}"))
            .collect();
        leaks.extend(self.active.borrow().iter().map(|vg| format!("vg {vg}")));
        leaks.extend(
            self.mounted
                .borrow()
                .keys()
                .map(|t| format!("mount {}", t.display())),
        );
        leaks.sort();
        leaks
    }

    fn record(&self, line: String) -> bool {
        let failed = self
            .fail_patterns
            .borrow()
            .iter()
            .any(|p| line.contains(p.as_str()));
        self.journal.borrow_mut().push(line);
        failed
    }

    fn injected(what: &str) -> DisktreeError {
        DisktreeError::Io(std::io::Error::other(format!("injected failure: {what}")))
    }

    fn last_arg(invocation: &Invocation) -> String {
        invocation
            .arguments()
            .last()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn default_output(&self, invocation: &Invocation, line: &str) -> ToolOutput {
        match invocation.program() {
            "losetup" if line.contains("--find") => {
                let n = self.next_loop.get();
                self.next_loop.set(n + 1);
                let dev = format!("/dev/loop{n}");
                self.attached.borrow_mut().insert(dev.clone());
                ToolOutput::ok(format!("{dev}\n"))
            }
            "losetup" if line.contains("--detach") => {
                let dev = Self::last_arg(invocation);
                if self.attached.borrow_mut().remove(&dev) {
                    ToolOutput::ok("")
                } else {
                    ToolOutput::failed(1, format!("losetup: {dev}: detach failed: No such device"))
                }
            }
            "vgchange" => {
                let vg = Self::last_arg(invocation);
                if line.contains("-ay") {
                    self.active.borrow_mut().insert(vg);
                    ToolOutput::ok("")
                } else if self.active.borrow_mut().remove(&vg) {
                    ToolOutput::ok("")
                } else {
                    ToolOutput::failed(5, format!("Volume group \"{vg}\" not found"))
                }
            }
            "ostree" if line.contains(" checkout ") => {
                let tree = invocation
                    .arguments()
                    .iter()
                    .rev()
                    .find(|a| !a.to_string_lossy().starts_with("--"))
                    .map(PathBuf::from)
                    .unwrap_or_default();
                match std::fs::create_dir_all(tree.join("usr/etc")) {
                    Ok(()) => ToolOutput::ok(""),
                    Err(e) => ToolOutput::failed(1, e.to_string()),
                }
            }
            "blkid" => ToolOutput::failed(2, ""),
            "sfdisk" => ToolOutput::failed(
                1,
                "sfdisk: does not contain a recognized partition table",
            ),
            _ => ToolOutput::ok(""),
        }
    }
}

impl Host for FakeHost {
    fn run(&self, invocation: &Invocation) -> DisktreeResult<ToolOutput> {
        let line = invocation.to_string();
        if self.record(format!("run {line}")) {
            return Ok(ToolOutput::failed(1, format!("injected failure: {line}")));
        }

        let canned = self
            .responses
            .borrow()
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, out)| out.clone());

        match canned {
            Some(out) => {
                if invocation.program() == "vgchange" && line.contains("-ay") && out.success() {
                    self.active.borrow_mut().insert(Self::last_arg(invocation));
                }
                if invocation.program() == "losetup" && line.contains("--find") && out.success() {
                    self.attached
                        .borrow_mut()
                        .insert(out.stdout.trim().to_string());
                }
                Ok(out)
            }
            None => Ok(self.default_output(invocation, &line)),
        }
    }

    fn mount(
        &self,
        device: &Path,
        target: &Path,
        _fstype: &str,
        options: &MountOptions,
    ) -> DisktreeResult<()> {
        if self.record(format!("mount {} {}", device.display(), target.display())) {
            return Err(Self::injected("mount"));
        }
        if !target.is_dir() {
            return Err(DisktreeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("mount point {} does not exist", target.display()),
            )));
        }

        let mut created = Vec::new();
        if let Some(files) = self.trees.borrow().get(device) {
            for (rel, content) in files {
                let path = target.join(rel.trim_end_matches('/'));
                if rel.ends_with('/') {
                    std::fs::create_dir_all(&path)?;
                } else {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, content)?;
                }
                if let Some(top) = rel.split('/').next() {
                    let top = target.join(top);
                    if !created.contains(&top) {
                        created.push(top);
                    }
                }
            }
        }
        self.mounted
            .borrow_mut()
            .insert(target.to_path_buf(), created);
        self.mount_options
            .borrow_mut()
            .insert(target.to_path_buf(), options.clone());
        Ok(())
    }

    fn bind_readonly(&self, source: &Path, target: &Path, recursive: bool) -> DisktreeResult<()> {
        let kind = if recursive { "rbind" } else { "bind" };
        if self.record(format!("{kind} {} {}", source.display(), target.display())) {
            return Err(Self::injected("bind"));
        }
        if !source.exists() || !target.is_dir() {
            return Err(DisktreeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot bind {} on {}", source.display(), target.display()),
            )));
        }
        self.mounted
            .borrow_mut()
            .insert(target.to_path_buf(), Vec::new());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> DisktreeResult<()> {
        if self.record(format!("unmount {}", target.display())) {
            return Err(Self::injected("unmount"));
        }
        let created = self.mounted.borrow_mut().remove(target).ok_or_else(|| {
            DisktreeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not mounted", target.display()),
            ))
        })?;
        self.mount_options.borrow_mut().remove(target);
        for path in created.iter().rev() {
            if path.is_dir() {
                std::fs::remove_dir_all(path)?;
            } else if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn ensure_block_device(&self, path: &Path, major: u32, minor: u32) -> DisktreeResult<()> {
        if self.record(format!("mknod {} {major}:{minor}", path.display())) {
            return Err(Self::injected("mknod"));
        }
        Ok(())
    }

    fn read_head(&self, device: &Path, len: usize) -> DisktreeResult<Vec<u8>> {
        if self.record(format!("read {}", device.display())) {
            return Err(Self::injected("read"));
        }
        let mut bytes = self
            .heads
            .borrow()
            .get(device)
            .cloned()
            .unwrap_or_default();
        bytes.truncate(len);
        Ok(bytes)
    }
}
