//! OSTree commits and repositories.

use std::path::{Path, PathBuf};

use disktree_common::{DisktreeError, DisktreePaths, DisktreeResult, Invocation};
use serde::{Deserialize, Serialize};

use super::TargetKind;
use crate::config::InspectConfig;
use crate::filesystem::readonly_view;
use crate::host::Host;
use crate::report::Report;
use crate::scope::{Resource, ResourceStack};

/// Repository facts recorded in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeElement {
    /// Repository configuration.
    pub repo: RepoConfig,
    /// Refs present in the repository.
    pub refs: Vec<String>,
}

/// Repository configuration values of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoConfig {
    /// Repository mode (`archive-z2`, `bare`, ...).
    #[serde(rename = "core.mode")]
    pub mode: String,
}

#[derive(Debug, Deserialize)]
struct Compose {
    #[serde(rename = "ref")]
    reference: String,
}

fn ostree<I, S>(repo: &Path, args: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut repo_arg = std::ffi::OsString::from("--repo=");
    repo_arg.push(repo);
    Invocation::new("ostree").args(args).arg(repo_arg)
}

fn run_ostree(host: &dyn Host, invocation: &Invocation) -> DisktreeResult<String> {
    let output = host.run(invocation)?.check(invocation)?;
    Ok(output.stdout.trim().to_string())
}

/// Read the ref a compose built from its `compose.json`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or has no `ref`.
pub fn compose_ref(commit_dir: &Path) -> DisktreeResult<String> {
    let content = std::fs::read_to_string(commit_dir.join("compose.json"))?;
    let compose: Compose =
        serde_json::from_str(&content).map_err(|e| DisktreeError::MalformedOutput {
            what: "compose.json",
            message: e.to_string(),
        })?;
    Ok(compose.reference)
}

/// Collect the `ostree` report element for a repository.
///
/// # Errors
///
/// Returns an error if an `ostree` command fails.
pub fn describe(host: &dyn Host, repo: &Path) -> DisktreeResult<OstreeElement> {
    let mode = run_ostree(host, &ostree(repo, ["config", "get", "core.mode"]))?;
    let refs = run_ostree(host, &ostree(repo, ["refs"]))?
        .lines()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();
    Ok(OstreeElement {
        repo: RepoConfig { mode },
        refs,
    })
}

/// Check out the commit behind a target and return a read-only view of it.
///
/// The checkout's `usr/etc` is bind-mounted read-only over `etc`.
///
/// # Errors
///
/// Returns an error if the repository has no refs, an `ostree` command
/// fails, or a bind mount cannot be made.
pub fn prepare(
    stack: &mut ResourceStack<'_>,
    config: &InspectConfig,
    target: &Path,
    kind: &TargetKind,
    report: &mut Report,
) -> DisktreeResult<PathBuf> {
    let host = stack.host();
    let (repo, reference) = match kind {
        TargetKind::OstreeCommit => (target.join("repo"), Some(compose_ref(target)?)),
        _ => (target.to_path_buf(), None),
    };

    let element = describe(host, &repo)?;
    let reference = match reference.or_else(|| element.refs.first().cloned()) {
        Some(reference) => reference,
        None => {
            return Err(DisktreeError::MalformedOutput {
                what: "ostree refs",
                message: format!("no refs in {}", repo.display()),
            });
        }
    };
    report.add("ostree", serde_json::to_value(&element)?);
    report.add("type", serde_json::Value::from(kind.to_string()));

    let commit = run_ostree(host, &ostree(&repo, ["rev-parse", reference.as_str()]))?;
    let dir = stack.scratch_dir(config.scratch(), DisktreePaths::extract_prefix())?;
    let tree = dir.join("tree");
    run_ostree(
        host,
        &ostree(&repo, ["checkout", "--force-copy", commit.as_str()]).arg(&tree),
    )?;
    tracing::info!(reference = %reference, commit = %commit, "Checked out OSTree commit");

    let usr_etc = tree.join("usr/etc");
    let etc = tree.join("etc");
    if usr_etc.is_dir() {
        // Commits ship configuration only under usr/etc.
        std::fs::create_dir_all(&etc)?;
        host.bind_readonly(&usr_etc, &etc, false)?;
        stack.push(Resource::Mount(etc));
    }

    readonly_view(stack, config, &tree)
}
