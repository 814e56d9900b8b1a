// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Shelled-out git effects.
//!
//! This crate specifies only the effects the persistence pipeline needs
//! of its backing store — clone-if-absent, a clean-slate reset/pull, add,
//! commit with an author identity, and push — by invoking the `git`
//! binary as a subprocess. It is not a general-purpose git library.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

/// Commit author identity.
#[derive(Clone, Debug)]
pub struct GitUser {
    /// Display name recorded as the commit author.
    pub friendly_name: String,
    /// Email recorded as the commit author.
    pub email: String,
}

/// Clone `url` into `path` if no repository exists there yet; a no-op
/// otherwise.
pub fn clone_if_absent(path: &Path, url: &str) -> Result<()> {
    if path.join(".git").exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent directory for {}", path.display()))?;
    }
    run_git(
        path.parent().unwrap_or(path),
        &[
            "clone",
            "-q",
            url,
            path.file_name()
                .and_then(|n| n.to_str())
                .context("clone target path has no file name")?,
        ],
    )
    .map(|_| ())
}

/// Discard any local changes and pull the latest from the remote,
/// leaving the working tree in a known-clean state before staging new
/// writes. Transient failures (network, conflicting history) surface as
/// `Err` so the caller can abandon this batch and retry at the next
/// firing.
pub fn hard_reset_and_pull(path: &Path) -> Result<()> {
    run_git(path, &["reset", "--hard", "-q"])?;
    run_git(path, &["clean", "-fd", "-q"])?;
    run_git(path, &["pull", "-q"])?;
    Ok(())
}

/// Stage every change under `path`. Returns `true` if anything is
/// staged.
pub fn stage_all(path: &Path) -> Result<bool> {
    run_git(path, &["add", "-A"])?;
    let status = run_git(path, &["status", "--porcelain=v1"])?;
    Ok(!status.trim().is_empty())
}

/// Record a commit with `message`, authored by `user`. Always creates a
/// revision, even when nothing was staged, so the audit trail preserves
/// successful runs that produced byte-identical output.
pub fn commit(path: &Path, message: &str, user: &GitUser) -> Result<()> {
    run_git(
        path,
        &[
            "-c",
            &format!("user.name={}", user.friendly_name),
            "-c",
            &format!("user.email={}", user.email),
            "commit",
            "--allow-empty",
            "-qm",
            message,
        ],
    )
    .map(|_| ())
}

/// Push the current branch to its upstream remote.
pub fn push(path: &Path) -> Result<()> {
    run_git(path, &["push", "-q"]).map(|_| ())
}

/// Returns the porcelain v1 status output for the repo at `path`.
pub fn git_status(path: &Path) -> Option<String> {
    run_git(path, &["status", "--porcelain=v1"]).ok()
}

fn run_git(path: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .with_context(|| format!("run git {args:?} in {}", path.display()))?;

    if !out.status.success() {
        anyhow::bail!(
            "git {:?} in {} failed (code={:?}): {}",
            args,
            path.display(),
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        );
    }

    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}
