//! Git Worktree Manager (C3): clone, fetch, ref resolution and worktree
//! lifecycle, all delegated to the real `git` binary via `Command` rather
//! than a Git library — grounded on the pack's git-cli wrapper pattern,
//! which shells out for the same reason this tool does: worktrees are a
//! porcelain feature libgit2-style bindings don't expose cleanly.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::OtterError;
use crate::output::ProgressSink;

pub struct GitWorktreeManager;

impl GitWorktreeManager {
    /// `git ls-remote` against `url` without touching disk, so an auth or
    /// network failure surfaces before `clone` has created anything for
    /// the reconciler to later find half-populated.
    pub async fn ls_remote_check(url: &str) -> Result<(), OtterError> {
        let out = Command::new("git")
            .args(["ls-remote", "--exit-code", url, "HEAD"])
            .output()
            .await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(OtterError::GitFailed(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ))
        }
    }

    /// Clones `url` into a temp sibling of `dest` then renames into place,
    /// so a crash mid-clone never leaves a half-populated repo directory
    /// for the reconciler to trip over.
    pub async fn clone(
        url: &str,
        dest: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<(), OtterError> {
        let parent = dest.parent().ok_or_else(|| {
            OtterError::GitFailed(format!("{} has no parent directory", dest.display()))
        })?;
        tokio::fs::create_dir_all(parent).await?;
        let tmp = parent.join(format!(
            ".{}.clone-tmp",
            dest.file_name().and_then(|n| n.to_str()).unwrap_or("repo")
        ));
        if tmp.exists() {
            tokio::fs::remove_dir_all(&tmp).await?;
        }

        let result = run_streamed(
            Command::new("git").args(["clone", "--origin", "origin", url, &tmp.to_string_lossy()]),
            sink,
        )
        .await;

        if let Err(e) = result {
            tokio::fs::remove_dir_all(&tmp).await.ok();
            return Err(OtterError::GitFailed(e));
        }

        tokio::fs::rename(&tmp, dest).await?;
        Ok(())
    }

    /// `git fetch --prune --tags` inside `repo_path`.
    pub async fn fetch(repo_path: &Path, sink: &dyn ProgressSink) -> Result<(), OtterError> {
        run_streamed(
            Command::new("git")
                .arg("-C")
                .arg(repo_path)
                .args(["fetch", "--prune", "--tags", "origin"]),
            sink,
        )
        .await
        .map_err(OtterError::FetchFailed)
    }

    /// Resolves `git_ref` to a full 40-char commit sha. An empty ref
    /// resolves the remote's default branch (`origin/HEAD`).
    pub async fn resolve_ref(repo_path: &Path, git_ref: &str) -> Result<String, OtterError> {
        let target = if git_ref.is_empty() {
            "origin/HEAD".to_string()
        } else if is_probably_sha(git_ref) {
            git_ref.to_string()
        } else {
            format!("origin/{git_ref}")
        };

        let out = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(["rev-parse", "--verify", &format!("{target}^{{commit}}")])
            .output()
            .await?;
        if out.status.success() {
            return Ok(String::from_utf8_lossy(&out.stdout).trim().to_string());
        }

        // Fall back to resolving the bare ref (local branch, tag, or
        // already-local sha) when the `origin/` form didn't exist.
        let out = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(["rev-parse", "--verify", &format!("{git_ref}^{{commit}}")])
            .output()
            .await?;
        if out.status.success() {
            return Ok(String::from_utf8_lossy(&out.stdout).trim().to_string());
        }
        Err(OtterError::ResolveFailed(git_ref.to_string()))
    }

    pub async fn commit_exists(repo_path: &Path, sha: &str) -> Result<bool, OtterError> {
        let out = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(["cat-file", "-e", &format!("{sha}^{{commit}}")])
            .output()
            .await?;
        Ok(out.status.success())
    }

    /// Idempotent: if a worktree already exists at `worktree_path` checked
    /// out to `sha`, returns immediately rather than failing.
    pub async fn create_worktree(
        repo_path: &Path,
        worktree_path: &Path,
        sha: &str,
    ) -> Result<(), OtterError> {
        if worktree_path.join(".git").exists() {
            return Ok(());
        }
        if let Some(parent) = worktree_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let out = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(["worktree", "add", "--detach"])
            .arg(worktree_path)
            .arg(sha)
            .output()
            .await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(OtterError::GitFailed(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ))
        }
    }

    /// Removes a worktree directory and prunes its git metadata. Tolerant
    /// of the directory already being gone (the reconciler calls this on
    /// state it isn't certain is consistent).
    pub async fn remove_worktree(
        repo_path: &Path,
        worktree_path: &Path,
    ) -> Result<(), OtterError> {
        let out = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(["worktree", "remove", "--force"])
            .arg(worktree_path)
            .output()
            .await?;
        if !out.status.success() && worktree_path.exists() {
            // git refused (e.g. metadata already missing); fall back to a
            // plain directory removal so retention cleanup still succeeds.
            tokio::fs::remove_dir_all(worktree_path).await.ok();
        }
        Self::prune(repo_path).await
    }

    pub async fn prune(repo_path: &Path) -> Result<(), OtterError> {
        let out = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(["worktree", "prune"])
            .output()
            .await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(OtterError::GitFailed(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ))
        }
    }

    pub async fn list_worktree_paths(repo_path: &Path) -> Result<Vec<PathBuf>, OtterError> {
        let out = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(["worktree", "list", "--porcelain"])
            .output()
            .await?;
        if !out.status.success() {
            return Err(OtterError::GitFailed(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(stdout
            .lines()
            .filter_map(|l| l.strip_prefix("worktree "))
            .map(PathBuf::from)
            .collect())
    }
}

fn is_probably_sha(s: &str) -> bool {
    s.len() >= 7 && s.chars().all(|c| c.is_ascii_hexdigit())
}

async fn run_streamed(cmd: &mut Command, sink: &dyn ProgressSink) -> Result<(), String> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| e.to_string())?;

    let stdout = child.stdout.take().expect("piped");
    let stderr = child.stderr.take().expect("piped");
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();

    loop {
        tokio::select! {
            line = out_lines.next_line() => {
                match line {
                    Ok(Some(l)) => sink.verbose(&l),
                    Ok(None) => {}
                    Err(_) => {}
                }
            }
            line = err_lines.next_line() => {
                match line {
                    Ok(Some(l)) => sink.verbose(&l),
                    Ok(None) => {}
                    Err(_) => {}
                }
            }
            status = child.wait() => {
                let status = status.map_err(|e| e.to_string())?;
                if status.success() {
                    return Ok(());
                }
                return Err(format!("git exited with {status}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha_detection_requires_hex_and_minimum_length() {
        assert!(is_probably_sha("abcdef0"));
        assert!(is_probably_sha("abcdef0123456789abcdef0123456789abcdef01"));
        assert!(!is_probably_sha("main"));
        assert!(!is_probably_sha("abc"));
        assert!(!is_probably_sha("feature/foo"));
    }
}
