//! Centralizes the on-disk layout under the data directory: where state,
//! worktrees, env files, and lock files for each project live.

use std::path::{Path, PathBuf};

const DATA_DIR_ENV: &str = "OTTERSTACK_DATA_DIR";

#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
}

impl Paths {
    pub fn resolve() -> anyhow::Result<Self> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(v) => PathBuf::from(v),
            None => dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("could not determine home directory"))?
                .join(".otterstack"),
        };
        Ok(Self { data_dir })
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.repos_dir())?;
        std::fs::create_dir_all(self.worktrees_root())?;
        std::fs::create_dir_all(self.envfiles_dir())?;
        std::fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }

    pub fn state_db(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }

    pub fn repo_path(&self, project: &str) -> PathBuf {
        self.repos_dir().join(project)
    }

    pub fn worktrees_root(&self) -> PathBuf {
        self.data_dir.join("worktrees")
    }

    pub fn worktrees_dir(&self, project: &str) -> PathBuf {
        self.worktrees_root().join(project)
    }

    pub fn worktree_path(&self, project: &str, short_sha: &str) -> PathBuf {
        self.worktrees_dir(project).join(short_sha)
    }

    pub fn envfiles_dir(&self) -> PathBuf {
        self.data_dir.join("envfiles")
    }

    pub fn env_file(&self, project: &str) -> PathBuf {
        self.envfiles_dir().join(format!("{project}.env"))
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    pub fn lock_file(&self, project: &str) -> PathBuf {
        self.locks_dir().join(format!("{project}.lock"))
    }

    pub fn pid_file(&self, project: &str) -> PathBuf {
        self.locks_dir().join(format!("{project}.pid"))
    }
}

/// First 7 hex characters of a resolved commit sha.
pub fn short_sha(sha: &str) -> &str {
    &sha[..7.min(sha.len())]
}

/// `<project>-<sha7>`: a stable, unique compose project name per deployment.
pub fn compose_project_name(project: &str, sha: &str) -> String {
    format!("{project}-{}", short_sha(sha))
}

pub fn is_known_project_dir(path: &Path, known: &[String]) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| known.iter().any(|p| p == name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sha_is_first_seven_chars() {
        let sha = "abcdef0123456789abcdef0123456789abcdef01";
        assert_eq!(short_sha(sha), "abcdef0");
    }

    #[test]
    fn compose_project_name_is_name_dash_short_sha() {
        let sha = "abcdef0123456789abcdef0123456789abcdef01";
        assert_eq!(compose_project_name("demo", sha), "demo-abcdef0");
    }
}
