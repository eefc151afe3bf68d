//! The durable, transactional record of projects, deployments and env vars
//! (C1). Built on `rusqlite` with a bundled SQLite — a single-file local
//! store fits a single-host tool better than a client/server database.
//!
//! Single-writer discipline: every mutating method takes `&self` but
//! serializes through an internal `Mutex<Connection>`.

mod migrations;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::OtterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKind {
    Local,
    Remote,
}

impl RepoKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RepoKind::Local => "local",
            RepoKind::Remote => "remote",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "remote" => RepoKind::Remote,
            _ => RepoKind::Local,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Cloning,
    Unconfigured,
    Ready,
    CloneFailed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Cloning => "cloning",
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Ready => "ready",
            LifecycleState::CloneFailed => "clone_failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "cloning" => LifecycleState::Cloning,
            "ready" => LifecycleState::Ready,
            "clone_failed" => LifecycleState::CloneFailed,
            _ => LifecycleState::Unconfigured,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    Deploying,
    Active,
    Inactive,
    Failed,
    RolledBack,
    Interrupted,
}

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Active => "active",
            DeploymentStatus::Inactive => "inactive",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
            DeploymentStatus::Interrupted => "interrupted",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "active" => DeploymentStatus::Active,
            "inactive" => DeploymentStatus::Inactive,
            "failed" => DeploymentStatus::Failed,
            "rolled_back" => DeploymentStatus::RolledBack,
            "interrupted" => DeploymentStatus::Interrupted,
            _ => DeploymentStatus::Deploying,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub repo_kind: RepoKind,
    pub repo_url: Option<String>,
    pub repo_path: String,
    pub compose_file: String,
    pub worktree_retention: u32,
    pub routing_enabled: bool,
    pub lifecycle_state: LifecycleState,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn repo_kind_str(&self) -> &'static str {
        self.repo_kind.as_str()
    }

    pub fn lifecycle_state_str(&self) -> &'static str {
        self.lifecycle_state.as_str()
    }
}

pub struct NewProject {
    pub name: String,
    pub repo_kind: RepoKind,
    pub repo_url: Option<String>,
    pub repo_path: String,
    pub compose_file: String,
    pub worktree_retention: u32,
    pub routing_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub id: i64,
    pub project_id: i64,
    pub git_sha: String,
    pub git_ref: String,
    pub worktree_path: String,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

pub struct NewDeployment {
    pub project_id: i64,
    pub git_sha: String,
    pub git_ref: String,
    pub worktree_path: String,
}

pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    pub fn open(path: &std::path::Path) -> Result<Self, OtterError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, OtterError> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- Projects ----------------------------------------------------

    pub fn create_project(&self, new: NewProject) -> Result<Project, OtterError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO projects
                (name, repo_kind, repo_url, repo_path, compose_file,
                 worktree_retention, routing_enabled, lifecycle_state, env_vars, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '{}', ?9)",
            params![
                new.name,
                new.repo_kind.as_str(),
                new.repo_url,
                new.repo_path,
                new.compose_file,
                new.worktree_retention,
                new.routing_enabled,
                LifecycleState::Cloning.as_str(),
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Project {
            id,
            name: new.name,
            repo_kind: new.repo_kind,
            repo_url: new.repo_url,
            repo_path: new.repo_path,
            compose_file: new.compose_file,
            worktree_retention: new.worktree_retention,
            routing_enabled: new.routing_enabled,
            lifecycle_state: LifecycleState::Cloning,
            created_at: now,
        })
    }

    pub fn get_project(&self, name: &str) -> Result<Option<Project>, OtterError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, repo_kind, repo_url, repo_path, compose_file,
                    worktree_retention, routing_enabled, lifecycle_state, created_at
             FROM projects WHERE name = ?1",
            params![name],
            Self::row_to_project,
        )
        .optional()
        .map_err(OtterError::from)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>, OtterError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, repo_kind, repo_url, repo_path, compose_file,
                    worktree_retention, routing_enabled, lifecycle_state, created_at
             FROM projects ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_project)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_project_lifecycle(
        &self,
        name: &str,
        state: LifecycleState,
    ) -> Result<(), OtterError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET lifecycle_state = ?1 WHERE name = ?2",
            params![state.as_str(), name],
        )?;
        Ok(())
    }

    pub fn update_project_retention(&self, name: &str, retention: u32) -> Result<(), OtterError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET worktree_retention = ?1 WHERE name = ?2",
            params![retention, name],
        )?;
        Ok(())
    }

    pub fn delete_project(&self, name: &str) -> Result<(), OtterError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM projects WHERE name = ?1", params![name])?;
        Ok(())
    }

    fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
        let created_at: String = row.get(9)?;
        Ok(Project {
            id: row.get(0)?,
            name: row.get(1)?,
            repo_kind: RepoKind::parse(&row.get::<_, String>(2)?),
            repo_url: row.get(3)?,
            repo_path: row.get(4)?,
            compose_file: row.get(5)?,
            worktree_retention: row.get(6)?,
            routing_enabled: row.get(7)?,
            lifecycle_state: LifecycleState::parse(&row.get::<_, String>(8)?),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    // ---- Env vars ------------------------------------------------------
    // Stored as a single JSON blob on the project row; every mutation is a
    // read-modify-write inside the same transaction so concurrent updates
    // can't clobber each other.

    pub fn get_env_vars(&self, project: &str) -> Result<HashMap<String, String>, OtterError> {
        let conn = self.conn.lock().unwrap();
        let blob: String = conn.query_row(
            "SELECT env_vars FROM projects WHERE name = ?1",
            params![project],
            |r| r.get(0),
        )?;
        Ok(serde_json::from_str(&blob).unwrap_or_default())
    }

    pub fn set_env_vars(
        &self,
        project: &str,
        updates: &HashMap<String, String>,
    ) -> Result<(), OtterError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let blob: String = tx.query_row(
            "SELECT env_vars FROM projects WHERE name = ?1",
            params![project],
            |r| r.get(0),
        )?;
        let mut map: HashMap<String, String> = serde_json::from_str(&blob).unwrap_or_default();
        for (k, v) in updates {
            map.insert(k.clone(), v.clone());
        }
        let new_blob = serde_json::to_string(&map).expect("map serializes");
        tx.execute(
            "UPDATE projects SET env_vars = ?1 WHERE name = ?2",
            params![new_blob, project],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_env_var(&self, project: &str, key: &str) -> Result<(), OtterError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let blob: String = tx.query_row(
            "SELECT env_vars FROM projects WHERE name = ?1",
            params![project],
            |r| r.get(0),
        )?;
        let mut map: HashMap<String, String> = serde_json::from_str(&blob).unwrap_or_default();
        map.remove(key);
        let new_blob = serde_json::to_string(&map).expect("map serializes");
        tx.execute(
            "UPDATE projects SET env_vars = ?1 WHERE name = ?2",
            params![new_blob, project],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ---- Deployments ----------------------------------------------------

    pub fn create_deployment(&self, new: NewDeployment) -> Result<Deployment, OtterError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO deployments
                (project_id, git_sha, git_ref, worktree_path, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.project_id,
                new.git_sha,
                new.git_ref,
                new.worktree_path,
                DeploymentStatus::Deploying.as_str(),
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Deployment {
            id,
            project_id: new.project_id,
            git_sha: new.git_sha,
            git_ref: new.git_ref,
            worktree_path: new.worktree_path,
            status: DeploymentStatus::Deploying,
            started_at: now,
            finished_at: None,
            error_message: None,
        })
    }

    pub fn update_deployment_status(
        &self,
        id: i64,
        status: DeploymentStatus,
        error_message: Option<&str>,
    ) -> Result<(), OtterError> {
        let conn = self.conn.lock().unwrap();
        let finished_at = matches!(
            status,
            DeploymentStatus::Active
                | DeploymentStatus::Failed
                | DeploymentStatus::RolledBack
                | DeploymentStatus::Inactive
        )
        .then(|| Utc::now().to_rfc3339());
        conn.execute(
            "UPDATE deployments SET status = ?1, error_message = ?2, finished_at = COALESCE(?3, finished_at)
             WHERE id = ?4",
            params![status.as_str(), error_message, finished_at, id],
        )?;
        Ok(())
    }

    pub fn get_active_deployment(&self, project_id: i64) -> Result<Option<Deployment>, OtterError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, project_id, git_sha, git_ref, worktree_path, status, started_at, finished_at, error_message
             FROM deployments WHERE project_id = ?1 AND status = 'active'
             ORDER BY started_at DESC LIMIT 1",
            params![project_id],
            Self::row_to_deployment,
        )
        .optional()
        .map_err(OtterError::from)
    }

    /// The newest non-active, non-failed entry older than the current
    /// active one — the default rollback target.
    pub fn get_previous_deployment(&self, project_id: i64) -> Result<Option<Deployment>, OtterError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, project_id, git_sha, git_ref, worktree_path, status, started_at, finished_at, error_message
             FROM deployments
             WHERE project_id = ?1 AND status NOT IN ('active', 'failed', 'deploying')
             ORDER BY started_at DESC LIMIT 1",
            params![project_id],
            Self::row_to_deployment,
        )
        .optional()
        .map_err(OtterError::from)
    }

    pub fn get_deployment_by_sha(
        &self,
        project_id: i64,
        sha: &str,
    ) -> Result<Option<Deployment>, OtterError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, project_id, git_sha, git_ref, worktree_path, status, started_at, finished_at, error_message
             FROM deployments WHERE project_id = ?1 AND git_sha = ?2
             ORDER BY started_at DESC LIMIT 1",
            params![project_id, sha],
            Self::row_to_deployment,
        )
        .optional()
        .map_err(OtterError::from)
    }

    pub fn list_deployments(
        &self,
        project_id: i64,
        limit: u32,
    ) -> Result<Vec<Deployment>, OtterError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, git_sha, git_ref, worktree_path, status, started_at, finished_at, error_message
             FROM deployments WHERE project_id = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![project_id, limit], Self::row_to_deployment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Flips every other `active` deployment for the project to `inactive`.
    pub fn deactivate_previous_deployments(
        &self,
        project_id: i64,
        current_id: i64,
    ) -> Result<(), OtterError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE deployments SET status = 'inactive', finished_at = COALESCE(finished_at, ?1)
             WHERE project_id = ?2 AND status = 'active' AND id != ?3",
            params![Utc::now().to_rfc3339(), project_id, current_id],
        )?;
        Ok(())
    }

    /// Rows in `deploying` or `interrupted`, across all projects.
    pub fn get_interrupted_deployments(&self) -> Result<Vec<Deployment>, OtterError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, git_sha, git_ref, worktree_path, status, started_at, finished_at, error_message
             FROM deployments WHERE status IN ('deploying', 'interrupted') ORDER BY started_at",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_deployment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transitions every row still `deploying` to `interrupted`, stamping a
    /// marker message. Used by the reconciler's step 1. Returns the rows
    /// that were transitioned.
    pub fn interrupt_stale_deployments(&self) -> Result<Vec<Deployment>, OtterError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let stale: Vec<Deployment> = {
            let mut stmt = tx.prepare(
                "SELECT id, project_id, git_sha, git_ref, worktree_path, status, started_at, finished_at, error_message
                 FROM deployments WHERE status = 'deploying'",
            )?;
            stmt.query_map([], Self::row_to_deployment)?
                .collect::<Result<Vec<_>, _>>()?
        };
        for dep in &stale {
            tx.execute(
                "UPDATE deployments SET status = 'interrupted', error_message = ?1, finished_at = ?2
                 WHERE id = ?3",
                params![
                    "process crashed mid-deploy; reconciled",
                    Utc::now().to_rfc3339(),
                    dep.id
                ],
            )?;
        }
        tx.commit()?;
        Ok(stale)
    }

    fn row_to_deployment(row: &rusqlite::Row) -> rusqlite::Result<Deployment> {
        let started_at: String = row.get(6)?;
        let finished_at: Option<String> = row.get(7)?;
        Ok(Deployment {
            id: row.get(0)?,
            project_id: row.get(1)?,
            git_sha: row.get(2)?,
            git_ref: row.get(3)?,
            worktree_path: row.get(4)?,
            status: DeploymentStatus::parse(&row.get::<_, String>(5)?),
            started_at: DateTime::parse_from_rfc3339(&started_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            finished_at: finished_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc)),
            error_message: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_project(store: &StateStore, name: &str) -> Project {
        store
            .create_project(NewProject {
                name: name.to_string(),
                repo_kind: RepoKind::Local,
                repo_url: None,
                repo_path: "/tmp/repo".to_string(),
                compose_file: "docker-compose.yml".to_string(),
                worktree_retention: 3,
                routing_enabled: false,
            })
            .unwrap()
    }

    #[test]
    fn at_most_one_active_deployment_per_project() {
        let store = StateStore::open_in_memory().unwrap();
        let project = mk_project(&store, "demo");

        let d1 = store
            .create_deployment(NewDeployment {
                project_id: project.id,
                git_sha: "a".repeat(40),
                git_ref: String::new(),
                worktree_path: "/tmp/wt1".to_string(),
            })
            .unwrap();
        store
            .update_deployment_status(d1.id, DeploymentStatus::Active, None)
            .unwrap();

        let d2 = store
            .create_deployment(NewDeployment {
                project_id: project.id,
                git_sha: "b".repeat(40),
                git_ref: String::new(),
                worktree_path: "/tmp/wt2".to_string(),
            })
            .unwrap();
        store
            .update_deployment_status(d2.id, DeploymentStatus::Active, None)
            .unwrap();
        store
            .deactivate_previous_deployments(project.id, d2.id)
            .unwrap();

        let active = store.get_active_deployment(project.id).unwrap().unwrap();
        assert_eq!(active.id, d2.id);

        let all = store.list_deployments(project.id, 10).unwrap();
        let active_count = all
            .iter()
            .filter(|d| d.status == DeploymentStatus::Active)
            .count();
        assert_eq!(active_count, 1);
    }

    #[test]
    fn env_vars_read_modify_write_merges() {
        let store = StateStore::open_in_memory().unwrap();
        mk_project(&store, "demo");

        let mut first = HashMap::new();
        first.insert("A".to_string(), "1".to_string());
        store.set_env_vars("demo", &first).unwrap();

        let mut second = HashMap::new();
        second.insert("B".to_string(), "2".to_string());
        store.set_env_vars("demo", &second).unwrap();

        let vars = store.get_env_vars("demo").unwrap();
        assert_eq!(vars.get("A"), Some(&"1".to_string()));
        assert_eq!(vars.get("B"), Some(&"2".to_string()));

        store.delete_env_var("demo", "A").unwrap();
        let vars = store.get_env_vars("demo").unwrap();
        assert!(!vars.contains_key("A"));
    }

    #[test]
    fn interrupt_stale_deployments_transitions_deploying_rows() {
        let store = StateStore::open_in_memory().unwrap();
        let project = mk_project(&store, "demo");
        let d = store
            .create_deployment(NewDeployment {
                project_id: project.id,
                git_sha: "c".repeat(40),
                git_ref: String::new(),
                worktree_path: "/tmp/wt3".to_string(),
            })
            .unwrap();

        let interrupted = store.interrupt_stale_deployments().unwrap();
        assert_eq!(interrupted.len(), 1);
        assert_eq!(interrupted[0].id, d.id);

        let rows = store.list_deployments(project.id, 10).unwrap();
        assert_eq!(rows[0].status, DeploymentStatus::Interrupted);
    }
}
