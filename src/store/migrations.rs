//! Schema migrations. Each migration runs at most once, recorded in
//! `schema_migrations`, mirroring the append-only migration style the
//! pack's other embedded-SQLite tools use.

use rusqlite::Connection;

use crate::error::OtterError;

const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE projects (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            repo_kind TEXT NOT NULL,
            repo_url TEXT,
            repo_path TEXT NOT NULL,
            compose_file TEXT NOT NULL,
            worktree_retention INTEGER NOT NULL DEFAULT 3,
            routing_enabled INTEGER NOT NULL DEFAULT 0,
            lifecycle_state TEXT NOT NULL DEFAULT 'unconfigured',
            env_vars TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );",
    ),
    (
        2,
        "CREATE TABLE deployments (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            git_sha TEXT NOT NULL,
            git_ref TEXT NOT NULL DEFAULT '',
            worktree_path TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            error_message TEXT
        );",
    ),
    (
        3,
        "CREATE INDEX idx_deployments_project_status ON deployments(project_id, status);
         CREATE INDEX idx_deployments_project_started ON deployments(project_id, started_at DESC);
         CREATE INDEX idx_deployments_project_sha ON deployments(project_id, git_sha);",
    ),
];

pub fn run(conn: &Connection) -> Result<(), OtterError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
        [],
    )?;

    for (version, sql) in MIGRATIONS {
        let applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
            [version],
            |r| r.get(0),
        )?;
        if applied {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
        )?;
    }
    Ok(())
}
