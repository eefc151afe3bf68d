//! Compose Driver (C4): shells out to `docker compose`, streaming child
//! output live rather than buffering to a `Vec<u8>` the way a naive
//! `.output()` wrapper would — grounded on the pack's compose wrapper, with
//! its buffered-output call upgraded to a line-streamed one so the
//! orchestrator can show progress during a long `up`/`pull`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::OtterError;
use crate::output::ProgressSink;

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub name: String,
    pub status: String,
    pub health: String,
}

/// One compose invocation context: a working directory, the base compose
/// file, and optional extra files layered on top (used for the routing
/// override), plus the stable project name that isolates this stack.
pub struct ComposeSession {
    pub working_dir: PathBuf,
    pub compose_files: Vec<PathBuf>,
    pub project_name: String,
}

impl ComposeSession {
    pub fn new(working_dir: PathBuf, compose_file: PathBuf, project_name: String) -> Self {
        Self {
            working_dir,
            compose_files: vec![compose_file],
            project_name,
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.project_name.clone()];
        for f in &self.compose_files {
            args.push("-f".to_string());
            args.push(f.to_string_lossy().to_string());
        }
        args
    }

    pub async fn validate(&self, env_file: Option<&Path>) -> Result<(), OtterError> {
        let mut args = self.base_args();
        if let Some(ef) = env_file {
            args.push("--env-file".to_string());
            args.push(ef.to_string_lossy().to_string());
        }
        args.push("config".to_string());
        args.push("--quiet".to_string());

        let out = self.command(&args).output().await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(OtterError::ComposeInvalid {
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            })
        }
    }

    pub async fn pull(
        &self,
        env_file: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> Result<(), OtterError> {
        let mut args = self.base_args();
        if let Some(ef) = env_file {
            args.push("--env-file".to_string());
            args.push(ef.to_string_lossy().to_string());
        }
        args.push("pull".to_string());

        run_streamed(self.command(&args), None, sink)
            .await
            .map_err(OtterError::PullFailed)
    }

    /// Brings the stack up detached, waiting the given timeout for the
    /// `up` invocation itself to finish (not for service health — that is
    /// C7's job). Distinguishes a timed-out deadline from a caller-requested
    /// cancellation.
    pub async fn up(
        &self,
        env_file: Option<&Path>,
        timeout: Duration,
        sink: &dyn ProgressSink,
    ) -> Result<(), OtterError> {
        let mut args = self.base_args();
        if let Some(ef) = env_file {
            args.push("--env-file".to_string());
            args.push(ef.to_string_lossy().to_string());
        }
        args.extend(
            ["up", "--detach", "--remove-orphans"]
                .iter()
                .map(|s| s.to_string()),
        );

        match tokio::time::timeout(timeout, run_streamed(self.command(&args), None, sink)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(OtterError::UpFailed(e)),
            Err(_) => Err(OtterError::ComposeTimeout {
                seconds: timeout.as_secs(),
            }),
        }
    }

    pub async fn down(&self, remove_volumes: bool, grace: Duration) -> Result<(), OtterError> {
        let mut args = self.base_args();
        args.push("down".to_string());
        if remove_volumes {
            args.push("--volumes".to_string());
        }
        args.push("--timeout".to_string());
        args.push(grace.as_secs().to_string());

        let out = self.command(&args).output().await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(OtterError::PredecessorStopFailed(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ))
        }
    }

    pub async fn restart(&self) -> Result<(), OtterError> {
        let mut args = self.base_args();
        args.push("restart".to_string());
        let out = self.command(&args).output().await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(OtterError::UpFailed(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ))
        }
    }

    pub async fn status(&self) -> Result<Vec<ServiceStatus>, OtterError> {
        let mut args = self.base_args();
        args.push("ps".to_string());
        args.push("--format".to_string());
        args.push("json".to_string());

        let out = self.command(&args).output().await?;
        if !out.status.success() {
            return Err(OtterError::UpFailed(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        parse_ps_json(&String::from_utf8_lossy(&out.stdout))
    }

    pub async fn logs(&self, service: Option<&str>, tail: u32) -> Result<String, OtterError> {
        let mut args = self.base_args();
        args.push("logs".to_string());
        args.push("--no-color".to_string());
        args.push("--tail".to_string());
        args.push(tail.to_string());
        if let Some(svc) = service {
            args.push(svc.to_string());
        }
        let out = self.command(&args).output().await?;
        Ok(format!(
            "{}{}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        ))
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose").args(args).current_dir(&self.working_dir);
        cmd
    }
}

/// Stops a compose project identified only by its name, without an
/// associated `ComposeSession` (the reconciler and predecessor-teardown
/// don't necessarily have the original working directory handy).
pub async fn stop_by_name(project_name: &str, grace: Duration) -> Result<(), OtterError> {
    let out = Command::new("docker")
        .args(["compose", "-p", project_name, "down", "--timeout"])
        .arg(grace.as_secs().to_string())
        .output()
        .await?;
    if out.status.success() {
        Ok(())
    } else {
        Err(OtterError::PredecessorStopFailed(
            String::from_utf8_lossy(&out.stderr).trim().to_string(),
        ))
    }
}

/// Enumerates compose project names currently known to the daemon whose
/// name begins with `prefix`.
pub async fn list_running(prefix: &str) -> Result<Vec<String>, OtterError> {
    let out = Command::new("docker")
        .args(["compose", "ls", "--format", "json", "--all"])
        .output()
        .await?;
    if !out.status.success() {
        return Err(OtterError::UpFailed(
            String::from_utf8_lossy(&out.stderr).trim().to_string(),
        ));
    }
    let names = parse_ls_json(&String::from_utf8_lossy(&out.stdout));
    Ok(names.into_iter().filter(|n| n.starts_with(prefix)).collect())
}

fn parse_ls_json(raw: &str) -> Vec<String> {
    #[derive(serde::Deserialize)]
    struct Row {
        #[serde(rename = "Name")]
        name: String,
    }
    serde_json::from_str::<Vec<Row>>(raw)
        .map(|rows| rows.into_iter().map(|r| r.name).collect())
        .unwrap_or_default()
}

fn parse_ps_json(raw: &str) -> Result<Vec<ServiceStatus>, OtterError> {
    #[derive(serde::Deserialize)]
    struct Row {
        #[serde(rename = "Service")]
        service: String,
        // `State` is the short enum token (`running`/`exited`/...); `Status`
        // is the human-readable uptime string ("Up 3 seconds", "Exited
        // (1) 2 minutes ago") the readiness heuristic below matches on.
        #[serde(rename = "Status")]
        status: String,
        #[serde(rename = "Health", default)]
        health: String,
    }

    // `docker compose ps --format json` emits either a JSON array or one
    // object per line depending on version; handle both.
    let rows: Vec<Row> = if let Ok(arr) = serde_json::from_str::<Vec<Row>>(raw) {
        arr
    } else {
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<Row>(l).ok())
            .collect()
    };

    Ok(rows
        .into_iter()
        .map(|r| ServiceStatus {
            name: r.service,
            status: r.status,
            health: r.health,
        })
        .collect())
}

async fn run_streamed(
    mut cmd: Command,
    _unused: Option<()>,
    sink: &dyn ProgressSink,
) -> Result<(), String> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| e.to_string())?;

    let stdout = child.stdout.take().expect("piped");
    let stderr = child.stderr.take().expect("piped");
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();

    loop {
        tokio::select! {
            line = out_lines.next_line() => {
                if let Ok(Some(l)) = line {
                    sink.verbose(&l);
                }
            }
            line = err_lines.next_line() => {
                if let Ok(Some(l)) = line {
                    sink.verbose(&l);
                }
            }
            status = child.wait() => {
                let status = status.map_err(|e| e.to_string())?;
                return if status.success() {
                    Ok(())
                } else {
                    Err(format!("docker compose exited with {status}"))
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ps_json_array_form() {
        let raw = r#"[{"Service":"web","State":"running","Health":"healthy"},
                       {"Service":"worker","State":"exited","Health":""}]"#;
        let rows = parse_ps_json(raw).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "web");
        assert_eq!(rows[0].health, "healthy");
        assert_eq!(rows[1].status, "exited");
    }

    #[test]
    fn parses_ps_json_lines_form() {
        let raw = "{\"Service\":\"web\",\"State\":\"running\",\"Health\":\"\"}\n";
        let rows = parse_ps_json(raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "web");
    }

    #[test]
    fn list_running_filters_by_prefix() {
        let names = vec![
            "demo-abcdef0".to_string(),
            "other-1234567".to_string(),
            "demo-1111111".to_string(),
        ];
        let filtered: Vec<_> = names.into_iter().filter(|n| n.starts_with("demo-")).collect();
        assert_eq!(filtered, vec!["demo-abcdef0", "demo-1111111"]);
    }
}
