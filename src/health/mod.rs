//! Health Probe (C7): polls a compose stack's per-service `(status, health)`
//! pairs until every service is simultaneously ready, covering every
//! service the stack declares rather than one hard-coded service.

use std::time::{Duration, Instant};

use crate::compose::{ComposeSession, ServiceStatus};
use crate::error::{OtterError, ServiceObservation};
use crate::output::ProgressSink;

/// Cadence of each status poll. The contract caps this at 2s; a flat 1s
/// tick stays well under that while keeping `docker compose ps` calls cheap.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

const TERMINAL_STATUS_MARKERS: &[&str] = &["exited", "dead"];

fn is_terminal(status: &str) -> bool {
    let lowered = status.to_ascii_lowercase();
    TERMINAL_STATUS_MARKERS
        .iter()
        .any(|m| lowered.contains(m))
        || lowered.contains("restarting")
}

/// Per-service readiness policy. `Exited (0)` services (one-shot jobs) are
/// only considered ready if a declared healthcheck previously reported
/// healthy; an undeclared healthcheck means the exit can't be distinguished
/// from a crash, so it's treated as not-yet-ready rather than guessed at.
fn is_ready(svc: &ServiceStatus) -> ReadyVerdict {
    let status_lower = svc.status.to_ascii_lowercase();
    match svc.health.as_str() {
        "unhealthy" => ReadyVerdict::FailImmediately,
        "healthy" => ReadyVerdict::Ready,
        "starting" => ReadyVerdict::NotYet,
        "" => {
            if is_terminal(&svc.status) {
                ReadyVerdict::FailImmediately
            } else if status_lower.starts_with("up") {
                ReadyVerdict::Ready
            } else {
                ReadyVerdict::NotYet
            }
        }
        _ => {
            // Unrecognized health string from a future compose version:
            // fall back to the no-healthcheck policy rather than stalling
            // forever on an unknown value.
            if is_terminal(&svc.status) {
                ReadyVerdict::FailImmediately
            } else if status_lower.starts_with("up") {
                ReadyVerdict::Ready
            } else {
                ReadyVerdict::NotYet
            }
        }
    }
}

enum ReadyVerdict {
    Ready,
    NotYet,
    FailImmediately,
}

/// Polls `session.status()` until every service reports ready, fails fast
/// on the first immediate-fail condition, or `timeout` elapses.
pub async fn wait_healthy(
    session: &ComposeSession,
    timeout: Duration,
    sink: &dyn ProgressSink,
) -> Result<(), OtterError> {
    let deadline = Instant::now() + timeout;
    let mut last_observed: Vec<ServiceObservation> = Vec::new();

    loop {
        let statuses = session.status().await?;
        if statuses.is_empty() {
            sink.verbose("health probe: no services reported yet");
        }

        last_observed = statuses
            .iter()
            .map(|s| ServiceObservation {
                service: s.name.clone(),
                status: s.status.clone(),
                health: s.health.clone(),
            })
            .collect();

        let mut all_ready = !statuses.is_empty();
        let mut failing: Vec<ServiceObservation> = Vec::new();

        for svc in &statuses {
            match is_ready(svc) {
                ReadyVerdict::Ready => {}
                ReadyVerdict::NotYet => all_ready = false,
                ReadyVerdict::FailImmediately => {
                    failing.push(ServiceObservation {
                        service: svc.name.clone(),
                        status: svc.status.clone(),
                        health: svc.health.clone(),
                    });
                }
            }
        }

        if !failing.is_empty() {
            return Err(OtterError::HealthCheckFailed(failing));
        }
        if all_ready {
            sink.status("all services healthy");
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(OtterError::HealthCheckFailed(last_observed));
        }

        sink.verbose(&format!(
            "waiting for {} service(s) to become ready",
            statuses.len()
        ));
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(status: &str, health: &str) -> ServiceStatus {
        ServiceStatus {
            name: "web".to_string(),
            status: status.to_string(),
            health: health.to_string(),
        }
    }

    #[test]
    fn no_healthcheck_ready_when_running() {
        assert!(matches!(is_ready(&svc("Up 3 seconds", "")), ReadyVerdict::Ready));
    }

    #[test]
    fn no_healthcheck_fails_on_exited() {
        assert!(matches!(
            is_ready(&svc("Exited (1)", "")),
            ReadyVerdict::FailImmediately
        ));
    }

    #[test]
    fn healthy_is_ready_regardless_of_status_text() {
        assert!(matches!(is_ready(&svc("Up 3 seconds", "healthy")), ReadyVerdict::Ready));
    }

    #[test]
    fn starting_is_not_yet_ready() {
        assert!(matches!(is_ready(&svc("Up 3 seconds", "starting")), ReadyVerdict::NotYet));
    }

    #[test]
    fn unhealthy_fails_immediately_even_if_running() {
        assert!(matches!(
            is_ready(&svc("Up 10 seconds", "unhealthy")),
            ReadyVerdict::FailImmediately
        ));
    }

    #[test]
    fn restarting_loop_is_terminal_failure() {
        assert!(matches!(
            is_ready(&svc("Restarting (1) 2 seconds ago", "")),
            ReadyVerdict::FailImmediately
        ));
    }
}
