//! Routing Priority Controller (C8): writes a compose override file that
//! attaches a monotonically increasing numeric priority label to every
//! service opted into routing — an additive override, nothing
//! proxy-specific like a domain, TLS cert, or router rule.
//!
//! **Label contract**: a service opts in by carrying
//! `otterstack.routing.enabled: "true"` among its `labels`; the override
//! then sets `otterstack.routing.priority` to the epoch-millisecond value
//! passed in. Proxies read ordering, not magnitude.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::error::OtterError;

pub const ROUTING_ENABLED_LABEL: &str = "otterstack.routing.enabled";
pub const ROUTING_PRIORITY_LABEL: &str = "otterstack.routing.priority";

/// The override's filename, distinct from any override the application's
/// own compose file might already define, so `apply_priority` never
/// clobbers user content.
pub const OVERRIDE_FILENAME: &str = "docker-compose.otterstack-priority.yml";

/// Parses `compose_file`'s services, collects every one carrying the
/// routing-enabled marker label, and writes an additive override at
/// `<worktree_path>/docker-compose.otterstack-priority.yml` setting each to
/// `priority`. Returns the override's path, or `None` if no service opted
/// in (nothing to write; the orchestrator then ups with the base file only).
pub fn apply_priority(
    worktree_path: &Path,
    compose_file: &Path,
    priority: u64,
) -> Result<Option<PathBuf>, OtterError> {
    let raw = std::fs::read_to_string(compose_file)?;
    let doc: Value = serde_yaml::from_str(&raw).map_err(|e| {
        OtterError::ComposeInvalid {
            stderr: format!("could not parse {}: {e}", compose_file.display()),
        }
    })?;

    let routed_services = routing_enabled_services(&doc);
    if routed_services.is_empty() {
        return Ok(None);
    }

    let mut services = serde_yaml::Mapping::new();
    for name in &routed_services {
        let mut labels = serde_yaml::Mapping::new();
        labels.insert(
            Value::String(ROUTING_PRIORITY_LABEL.to_string()),
            Value::String(priority.to_string()),
        );
        let mut labels_block = serde_yaml::Mapping::new();
        labels_block.insert(Value::String("labels".to_string()), Value::Mapping(labels));
        services.insert(Value::String(name.clone()), Value::Mapping(labels_block));
    }

    let mut root = serde_yaml::Mapping::new();
    root.insert(Value::String("services".to_string()), Value::Mapping(services));

    let rendered = serde_yaml::to_string(&Value::Mapping(root)).map_err(|e| {
        OtterError::PriorityApplyFailed(format!("failed to render override: {e}"))
    })?;

    let override_path = worktree_path.join(OVERRIDE_FILENAME);
    let tmp = worktree_path.join(format!(".{OVERRIDE_FILENAME}.tmp"));
    std::fs::write(&tmp, rendered)?;
    std::fs::rename(&tmp, &override_path)?;

    Ok(Some(override_path))
}

/// The current wall-clock monotonic priority value: epoch milliseconds at
/// the moment of application, so the newest deployment always outranks
/// whatever it's replacing.
pub fn epoch_millis_priority() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn routing_enabled_services(doc: &Value) -> Vec<String> {
    let mut out = BTreeMap::new();
    let Some(services) = doc.get("services").and_then(|v| v.as_mapping()) else {
        return Vec::new();
    };
    for (name, svc) in services {
        let Some(name) = name.as_str() else { continue };
        if service_has_routing_marker(svc) {
            out.insert(name.to_string(), ());
        }
    }
    out.into_keys().collect()
}

fn service_has_routing_marker(svc: &Value) -> bool {
    let Some(labels) = svc.get("labels") else {
        return false;
    };
    match labels {
        Value::Mapping(m) => m.iter().any(|(k, v)| {
            k.as_str() == Some(ROUTING_ENABLED_LABEL) && is_truthy(v)
        }),
        Value::Sequence(seq) => seq.iter().any(|item| {
            item.as_str()
                .and_then(|s| s.split_once('='))
                .map(|(k, v)| k == ROUTING_ENABLED_LABEL && is_truthy_str(v))
                .unwrap_or(false)
        }),
        _ => false,
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => is_truthy_str(s),
        _ => false,
    }
}

fn is_truthy_str(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_services_carrying_the_marker_label_mapping_form() {
        let doc: Value = serde_yaml::from_str(
            "services:\n  web:\n    labels:\n      otterstack.routing.enabled: \"true\"\n  worker:\n    image: x\n",
        )
        .unwrap();
        assert_eq!(routing_enabled_services(&doc), vec!["web".to_string()]);
    }

    #[test]
    fn collects_services_carrying_the_marker_label_sequence_form() {
        let doc: Value = serde_yaml::from_str(
            "services:\n  web:\n    labels:\n      - otterstack.routing.enabled=true\n",
        )
        .unwrap();
        assert_eq!(routing_enabled_services(&doc), vec!["web".to_string()]);
    }

    #[test]
    fn services_without_the_marker_are_excluded() {
        let doc: Value = serde_yaml::from_str("services:\n  web:\n    image: x\n").unwrap();
        assert!(routing_enabled_services(&doc).is_empty());
    }

    #[test]
    fn apply_priority_writes_additive_override_only_for_routed_services() {
        let dir = tempfile::tempdir().unwrap();
        let compose = dir.path().join("docker-compose.yml");
        std::fs::write(
            &compose,
            "services:\n  web:\n    image: x\n    labels:\n      otterstack.routing.enabled: \"true\"\n  db:\n    image: postgres\n",
        )
        .unwrap();

        let path = apply_priority(dir.path(), &compose, 1234).unwrap().unwrap();
        let rendered = std::fs::read_to_string(path).unwrap();
        assert!(rendered.contains("web"));
        assert!(!rendered.contains("db:"));
        assert!(rendered.contains("1234"));
    }

    #[test]
    fn apply_priority_returns_none_when_nothing_opted_in() {
        let dir = tempfile::tempdir().unwrap();
        let compose = dir.path().join("docker-compose.yml");
        std::fs::write(&compose, "services:\n  web:\n    image: x\n").unwrap();
        assert!(apply_priority(dir.path(), &compose, 1234).unwrap().is_none());
    }
}
