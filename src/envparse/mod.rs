//! Env-Var Interpolation Parser (C5): scans a compose file's raw text for
//! `${VAR...}` references without interpreting the YAML, since interpolation
//! syntax lives inside scalar values a structural YAML parser would already
//! have collapsed. Hand-written regex tokenizer rather than a templating
//! crate's `${{ }}` dialect, since compose uses bash-style single-brace
//! syntax (`${VAR:-default}`), not double-brace templating.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

/// One reference to an environment variable found in the compose file,
/// merged across every place it appears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVarReference {
    pub key: String,
    pub is_required: bool,
    pub default: Option<String>,
    pub required_message: Option<String>,
    pub services: Vec<String>,
}

// Matches $VAR, ${VAR}, ${VAR:-default}, ${VAR-default}, ${VAR:?msg}, ${VAR?msg}.
// `$$` (literal dollar escape) is excluded by the negative lookbehind-free
// trick of requiring the preceding char not be `$`, checked by the caller.
static VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:?[-?])([^}]*)\}|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)",
    )
    .unwrap()
});

// Heuristic fallback for service name extraction when the file doesn't
// parse as structural YAML at all: a top-level-under-`services:` key looks
// like two spaces of indent followed by `name:`.
static SERVICE_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^  ([\w.-]+):\s*$").unwrap());

/// Parses every `${...}` reference out of `content`, attributing each to
/// the service block(s) it appeared under, and merges duplicate keys.
pub fn parse(content: &str) -> Vec<EnvVarReference> {
    let services = service_regions(content);
    let mut merged: BTreeMap<String, EnvVarReference> = BTreeMap::new();

    for (line_no, line) in content.lines().enumerate() {
        for occurrence in find_unescaped(line) {
            let service_owner = services
                .iter()
                .find(|(_, range)| range.contains(&line_no))
                .map(|(name, _)| name.clone());

            let entry = merged
                .entry(occurrence.key.clone())
                .or_insert_with(|| EnvVarReference {
                    key: occurrence.key.clone(),
                    is_required: false,
                    default: None,
                    required_message: None,
                    services: Vec::new(),
                });

            if occurrence.is_required {
                entry.is_required = true;
                if entry.required_message.is_none() || occurrence.message.is_some() {
                    entry.required_message = occurrence.message.clone();
                }
            }
            if let Some(d) = &occurrence.default {
                // Longest default wins when the same var shows up with
                // different fallbacks across services.
                if entry.default.as_ref().map(|e| e.len()).unwrap_or(0) < d.len() {
                    entry.default = Some(d.clone());
                }
            }
            if let Some(svc) = service_owner {
                if !entry.services.contains(&svc) {
                    entry.services.push(svc);
                }
            }
        }
    }

    let mut out: Vec<EnvVarReference> = merged.into_values().collect();
    for v in &mut out {
        v.services.sort();
    }
    out
}

struct Occurrence {
    key: String,
    is_required: bool,
    default: Option<String>,
    message: Option<String>,
}

fn find_unescaped(line: &str) -> Vec<Occurrence> {
    let mut out = Vec::new();
    for cap in VAR_RE.captures_iter(line) {
        let whole = cap.get(0).unwrap();
        // `$$VAR` is a literal-dollar escape in compose, not a reference.
        if whole.start() > 0 && line.as_bytes()[whole.start() - 1] == b'$' {
            continue;
        }
        if let (Some(key), Some(op), body) = (cap.get(1), cap.get(2), cap.get(3)) {
            let op = op.as_str();
            let body = body.map(|m| m.as_str()).unwrap_or("");
            let is_required = op.ends_with('?');
            out.push(Occurrence {
                key: key.as_str().to_string(),
                is_required,
                default: (!is_required && !body.is_empty()).then(|| body.to_string()),
                message: (is_required && !body.is_empty()).then(|| body.to_string()),
            });
        } else if let Some(key) = cap.get(4).or_else(|| cap.get(5)) {
            // Bare `${VAR}`/`$VAR`: no default, no explicit marker, so it's
            // required.
            out.push(Occurrence {
                key: key.as_str().to_string(),
                is_required: true,
                default: None,
                message: None,
            });
        }
    }
    out
}

/// Line ranges owned by each top-level service, keyed by service name.
/// Tries structural YAML first; falls back to the indentation heuristic
/// documented for callers that ship YAML this parser doesn't fully
/// understand (anchors, merge keys, etc.) — consulted only for names, never
/// as grounds to reject the file.
fn service_regions(content: &str) -> Vec<(String, std::ops::Range<usize>)> {
    if let Some(names) = service_names_via_yaml(content) {
        return attribute_by_heuristic(content, &names);
    }
    let names: Vec<String> = content
        .lines()
        .filter_map(|l| SERVICE_LINE_RE.captures(l).map(|c| c[1].to_string()))
        .collect();
    attribute_by_heuristic(content, &names)
}

fn service_names_via_yaml(content: &str) -> Option<Vec<String>> {
    let doc: Value = serde_yaml::from_str(content).ok()?;
    let services = doc.get("services")?.as_mapping()?;
    Some(
        services
            .keys()
            .filter_map(|k| k.as_str().map(String::from))
            .collect(),
    )
}

/// Once we know the service names, attribute each line range by scanning
/// for a `  <name>:` header regardless of which path produced the names.
fn attribute_by_heuristic(
    content: &str,
    names: &[String],
) -> Vec<(String, std::ops::Range<usize>)> {
    let lines: Vec<&str> = content.lines().collect();
    let mut starts: Vec<(String, usize)> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = SERVICE_LINE_RE.captures(line) {
            if names.iter().any(|n| n == &caps[1]) {
                starts.push((caps[1].to_string(), i));
            }
        }
    }
    let mut out = Vec::new();
    for (idx, (name, start)) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).map(|(_, s)| *s).unwrap_or(lines.len());
        out.push((name.clone(), *start..end));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_plain_and_default_and_required_forms() {
        let content = "\
services:
  web:
    environment:
      - PORT=${PORT:-8080}
      - DATABASE_URL=${DATABASE_URL:?database url is required}
      - API_KEY=$API_KEY
";
        let refs = parse(content);
        let port = refs.iter().find(|r| r.key == "PORT").unwrap();
        assert_eq!(port.default.as_deref(), Some("8080"));
        assert!(!port.is_required);
        assert_eq!(port.services, vec!["web".to_string()]);

        let db = refs.iter().find(|r| r.key == "DATABASE_URL").unwrap();
        assert!(db.is_required);
        assert_eq!(db.required_message.as_deref(), Some("database url is required"));

        let key = refs.iter().find(|r| r.key == "API_KEY").unwrap();
        assert!(key.is_required);
        assert_eq!(key.default, None);
    }

    #[test]
    fn escaped_dollar_is_not_a_reference() {
        let content = "services:\n  web:\n    environment:\n      - LITERAL=$$NOT_A_VAR\n";
        let refs = parse(content);
        assert!(refs.is_empty());
    }

    #[test]
    fn merges_same_key_across_services_with_longest_default() {
        let content = "\
services:
  web:
    environment:
      - TAG=${TAG:-latest}
  worker:
    environment:
      - TAG=${TAG:-v1.0.0-stable}
";
        let refs = parse(content);
        let tag = refs.iter().find(|r| r.key == "TAG").unwrap();
        assert_eq!(tag.default.as_deref(), Some("v1.0.0-stable"));
        assert_eq!(tag.services, vec!["web".to_string(), "worker".to_string()]);
    }
}
