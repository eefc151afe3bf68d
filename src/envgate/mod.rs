//! Env-Var Validation Gate (C6): decides whether a deployment may proceed
//! given the references C5 found and the values currently on file, and
//! renders the checklist a human reads when it can't.

use std::collections::HashMap;

use crate::envparse::EnvVarReference;

pub struct GateResult {
    pub all_present: bool,
    pub missing: Vec<EnvVarReference>,
    pub optional: Vec<EnvVarReference>,
}

/// A var is missing when it has no default, is marked required (`:?`/`?`),
/// or has neither and isn't set — i.e. anything without a usable fallback
/// that isn't present in `known_vars`.
pub fn validate(refs: &[EnvVarReference], known_vars: &HashMap<String, String>) -> GateResult {
    let mut missing = Vec::new();
    let mut optional = Vec::new();

    for r in refs {
        let present = known_vars.contains_key(&r.key);
        if present {
            continue;
        }
        if r.default.is_some() && !r.is_required {
            optional.push(r.clone());
        } else {
            missing.push(r.clone());
        }
    }

    GateResult {
        all_present: missing.is_empty(),
        missing,
        optional,
    }
}

/// Renders the fix-path checklist: which vars are missing, which services
/// need them, and the three ways to supply them.
pub fn render_checklist(project: &str, result: &GateResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "✗ {} required environment variable(s) missing for '{project}'\n",
        result.missing.len()
    ));
    for r in &result.missing {
        let services = if r.services.is_empty() {
            "unknown service".to_string()
        } else {
            r.services.join(", ")
        };
        let reason = r
            .required_message
            .as_deref()
            .map(|m| format!(" ({m})"))
            .unwrap_or_default();
        out.push_str(&format!("  - {} [used by: {services}]{reason}\n", r.key));
    }
    if !result.optional.is_empty() {
        out.push_str("! the following have defaults and will use them if unset:\n");
        for r in &result.optional {
            out.push_str(&format!(
                "  - {} (default: {})\n",
                r.key,
                r.default.as_deref().unwrap_or("")
            ));
        }
    }
    out.push_str("fix with one of:\n");
    out.push_str(&format!("  otterstack env set {project} KEY=value\n"));
    out.push_str(&format!("  otterstack env load {project} --file path/to/.env\n"));
    out.push_str("  export KEY=value in the shell running otterstack\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envparse::EnvVarReference;

    fn r(key: &str, required: bool, default: Option<&str>) -> EnvVarReference {
        EnvVarReference {
            key: key.to_string(),
            is_required: required,
            default: default.map(String::from),
            required_message: None,
            services: vec!["web".to_string()],
        }
    }

    #[test]
    fn missing_required_and_defaulted_are_separated() {
        let refs = vec![
            r("DATABASE_URL", true, None),
            r("PORT", false, Some("8080")),
            r("NO_DEFAULT_NO_REQUIRE", false, None),
        ];
        let known = HashMap::new();
        let result = validate(&refs, &known);
        assert!(!result.all_present);
        assert_eq!(result.missing.len(), 2);
        assert_eq!(result.optional.len(), 1);
    }

    #[test]
    fn present_vars_are_satisfied_regardless_of_default() {
        let refs = vec![r("DATABASE_URL", true, None)];
        let mut known = HashMap::new();
        known.insert("DATABASE_URL".to_string(), "postgres://x".to_string());
        let result = validate(&refs, &known);
        assert!(result.all_present);
    }
}
