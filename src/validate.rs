//! Name/key/ref validation shared by the CLI and the state store.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::OtterError;

static PROJECT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,62}[a-z0-9])?$").unwrap());

static ENV_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

const FORBIDDEN_REF_CHARS: &[char] = &[
    ' ', '\t', '\n', '^', '~', ':', '?', '*', '[', '\\',
];

pub fn project_name(name: &str) -> Result<(), OtterError> {
    if PROJECT_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(OtterError::InvalidProjectName(name.to_string()))
    }
}

pub fn env_key(key: &str) -> Result<(), OtterError> {
    if ENV_KEY_RE.is_match(key) {
        Ok(())
    } else {
        Err(OtterError::InvalidEnvKey(key.to_string()))
    }
}

/// Rejects refs containing space/tab/newline, `..`, or any of
/// `^ ~ : ? * [ \`.
pub fn git_ref(r: &str) -> Result<(), OtterError> {
    if r.is_empty() {
        return Ok(()); // empty resolves to the default branch
    }
    if r.contains("..") || r.chars().any(|c| FORBIDDEN_REF_CHARS.contains(&c)) {
        return Err(OtterError::InvalidGitRef(r.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_boundary_project_names() {
        for bad in ["", "A", "-a", "a-", "a..b", "a/b"] {
            assert!(project_name(bad).is_err(), "expected {bad:?} to be rejected");
        }
        for good in ["a", "a0", "demo", "my-app", "a-b-c"] {
            assert!(project_name(good).is_ok(), "expected {good:?} to be accepted");
        }
    }

    #[test]
    fn rejects_boundary_env_keys() {
        for bad in ["", "1K", "K-X"] {
            assert!(env_key(bad).is_err(), "expected {bad:?} to be rejected");
        }
        for good in ["K", "_K", "DATABASE_URL", "a1"] {
            assert!(env_key(good).is_ok());
        }
    }

    #[test]
    fn rejects_dangerous_refs() {
        for bad in ["a b", "a\tb", "a\nb", "a..b", "a^b", "a~b", "a:b", "a?b", "a*b", "a[b", "a\\b"] {
            assert!(git_ref(bad).is_err(), "expected {bad:?} to be rejected");
        }
        for good in ["", "main", "v1.2.3", "feature/foo", "abcdef0"] {
            assert!(git_ref(good).is_ok());
        }
    }
}
