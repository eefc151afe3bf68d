//! `env set|get|list|unset|load|scan`: read-modify-write a project's env
//! var map in the state store and print it back. Values are stored as
//! plaintext; there is no secrets-at-rest encryption here.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use dialoguer::Input;

use crate::envgate;
use crate::envparse;
use crate::error::OtterError;
use crate::output;
use crate::store::StateStore;
use crate::validate;

pub fn set(store: &StateStore, project: &str, pair: &str) -> Result<()> {
    require_project(store, project)?;
    let (key, value) = pair.split_once('=').context("expected KEY=VALUE")?;
    let key = key.trim();
    validate::env_key(key).map_err(anyhow::Error::from)?;

    let mut updates = HashMap::new();
    updates.insert(key.to_string(), value.to_string());
    store.set_env_vars(project, &updates)?;
    output::success(&format!("set {key} on '{project}'"));
    Ok(())
}

pub fn get(store: &StateStore, project: &str, key: &str) -> Result<()> {
    require_project(store, project)?;
    let vars = store.get_env_vars(project)?;
    match vars.get(key) {
        Some(v) => println!("{v}"),
        None => bail!("'{key}' is not set on '{project}'"),
    }
    Ok(())
}

pub fn list(store: &StateStore, project: &str) -> Result<()> {
    require_project(store, project)?;
    let vars = store.get_env_vars(project)?;
    if vars.is_empty() {
        output::info(&format!("no environment variables set on '{project}'"));
        return Ok(());
    }
    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort();
    output::header(&format!("Environment variables for '{project}'"));
    for k in keys {
        println!("  {k}={}", vars[k]);
    }
    Ok(())
}

pub fn unset(store: &StateStore, project: &str, key: &str) -> Result<()> {
    require_project(store, project)?;
    store.delete_env_var(project, key)?;
    output::success(&format!("removed {key} from '{project}'"));
    Ok(())
}

pub fn load(store: &StateStore, project: &str, file: &std::path::Path) -> Result<()> {
    require_project(store, project)?;
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("could not read {}", file.display()))?;

    let mut updates = HashMap::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .with_context(|| format!("{}:{}: expected KEY=VALUE", file.display(), lineno + 1))?;
        let key = key.trim();
        validate::env_key(key).map_err(anyhow::Error::from)?;
        updates.insert(key.to_string(), value.to_string());
    }

    let count = updates.len();
    store.set_env_vars(project, &updates)?;
    output::success(&format!("loaded {count} variable(s) into '{project}'"));
    Ok(())
}

/// Interactively prompts for every required variable the validation gate
/// currently reports missing, against the project's compose file at its
/// repo path's HEAD.
pub fn scan(store: &StateStore, project: &str) -> Result<()> {
    let p = require_project(store, project)?;
    let compose_path = std::path::Path::new(&p.repo_path).join(&p.compose_file);
    if !compose_path.exists() {
        bail!(OtterError::ComposeFileNotFound { path: compose_path });
    }

    let raw = std::fs::read_to_string(&compose_path)?;
    let refs = envparse::parse(&raw);
    let known = store.get_env_vars(project)?;
    let gate = envgate::validate(&refs, &known);

    if gate.all_present {
        output::success("nothing to fill in; all required variables are set");
        return Ok(());
    }

    output::header(&format!("Filling in missing variables for '{project}'"));
    let mut updates = HashMap::new();
    for r in &gate.missing {
        let prompt = if r.services.is_empty() {
            r.key.clone()
        } else {
            format!("{} (used by: {})", r.key, r.services.join(", "))
        };
        let value: String = Input::new()
            .with_prompt(prompt)
            .interact_text()
            .context("failed to read input")?;
        updates.insert(r.key.clone(), value);
    }

    store.set_env_vars(project, &updates)?;
    output::success(&format!("set {} variable(s) on '{project}'", updates.len()));
    Ok(())
}

fn require_project(store: &StateStore, name: &str) -> Result<crate::store::Project> {
    store
        .get_project(name)?
        .ok_or_else(|| OtterError::UnknownProject(name.to_string()).into())
}
