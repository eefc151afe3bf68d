//! Writes the per-project env file: atomic create+rename, `0600`
//! permissions, sorted keys, no trailing-whitespace normalization. The
//! rename-over-the-old-file step keeps a concurrent `docker compose` read
//! from ever seeing a half-written file.

use std::collections::HashMap;
use std::path::Path;

use crate::error::OtterError;

pub fn write(path: &Path, vars: &HashMap<String, String>) -> Result<(), OtterError> {
    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort();

    let mut content = String::new();
    for k in keys {
        content.push_str(k);
        content.push('=');
        content.push_str(&vars[k]);
        content.push('\n');
    }

    let parent = path.parent().ok_or_else(|| {
        OtterError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        ))
    })?;
    std::fs::create_dir_all(parent)?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    set_owner_only_permissions(&tmp)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), OtterError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), OtterError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_sorted_keys_and_atomic_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.env");
        let mut vars = HashMap::new();
        vars.insert("ZEBRA".to_string(), "z".to_string());
        vars.insert("ALPHA".to_string(), "a".to_string());

        write(&path, &vars).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ALPHA=a\nZEBRA=z\n");
        assert!(!path.with_extension("tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.env");
        write(&path, &HashMap::new()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
