//! Line-oriented `KEY=VALUE` configuration store.
//!
//! The store owns the authoritative base configuration for a bootstrap run.
//! Downstream service configs are plain env-style files; substitution is
//! line-anchored so comments, ordering and unrelated lines survive verbatim,
//! because the services consume these files as-is.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{BootError, Result};

/// Authoritative base configuration plus write-through access to target files.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: BTreeMap<String, String>,
    /// Path the base set was loaded from, used in error scopes.
    origin: Option<PathBuf>,
    /// When enabled, `set_field` appends a `KEY=VALUE` line instead of
    /// failing if the target file does not declare the key.
    append_on_missing: bool,
}

impl ConfigStore {
    /// Load a base configuration from an env-style file.
    ///
    /// Blank lines and `#` comments are ignored. A leading `export ` on a
    /// line is tolerated (shell-source semantics). Later duplicate keys
    /// override earlier ones.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| BootError::io(path, e))?;

        let mut values = BTreeMap::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = parse_assignment(line).ok_or_else(|| BootError::ConfigParse {
                path: path.to_path_buf(),
                line: idx + 1,
                content: raw.to_string(),
            })?;
            values.insert(key.to_string(), value.to_string());
        }

        tracing::debug!(path = %path.display(), keys = values.len(), "Base configuration loaded");

        Ok(Self {
            values,
            origin: Some(path.to_path_buf()),
            append_on_missing: false,
        })
    }

    /// Allow `set_field` to create missing keys in target files.
    pub fn with_append_on_missing(mut self, enabled: bool) -> Self {
        self.append_on_missing = enabled;
        self
    }

    /// Look up a key in the base set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Look up a key, failing if it is absent. Absence of a referenced key is
    /// a fatal configuration error, never a silent default.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| BootError::KeyNotFound {
            key: key.to_string(),
            scope: self.scope(),
        })
    }

    /// Look up a key and parse it as an unsigned integer.
    pub fn require_u64(&self, key: &str) -> Result<u64> {
        let value = self.require(key)?;
        value.parse().map_err(|_| BootError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "unsigned integer",
        })
    }

    /// Interpret a key as a boolean flag. Missing keys read as `false`;
    /// `1`, `true` and `yes` (case-insensitive) read as `true`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    /// Set a key in the base set (in memory only).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Copy `template` to `target` iff `target` does not exist yet.
    ///
    /// Returns `true` if the target was created. A second call is a no-op:
    /// an existing target is never overwritten.
    pub fn ensure_from_template(
        &self,
        target: impl AsRef<Path>,
        template: impl AsRef<Path>,
    ) -> Result<bool> {
        let (target, template) = (target.as_ref(), template.as_ref());

        if target.exists() {
            tracing::debug!(target = %target.display(), "Target config already exists, keeping it");
            return Ok(false);
        }
        if !template.exists() {
            return Err(BootError::TemplateMissing {
                target: target.to_path_buf(),
                template: template.to_path_buf(),
            });
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BootError::io(parent, e))?;
        }
        std::fs::copy(template, target).map_err(|e| BootError::io(target, e))?;

        tracing::info!(
            target = %target.display(),
            template = %template.display(),
            "Target config created from template"
        );
        Ok(true)
    }

    /// Replace the value of `key` in `target` in place.
    ///
    /// The match is anchored at the start of a line (`KEY=` or `export KEY=`);
    /// every other line, including comments and ordering, is preserved. Fails
    /// with a key-not-found error if the target does not declare the key,
    /// unless append-on-missing is enabled.
    pub fn set_field(&self, target: impl AsRef<Path>, key: &str, value: &str) -> Result<()> {
        let target = target.as_ref();
        let content =
            std::fs::read_to_string(target).map_err(|e| BootError::io(target, e))?;
        let ends_with_newline = content.ends_with('\n');

        let mut replaced = false;
        let mut lines: Vec<String> = content
            .lines()
            .map(|line| {
                if line_declares_key(line, key) {
                    replaced = true;
                    let prefix = if line.trim_start().starts_with("export ") {
                        "export "
                    } else {
                        ""
                    };
                    format!("{prefix}{key}={value}")
                } else {
                    line.to_string()
                }
            })
            .collect();

        if !replaced {
            if !self.append_on_missing {
                return Err(BootError::KeyNotFound {
                    key: key.to_string(),
                    scope: target.display().to_string(),
                });
            }
            lines.push(format!("{key}={value}"));
        }

        let mut updated = lines.join("\n");
        if ends_with_newline || !replaced {
            updated.push('\n');
        }
        std::fs::write(target, updated).map_err(|e| BootError::io(target, e))?;

        tracing::debug!(target = %target.display(), key, value, "Config field substituted");
        Ok(())
    }

    /// Whether a target file declares `key` on its own line.
    pub fn target_declares(target: impl AsRef<Path>, key: &str) -> Result<bool> {
        let target = target.as_ref();
        let content =
            std::fs::read_to_string(target).map_err(|e| BootError::io(target, e))?;
        Ok(content.lines().any(|line| line_declares_key(line, key)))
    }

    fn scope(&self) -> String {
        self.origin
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "base configuration".to_string())
    }
}

/// Parse a `KEY=VALUE` assignment, tolerating a leading `export `.
///
/// Returns `None` for lines that are not assignments or have an empty or
/// whitespace-bearing key.
fn parse_assignment(line: &str) -> Option<(&str, &str)> {
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim_end();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value.trim()))
}

fn line_declares_key(line: &str, key: &str) -> bool {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").unwrap_or(line);
    line.strip_prefix(key)
        .is_some_and(|rest| rest.starts_with('='))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_basic() {
        let dir = TempDir::new("config").unwrap();
        let path = write(
            &dir,
            "devnet.env",
            "# base config\nL2_BLOCK_TIME=2\nexport STARTING_BLOCK_NUMBER=100\n\nPROOF_ENGINE=fault\n",
        );

        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.get("L2_BLOCK_TIME"), Some("2"));
        assert_eq!(store.get("STARTING_BLOCK_NUMBER"), Some("100"));
        assert_eq!(store.get("PROOF_ENGINE"), Some("fault"));
        assert_eq!(store.get("MISSING"), None);
    }

    #[test]
    fn test_load_last_write_wins() {
        let dir = TempDir::new("config").unwrap();
        let path = write(&dir, "devnet.env", "KEY=first\nKEY=second\n");

        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.get("KEY"), Some("second"));
    }

    #[test]
    fn test_load_malformed_line() {
        let dir = TempDir::new("config").unwrap();
        let path = write(&dir, "devnet.env", "GOOD=1\nnot an assignment\n");

        let err = ConfigStore::load(&path).unwrap_err();
        match err {
            BootError::ConfigParse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected ConfigParse, got {other:?}"),
        }
    }

    #[test]
    fn test_require_missing_key_is_fatal() {
        let store = ConfigStore::default();
        let err = store.require("GENESIS_TIME_OVERRIDE").unwrap_err();
        assert_eq!(err.kind(), "KeyNotFoundError");
    }

    #[test]
    fn test_require_u64_rejects_non_integer() {
        let mut store = ConfigStore::default();
        store.set("L2_BLOCK_TIME", "two");
        assert_eq!(
            store.require_u64("L2_BLOCK_TIME").unwrap_err().kind(),
            "InvalidValueError"
        );
    }

    #[test]
    fn test_ensure_from_template_creates_once() {
        let dir = TempDir::new("config").unwrap();
        let template = write(&dir, "node.env.template", "RPC_URL=\n");
        let target = dir.path().join("node.env");

        let store = ConfigStore::default();
        assert!(store.ensure_from_template(&target, &template).unwrap());
        assert!(!store.ensure_from_template(&target, &template).unwrap());
    }

    #[test]
    fn test_ensure_from_template_never_overwrites() {
        let dir = TempDir::new("config").unwrap();
        let template = write(&dir, "node.env.template", "RPC_URL=\n");
        let target = write(&dir, "node.env", "RPC_URL=http://custom:8545\n");

        let store = ConfigStore::default();
        store.ensure_from_template(&target, &template).unwrap();
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "RPC_URL=http://custom:8545\n"
        );
    }

    #[test]
    fn test_ensure_from_template_missing_both() {
        let dir = TempDir::new("config").unwrap();
        let err = ConfigStore::default()
            .ensure_from_template(dir.path().join("a.env"), dir.path().join("a.env.template"))
            .unwrap_err();
        assert_eq!(err.kind(), "TemplateMissingError");
    }

    #[test]
    fn test_set_field_preserves_surrounding_lines() {
        let dir = TempDir::new("config").unwrap();
        let target = write(
            &dir,
            "node.env",
            "# rollup node\nGENESIS_TIME_OVERRIDE=0\nRPC_URL=http://l2:9545\n",
        );

        let store = ConfigStore::default();
        store
            .set_field(&target, "GENESIS_TIME_OVERRIDE", "2000100")
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "# rollup node\nGENESIS_TIME_OVERRIDE=2000100\nRPC_URL=http://l2:9545\n"
        );
    }

    #[test]
    fn test_set_field_is_idempotent() {
        let dir = TempDir::new("config").unwrap();
        let target = write(&dir, "node.env", "A=1\nGENESIS_TIME_OVERRIDE=0\nB=2\n");

        let store = ConfigStore::default();
        store
            .set_field(&target, "GENESIS_TIME_OVERRIDE", "2000100")
            .unwrap();
        let once = std::fs::read_to_string(&target).unwrap();
        store
            .set_field(&target, "GENESIS_TIME_OVERRIDE", "2000100")
            .unwrap();
        let twice = std::fs::read_to_string(&target).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_set_field_keeps_export_prefix() {
        let dir = TempDir::new("config").unwrap();
        let target = write(&dir, "node.env", "export STARTING_BLOCK_NUMBER=0\n");

        let store = ConfigStore::default();
        store
            .set_field(&target, "STARTING_BLOCK_NUMBER", "100")
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "export STARTING_BLOCK_NUMBER=100\n"
        );
    }

    #[test]
    fn test_set_field_rejects_missing_key() {
        let dir = TempDir::new("config").unwrap();
        let target = write(&dir, "node.env", "A=1\n");

        let err = ConfigStore::default()
            .set_field(&target, "MISSING", "x")
            .unwrap_err();
        assert_eq!(err.kind(), "KeyNotFoundError");
        // No silent field creation.
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "A=1\n");
    }

    #[test]
    fn test_set_field_append_on_missing() {
        let dir = TempDir::new("config").unwrap();
        let target = write(&dir, "node.env", "A=1\n");

        let store = ConfigStore::default().with_append_on_missing(true);
        store.set_field(&target, "NEW_KEY", "7").unwrap();
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "A=1\nNEW_KEY=7\n"
        );
    }

    #[test]
    fn test_set_field_does_not_match_key_prefix() {
        let dir = TempDir::new("config").unwrap();
        let target = write(&dir, "node.env", "KEY_LONGER=1\nKEY=2\n");

        ConfigStore::default().set_field(&target, "KEY", "9").unwrap();
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "KEY_LONGER=1\nKEY=9\n"
        );
    }

    #[test]
    fn test_target_declares() {
        let dir = TempDir::new("config").unwrap();
        let target = write(&dir, "node.env", "GENESIS_TIME_OVERRIDE=0\n");

        assert!(ConfigStore::target_declares(&target, "GENESIS_TIME_OVERRIDE").unwrap());
        assert!(!ConfigStore::target_declares(&target, "OTHER").unwrap());
    }

    #[test]
    fn test_flag() {
        let mut store = ConfigStore::default();
        store.set("SKIP_LAUNCH", "true");
        store.set("DETACH", "0");
        assert!(store.flag("SKIP_LAUNCH"));
        assert!(!store.flag("DETACH"));
        assert!(!store.flag("ABSENT"));
    }
}
