//! Propagation of a derived value into downstream service configs.
//!
//! Writes to different target files are independent; there is no cross-file
//! transaction. The contract is to report exactly which targets were written
//! and which were not, so the caller can decide whether to abort.

use std::fmt;
use std::path::PathBuf;

use crate::config::ConfigStore;
use crate::error::BootError;

/// A single (file, key) destination for a derived value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationTarget {
    pub path: PathBuf,
    pub key: String,
}

impl PropagationTarget {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for PropagationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.key)
    }
}

/// Outcome of applying a derived value across targets.
#[derive(Debug)]
pub struct PropagationReport {
    pub value: String,
    pub written: Vec<PropagationTarget>,
    pub failed: Vec<(PropagationTarget, BootError)>,
}

impl PropagationReport {
    pub fn all_written(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapse the report into a single error naming every failed target.
    /// Already-written targets stay written.
    pub fn into_result(self) -> crate::error::Result<()> {
        if self.failed.is_empty() {
            return Ok(());
        }
        let detail = self
            .failed
            .iter()
            .map(|(target, err)| format!("{target}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(BootError::Propagation {
            written: self.written.len(),
            failed: self.failed.iter().map(|(t, _)| t.to_string()).collect(),
            detail,
        })
    }
}

/// Write `value` into every target via line-anchored substitution.
///
/// Each target file update is all-or-nothing for that file; a failure on one
/// target does not roll back files already written in this call.
pub fn apply(store: &ConfigStore, value: &str, targets: &[PropagationTarget]) -> PropagationReport {
    let mut written = Vec::new();
    let mut failed = Vec::new();

    for target in targets {
        match store.set_field(&target.path, &target.key, value) {
            Ok(()) => {
                tracing::debug!(target = %target, value, "Derived value propagated");
                written.push(target.clone());
            }
            Err(err) => {
                tracing::warn!(target = %target, error = %err, "Propagation target failed");
                failed.push((target.clone(), err));
            }
        }
    }

    PropagationReport {
        value: value.to_string(),
        written,
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_apply_writes_all_targets() {
        let dir = TempDir::new("propagate").unwrap();
        let a = dir.path().join("node.env");
        let b = dir.path().join("proposer.env");
        std::fs::write(&a, "GENESIS_TIME_OVERRIDE=0\n").unwrap();
        std::fs::write(&b, "X=1\nGENESIS_TIME_OVERRIDE=0\n").unwrap();

        let store = ConfigStore::default();
        let targets = vec![
            PropagationTarget::new(&a, "GENESIS_TIME_OVERRIDE"),
            PropagationTarget::new(&b, "GENESIS_TIME_OVERRIDE"),
        ];
        let report = apply(&store, "2000100", &targets);

        assert!(report.all_written());
        assert_eq!(report.written.len(), 2);
        assert!(
            std::fs::read_to_string(&a)
                .unwrap()
                .contains("GENESIS_TIME_OVERRIDE=2000100")
        );
        assert!(
            std::fs::read_to_string(&b)
                .unwrap()
                .contains("GENESIS_TIME_OVERRIDE=2000100")
        );
    }

    #[test]
    fn test_apply_reports_partial_failure() {
        let dir = TempDir::new("propagate").unwrap();
        let good = dir.path().join("node.env");
        let missing_key = dir.path().join("other.env");
        std::fs::write(&good, "KEY=0\n").unwrap();
        std::fs::write(&missing_key, "UNRELATED=1\n").unwrap();

        let store = ConfigStore::default();
        let targets = vec![
            PropagationTarget::new(&good, "KEY"),
            PropagationTarget::new(&missing_key, "KEY"),
            PropagationTarget::new(dir.path().join("absent.env"), "KEY"),
        ];
        let report = apply(&store, "9", &targets);

        assert_eq!(report.written.len(), 1);
        assert_eq!(report.failed.len(), 2);
        // The successful write is not rolled back.
        assert_eq!(std::fs::read_to_string(&good).unwrap(), "KEY=9\n");
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_empty_report_is_ok() {
        let report = apply(&ConfigStore::default(), "1", &[]);
        assert!(report.into_result().is_ok());
    }
}
