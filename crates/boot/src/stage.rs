//! Stage sequencing for the bootstrap pipeline.
//!
//! Stages are defined statically, run strictly in declared order, and each
//! runs at most once per pipeline run. A gate decides whether a stage runs
//! or is skipped; the first failure is terminal for the whole pipeline.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;

use crate::config::ConfigStore;
use crate::error::Result;

/// Access the sequencer needs into a pipeline context: gates and required-key
/// checks are evaluated against the authoritative configuration.
pub trait StageContext {
    fn config(&self) -> &ConfigStore;
}

type StageBody<Ctx> = Box<dyn for<'a> FnMut(&'a mut Ctx) -> BoxFuture<'a, Result<()>> + Send>;

/// A named pipeline stage: gate, declared required keys, side-effecting body.
pub struct Stage<Ctx> {
    name: &'static str,
    gate: fn(&ConfigStore) -> bool,
    required_keys: &'static [&'static str],
    body: StageBody<Ctx>,
}

impl<Ctx> Stage<Ctx> {
    /// Create a stage that is always active.
    pub fn new(
        name: &'static str,
        body: impl for<'a> FnMut(&'a mut Ctx) -> BoxFuture<'a, Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            name,
            gate: |_| true,
            required_keys: &[],
            body: Box::new(body),
        }
    }

    /// Set the gate predicate. A false gate skips the body without blocking
    /// subsequent stages.
    pub fn gate(mut self, gate: fn(&ConfigStore) -> bool) -> Self {
        self.gate = gate;
        self
    }

    /// Declare configuration keys that must exist before the body runs.
    /// A missing key fails the stage without running the body.
    pub fn requires(mut self, keys: &'static [&'static str]) -> Self {
        self.required_keys = keys;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Terminal status of a stage after a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    Skipped,
    Failed,
    /// Not reached: an earlier stage failed, or the run was aborted.
    NotRun,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "FAILED",
            Self::NotRun => "not run",
        };
        f.write_str(text)
    }
}

/// Per-stage outcome recorded in the pipeline report.
#[derive(Debug)]
pub struct StageOutcome {
    pub name: &'static str,
    pub status: StageStatus,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
}

/// Result of a full pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub outcomes: Vec<StageOutcome>,
    /// True when the run stopped because the operator requested an abort.
    pub aborted: bool,
}

impl PipelineReport {
    /// The failed stage, if any. At most one stage can fail per run.
    pub fn failed(&self) -> Option<&StageOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.status == StageStatus::Failed)
    }

    /// Full success: nothing failed and the run was not aborted. A pipeline
    /// where every stage was skipped still counts as success.
    pub fn success(&self) -> bool {
        !self.aborted && self.failed().is_none()
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            write!(f, "  {:<24} {}", outcome.name, outcome.status)?;
            if let Some(err) = &outcome.error {
                write!(f, " ({}: {})", outcome.error_kind.unwrap_or("error"), err)?;
            }
            writeln!(f)?;
        }
        if self.aborted {
            writeln!(f, "  pipeline aborted by operator")?;
        }
        Ok(())
    }
}

/// Executes an ordered list of stages against a pipeline context.
pub struct StageSequencer<Ctx> {
    stages: Vec<Stage<Ctx>>,
    abort: Arc<AtomicBool>,
}

impl<Ctx: StageContext> StageSequencer<Ctx> {
    pub fn new(stages: Vec<Stage<Ctx>>) -> Self {
        Self {
            stages,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag an operator-interrupt handler can set. The abort is
    /// honored between stages only, never mid-write of a target file: a
    /// running stage always finishes (or fails) on its own.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Evaluate gates only, without running any body. Used for dry runs.
    pub fn plan(&self, ctx: &Ctx) -> Vec<(&'static str, bool)> {
        self.stages
            .iter()
            .map(|stage| (stage.name, (stage.gate)(ctx.config())))
            .collect()
    }

    /// Run the pipeline to completion, first failure, or abort.
    pub async fn run(&mut self, ctx: &mut Ctx) -> PipelineReport {
        let mut outcomes = Vec::with_capacity(self.stages.len());
        let mut halted = false;
        let mut aborted = false;

        for stage in &mut self.stages {
            if !halted && self.abort.load(Ordering::SeqCst) {
                tracing::warn!("Abort requested, stopping before next stage");
                halted = true;
                aborted = true;
            }

            if halted {
                outcomes.push(StageOutcome {
                    name: stage.name,
                    status: StageStatus::NotRun,
                    error_kind: None,
                    error: None,
                });
                continue;
            }

            if !(stage.gate)(ctx.config()) {
                tracing::info!(stage = stage.name, "Stage gate is false, skipping");
                outcomes.push(StageOutcome {
                    name: stage.name,
                    status: StageStatus::Skipped,
                    error_kind: None,
                    error: None,
                });
                continue;
            }

            // Every declared key must exist before the body runs; absence is
            // a configuration error, not a silent default.
            let precheck = stage
                .required_keys
                .iter()
                .try_for_each(|key| ctx.config().require(key).map(|_| ()));

            let result = match precheck {
                Ok(()) => {
                    tracing::info!(stage = stage.name, "Running stage");
                    (stage.body)(ctx).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    tracing::info!(stage = stage.name, "Stage completed");
                    outcomes.push(StageOutcome {
                        name: stage.name,
                        status: StageStatus::Completed,
                        error_kind: None,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::error!(stage = stage.name, kind = e.kind(), error = %e, "Stage failed");
                    outcomes.push(StageOutcome {
                        name: stage.name,
                        status: StageStatus::Failed,
                        error_kind: Some(e.kind()),
                        error: Some(e.to_string()),
                    });
                    halted = true;
                }
            }
        }

        PipelineReport { outcomes, aborted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BootError;

    struct TestCtx {
        store: ConfigStore,
        executed: Vec<&'static str>,
    }

    impl StageContext for TestCtx {
        fn config(&self) -> &ConfigStore {
            &self.store
        }
    }

    fn ctx() -> TestCtx {
        let mut store = ConfigStore::default();
        store.set("PROOF_ENGINE", "fault");
        TestCtx {
            store,
            executed: Vec::new(),
        }
    }

    fn recording(name: &'static str) -> Stage<TestCtx> {
        Stage::new(name, move |ctx: &mut TestCtx| {
            Box::pin(async move {
                ctx.executed.push(name);
                Ok(())
            })
        })
    }

    fn failing(name: &'static str) -> Stage<TestCtx> {
        Stage::new(name, move |ctx: &mut TestCtx| {
            Box::pin(async move {
                ctx.executed.push(name);
                Err(BootError::Launcher("service exited".to_string()))
            })
        })
    }

    #[tokio::test]
    async fn test_skip_fail_not_run() {
        let stages = vec![
            recording("a").gate(|_| false),
            failing("b"),
            recording("c"),
        ];
        let mut ctx = ctx();
        let mut seq = StageSequencer::new(stages);
        let report = seq.run(&mut ctx).await;

        assert_eq!(report.outcomes[0].status, StageStatus::Skipped);
        assert_eq!(report.outcomes[1].status, StageStatus::Failed);
        assert_eq!(report.outcomes[2].status, StageStatus::NotRun);
        assert_eq!(report.failed().unwrap().name, "b");
        assert!(!report.success());
        // c must never execute.
        assert_eq!(ctx.executed, vec!["b"]);
    }

    #[tokio::test]
    async fn test_all_completed() {
        let mut ctx = ctx();
        let mut seq = StageSequencer::new(vec![recording("a"), recording("b")]);
        let report = seq.run(&mut ctx).await;

        assert!(report.success());
        assert_eq!(ctx.executed, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_all_skipped_is_success() {
        let mut ctx = ctx();
        let mut seq =
            StageSequencer::new(vec![recording("a").gate(|_| false), recording("b").gate(|_| false)]);
        let report = seq.run(&mut ctx).await;

        assert!(report.success());
        assert!(ctx.executed.is_empty());
    }

    #[tokio::test]
    async fn test_gate_reads_configuration() {
        let mut ctx = ctx();
        ctx.store.set("PROOF_ENGINE", "validity");
        let stages = vec![
            recording("anchor-state").gate(|c| c.get("PROOF_ENGINE") == Some("fault")),
            recording("always"),
        ];
        let report = StageSequencer::new(stages).run(&mut ctx).await;

        assert_eq!(report.outcomes[0].status, StageStatus::Skipped);
        assert_eq!(report.outcomes[1].status, StageStatus::Completed);
        assert_eq!(ctx.executed, vec!["always"]);
    }

    #[tokio::test]
    async fn test_missing_required_key_fails_before_body() {
        let mut ctx = ctx();
        let stages = vec![recording("needs-key").requires(&["STARTING_BLOCK_NUMBER"])];
        let report = StageSequencer::new(stages).run(&mut ctx).await;

        let failed = report.failed().unwrap();
        assert_eq!(failed.name, "needs-key");
        assert_eq!(failed.error_kind, Some("KeyNotFoundError"));
        // The body never ran.
        assert!(ctx.executed.is_empty());
    }

    #[tokio::test]
    async fn test_abort_honored_between_stages() {
        let mut ctx = ctx();
        let mut seq = StageSequencer::new(vec![recording("a"), recording("b")]);
        let abort = seq.abort_flag();

        // The flag is checked before every stage, so nothing runs.
        abort.store(true, Ordering::SeqCst);
        let report = seq.run(&mut ctx).await;

        assert!(report.aborted);
        assert!(!report.success());
        assert!(report.outcomes.iter().all(|o| o.status == StageStatus::NotRun));
        assert!(ctx.executed.is_empty());
    }

    #[tokio::test]
    async fn test_plan_evaluates_gates_only() {
        let ctx = ctx();
        let seq = StageSequencer::new(vec![
            recording("a").gate(|_| false),
            recording("b"),
        ]);
        assert_eq!(seq.plan(&ctx), vec![("a", false), ("b", true)]);
    }
}
