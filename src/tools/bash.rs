use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{BASH_TOOL, Tool, ToolOutcome};
use crate::error::ExecutionError;
use crate::policy::PolicyStore;
use crate::security::{ApprovalGate, CommandRunner, Executor, RunLimits, ValidationVerdict, validate};

/// Shell tool: validate, ask for approval when required, then execute.
pub struct BashTool {
    store: Arc<PolicyStore>,
    gate: Arc<dyn ApprovalGate>,
    runner: Arc<dyn CommandRunner>,
}

impl BashTool {
    pub fn new(store: Arc<PolicyStore>, gate: Arc<dyn ApprovalGate>) -> Self {
        Self::with_runner(store, gate, Arc::new(Executor::default()))
    }

    pub fn with_runner(
        store: Arc<PolicyStore>,
        gate: Arc<dyn ApprovalGate>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self { store, gate, runner }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        BASH_TOOL
    }

    fn validate(&self, command: &str) -> ValidationVerdict {
        validate(command, &self.store.current())
    }

    #[instrument(skip(self), fields(tool = BASH_TOOL))]
    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ToolOutcome, ExecutionError> {
        // One snapshot for the whole call; later mutations do not affect it.
        let policy = self.store.current();

        let verdict = validate(command, &policy);
        if !verdict.allowed {
            return Ok(ToolOutcome::Denied(verdict));
        }

        if policy.require_approval() && !self.gate.confirm(command).await {
            info!(command, "approval denied, not executing");
            return Ok(ToolOutcome::ApprovalDenied);
        }

        let limits = RunLimits {
            timeout: timeout.or(policy.timeout()),
            max_output_bytes: policy.max_output_bytes(),
        };
        let result = self.runner.run(command.trim(), limits).await?;
        Ok(ToolOutcome::Completed(result))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::ToolsConfig;
    use crate::policy::Policy;
    use crate::security::{AutoApprove, AutoDeny, ExecutionResult, VerdictReason};

    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
        last_limits: Mutex<Option<RunLimits>>,
        inner: Executor,
    }

    #[async_trait]
    impl CommandRunner for CountingRunner {
        async fn run(
            &self,
            command: &str,
            limits: RunLimits,
        ) -> Result<ExecutionResult, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_limits.lock().unwrap() = Some(limits);
            CommandRunner::run(&self.inner, command, limits).await
        }
    }

    #[derive(Default)]
    struct CountingGate {
        calls: AtomicUsize,
        answer: bool,
    }

    #[async_trait]
    impl ApprovalGate for CountingGate {
        async fn confirm(&self, _command: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn store(require_approval: bool) -> Arc<PolicyStore> {
        let mut config = ToolsConfig::default();
        config.safety.require_approval = require_approval;
        config.whitelist.commands.push("cat".to_string());
        config.exclude_paths.push("/etc".to_string());
        config.timeout = Some(7);
        config.max_output_bytes = Some(64);
        Arc::new(PolicyStore::in_memory(Policy::from_config(&config).unwrap()))
    }

    fn tool(
        store: Arc<PolicyStore>,
        gate: Arc<dyn ApprovalGate>,
    ) -> (BashTool, Arc<CountingRunner>) {
        let runner = Arc::new(CountingRunner::default());
        (BashTool::with_runner(store, gate, runner.clone()), runner)
    }

    #[tokio::test]
    async fn test_approval_denied_never_executes() {
        let (tool, runner) = tool(store(true), Arc::new(AutoDeny));

        let outcome = tool.execute("echo hi", None).await.unwrap();

        assert_eq!(outcome, ToolOutcome::ApprovalDenied);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_denied_command_skips_gate_and_runner() {
        let gate = Arc::new(CountingGate {
            answer: true,
            ..CountingGate::default()
        });
        let (tool, runner) = tool(store(true), gate.clone());

        let outcome = tool.execute("cat /etc/passwd", None).await.unwrap();

        match outcome {
            ToolOutcome::Denied(verdict) => assert_eq!(verdict.reason, VerdictReason::ExcludedPath),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(gate.calls.load(Ordering::SeqCst), 0);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gate_skipped_when_approval_not_required() {
        let gate = Arc::new(CountingGate::default());
        let (tool, runner) = tool(store(false), gate.clone());

        let outcome = tool.execute("echo hi", None).await.unwrap();

        assert!(matches!(outcome, ToolOutcome::Completed(ref r) if r.output_lossy() == "hi\n"));
        assert_eq!(gate.calls.load(Ordering::SeqCst), 0);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_limits_come_from_policy_unless_overridden() {
        let (tool, runner) = tool(store(true), Arc::new(AutoApprove));

        tool.execute("pwd", None).await.unwrap();
        assert_eq!(
            *runner.last_limits.lock().unwrap(),
            Some(RunLimits {
                timeout: Some(Duration::from_secs(7)),
                max_output_bytes: Some(64),
            })
        );

        tool.execute("pwd", Some(Duration::from_secs(1))).await.unwrap();
        let limits = runner.last_limits.lock().unwrap().unwrap();
        assert_eq!(limits.timeout, Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_disabling_takes_effect_for_next_call() {
        let store = store(false);
        let (tool, runner) = tool(store.clone(), Arc::new(AutoApprove));

        store.set_enabled(false).unwrap();
        let outcome = tool.execute("pwd", None).await.unwrap();

        assert!(matches!(
            outcome,
            ToolOutcome::Denied(ValidationVerdict { reason: VerdictReason::ToolsDisabled, .. })
        ));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }
}
