//! Tool registry.
//!
//! Tools are looked up by identifier (`"Bash"`) and expose the same
//! validate/execute pair, so new tool types plug in without touching the
//! policy decision logic.

mod bash;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ExecutionError, ToolError};
use crate::policy::PolicyStore;
use crate::security::{ApprovalGate, ExecutionResult, ValidationVerdict};

pub use bash::BashTool;

pub const BASH_TOOL: &str = "Bash";

/// What happened to a command handed to [`Tool::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// The validator refused it; nothing ran.
    Denied(ValidationVerdict),
    /// The approval gate refused it; nothing ran.
    ApprovalDenied,
    /// It ran. Timeouts and non-zero exits are reported in the result.
    Completed(ExecutionResult),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Dry run against the current policy.
    fn validate(&self, command: &str) -> ValidationVerdict;

    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ToolOutcome, ExecutionError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the shell tool wired to `store` and `gate`.
    pub fn with_defaults(store: Arc<PolicyStore>, gate: Arc<dyn ApprovalGate>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BashTool::new(store, gate)));
        registry
    }

    /// Add `tool`, returning any tool it replaced under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        self.tools.insert(tool.name().to_string(), tool)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn validate(&self, name: &str, command: &str) -> Result<ValidationVerdict, ToolError> {
        Ok(self.get(name)?.validate(command))
    }

    pub async fn execute(
        &self,
        name: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self.get(name)?;
        Ok(tool.execute(command, timeout).await?)
    }
}
