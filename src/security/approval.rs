//! Human-in-the-loop confirmation before an allowed command runs.
//!
//! Every gate fails closed: when no decision can be obtained the answer is `false`.

use std::io::{self, BufRead, IsTerminal, Write};

use async_trait::async_trait;
use tracing::{info, warn};

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Ask whether `command` may run. Only called for commands the validator allowed.
    async fn confirm(&self, command: &str) -> bool;
}

/// Approves everything. For scripted use (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn confirm(&self, command: &str) -> bool {
        info!(command, approved = true, "auto-approved");
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDeny;

#[async_trait]
impl ApprovalGate for AutoDeny {
    async fn confirm(&self, command: &str) -> bool {
        info!(command, approved = false, "auto-denied");
        false
    }
}

/// Asks on the controlling terminal and waits for an answer or EOF. No deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptApproval;

impl PromptApproval {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ApprovalGate for PromptApproval {
    async fn confirm(&self, command: &str) -> bool {
        if !io::stdin().is_terminal() {
            warn!(command, "no terminal available for approval, denying");
            return false;
        }

        let prompt = format!("Run `{command}`? [y/N] ");
        let answer = tokio::task::spawn_blocking(move || read_answer(&prompt))
            .await
            .ok()
            .flatten();

        let approved = answer.as_deref().is_some_and(parse_answer);
        info!(command, approved, "approval decision");
        approved
    }
}

/// Print `prompt` on stderr and read one line. `None` on EOF or a read error.
fn read_answer(prompt: &str) -> Option<String> {
    let mut stderr = io::stderr().lock();
    if write!(stderr, "{prompt}").and_then(|()| stderr.flush()).is_err() {
        return None;
    }
    drop(stderr);

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}

/// `y` or `yes`, case-insensitive. Anything else is a no.
pub fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
