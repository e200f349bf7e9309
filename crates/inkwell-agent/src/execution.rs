//! Tool execution audit records.
//!
//! One [`ToolExecution`] exists per tool call observed during a run.  Its
//! status only moves forward:
//!
//! ```text
//! pending ──> approved ──> running ──> completed
//!    │                        └──────> error
//!    ├──────> running
//!    ├──────> rejected
//!    └──────> error
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::types::{ToolCall, ToolResult};

/// Lifecycle state of a tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Approved,
    Running,
    Completed,
    Error,
    Rejected,
}

impl ExecutionStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Approved => 1,
            Self::Running => 2,
            Self::Completed | Self::Error | Self::Rejected => 3,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_final(self) -> bool {
        self.rank() == 3
    }

    /// Whether `self -> next` is a forward transition.
    pub fn can_become(self, next: ExecutionStatus) -> bool {
        match (self, next) {
            // Only a pending call can be rejected.
            (Self::Pending, Self::Rejected) => true,
            (_, Self::Rejected) => false,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: Uuid,
    pub tool_call: ToolCall,
    pub status: ExecutionStatus,
    pub result: Option<ToolResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ToolExecution {
    /// A new pending record for `call`.
    pub fn new(call: ToolCall) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            tool_call: call,
            status: ExecutionStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Move to `next`.  Backward or sideways transitions are refused and
    /// logged; returns whether the status changed.
    pub fn transition(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_become(next) {
            tracing::warn!(
                execution = %self.id,
                from = %self.status,
                to = %next,
                "refusing backward tool execution transition"
            );
            return false;
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_final() {
            self.finished_at = Some(now);
        }
        true
    }

    /// Record the result and the matching final status.
    pub fn finish(&mut self, result: ToolResult) -> bool {
        let next = if result.is_error {
            ExecutionStatus::Error
        } else {
            ExecutionStatus::Completed
        };
        let changed = self.transition(next);
        if changed {
            self.result = Some(result);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution() -> ToolExecution {
        ToolExecution::new(ToolCall::new("t1", "get_book", json!({"bookSlug": "b"})))
    }

    #[test]
    fn forward_path() {
        let mut exec = execution();
        assert!(exec.transition(ExecutionStatus::Approved));
        assert!(exec.transition(ExecutionStatus::Running));
        assert!(exec.finish(ToolResult::ok("t1", "# b")));
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.finished_at.is_some());
        assert!(exec.result.is_some());
    }

    #[test]
    fn never_moves_backward() {
        let mut exec = execution();
        exec.transition(ExecutionStatus::Running);
        assert!(!exec.transition(ExecutionStatus::Pending));
        assert!(!exec.transition(ExecutionStatus::Approved));
        assert!(!exec.transition(ExecutionStatus::Rejected));
        assert!(exec.finish(ToolResult::error("t1", "boom")));
        assert_eq!(exec.status, ExecutionStatus::Error);
        assert!(!exec.transition(ExecutionStatus::Completed));
    }

    #[test]
    fn pending_can_be_rejected_or_fail_directly() {
        let mut exec = execution();
        assert!(exec.transition(ExecutionStatus::Rejected));
        assert!(exec.status.is_final());

        let mut exec = execution();
        assert!(exec.transition(ExecutionStatus::Error));
    }
}
