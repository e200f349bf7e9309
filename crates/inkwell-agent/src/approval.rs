//! The approval gate.
//!
//! A run that reaches a gated tool call opens the gate and awaits a
//! one-shot decision.  Approve, reject and cancel all race to take the
//! single pending slot: whichever arrives first resolves the wait and the
//! others find the slot empty and do nothing.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::llm::types::ToolCall;
use crate::tools::StoreAccess;

/// What the human decided.
pub enum ApprovalDecision {
    /// Run the call against this store.
    Approved(Arc<dyn StoreAccess>),
    /// Do not run the call; the run ends.
    Rejected(String),
}

impl std::fmt::Debug for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved(_) => f.write_str("Approved"),
            Self::Rejected(reason) => f.debug_tuple("Rejected").field(reason).finish(),
        }
    }
}

/// Read-only view of the call awaiting a decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingApproval {
    /// Id of the matching tool execution record.
    pub execution_id: Uuid,
    pub tool_call: ToolCall,
    /// Human-readable rendering of the call.
    pub description: String,
    pub requested_at: DateTime<Utc>,
}

struct Slot {
    view: PendingApproval,
    tx: oneshot::Sender<ApprovalDecision>,
}

/// Holds at most one pending approval.
#[derive(Default)]
pub struct ApprovalGate {
    slot: Mutex<Option<Slot>>,
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("pending", &self.pending())
            .finish()
    }
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate for `view`.
    ///
    /// The returned receiver resolves with the decision, or with an error
    /// when the gate is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Internal`] if another approval is pending.
    pub fn open(&self, view: PendingApproval) -> Result<oneshot::Receiver<ApprovalDecision>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            return Err(AgentError::Internal(format!(
                "approval already pending for call {}",
                existing.view.tool_call.id
            )));
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(Slot { view, tx });
        Ok(rx)
    }

    /// The call awaiting a decision, if any.
    pub fn pending(&self) -> Option<PendingApproval> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.view.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Approve the pending call.  Returns false when nothing was pending.
    pub fn approve(&self, store: Arc<dyn StoreAccess>) -> bool {
        self.resolve(ApprovalDecision::Approved(store))
    }

    /// Reject the pending call.  Returns false when nothing was pending.
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.resolve(ApprovalDecision::Rejected(reason.into()))
    }

    /// Drop the pending call without a decision, waking the waiter.
    pub fn cancel(&self) -> bool {
        self.take().is_some()
    }

    fn resolve(&self, decision: ApprovalDecision) -> bool {
        let Some(slot) = self.take() else {
            return false;
        };
        let call_id = slot.view.tool_call.id.clone();
        match slot.tx.send(decision) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(call_id = %call_id, "approval waiter already gone");
                false
            }
        }
    }

    fn take(&self) -> Option<Slot> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
