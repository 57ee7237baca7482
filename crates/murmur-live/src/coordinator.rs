//! Tool-call coordination.
//!
//! Matches inbound tool-call requests to registered handlers, optionally
//! gates them behind human approval, and produces exactly one
//! `ToolResult` per call, in original submission order. Handler
//! failures and panics become error results, never session faults.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use murmur_common::{ToolCall, ToolError, ToolResult};

use crate::registry::ToolRegistry;

/// One submitted call awaiting its decision and result.
struct PendingCall {
    call: ToolCall,
    resolved: bool,
    result: Option<ToolResult>,
}

/// What `submit` did with a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Approval not required: every call was executed; results are in
    /// submission order and ready to flush.
    Executed(Vec<ToolResult>),
    /// Calls stored pending approval; the count is the batch size.
    AwaitingApproval(usize),
}

/// Owns the pending-call list between submission and flush.
pub struct ToolCallCoordinator {
    registry: Arc<ToolRegistry>,
    approval_required: bool,
    pending: Vec<PendingCall>,
}

impl ToolCallCoordinator {
    pub fn new(registry: Arc<ToolRegistry>, approval_required: bool) -> Self {
        Self {
            registry,
            approval_required,
            pending: Vec::new(),
        }
    }

    pub fn approval_required(&self) -> bool {
        self.approval_required
    }

    /// Accept a batch of tool calls from the stream.
    pub fn submit(&mut self, calls: Vec<ToolCall>) -> SubmitOutcome {
        if !self.approval_required {
            let results = calls.iter().map(|call| self.execute(call)).collect();
            return SubmitOutcome::Executed(results);
        }

        debug!(count = calls.len(), "tool calls pending approval");
        self.pending.extend(calls.into_iter().map(|call| PendingCall {
            call,
            resolved: false,
            result: None,
        }));
        SubmitOutcome::AwaitingApproval(self.pending.len())
    }

    /// Execute one call. Always produces a result: unknown or
    /// unavailable tools and failing or panicking handlers all map to
    /// error payloads.
    pub fn execute(&self, call: &ToolCall) -> ToolResult {
        let tool = match self.registry.get(&call.name) {
            Some(tool) => tool,
            None => {
                warn!(tool = %call.name, "unknown tool requested");
                return ToolResult::err(
                    call.id.clone(),
                    call.name.clone(),
                    ToolError::UnknownTool(call.name.clone()).to_string(),
                );
            }
        };
        if !tool.available {
            return ToolResult::err(
                call.id.clone(),
                call.name.clone(),
                ToolError::Unavailable(call.name.clone()).to_string(),
            );
        }

        debug!(tool = %call.name, id = %call.id, "executing tool");
        let handler = Arc::clone(&tool.handler);
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&call.args)));

        match outcome {
            Ok(Ok(output)) => ToolResult::ok(call.id.clone(), call.name.clone(), output),
            Ok(Err(error)) => {
                warn!(tool = %call.name, error = %error, "tool handler failed");
                ToolResult::err(call.id.clone(), call.name.clone(), error)
            }
            Err(panic) => {
                let reason = panic_message(panic);
                warn!(tool = %call.name, reason = %reason, "tool handler panicked");
                ToolResult::err(
                    call.id.clone(),
                    call.name.clone(),
                    format!("handler panicked: {reason}"),
                )
            }
        }
    }

    /// Resolve one pending call by index. Approving executes the call;
    /// rejecting produces an error result. A call is never executed
    /// twice.
    pub fn resolve(&mut self, index: usize, approved: bool) -> Result<(), ToolError> {
        let entry = self
            .pending
            .get(index)
            .ok_or(ToolError::IndexOutOfRange(index))?;
        if entry.resolved {
            return Err(ToolError::AlreadyResolved(index));
        }

        let call = entry.call.clone();
        let result = if approved {
            self.execute(&call)
        } else {
            debug!(tool = %call.name, "tool call rejected by user");
            ToolResult::err(call.id, call.name, "rejected by user")
        };

        let entry = &mut self.pending[index];
        entry.resolved = true;
        entry.result = Some(result);
        Ok(())
    }

    /// The calls currently awaiting a decision, submission order.
    pub fn pending_calls(&self) -> Vec<&ToolCall> {
        self.pending.iter().map(|p| &p.call).collect()
    }

    /// Index of the first unresolved call, if any. Drives the approval
    /// UI's "next" cursor.
    pub fn next_unresolved(&self) -> Option<usize> {
        self.pending.iter().position(|p| !p.resolved)
    }

    pub fn all_resolved(&self) -> bool {
        self.pending.iter().all(|p| p.resolved)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drain the batch once fully resolved, returning results in the
    /// order the calls were received. Pairs each drained result with
    /// its originating call for history recording.
    pub fn flush(&mut self) -> Vec<(ToolCall, ToolResult)> {
        debug_assert!(self.all_resolved(), "flush before all calls resolved");
        self.pending
            .drain(..)
            .filter_map(|p| {
                let result = p.result?;
                Some((p.call, result))
            })
            .collect()
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
