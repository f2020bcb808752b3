/*!
 * Correlation Context
 * Per-producer stack of active correlation scopes
 *
 * Exclusively owned by the producer's execution handle - never shared across
 * producers, never behind a lock. The ingestor reads the top of the stack to
 * stamp correlation and parent-call ids onto new events, pushes a scope on
 * function entry, and pops it on exit.
 */

use crate::core::types::{CallId, CorrelationId};

/// One active correlation scope
///
/// `call_id` is `None` for a root scope opened with [`CorrelationContext::begin`]
/// (an operation boundary that is not itself a traced call).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub correlation_id: CorrelationId,
    pub call_id: Option<CallId>,
}

/// Stack of active correlation scopes for a single producer
#[derive(Debug, Clone, Default)]
pub struct CorrelationContext {
    stack: Vec<Scope>,
}

impl CorrelationContext {
    #[inline]
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    /// Open a root scope for a logical operation (e.g. one request)
    ///
    /// Every event emitted while this scope is live inherits its correlation
    /// id; a correlation id is never reassigned once stamped onto an event.
    pub fn begin(&mut self, correlation_id: CorrelationId) {
        self.stack.push(Scope {
            correlation_id,
            call_id: None,
        });
    }

    /// Close the innermost root scope
    ///
    /// Tolerates call scopes left open above it (e.g. after a dropped exit):
    /// they are discarded with the root.
    pub fn end(&mut self) {
        while let Some(scope) = self.stack.pop() {
            if scope.call_id.is_none() {
                break;
            }
        }
    }

    /// Push a call scope (done by the ingestor on function entry)
    pub fn push_call(&mut self, correlation_id: CorrelationId, call_id: CallId) {
        self.stack.push(Scope {
            correlation_id,
            call_id: Some(call_id),
        });
    }

    /// Pop the scope for `call_id`, returning its correlation id
    ///
    /// Tolerates mismatched exits: if the top of the stack is a different
    /// call (entry dropped, or instrumentation skew), scopes above the match
    /// are discarded; if no match exists the stack is left untouched.
    pub fn pop_call(&mut self, call_id: CallId) -> Option<CorrelationId> {
        let pos = self
            .stack
            .iter()
            .rposition(|scope| scope.call_id == Some(call_id))?;
        let scope = self.stack.swap_remove(pos);
        self.stack.truncate(pos);
        Some(scope.correlation_id)
    }

    /// Correlation id of the innermost live scope
    #[inline]
    pub fn current_correlation(&self) -> Option<&CorrelationId> {
        self.stack.last().map(|scope| &scope.correlation_id)
    }

    /// Call id of the innermost live call scope, if any
    ///
    /// Root scopes are transparent: a call nested directly under a root scope
    /// has no parent call.
    #[inline]
    pub fn current_call(&self) -> Option<CallId> {
        self.stack.last().and_then(|scope| scope.call_id)
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
