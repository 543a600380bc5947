//! Per-request state machine.
//!
//! ```text
//! Received -> Validated -> Processed -> Responded
//!    |            |
//!    +------------+------> Failed ----> Responded
//! ```

use std::fmt;
use std::time::{Duration, Instant};

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Parsed, nothing checked yet.
    Received,
    /// Input accepted; nothing has been touched yet.
    Validated,
    /// The operation completed.
    Processed,
    /// Validation or processing failed.
    Failed,
    /// The response was produced.
    Responded,
}

impl RequestState {
    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: Self) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Received, Failed)
                | (Validated, Processed)
                | (Validated, Failed)
                | (Processed, Responded)
                | (Failed, Responded)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Responded => "responded",
        };
        f.write_str(name)
    }
}

/// Tracks one request through its states.
#[derive(Debug)]
pub struct RequestTrace {
    op: &'static str,
    state: RequestState,
    started: Instant,
}

impl RequestTrace {
    /// Starts tracking a request for `op`.
    pub fn received(op: &'static str) -> Self {
        tracing::debug!(op, state = %RequestState::Received, "request");
        Self {
            op,
            state: RequestState::Received,
            started: Instant::now(),
        }
    }

    /// Moves to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: RequestState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(op = self.op, from = %self.state, to = %next, "illegal request transition");
            return;
        }
        self.state = next;
        tracing::debug!(op = self.op, state = %next, "request");
    }

    /// Current state.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Time since the request was received.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut trace = RequestTrace::received("stats");
        trace.advance(RequestState::Validated);
        trace.advance(RequestState::Processed);
        trace.advance(RequestState::Responded);
        assert_eq!(trace.state(), RequestState::Responded);
    }

    #[test]
    fn failure_can_happen_before_or_after_validation() {
        assert!(RequestState::Received.can_transition_to(RequestState::Failed));
        assert!(RequestState::Validated.can_transition_to(RequestState::Failed));
        assert!(!RequestState::Processed.can_transition_to(RequestState::Failed));
    }

    #[test]
    fn illegal_transition_is_ignored() {
        let mut trace = RequestTrace::received("sweep");
        trace.advance(RequestState::Responded);
        assert_eq!(trace.state(), RequestState::Received);
    }
}
