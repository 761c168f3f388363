//! Per-turn cancellation tokens.
//!
//! Every turn gets one `TurnToken`, shared by all sub-tasks of that turn.
//! Cancellation is level-triggered and idempotent: barge-in cancels the
//! token, every provider await races against it, and downstream consumers
//! observe it between events.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A cancellation token scoped to one turn.
#[derive(Debug, Clone)]
pub struct TurnToken {
    turn_id: Uuid,
    inner: CancellationToken,
}

impl TurnToken {
    pub fn new() -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            inner: CancellationToken::new(),
        }
    }

    /// The turn this token belongs to.
    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    /// Signal cancellation. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// Race a future against cancellation. Returns `None` if the token
    /// fires first; the future is dropped, aborting any in-flight I/O.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.inner.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Two tokens are the same turn iff their ids match.
    pub fn same_turn(&self, other: &TurnToken) -> bool {
        self.turn_id == other.turn_id
    }
}

impl Default for TurnToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = TurnToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        // Idempotent.
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clone_shares_state() {
        let token = TurnToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.same_turn(&token));
    }

    #[test]
    fn distinct_tokens_are_distinct_turns() {
        assert!(!TurnToken::new().same_turn(&TurnToken::new()));
    }

    #[tokio::test]
    async fn guard_completes_when_not_cancelled() {
        let token = TurnToken::new();
        let out = token.guard(async { 42 }).await;
        assert_eq!(out, Some(42));
    }

    #[tokio::test]
    async fn guard_aborts_pending_future_on_cancel() {
        let token = TurnToken::new();
        let racer = token.clone();

        let task = tokio::spawn(async move {
            racer.guard(std::future::pending::<()>()).await
        });
        token.cancel();
        assert_eq!(task.await.unwrap(), None);
    }

    #[tokio::test]
    async fn guard_on_cancelled_token_skips_future() {
        let token = TurnToken::new();
        token.cancel();
        let out = token.guard(async { 1 }).await;
        assert_eq!(out, None);
    }
}
