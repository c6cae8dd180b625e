//! Borrow context captured at acquire time, with pluggable attach hooks

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

/// Ambient caller context captured when a borrow is requested.
///
/// The context travels with the waiter and is attached to the resource for
/// the lifetime of the lease, so work done by the resource after hand-off
/// can be attributed (and cancelled) on behalf of the borrowing caller. A
/// resource borrowed repeatedly is re-attached with each borrower's own
/// context.
#[derive(Debug, Clone, Default)]
pub struct BorrowContext {
    /// Cooperative cancellation token for the borrowing caller.
    pub cancellation: CancellationToken,
    /// Arbitrary key-value pairs (e.g. request ids, tenant labels).
    pub metadata: HashMap<String, String>,
}

impl BorrowContext {
    /// Create an empty context with a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default cancellation token with the provided one.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Add a key-value metadata pair to the context.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Attach/detach pair invoked at the borrow and release boundaries.
///
/// `attach` runs just before a resource is delivered to a waiter; `detach`
/// runs when the lease is released or destroyed. Implementations must not
/// call back into the pool.
pub trait BorrowHooks: Send + Sync + 'static {
    /// Called when a resource is about to be handed to a borrower.
    fn attach(&self, ctx: &BorrowContext);

    /// Called when a borrowed resource comes back.
    fn detach(&self, ctx: &BorrowContext);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_builder_accumulates() {
        let ctx = BorrowContext::new()
            .with_metadata("request", "r-17")
            .with_metadata("tenant", "acme");
        assert_eq!(ctx.metadata.get("request").unwrap(), "r-17");
        assert_eq!(ctx.metadata.get("tenant").unwrap(), "acme");
    }

    #[test]
    fn cancellation_token_is_shared_with_parent() {
        let token = CancellationToken::new();
        let ctx = BorrowContext::new().with_cancellation(token.clone());
        assert!(!ctx.cancellation.is_cancelled());
        token.cancel();
        assert!(ctx.cancellation.is_cancelled());
    }
}
