//! Borrow decorator: wrap a function so acquire/release brackets it

use std::future::Future;

use crate::context::BorrowContext;
use crate::error::Result;
use crate::factory::Factory;
use crate::lease::Lease;
use crate::pool::Pool;

/// A function wrapped with transparent acquire/release bracketing.
///
/// Built via [`Pool::pooled`]. Each [`Pooled::call`] borrows a resource,
/// runs the function against it, and returns the resource to the pool when
/// the function's lease goes out of scope, whether or not the caller looks
/// at the output.
pub struct Pooled<F: Factory, Func> {
    pool: Pool<F>,
    func: Func,
    priority: usize,
}

impl<F: Factory> Pool<F> {
    /// Wrap `func` so every invocation runs against a pooled resource.
    ///
    /// `func` receives the [`Lease`] by value and releases it by dropping
    /// it, normally when its future completes.
    pub fn pooled<Func>(&self, func: Func) -> Pooled<F, Func> {
        Pooled {
            pool: self.clone(),
            func,
            priority: 0,
        }
    }
}

impl<F: Factory, Func> Pooled<F, Func> {
    /// Acquire at the given priority band instead of band 0.
    #[must_use]
    pub fn with_priority(mut self, priority: usize) -> Self {
        self.priority = priority;
        self
    }

    /// Borrow a resource and run the wrapped function against it.
    ///
    /// If the acquire itself fails, the error is forwarded and the function
    /// is never invoked.
    pub async fn call<A, T, Fut>(&self, args: A) -> Result<T>
    where
        Func: Fn(Lease<F>, A) -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = self
            .pool
            .acquire_with(self.priority, BorrowContext::default())
            .await?;
        Ok((self.func)(lease, args).await)
    }
}

impl<F: Factory, Func> std::fmt::Debug for Pooled<F, Func> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("pool", &self.pool.name())
            .field("priority", &self.priority)
            .finish()
    }
}
