//! Factory contract and the adapter that normalises it for the dispatcher

use std::future::Future;

use crate::error::{BoxError, Error, Result};

/// User-supplied callbacks that create, destroy, and optionally validate
/// pooled resources.
///
/// `create` and `destroy` may complete immediately or after arbitrary I/O;
/// the pool treats both the same way and never delivers a resource on the
/// creating caller's stack. `validate` must be a cheap, synchronous
/// predicate: it runs on the dispatch path every time an idle resource is
/// about to be handed to a waiter.
pub trait Factory: Send + Sync + 'static {
    /// The resource type this factory produces.
    type Resource: Send + 'static;

    /// Manufacture a new resource.
    fn create(&self) -> impl Future<Output = std::result::Result<Self::Resource, BoxError>> + Send;

    /// Tear down a resource. Best effort: failures are logged and swallowed
    /// by the pool.
    fn destroy(
        &self,
        resource: Self::Resource,
    ) -> impl Future<Output = std::result::Result<(), BoxError>> + Send {
        async move {
            drop(resource);
            Ok(())
        }
    }

    /// Check whether an idle resource is still usable. Defaults to `true`.
    fn validate(&self, _resource: &Self::Resource) -> bool {
        true
    }
}

/// Normalising wrapper between the dispatcher and the user factory.
///
/// Maps factory failures into pool errors and enforces the best-effort
/// contract on `destroy`.
pub(crate) struct FactoryAdapter<F> {
    factory: F,
    pool: String,
}

impl<F: Factory> FactoryAdapter<F> {
    pub(crate) fn new(factory: F, pool: String) -> Self {
        Self { factory, pool }
    }

    pub(crate) async fn produce(&self) -> Result<F::Resource> {
        self.factory
            .create()
            .await
            .map_err(|source| Error::create(&self.pool, source))
    }

    pub(crate) async fn discard(&self, resource: F::Resource) {
        if let Err(error) = self.factory.destroy(resource).await {
            tracing::warn!(pool = %self.pool, %error, "resource destroy failed; continuing");
        }
    }

    pub(crate) fn check(&self, resource: &F::Resource) -> bool {
        self.factory.validate(resource)
    }
}
