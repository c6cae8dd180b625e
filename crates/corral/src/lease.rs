//! RAII lease over a borrowed resource

use std::sync::Arc;

use crate::context::BorrowContext;
use crate::factory::Factory;
use crate::pool::PoolInner;
use crate::registry::SlotId;

/// Exclusive handle over a borrowed resource.
///
/// Dropping the lease returns the resource to the pool's idle list. While a
/// lease is live the pool never touches the resource; the at-most-one
/// borrower guarantee holds by construction.
pub struct Lease<F: Factory> {
    resource: Option<F::Resource>,
    ctx: Option<BorrowContext>,
    slot: SlotId,
    pool: Arc<PoolInner<F>>,
}

impl<F: Factory> Lease<F> {
    pub(crate) fn new(
        pool: Arc<PoolInner<F>>,
        slot: SlotId,
        resource: F::Resource,
        ctx: BorrowContext,
    ) -> Self {
        Self {
            resource: Some(resource),
            ctx: Some(ctx),
            slot,
            pool,
        }
    }

    /// The borrow context captured when this lease was acquired.
    pub fn context(&self) -> &BorrowContext {
        self.ctx.as_ref().expect("lease used after release")
    }

    /// Dismantle the lease without running its drop hook.
    pub(crate) fn into_parts(mut self) -> (SlotId, F::Resource, BorrowContext) {
        let resource = self.resource.take().expect("lease used after release");
        let ctx = self.ctx.take().expect("lease used after release");
        (self.slot, resource, ctx)
    }
}

impl<F: Factory> std::ops::Deref for Lease<F> {
    type Target = F::Resource;

    fn deref(&self) -> &F::Resource {
        self.resource.as_ref().expect("lease used after release")
    }
}

impl<F: Factory> std::ops::DerefMut for Lease<F> {
    fn deref_mut(&mut self) -> &mut F::Resource {
        self.resource.as_mut().expect("lease used after release")
    }
}

impl<F: Factory> Drop for Lease<F> {
    fn drop(&mut self) {
        if let (Some(resource), Some(ctx)) = (self.resource.take(), self.ctx.take()) {
            PoolInner::release(&self.pool, self.slot, resource, &ctx);
        }
    }
}

impl<F: Factory> std::fmt::Debug for Lease<F>
where
    F::Resource: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("slot", &self.slot)
            .field("resource", &self.resource)
            .finish()
    }
}
