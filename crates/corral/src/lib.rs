//! # corral
//!
//! Bounded asynchronous resource pool for expensive, reusable objects:
//! database connections, network sockets, worker handles, anything whose
//! creation cost dominates its cost of use.
//!
//! A [`Pool`] owns a bounded set of resources manufactured by a
//! user-supplied [`Factory`]. Borrowers receive an RAII [`Lease`]; dropping
//! it returns the resource. Contention is mediated by a priority-banded
//! waiter queue, idle resources are validated before hand-off and reaped on
//! an idle timeout, and the pool winds down through an explicit
//! drain/shutdown state machine.

pub mod config;
pub mod context;
pub mod decorator;
pub mod error;
pub mod factory;
pub mod lease;
pub mod pool;

mod reaper;
mod registry;
mod waiters;

pub use config::PoolConfig;
pub use context::{BorrowContext, BorrowHooks};
pub use decorator::Pooled;
pub use error::{BoxError, Error, Result};
pub use factory::Factory;
pub use lease::Lease;
pub use pool::{Acquisition, Pool, PoolStats};
