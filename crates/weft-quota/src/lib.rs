//! Shared memory budgets for transports.
//!
//! A [`ResourceQuota`] hands bytes out to [`ResourceUser`]s. Allocation
//! never blocks: a request the quota can't cover yet completes later,
//! through its callback, once idle bytes have been scavenged from other
//! users or a reclaimer has freed some.

pub mod combiner;
pub mod exec_ctx;

mod error;
mod list;
mod quota;
mod slice;
mod user;

pub use error::QuotaError;
pub use exec_ctx::ExecCtx;
pub use quota::ResourceQuota;
pub use slice::{QuotaSliceMut, SliceAllocator};
pub use user::ResourceUser;
