//! hostpool-pool — the resource pool facade.
//!
//! [`ResourcePool`] is the single entry point callers use. It ties together
//! the inventory store, the verification pipeline and the allocator:
//!
//! ```text
//! import_hosts ──► HostSpec::into_host ──► Verifier ──► HostInventory
//! allocate / recycle ──► Allocator ──► HostInventory::commit
//! query / hierarchy / stocks ──► HostInventory (read only)
//! ```
//!
//! Every call takes an [`OpContext`](hostpool_core::OpContext) and every
//! failure is a [`PoolError`] whose [`kind`](PoolError::kind) tells the
//! caller whether to fix the request, wait, or retry.

pub mod error;
pub mod filter;
pub mod hierarchy;
pub mod pool;
pub mod spec;
pub mod stocks;

pub use error::{ErrorKind, PoolError, PoolResult};
pub use filter::{DiskFilter, HostFilter, Page};
pub use hierarchy::{HierarchyLevel, HierarchyNode};
pub use pool::{ImportOptions, ImportReport, ResourcePool};
pub use spec::{DiskSpec, HostSpec};
pub use stocks::Stocks;
