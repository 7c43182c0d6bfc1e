//! hostpool-allocator — batch allocation and recycling of host resources.
//!
//! Turns a `BatchAllocRequest` into reservation records, or a
//! `RecycleRequest` back into free capacity. Both engines work the same way:
//!
//! ```text
//! Allocator
//!   ├── load snapshot (hosts, then reservation records)
//!   ├── plan on an in-memory working copy
//!   │     allocate: select_hosts → reserve per host
//!   │     recycle:  match records → release per record
//!   └── HostInventory::commit (one transaction, revision-checked)
//! ```
//!
//! Nothing is written until the whole call has been planned, so a failed or
//! cancelled call leaves the inventory untouched. A host that changed between
//! snapshot and commit fails the call with `AllocError::Conflict`.

pub mod allocator;
pub mod error;
pub mod recycler;
pub mod reserve;
mod working;

pub use allocator::Allocator;
pub use error::{AllocError, AllocResult};
