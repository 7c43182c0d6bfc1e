//! hostpool-state — host inventory store for hostpool.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for hosts, their disks, and the reservation records
//! (`UsedCompute`, `UsedDisk`, `UsedPort`) that link a host to the clusters
//! using it.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Reservation tables use composite keys (`{host_id}:{record_id}`) so that
//! every record held on a host can be found with a prefix scan.
//!
//! Engines never talk to redb directly: they depend on the
//! [`HostInventory`] trait, and [`StateStore`] is its redb implementation.
//! Every persisted host carries a `revision`; [`HostInventory::commit`]
//! applies a [`ChangeSet`] atomically and rejects it with
//! [`StateError::Conflict`] when any touched host moved on since it was read.

pub mod error;
pub mod inventory;
pub mod labels;
pub mod lifecycle;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use inventory::{ChangeSet, HostInventory};
pub use store::StateStore;
pub use types::*;
