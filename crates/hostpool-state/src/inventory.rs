//! The inventory capability the engines depend on.
//!
//! [`HostInventory`] is small: host inserts, reads and deletes, reads over
//! reservation records, and one atomic [`commit`](HostInventory::commit)
//! through which hosts are updated and reservations created or released.

use crate::error::StateResult;
use crate::types::{Host, HostReservations, Reservation};

/// A set of mutations applied atomically by [`HostInventory::commit`].
///
/// `hosts` carry the `revision` they were read at; the commit fails with
/// [`StateError::Conflict`](crate::StateError::Conflict) if any stored host
/// has a different revision.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub hosts: Vec<Host>,
    pub insert: Vec<Reservation>,
    pub remove: Vec<Reservation>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.insert.is_empty() && self.remove.is_empty()
    }
}

/// Durable record of hosts, disks, and their reservation state.
pub trait HostInventory: Send + Sync {
    /// Persist a new host. Fails with `AlreadyExists` if the ID is taken or a
    /// live host has the same IP and host name.
    fn insert_host(&self, host: &Host) -> StateResult<Host>;

    fn get_host(&self, host_id: &str) -> StateResult<Option<Host>>;

    /// All hosts, soft-deleted ones included.
    fn list_hosts(&self) -> StateResult<Vec<Host>>;

    /// Soft-delete hosts in one transaction, checking each revision and that
    /// none holds a reservation record. Disks are removed. On any failure no
    /// host is deleted.
    fn delete_hosts(&self, hosts: &[Host], deleted_at: u64) -> StateResult<()>;

    fn list_reservations(&self, host_id: &str) -> StateResult<HostReservations>;

    fn list_all_reservations(&self) -> StateResult<Vec<Reservation>>;

    /// Apply `change` atomically.
    fn commit(&self, change: &ChangeSet) -> StateResult<()>;
}
