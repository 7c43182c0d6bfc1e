//! Snapshot loading and store access off the async runtime.

use std::sync::Arc;

use hostpool_state::{Host, HostInventory, HostStatus, Reservation, StateResult};

use crate::error::{AllocError, AllocResult};

/// Live hosts and every reservation record, as read at one point.
pub(crate) struct Snapshot {
    pub hosts: Vec<Host>,
    pub reservations: Vec<Reservation>,
}

/// Read hosts before records: a record committed in between bumps its
/// host's revision, so the stale host copy fails the later commit.
pub(crate) fn load_snapshot(store: &dyn HostInventory) -> StateResult<Snapshot> {
    let mut hosts: Vec<Host> = store
        .list_hosts()?
        .into_iter()
        .filter(|h| h.status != HostStatus::Deleted)
        .collect();
    hosts.sort_by(|a, b| a.id.cmp(&b.id));
    let reservations = store.list_all_reservations()?;
    Ok(Snapshot {
        hosts,
        reservations,
    })
}

/// Run a blocking store call on the blocking pool.
pub(crate) async fn with_store<T, F>(store: &Arc<dyn HostInventory>, f: F) -> AllocResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn HostInventory) -> StateResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| AllocError::Internal(format!("store task failed: {e}")))?
        .map_err(AllocError::from)
}
