//! Recycling: returning reserved resources to the pool.
//!
//! All requires of one request are applied to a working copy of the
//! snapshot, then committed together. Records that are already gone are
//! skipped, so recycling is idempotent and a record matched by two requires
//! (say by holder and by request) is released once.

use std::collections::{BTreeMap, BTreeSet};

use hostpool_core::OpContext;
use hostpool_placement::{ComputeRequirement, PortResource, RecycleRequest, RecycleRequire, RecycleType};
use hostpool_state::{ChangeSet, DiskStatus, Host, Reservation, epoch_secs};
use tracing::{debug, info, warn};

use crate::allocator::Allocator;
use crate::error::{AllocError, AllocResult};
use crate::working::{Snapshot, load_snapshot, with_store};

/// Working copy for one recycle call.
struct Recycling {
    hosts: BTreeMap<String, Host>,
    /// Live records by table key.
    live: BTreeMap<String, Reservation>,
    original: BTreeMap<String, Reservation>,
    touched: BTreeSet<String>,
}

impl Recycling {
    fn new(hosts: Vec<Host>, reservations: Vec<Reservation>) -> Self {
        let live: BTreeMap<String, Reservation> = reservations
            .into_iter()
            .map(|r| (r.table_key(), r))
            .collect();
        Self {
            hosts: hosts.into_iter().map(|h| (h.id.clone(), h)).collect(),
            original: live.clone(),
            live,
            touched: BTreeSet::new(),
        }
    }

    fn apply(&mut self, require: &RecycleRequire) -> AllocResult<()> {
        match require.recycle_type {
            RecycleType::Cluster => {
                if require.cluster_id.is_empty() {
                    return Err(AllocError::Validation(
                        "Cluster recycle needs cluster_id".to_string(),
                    ));
                }
                self.release_where(|r| r.holder_id() == require.cluster_id);
            }
            RecycleType::Operate => {
                if require.request_id.is_empty() {
                    return Err(AllocError::Validation(
                        "Operate recycle needs request_id".to_string(),
                    ));
                }
                self.release_where(|r| r.request_id() == require.request_id);
            }
            RecycleType::Compute => {
                let host_id = self.resolve_host(require)?;
                self.release_compute(&host_id, require, require.compute_req);
                for ports in &require.port_req {
                    self.release_ports(&host_id, require, ports);
                }
            }
            RecycleType::Disk => {
                let host_id = self.resolve_host(require)?;
                let disk = require.disk_req.as_ref().ok_or_else(|| {
                    AllocError::Validation("Disk recycle needs disk_req".to_string())
                })?;
                let on_host = self
                    .hosts
                    .get(&host_id)
                    .is_some_and(|h| h.disk(&disk.disk_id).is_some());
                if !on_host {
                    return Err(AllocError::NotFound(format!(
                        "disk {} on host {host_id}",
                        disk.disk_id
                    )));
                }
                self.release_where(|r| {
                    matches!(r, Reservation::Disk(d) if d.host_id == host_id && d.disk_id == disk.disk_id)
                });
            }
        }
        Ok(())
    }

    /// Host ID named by the require, by ID or else by IP.
    fn resolve_host(&self, require: &RecycleRequire) -> AllocResult<String> {
        if !require.host_id.is_empty() {
            return if self.hosts.contains_key(&require.host_id) {
                Ok(require.host_id.clone())
            } else {
                Err(AllocError::NotFound(format!("host {}", require.host_id)))
            };
        }
        if require.host_ip.is_empty() {
            return Err(AllocError::Validation(format!(
                "{:?} recycle needs host_id or host_ip",
                require.recycle_type
            )));
        }
        self.hosts
            .values()
            .find(|h| h.ip == require.host_ip)
            .map(|h| h.id.clone())
            .ok_or_else(|| AllocError::NotFound(format!("host with ip {}", require.host_ip)))
    }

    /// Remove every live record matching `pred` and give its resources back.
    fn release_where(&mut self, pred: impl Fn(&Reservation) -> bool) {
        let keys: Vec<String> = self
            .live
            .iter()
            .filter(|&(_, r)| pred(r))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            if let Some(record) = self.live.remove(&key) {
                self.give_back(&record);
            }
        }
    }

    fn give_back(&mut self, record: &Reservation) {
        let Some(host) = self.hosts.get_mut(record.host_id()) else {
            warn!(host_id = %record.host_id(), record = %record.id(), "record on unknown host");
            return;
        };
        match record {
            Reservation::Compute(c) => {
                host.free_cpu_cores = (host.free_cpu_cores + c.cpu_cores).min(host.cpu_cores);
                host.free_memory = (host.free_memory + c.memory).min(host.memory);
            }
            Reservation::Disk(d) => {
                host.set_disk_status(&d.disk_id, DiskStatus::Available);
            }
            // Held ports are derived from the records themselves.
            Reservation::Port(_) => {}
        }
        self.touched.insert(host.id.clone());
    }

    /// Whether a record on `host_id` belongs to the require's holder/request,
    /// when those are given.
    fn owned_by(record: &Reservation, host_id: &str, require: &RecycleRequire) -> bool {
        record.host_id() == host_id
            && (require.cluster_id.is_empty() || record.holder_id() == require.cluster_id)
            && (require.request_id.is_empty() || record.request_id() == require.request_id)
    }

    /// Release up to `amount` of compute from matching records, shrinking
    /// the last one when it is only partly returned.
    fn release_compute(&mut self, host_id: &str, require: &RecycleRequire, amount: ComputeRequirement) {
        let mut cores = amount.cpu_cores;
        let mut memory = amount.memory;
        let keys: Vec<String> = self
            .live
            .iter()
            .filter(|&(_, r)| {
                matches!(r, Reservation::Compute(_)) && Self::owned_by(r, host_id, require)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in keys {
            if cores == 0 && memory == 0 {
                break;
            }
            let Some(Reservation::Compute(record)) = self.live.get_mut(&key) else {
                continue;
            };
            let take_cores = cores.min(record.cpu_cores);
            let take_memory = memory.min(record.memory);
            record.cpu_cores -= take_cores;
            record.memory -= take_memory;
            cores -= take_cores;
            memory -= take_memory;
            let emptied = record.cpu_cores == 0 && record.memory == 0;

            if emptied {
                self.live.remove(&key);
            }
            if let Some(host) = self.hosts.get_mut(host_id) {
                host.free_cpu_cores = (host.free_cpu_cores + take_cores).min(host.cpu_cores);
                host.free_memory = (host.free_memory + take_memory).min(host.memory);
                self.touched.insert(host.id.clone());
            }
        }
    }

    /// Drop the listed ports from matching port records on the host.
    fn release_ports(&mut self, host_id: &str, require: &RecycleRequire, returned: &PortResource) {
        let keys: Vec<String> = self
            .live
            .iter()
            .filter(|&(_, r)| {
                matches!(r, Reservation::Port(_)) && Self::owned_by(r, host_id, require)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in keys {
            let Some(Reservation::Port(record)) = self.live.get_mut(&key) else {
                continue;
            };
            let before = record.ports.len();
            record.ports.retain(|p| !(in_returned_range(returned, *p) && returned.ports.contains(p)));
            if record.ports.len() == before {
                continue;
            }
            if record.ports.is_empty() {
                self.live.remove(&key);
            }
            self.touched.insert(host_id.to_string());
        }
    }

    fn into_change_set(mut self, now: u64) -> ChangeSet {
        let mut change = ChangeSet::default();
        for (key, original) in &self.original {
            match self.live.get(key) {
                Some(current) if current == original => {}
                Some(current) => {
                    change.remove.push(original.clone());
                    change.insert.push(current.clone());
                }
                None => change.remove.push(original.clone()),
            }
        }
        for id in &self.touched {
            if let Some(mut host) = self.hosts.remove(id) {
                host.recompute_stat();
                host.updated_at = now;
                change.hosts.push(host);
            }
        }
        change
    }
}

/// Whether `port` falls in the returned range. A `0..=0` or inverted range
/// matches any port.
fn in_returned_range(returned: &PortResource, port: u16) -> bool {
    let unbounded = (returned.start == 0 && returned.end == 0) || returned.start > returned.end;
    unbounded || (returned.start..=returned.end).contains(&port)
}

/// Plan every require against `snapshot` and diff the result.
fn plan(ctx: &OpContext, req: &RecycleRequest, snapshot: Snapshot) -> AllocResult<ChangeSet> {
    let mut work = Recycling::new(snapshot.hosts, snapshot.reservations);
    for (i, require) in req.recycle_reqs.iter().enumerate() {
        ctx.check()?;
        work.apply(require).map_err(|e| match e {
            AllocError::Validation(msg) => AllocError::Validation(format!("require {i}: {msg}")),
            AllocError::NotFound(msg) => AllocError::NotFound(format!("require {i}: {msg}")),
            other => other,
        })?;
        debug!(
            index = i,
            recycle_type = ?require.recycle_type,
            cluster_id = %require.cluster_id,
            request_id = %require.request_id,
            "recycle require planned"
        );
    }
    Ok(work.into_change_set(epoch_secs()))
}

impl Allocator {
    /// Return the resources described by `req` to the pool.
    ///
    /// A commit that loses a revision race is planned again from a fresh
    /// snapshot. Records released by the winner are gone by then, so the
    /// second plan only touches what is still held.
    pub async fn recycle(&self, ctx: &OpContext, req: &RecycleRequest) -> AllocResult<()> {
        ctx.check()?;
        if req.recycle_reqs.is_empty() {
            return Err(AllocError::Validation("recycle request is empty".to_string()));
        }

        let mut attempt = 1u32;
        loop {
            let snapshot = ctx.run(with_store(&self.store, load_snapshot)).await??;
            let change = plan(ctx, req, snapshot)?;
            ctx.check()?;
            if change.is_empty() {
                debug!("nothing to recycle");
                return Ok(());
            }

            let hosts = change.hosts.len();
            let removed = change.remove.len();
            match with_store(&self.store, move |store| store.commit(&change)).await {
                Ok(()) => {
                    info!(requires = req.recycle_reqs.len(), hosts, removed, attempt, "resources recycled");
                    return Ok(());
                }
                Err(AllocError::Conflict(host_id)) => {
                    debug!(%host_id, attempt, "recycle lost a revision race, planning again");
                    attempt += 1;
                }
                Err(e) => {
                    warn!(error = %e, "recycle commit failed");
                    return Err(e);
                }
            }
        }
    }
}
