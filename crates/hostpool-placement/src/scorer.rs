//! Candidate filtering and ranking.
//!
//! A host is a candidate for a requirement only if it passes every hard
//! check in [`check_eligibility`]:
//! - **Lifecycle**: online, not reserved, available (loadless if exclusive)
//! - **Exclusion**: not excluded by the request or the batch
//! - **Filter and location**: arch, trait mask, failure domain per strategy
//! - **Capacity**: free compute, a qualifying disk, free ports per range
//!
//! Survivors are ranked most-free first so spare capacity spreads evenly.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use hostpool_state::{Disk, Host, HostReservations, HostStatus, labels};
use tracing::trace;

use crate::ports::pick_ports;
use crate::request::{AllocRequirement, AllocStrategy, DiskRequirement};

/// A host together with the ports currently held on it.
#[derive(Debug, Clone)]
pub struct HostSlot {
    pub host: Host,
    pub held_ports: BTreeSet<u16>,
}

impl HostSlot {
    pub fn new(host: Host, held: &HostReservations) -> Self {
        Self {
            host,
            held_ports: held.reserved_ports(),
        }
    }

    /// Whether `key` names this host by ID or IP.
    pub fn is_named(&self, key: &str) -> bool {
        !key.is_empty() && (self.host.id == key || self.host.ip == key)
    }
}

/// Why a host was not a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rejection {
    NotOnline,
    Reserved,
    Excluded,
    Unavailable,
    NotLoadless,
    Location,
    Filter,
    Compute,
    Disk,
    Ports,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rejection::NotOnline => "not online",
            Rejection::Reserved => "reserved",
            Rejection::Excluded => "excluded",
            Rejection::Unavailable => "exhausted or exclusive",
            Rejection::NotLoadless => "not loadless",
            Rejection::Location => "location mismatch",
            Rejection::Filter => "filter mismatch",
            Rejection::Compute => "insufficient compute",
            Rejection::Disk => "no qualifying disk",
            Rejection::Ports => "insufficient ports",
        };
        f.write_str(s)
    }
}

/// Check whether a host can satisfy one instance of `req`.
///
/// `excluded` holds host IDs already granted earlier in the batch.
pub fn check_eligibility(
    slot: &HostSlot,
    req: &AllocRequirement,
    excluded: &HashSet<String>,
) -> Result<(), Rejection> {
    let host = &slot.host;

    if host.status != HostStatus::Online {
        return Err(Rejection::NotOnline);
    }
    if host.reserved {
        return Err(Rejection::Reserved);
    }
    if excluded.contains(&host.id) || req.host_excluded.hosts.iter().any(|h| slot.is_named(h)) {
        return Err(Rejection::Excluded);
    }
    if req.require.exclusive {
        if !host.is_loadless() {
            return Err(Rejection::NotLoadless);
        }
    } else if !host.is_available() {
        return Err(Rejection::Unavailable);
    }

    if !location_matches(slot, req) {
        return Err(Rejection::Location);
    }
    let filter = &req.host_filter;
    if filter.arch.is_some_and(|arch| arch != host.arch)
        || !labels::matches(host.traits, filter.trait_mask())
    {
        return Err(Rejection::Filter);
    }

    let compute = req.require.compute_req;
    if host.free_cpu_cores < compute.cpu_cores || host.free_memory < compute.memory {
        return Err(Rejection::Compute);
    }
    if req.require.disk_req.need_disk && qualifying_disk(host, &req.require.disk_req).is_none() {
        return Err(Rejection::Disk);
    }

    // Ranges may overlap, so earlier picks count against later ones.
    let mut held = slot.held_ports.clone();
    for port_req in &req.require.port_req {
        let picked = pick_ports(&held, port_req).ok_or(Rejection::Ports)?;
        held.extend(picked);
    }

    Ok(())
}

fn location_matches(slot: &HostSlot, req: &AllocRequirement) -> bool {
    let host = &slot.host;
    let loc = &req.location;
    match req.strategy {
        AllocStrategy::RandomRack | AllocStrategy::DiffRackBestEffort => {
            host.region == loc.region && host.zone == loc.zone
        }
        AllocStrategy::UserSpecifyRack => {
            host.region == loc.region && host.zone == loc.zone && host.rack == loc.rack
        }
        AllocStrategy::UserSpecifyHost => slot.is_named(&loc.host),
    }
}

/// The smallest available disk that satisfies `req`, ties broken by path.
pub fn qualifying_disk<'a>(host: &'a Host, req: &DiskRequirement) -> Option<&'a Disk> {
    host.available_disks()
        .filter(|d| d.capacity >= req.capacity)
        .filter(|d| req.disk_type.is_none_or(|t| t == d.disk_type))
        .min_by(|a, b| a.capacity.cmp(&b.capacity).then_with(|| a.path.cmp(&b.path)))
}

/// Eligible slot indices, best first: most free cores, then most free
/// memory, then host ID.
pub fn rank_candidates(
    slots: &[HostSlot],
    req: &AllocRequirement,
    excluded: &HashSet<String>,
) -> Vec<usize> {
    let mut ranked: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| match check_eligibility(slot, req, excluded) {
            Ok(()) => true,
            Err(reason) => {
                trace!(host_id = %slot.host.id, %reason, "host rejected");
                false
            }
        })
        .map(|(index, _)| index)
        .collect();

    ranked.sort_by(|&a, &b| {
        let (ha, hb) = (&slots[a].host, &slots[b].host);
        hb.free_cpu_cores
            .cmp(&ha.free_cpu_cores)
            .then_with(|| hb.free_memory.cmp(&ha.free_memory))
            .then_with(|| ha.id.cmp(&hb.id))
    });
    ranked
}

/// Count of rejected hosts per reason, e.g. `location mismatch: 3, insufficient compute: 1`.
pub fn rejection_summary(
    slots: &[HostSlot],
    req: &AllocRequirement,
    excluded: &HashSet<String>,
) -> String {
    let mut counts: BTreeMap<Rejection, usize> = BTreeMap::new();
    for slot in slots {
        if let Err(reason) = check_eligibility(slot, req, excluded) {
            *counts.entry(reason).or_default() += 1;
        }
    }
    if counts.is_empty() {
        return "no hosts rejected".to_string();
    }
    counts
        .iter()
        .map(|(reason, n)| format!("{reason}: {n}"))
        .collect::<Vec<_>>()
        .join(", ")
}
