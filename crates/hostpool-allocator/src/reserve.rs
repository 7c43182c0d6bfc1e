//! Reservation of one requirement's resources on one host.
//!
//! Works on a [`HostSlot`] from the working copy: counters, disk states and
//! held ports are updated in place, and the matching reservation records are
//! returned for the commit. The slot is re-checked first because earlier
//! grants in the same batch may have consumed it.

use std::collections::HashSet;

use hostpool_placement::{
    Applicant, AllocRequirement, ComputeRequirement, DiskResource, HostResource, HostSlot,
    Location, PortResource, Rejection, check_eligibility, pick_ports, qualifying_disk,
};
use hostpool_state::{
    DiskStatus, HostStat, Reservation, UsedCompute, UsedDisk, UsedPort, new_id,
};
use tracing::debug;

/// What one host grants for one requirement.
#[derive(Debug, Clone)]
pub struct Grant {
    pub resource: HostResource,
    pub records: Vec<Reservation>,
}

/// Reserve compute, a disk and ports for `req` on `slot`.
///
/// On error the slot is left unchanged.
pub fn reserve(
    slot: &mut HostSlot,
    req: &AllocRequirement,
    applicant: &Applicant,
    reqseq: usize,
    now: u64,
) -> Result<Grant, Rejection> {
    check_eligibility(slot, req, &HashSet::new())?;

    let require = &req.require;
    let host = &mut slot.host;
    let mut records = Vec::new();
    let record = |prefix: &str| (new_id(prefix), host.id.clone());

    // An exclusive grant takes everything that is left.
    let granted = if require.exclusive {
        ComputeRequirement {
            cpu_cores: host.free_cpu_cores,
            memory: host.free_memory,
        }
    } else {
        require.compute_req
    };
    if granted.cpu_cores > 0 || granted.memory > 0 {
        let (id, host_id) = record("cmp");
        records.push(Reservation::Compute(UsedCompute {
            id,
            host_id,
            holder_id: applicant.holder_id.clone(),
            request_id: applicant.request_id.clone(),
            cpu_cores: granted.cpu_cores,
            memory: granted.memory,
            created_at: now,
        }));
    }

    let disk_res = if require.disk_req.need_disk {
        let disk = qualifying_disk(host, &require.disk_req).ok_or(Rejection::Disk)?;
        let (id, host_id) = record("dsk");
        records.push(Reservation::Disk(UsedDisk {
            id,
            host_id,
            holder_id: applicant.holder_id.clone(),
            request_id: applicant.request_id.clone(),
            disk_id: disk.id.clone(),
            capacity: disk.capacity,
            created_at: now,
        }));
        Some(DiskResource {
            disk_id: disk.id.clone(),
            disk_name: disk.name.clone(),
            path: disk.path.clone(),
            disk_type: disk.disk_type,
            capacity: disk.capacity,
        })
    } else {
        None
    };

    let mut held = slot.held_ports.clone();
    let mut port_res = Vec::with_capacity(require.port_req.len());
    for port_req in &require.port_req {
        let ports = pick_ports(&held, port_req).ok_or(Rejection::Ports)?;
        held.extend(ports.iter().copied());
        let (id, host_id) = record("prt");
        records.push(Reservation::Port(UsedPort {
            id,
            host_id,
            holder_id: applicant.holder_id.clone(),
            request_id: applicant.request_id.clone(),
            start: port_req.start,
            end: port_req.end,
            ports: ports.clone(),
            created_at: now,
        }));
        port_res.push(PortResource {
            start: port_req.start,
            end: port_req.end,
            ports,
        });
    }

    // Everything checked; apply to the working copy.
    host.free_cpu_cores -= granted.cpu_cores;
    host.free_memory -= granted.memory;
    if let Some(disk) = &disk_res {
        host.set_disk_status(&disk.disk_id, DiskStatus::Inused);
    }
    host.recompute_stat();
    if require.exclusive {
        host.stat = HostStat::Exclusive;
    }
    host.updated_at = now;
    slot.held_ports = held;

    let host = &slot.host;
    debug!(
        host_id = %host.id,
        holder_id = %applicant.holder_id,
        cpu_cores = granted.cpu_cores,
        memory = granted.memory,
        disk = disk_res.as_ref().map(|d| d.disk_id.as_str()),
        port_ranges = port_res.len(),
        stat = %host.stat,
        "resources reserved"
    );

    Ok(Grant {
        resource: HostResource {
            reqseq,
            location: Location {
                region: host.region.clone(),
                zone: host.zone.clone(),
                rack: host.rack.clone(),
                host: host.ip.clone(),
            },
            host_id: host.id.clone(),
            host_name: host.host_name.clone(),
            host_ip: host.ip.clone(),
            user_name: host.credential.user_name().to_string(),
            compute_res: granted,
            disk_res,
            port_res,
        },
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostpool_placement::*;
    use hostpool_state::*;
    use std::collections::BTreeSet;

    fn make_slot() -> HostSlot {
        HostSlot {
            host: Host {
                id: "h1".to_string(),
                ip: "10.0.0.1".to_string(),
                credential: Credential::Key {
                    user_name: "tidb".to_string(),
                    key_path: None,
                },
                host_name: "db-1".to_string(),
                arch: Arch::X86,
                os: "CentOS".to_string(),
                kernel: "5.10".to_string(),
                spec: "8C16G".to_string(),
                cpu_cores: 8,
                memory: 16,
                free_cpu_cores: 8,
                free_memory: 16,
                nic: "10GE".to_string(),
                region: "r1".to_string(),
                zone: "z1".to_string(),
                rack: "k1".to_string(),
                cluster_type: "TiDB".to_string(),
                purpose: Purpose::Storage,
                disk_type: DiskType::Ssd,
                reserved: false,
                traits: labels::host_traits("TiDB", Purpose::Storage, DiskType::Ssd).unwrap(),
                status: HostStatus::Online,
                stat: HostStat::Loadless,
                disks: vec![
                    Disk {
                        id: "d-big".to_string(),
                        host_id: "h1".to_string(),
                        name: "sdc".to_string(),
                        capacity: 2000,
                        path: "/data2".to_string(),
                        disk_type: DiskType::Ssd,
                        status: DiskStatus::Available,
                    },
                    Disk {
                        id: "d-small".to_string(),
                        host_id: "h1".to_string(),
                        name: "sdb".to_string(),
                        capacity: 500,
                        path: "/data1".to_string(),
                        disk_type: DiskType::Ssd,
                        status: DiskStatus::Available,
                    },
                ],
                created_at: 0,
                updated_at: 0,
                deleted_at: None,
                revision: 3,
            },
            held_ports: BTreeSet::from([10000]),
        }
    }

    fn applicant() -> Applicant {
        Applicant {
            holder_id: "cluster-a".to_string(),
            request_id: "req-1".to_string(),
        }
    }

    fn requirement() -> AllocRequirement {
        AllocRequirement {
            location: Location {
                region: "r1".to_string(),
                zone: "z1".to_string(),
                ..Default::default()
            },
            require: Requirement {
                exclusive: false,
                disk_req: DiskRequirement {
                    need_disk: true,
                    capacity: 100,
                    disk_type: None,
                },
                compute_req: ComputeRequirement {
                    cpu_cores: 2,
                    memory: 4,
                },
                port_req: vec![PortRequirement {
                    start: 10000,
                    end: 10010,
                    port_cnt: 2,
                }],
            },
            count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn reserves_compute_smallest_disk_and_ports() {
        let mut slot = make_slot();
        let grant = reserve(&mut slot, &requirement(), &applicant(), 0, 1000).unwrap();

        assert_eq!(slot.host.free_cpu_cores, 6);
        assert_eq!(slot.host.free_memory, 12);
        assert_eq!(slot.host.stat, HostStat::Inused);
        assert_eq!(slot.host.disk("d-small").unwrap().status, DiskStatus::Inused);
        assert_eq!(slot.host.disk("d-big").unwrap().status, DiskStatus::Available);
        assert_eq!(slot.held_ports, BTreeSet::from([10000, 10001, 10002]));
        // Revision is only bumped by the store.
        assert_eq!(slot.host.revision, 3);

        let res = &grant.resource;
        assert_eq!(res.user_name, "tidb");
        assert_eq!(res.disk_res.as_ref().unwrap().path, "/data1");
        assert_eq!(res.port_res[0].ports, vec![10001, 10002]);
        assert_eq!(grant.records.len(), 3);
        assert!(grant.records.iter().all(|r| r.holder_id() == "cluster-a" && r.host_id() == "h1"));
    }

    #[test]
    fn exclusive_takes_all_compute() {
        let mut slot = make_slot();
        let mut req = requirement();
        req.require.exclusive = true;
        let grant = reserve(&mut slot, &req, &applicant(), 0, 1000).unwrap();

        assert_eq!(grant.resource.compute_res.cpu_cores, 8);
        assert_eq!(grant.resource.compute_res.memory, 16);
        assert_eq!(slot.host.free_cpu_cores, 0);
        assert_eq!(slot.host.stat, HostStat::Exclusive);
    }

    #[test]
    fn failure_leaves_slot_unchanged() {
        let mut slot = make_slot();
        let before = slot.clone();
        let mut req = requirement();
        req.require.port_req[0].port_cnt = 20;

        assert_eq!(
            reserve(&mut slot, &req, &applicant(), 0, 1000).unwrap_err(),
            Rejection::Ports
        );
        assert_eq!(slot.host, before.host);
        assert_eq!(slot.held_ports, before.held_ports);
    }

    #[test]
    fn compute_free_requirement_writes_no_compute_record() {
        let mut slot = make_slot();
        let mut req = requirement();
        req.require.compute_req = ComputeRequirement::default();
        req.require.disk_req.need_disk = false;
        let grant = reserve(&mut slot, &req, &applicant(), 4, 1000).unwrap();

        assert_eq!(grant.resource.reqseq, 4);
        assert_eq!(grant.records.len(), 1);
        assert!(matches!(grant.records[0], Reservation::Port(_)));
        assert_eq!(slot.host.stat, HostStat::Loadless);
    }
}
