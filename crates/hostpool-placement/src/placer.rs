//! Strategy selection. Turns ranked candidates into a host choice.
//!
//! Given the working view of the inventory and one requirement, the placer
//! decides which hosts receive the grant:
//! 1. `RandomRack`: one host per rack, `count` distinct racks or nothing
//! 2. `DiffRackBestEffort`: round-robin across racks, repeating when short
//! 3. `UserSpecifyRack`: the best `count` hosts of one rack
//! 4. `UserSpecifyHost`: exactly the named host

use std::collections::HashSet;

use tracing::debug;

use crate::error::{PlacementError, PlacementResult};
use crate::request::{AllocRequirement, AllocStrategy};
use crate::scorer::{HostSlot, check_eligibility, rank_candidates, rejection_summary};

/// Select slot indices for `req`, in grant order.
///
/// `excluded` holds host IDs that may not be chosen (already granted in the
/// batch under the configured isolation scope).
pub fn select_hosts(
    slots: &[HostSlot],
    req: &AllocRequirement,
    excluded: &HashSet<String>,
) -> PlacementResult<Vec<usize>> {
    validate(req)?;
    let wanted = req.count as usize;
    let ranked = rank_candidates(slots, req, excluded);

    let chosen = match req.strategy {
        AllocStrategy::RandomRack => {
            let racks = group_by_rack(slots, &ranked);
            if racks.len() < wanted {
                return Err(insufficient(slots, req, excluded, racks.len(), "distinct racks"));
            }
            racks.iter().take(wanted).map(|rack| rack[0]).collect()
        }
        AllocStrategy::DiffRackBestEffort => {
            if ranked.len() < wanted {
                return Err(insufficient(slots, req, excluded, ranked.len(), "eligible hosts"));
            }
            round_robin(&group_by_rack(slots, &ranked), wanted)
        }
        AllocStrategy::UserSpecifyRack => {
            if ranked.len() < wanted {
                return Err(insufficient(slots, req, excluded, ranked.len(), "eligible hosts in rack"));
            }
            ranked[..wanted].to_vec()
        }
        AllocStrategy::UserSpecifyHost => {
            let Some(index) = slots.iter().position(|s| s.is_named(&req.location.host)) else {
                return Err(PlacementError::Insufficient {
                    wanted: req.count,
                    found: 0,
                    reason: format!("host {} not found", req.location.host),
                });
            };
            if let Err(reason) = check_eligibility(&slots[index], req, excluded) {
                return Err(PlacementError::Insufficient {
                    wanted: req.count,
                    found: 0,
                    reason: format!("host {} is {reason}", req.location.host),
                });
            }
            vec![index]
        }
    };

    debug!(
        strategy = ?req.strategy,
        count = req.count,
        candidates = ranked.len(),
        hosts = ?chosen.iter().map(|&i| slots[i].host.id.as_str()).collect::<Vec<_>>(),
        "hosts selected"
    );
    Ok(chosen)
}

fn validate(req: &AllocRequirement) -> PlacementResult<()> {
    if req.count == 0 {
        return Err(PlacementError::Invalid("count must be at least 1".to_string()));
    }
    let loc = &req.location;
    match req.strategy {
        AllocStrategy::RandomRack | AllocStrategy::DiffRackBestEffort => {
            if loc.region.is_empty() || loc.zone.is_empty() {
                return Err(PlacementError::Invalid(format!(
                    "{:?} requires region and zone",
                    req.strategy
                )));
            }
        }
        AllocStrategy::UserSpecifyRack => {
            if loc.region.is_empty() || loc.zone.is_empty() || loc.rack.is_empty() {
                return Err(PlacementError::Invalid(
                    "UserSpecifyRack requires region, zone and rack".to_string(),
                ));
            }
        }
        AllocStrategy::UserSpecifyHost => {
            if loc.host.is_empty() {
                return Err(PlacementError::Invalid(
                    "UserSpecifyHost requires location.host".to_string(),
                ));
            }
            if req.count != 1 {
                return Err(PlacementError::Invalid(format!(
                    "UserSpecifyHost grants exactly one host, got count {}",
                    req.count
                )));
            }
        }
    }
    for port_req in &req.require.port_req {
        if port_req.start > port_req.end || port_req.port_cnt == 0 {
            return Err(PlacementError::Invalid(format!(
                "port range [{}, {}] with count {} is empty",
                port_req.start, port_req.end, port_req.port_cnt
            )));
        }
    }
    Ok(())
}

/// Group ranked indices by rack. Racks appear in order of their best host.
fn group_by_rack(slots: &[HostSlot], ranked: &[usize]) -> Vec<Vec<usize>> {
    let mut racks: Vec<(&str, Vec<usize>)> = Vec::new();
    for &index in ranked {
        let rack = slots[index].host.rack.as_str();
        match racks.iter_mut().find(|(name, _)| *name == rack) {
            Some((_, members)) => members.push(index),
            None => racks.push((rack, vec![index])),
        }
    }
    racks.into_iter().map(|(_, members)| members).collect()
}

/// Take the n-th best host of every rack before any (n+1)-th.
fn round_robin(racks: &[Vec<usize>], wanted: usize) -> Vec<usize> {
    let deepest = racks.iter().map(Vec::len).max().unwrap_or(0);
    (0..deepest)
        .flat_map(|depth| racks.iter().filter_map(move |rack| rack.get(depth).copied()))
        .take(wanted)
        .collect()
}

fn insufficient(
    slots: &[HostSlot],
    req: &AllocRequirement,
    excluded: &HashSet<String>,
    found: usize,
    what: &str,
) -> PlacementError {
    PlacementError::Insufficient {
        wanted: req.count,
        found,
        reason: format!("not enough {what} ({})", rejection_summary(slots, req, excluded)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::*;
    use hostpool_state::*;

    fn make_slot(id: &str, rack: &str, free_cores: u32) -> HostSlot {
        let mut host = Host {
            id: id.to_string(),
            ip: format!("192.168.0.{}", id.trim_start_matches('h')),
            credential: Credential::Password {
                user_name: "root".to_string(),
                password: "pw".to_string(),
            },
            host_name: id.to_string(),
            arch: Arch::X86,
            os: "CentOS".to_string(),
            kernel: "5.10".to_string(),
            spec: "16C32G".to_string(),
            cpu_cores: 16,
            memory: 32,
            free_cpu_cores: free_cores,
            free_memory: 32,
            nic: "10GE".to_string(),
            region: "r1".to_string(),
            zone: "z1".to_string(),
            rack: rack.to_string(),
            cluster_type: "TiDB".to_string(),
            purpose: Purpose::General,
            disk_type: DiskType::NvmeSsd,
            reserved: false,
            traits: labels::host_traits("TiDB", Purpose::General, DiskType::NvmeSsd).unwrap(),
            status: HostStatus::Online,
            stat: HostStat::Loadless,
            disks: vec![Disk {
                id: format!("{id}-d1"),
                host_id: id.to_string(),
                name: "nvme0n1".to_string(),
                capacity: 1000,
                path: "/data1".to_string(),
                disk_type: DiskType::NvmeSsd,
                status: DiskStatus::Available,
            }],
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            revision: 1,
        };
        host.recompute_stat();
        HostSlot::new(host, &HostReservations::default())
    }

    fn req(strategy: AllocStrategy, count: u32) -> AllocRequirement {
        AllocRequirement {
            location: Location {
                region: "r1".to_string(),
                zone: "z1".to_string(),
                rack: "k1".to_string(),
                host: String::new(),
            },
            require: Requirement {
                compute_req: ComputeRequirement {
                    cpu_cores: 2,
                    memory: 4,
                },
                ..Default::default()
            },
            strategy,
            count,
            ..Default::default()
        }
    }

    fn ids(slots: &[HostSlot], chosen: &[usize]) -> Vec<String> {
        chosen.iter().map(|&i| slots[i].host.id.clone()).collect()
    }

    fn racks(slots: &[HostSlot], chosen: &[usize]) -> Vec<String> {
        chosen.iter().map(|&i| slots[i].host.rack.clone()).collect()
    }

    #[test]
    fn random_rack_never_repeats_a_rack() {
        let slots = vec![
            make_slot("h1", "k1", 16),
            make_slot("h2", "k1", 16),
            make_slot("h3", "k2", 8),
            make_slot("h4", "k3", 4),
        ];
        let chosen = select_hosts(&slots, &req(AllocStrategy::RandomRack, 3), &HashSet::new()).unwrap();
        let mut got = racks(&slots, &chosen);
        got.sort();
        assert_eq!(got, vec!["k1", "k2", "k3"]);
        assert_eq!(ids(&slots, &chosen)[0], "h1");
    }

    #[test]
    fn random_rack_fails_without_enough_racks() {
        let slots = vec![make_slot("h1", "k1", 16), make_slot("h2", "k1", 16)];
        let err = select_hosts(&slots, &req(AllocStrategy::RandomRack, 2), &HashSet::new()).unwrap_err();
        assert!(matches!(err, PlacementError::Insufficient { wanted: 2, found: 1, .. }));
    }

    #[test]
    fn best_effort_repeats_racks_when_short() {
        let slots = vec![
            make_slot("h1", "k1", 16),
            make_slot("h2", "k1", 12),
            make_slot("h3", "k1", 10),
            make_slot("h4", "k2", 8),
        ];
        let chosen =
            select_hosts(&slots, &req(AllocStrategy::DiffRackBestEffort, 3), &HashSet::new()).unwrap();
        assert_eq!(ids(&slots, &chosen), vec!["h1", "h4", "h2"]);
    }

    #[test]
    fn best_effort_fails_when_too_few_hosts() {
        let slots = vec![make_slot("h1", "k1", 16)];
        let err = select_hosts(&slots, &req(AllocStrategy::DiffRackBestEffort, 2), &HashSet::new())
            .unwrap_err();
        assert!(matches!(err, PlacementError::Insufficient { found: 1, .. }));
    }

    #[test]
    fn user_specify_rack_stays_in_rack() {
        let slots = vec![
            make_slot("h1", "k1", 8),
            make_slot("h2", "k2", 16),
            make_slot("h3", "k1", 16),
        ];
        let chosen =
            select_hosts(&slots, &req(AllocStrategy::UserSpecifyRack, 2), &HashSet::new()).unwrap();
        assert_eq!(ids(&slots, &chosen), vec!["h3", "h1"]);

        let err = select_hosts(&slots, &req(AllocStrategy::UserSpecifyRack, 3), &HashSet::new())
            .unwrap_err();
        match err {
            PlacementError::Insufficient { reason, .. } => {
                assert!(reason.contains("location mismatch: 1"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn user_specify_host_by_ip() {
        let slots = vec![make_slot("h1", "k1", 16), make_slot("h2", "k2", 16)];
        let mut r = req(AllocStrategy::UserSpecifyHost, 1);
        r.location.host = "192.168.0.2".to_string();
        let chosen = select_hosts(&slots, &r, &HashSet::new()).unwrap();
        assert_eq!(ids(&slots, &chosen), vec!["h2"]);

        let batch = HashSet::from(["h2".to_string()]);
        let err = select_hosts(&slots, &r, &batch).unwrap_err();
        assert!(err.to_string().contains("excluded"), "{err}");
    }

    #[test]
    fn user_specify_host_requires_count_one() {
        let mut r = req(AllocStrategy::UserSpecifyHost, 2);
        r.location.host = "h1".to_string();
        let err = select_hosts(&[], &r, &HashSet::new()).unwrap_err();
        assert!(matches!(err, PlacementError::Invalid(_)));
    }

    #[test]
    fn missing_location_is_invalid() {
        let mut r = req(AllocStrategy::RandomRack, 1);
        r.location.zone.clear();
        assert!(matches!(
            select_hosts(&[], &r, &HashSet::new()),
            Err(PlacementError::Invalid(_))
        ));

        let mut r = req(AllocStrategy::UserSpecifyRack, 1);
        r.location.rack.clear();
        assert!(matches!(
            select_hosts(&[], &r, &HashSet::new()),
            Err(PlacementError::Invalid(_))
        ));
    }

    #[test]
    fn empty_port_range_is_invalid() {
        let mut r = req(AllocStrategy::RandomRack, 1);
        r.require.port_req = vec![PortRequirement { start: 101, end: 100, port_cnt: 1 }];
        assert!(matches!(
            select_hosts(&[], &r, &HashSet::new()),
            Err(PlacementError::Invalid(_))
        ));

        r.require.port_req = vec![PortRequirement { start: 100, end: 100, port_cnt: 0 }];
        assert!(matches!(
            select_hosts(&[], &r, &HashSet::new()),
            Err(PlacementError::Invalid(_))
        ));
    }

    #[test]
    fn single_port_range_is_granted() {
        let slots = vec![make_slot("h1", "k1", 16)];
        let mut r = req(AllocStrategy::RandomRack, 1);
        r.require.port_req = vec![PortRequirement { start: 65535, end: 65535, port_cnt: 1 }];
        let chosen = select_hosts(&slots, &r, &HashSet::new()).unwrap();
        assert_eq!(ids(&slots, &chosen), vec!["h1"]);
    }

    #[test]
    fn zero_count_is_invalid() {
        assert!(matches!(
            select_hosts(&[], &req(AllocStrategy::RandomRack, 0), &HashSet::new()),
            Err(PlacementError::Invalid(_))
        ));
    }
}
