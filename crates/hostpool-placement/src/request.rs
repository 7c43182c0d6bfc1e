//! Allocation and recycle request/response types.
//!
//! These are the wire shapes callers hand to the pool. Enum-valued filter
//! fields reuse the inventory's closed label sets, so an unknown arch or disk
//! type is rejected while decoding.

use hostpool_state::{Arch, DiskType, Purpose, labels};
use serde::{Deserialize, Serialize};

/// Who is asking: the holder (cluster) and the operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applicant {
    pub holder_id: String,
    pub request_id: String,
}

/// Failure-domain coordinates. Empty strings mean "unspecified".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub region: String,
    pub zone: String,
    pub rack: String,
    /// Host ID or IP, only for `UserSpecifyHost`.
    pub host: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Excluded {
    /// Host IDs or IPs never to be granted.
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub arch: Option<Arch>,
    pub purpose: Option<Purpose>,
    pub disk_type: Option<DiskType>,
}

impl Filter {
    /// Trait bits every matching host must carry.
    pub fn trait_mask(&self) -> u64 {
        let purpose = self
            .purpose
            .and_then(|p| labels::label_bit(p.as_str()))
            .unwrap_or(0);
        let disk = self
            .disk_type
            .and_then(|d| labels::label_bit(d.as_str()))
            .unwrap_or(0);
        purpose | disk
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeRequirement {
    pub cpu_cores: u32,
    /// Memory in GB.
    pub memory: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskRequirement {
    pub need_disk: bool,
    /// Minimum disk capacity in GB; 0 accepts any disk.
    pub capacity: u32,
    /// Required disk type; `None` accepts any.
    pub disk_type: Option<DiskType>,
}

/// `port_cnt` free ports from the inclusive range `[start, end]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRequirement {
    pub start: u16,
    pub end: u16,
    pub port_cnt: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirement {
    /// Grant whole, otherwise unused hosts to a single holder.
    pub exclusive: bool,
    pub disk_req: DiskRequirement,
    pub compute_req: ComputeRequirement,
    pub port_req: Vec<PortRequirement>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocStrategy {
    /// Requires region and zone; every host on a different rack.
    #[default]
    RandomRack,
    /// Requires region and zone; spreads across racks, repeating when needed.
    DiffRackBestEffort,
    /// Requires region, zone and rack; hosts within that rack.
    UserSpecifyRack,
    /// The single host named by `location.host`.
    UserSpecifyHost,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocRequirement {
    pub location: Location,
    pub host_excluded: Excluded,
    pub host_filter: Filter,
    pub require: Requirement,
    pub strategy: AllocStrategy,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocReq {
    pub applicant: Applicant,
    pub requires: Vec<AllocRequirement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocRequest {
    pub batch_requests: Vec<AllocReq>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskResource {
    pub disk_id: String,
    pub disk_name: String,
    pub path: String,
    pub disk_type: DiskType,
    pub capacity: u32,
}

/// Ports granted from (or returned to) one range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortResource {
    pub start: u16,
    pub end: u16,
    pub ports: Vec<u16>,
}

/// Everything granted on one host for one requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResource {
    /// Index of the requirement within its `AllocReq`.
    pub reqseq: usize,
    pub location: Location,
    pub host_id: String,
    pub host_name: String,
    pub host_ip: String,
    pub user_name: String,
    pub compute_res: ComputeRequirement,
    pub disk_res: Option<DiskResource>,
    pub port_res: Vec<PortResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocRsp {
    pub results: Vec<HostResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocResponse {
    pub batch_results: Vec<AllocRsp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecycleType {
    /// Everything held by `cluster_id`.
    Cluster,
    /// Everything granted by `request_id`.
    Operate,
    /// The given compute amount and ports on one host.
    Compute,
    /// The given disk on one host.
    Disk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecycleRequire {
    pub recycle_type: RecycleType,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub compute_req: ComputeRequirement,
    #[serde(default)]
    pub port_req: Vec<PortResource>,
    #[serde(default)]
    pub disk_req: Option<DiskResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecycleRequest {
    pub recycle_reqs: Vec<RecycleRequire>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_decodes_with_defaults() {
        let req: AllocRequirement = serde_json::from_str(
            r#"{
                "location": {"region": "r1", "zone": "z1"},
                "host_filter": {"arch": "X86", "disk_type": "nvme-ssd"},
                "require": {"compute_req": {"cpu_cores": 4, "memory": 8}},
                "strategy": "DiffRackBestEffort",
                "count": 3
            }"#,
        )
        .unwrap();

        assert_eq!(req.location.rack, "");
        assert_eq!(req.host_filter.arch, Some(Arch::X86));
        assert_eq!(req.require.compute_req.memory, 8);
        assert!(!req.require.disk_req.need_disk);
        assert_eq!(req.strategy, AllocStrategy::DiffRackBestEffort);
    }

    #[test]
    fn unknown_filter_label_is_rejected() {
        let err = serde_json::from_str::<Filter>(r#"{"arch": "sparc"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn trait_mask_covers_purpose_and_disk_type() {
        let filter = Filter {
            arch: Some(Arch::Arm64),
            purpose: Some(Purpose::Storage),
            disk_type: Some(DiskType::Ssd),
        };
        let mask = filter.trait_mask();
        assert_eq!(labels::labels_of(mask), vec!["Storage", "ssd"]);
        assert_eq!(Filter::default().trait_mask(), 0);
    }

    #[test]
    fn recycle_require_decodes_minimal() {
        let r: RecycleRequire =
            serde_json::from_str(r#"{"recycle_type": "Cluster", "cluster_id": "c1"}"#).unwrap();
        assert_eq!(r.recycle_type, RecycleType::Cluster);
        assert!(r.disk_req.is_none());
        assert!(r.port_req.is_empty());
    }
}
