//! Normalized host records accepted by import.
//!
//! Enum fields arrive as strings so that a bad value is reported as a
//! validation error naming the host, rather than failing the whole document.

use std::collections::HashSet;

use hostpool_state::{
    Arch, Credential, Disk, DiskStatus, DiskType, Host, HostStat, HostStatus, Purpose, labels,
    new_id,
};
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub name: String,
    /// GB.
    pub capacity: u32,
    pub path: String,
    /// Inherits the host's disk type when absent.
    #[serde(default)]
    pub disk_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    pub ip: String,
    pub credential: Credential,
    pub host_name: String,
    pub arch: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub spec: String,
    pub cpu_cores: u32,
    pub memory: u32,
    /// Defaults to `cpu_cores`.
    #[serde(default)]
    pub free_cpu_cores: Option<u32>,
    /// Defaults to `memory`.
    #[serde(default)]
    pub free_memory: Option<u32>,
    #[serde(default)]
    pub nic: String,
    pub region: String,
    pub zone: String,
    pub rack: String,
    pub cluster_type: String,
    pub purpose: String,
    pub disk_type: String,
    #[serde(default)]
    pub reserved: bool,
    pub disks: Vec<DiskSpec>,
}

impl HostSpec {
    /// Validate and build a fresh `Online` host with new host and disk ids.
    pub fn into_host(self, now: u64) -> PoolResult<Host> {
        let name = if self.ip.is_empty() {
            self.host_name.clone()
        } else {
            self.ip.clone()
        };
        let invalid = |msg: String| PoolError::Validation(format!("host {name}: {msg}"));

        if self.ip.trim().is_empty() {
            return Err(invalid("ip is empty".into()));
        }
        if self.host_name.trim().is_empty() {
            return Err(invalid("host_name is empty".into()));
        }
        if self.credential.user_name().is_empty() {
            return Err(invalid("user_name is empty".into()));
        }
        for (field, value) in [("region", &self.region), ("zone", &self.zone), ("rack", &self.rack)] {
            if value.is_empty() {
                return Err(invalid(format!("{field} is empty")));
            }
            if value.contains(',') {
                return Err(invalid(format!("{field} {value:?} contains ','")));
            }
        }

        let arch = self.arch.parse::<Arch>().map_err(|e| invalid(format!("{e}")))?;
        let purpose = self.purpose.parse::<Purpose>().map_err(|e| invalid(format!("{e}")))?;
        let disk_type = self.disk_type.parse::<DiskType>().map_err(|e| invalid(format!("{e}")))?;
        let traits = labels::host_traits(&self.cluster_type, purpose, disk_type)
            .map_err(|e| invalid(format!("{e}")))?;

        if self.cpu_cores == 0 || self.memory == 0 {
            return Err(invalid("cpu_cores and memory must be positive".into()));
        }
        let free_cpu_cores = self.free_cpu_cores.unwrap_or(self.cpu_cores);
        let free_memory = self.free_memory.unwrap_or(self.memory);
        if free_cpu_cores > self.cpu_cores || free_memory > self.memory {
            return Err(invalid(format!(
                "free {free_cpu_cores}C/{free_memory}G exceeds total {}C/{}G",
                self.cpu_cores, self.memory
            )));
        }

        if self.disks.is_empty() {
            return Err(invalid("at least one disk is required".into()));
        }
        let id = new_id("host");
        let mut paths = HashSet::new();
        let mut disks = Vec::with_capacity(self.disks.len());
        for d in self.disks {
            if d.name.is_empty() || d.path.is_empty() {
                return Err(invalid("disk name and path must be set".into()));
            }
            if !paths.insert(d.path.clone()) {
                return Err(invalid(format!("duplicate disk path {}", d.path)));
            }
            if d.capacity == 0 {
                return Err(invalid(format!("disk {} has no capacity", d.path)));
            }
            let disk_type = match d.disk_type.as_deref() {
                None | Some("") => disk_type,
                Some(t) => t.parse::<DiskType>().map_err(|e| invalid(format!("disk {}: {e}", d.path)))?,
            };
            disks.push(Disk {
                id: new_id("disk"),
                host_id: id.clone(),
                name: d.name,
                capacity: d.capacity,
                path: d.path,
                disk_type,
                status: DiskStatus::Available,
            });
        }

        let mut host = Host {
            id,
            ip: self.ip,
            credential: self.credential,
            host_name: self.host_name,
            arch,
            os: self.os,
            kernel: self.kernel,
            spec: self.spec,
            cpu_cores: self.cpu_cores,
            memory: self.memory,
            free_cpu_cores,
            free_memory,
            nic: self.nic,
            region: self.region,
            zone: self.zone,
            rack: self.rack,
            cluster_type: self.cluster_type,
            purpose,
            disk_type,
            reserved: self.reserved,
            traits,
            status: HostStatus::Online,
            stat: HostStat::Loadless,
            disks,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            revision: 0,
        };
        host.recompute_stat();
        Ok(host)
    }
}
