//! Query filters and paging.

use std::ops::Range;

use hostpool_placement::Location;
use hostpool_state::{Arch, Disk, DiskStatus, DiskType, Host, HostStat, HostStatus, Purpose};
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Host predicate. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostFilter {
    pub host_id: Option<String>,
    pub purpose: Option<Purpose>,
    /// `Deleted` hosts only match when asked for explicitly.
    pub status: Option<HostStatus>,
    pub stat: Option<HostStat>,
    pub arch: Option<Arch>,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub rack: Option<String>,
    pub reserved: Option<bool>,
}

impl HostFilter {
    pub fn matches(&self, host: &Host) -> bool {
        let status_ok = match self.status {
            Some(status) => host.status == status,
            None => host.status != HostStatus::Deleted,
        };
        status_ok
            && self.host_id.as_ref().is_none_or(|id| *id == host.id)
            && self.purpose.is_none_or(|p| p == host.purpose)
            && self.stat.is_none_or(|s| s == host.stat)
            && self.arch.is_none_or(|a| a == host.arch)
            && self.region.as_ref().is_none_or(|r| *r == host.region)
            && self.zone.as_ref().is_none_or(|z| *z == host.zone)
            && self.rack.as_ref().is_none_or(|r| *r == host.rack)
            && self.reserved.is_none_or(|r| r == host.reserved)
    }
}

/// Disk predicate used by stock counting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskFilter {
    pub disk_type: Option<DiskType>,
    /// Minimum capacity in GB.
    pub min_capacity: Option<u32>,
    /// Defaults to `Available`.
    pub status: Option<DiskStatus>,
}

impl DiskFilter {
    pub fn matches(&self, disk: &Disk) -> bool {
        disk.status == self.status.unwrap_or(DiskStatus::Available)
            && self.disk_type.is_none_or(|t| t == disk.disk_type)
            && self.min_capacity.is_none_or(|c| disk.capacity >= c)
    }
}

/// Empty fields match everything; `host` matches an id or an IP.
pub fn location_matches(location: &Location, host: &Host) -> bool {
    (location.region.is_empty() || location.region == host.region)
        && (location.zone.is_empty() || location.zone == host.zone)
        && (location.rack.is_empty() || location.rack == host.rack)
        && (location.host.is_empty() || location.host == host.id || location.host == host.ip)
}

/// 1-based page of a sorted result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

impl Page {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// Index range of this page in a result of `len` items.
    pub fn window(&self, len: usize) -> PoolResult<Range<usize>> {
        if self.page == 0 || self.page_size == 0 {
            return Err(PoolError::Validation(format!(
                "page and page_size start at 1, got page {} size {}",
                self.page, self.page_size
            )));
        }
        let size = self.page_size as usize;
        let start = (self.page as usize - 1).saturating_mul(size).min(len);
        let end = start.saturating_add(size).min(len);
        Ok(start..end)
    }
}
