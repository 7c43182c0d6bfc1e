//! Free capacity summary.

use hostpool_placement::Location;
use hostpool_state::Host;
use serde::{Deserialize, Serialize};

use crate::filter::{DiskFilter, HostFilter, location_matches};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stocks {
    pub free_host_count: u32,
    pub free_cpu_cores: u64,
    /// GB.
    pub free_memory: u64,
    pub free_disk_count: u32,
    /// GB.
    pub free_disk_capacity: u64,
}

/// Sum what is still allocatable on matching hosts. Reserved, offline and
/// fully held hosts contribute nothing.
pub fn count_stocks(
    hosts: &[Host],
    location: &Location,
    host_filter: &HostFilter,
    disk_filter: &DiskFilter,
) -> Stocks {
    let mut stocks = Stocks::default();
    for host in hosts
        .iter()
        .filter(|h| h.is_available() && !h.reserved)
        .filter(|h| location_matches(location, h) && host_filter.matches(h))
    {
        stocks.free_host_count += 1;
        stocks.free_cpu_cores += u64::from(host.free_cpu_cores);
        stocks.free_memory += u64::from(host.free_memory);
        for disk in host.disks.iter().filter(|d| disk_filter.matches(d)) {
            stocks.free_disk_count += 1;
            stocks.free_disk_capacity += u64::from(disk.capacity);
        }
    }
    stocks
}
