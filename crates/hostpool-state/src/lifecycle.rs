//! Host and disk lifecycle predicates.
//!
//! Pure logic over `status`, `stat`, free counters and disk states. `stat`
//! is never trusted as cached: every mutation of a host's counters or disks
//! must be followed by [`Host::recompute_stat`].

use crate::types::{Disk, DiskStatus, Host, HostStat, HostStatus};

impl Disk {
    pub fn is_available(&self) -> bool {
        self.status == DiskStatus::Available
    }
}

impl Host {
    /// Online and not fully consumed or exclusively held.
    pub fn is_available(&self) -> bool {
        self.status == HostStatus::Online
            && matches!(self.stat, HostStat::Loadless | HostStat::Inused)
    }

    /// Some of the host's capacity is held.
    pub fn is_inused(&self) -> bool {
        matches!(self.stat, HostStat::Inused | HostStat::Exhaust)
    }

    /// No disk left, or no cores, or no memory.
    pub fn is_exhaust(&self) -> bool {
        !self.disks.iter().any(Disk::is_available) || self.free_cpu_cores == 0 || self.free_memory == 0
    }

    /// Nothing on the host is held.
    pub fn is_loadless(&self) -> bool {
        let disks_idle = self.disks.iter().all(Disk::is_available);
        disks_idle && self.free_cpu_cores == self.cpu_cores && self.free_memory == self.memory
    }

    /// Load classification implied by the current counters and disks.
    pub fn derive_stat(&self) -> HostStat {
        if self.is_loadless() {
            HostStat::Loadless
        } else if self.is_exhaust() {
            HostStat::Exhaust
        } else {
            HostStat::Inused
        }
    }

    /// Recalculate `stat`. `Exclusive` sticks until the host is loadless again.
    pub fn recompute_stat(&mut self) {
        if self.stat == HostStat::Exclusive && !self.is_loadless() {
            return;
        }
        self.stat = self.derive_stat();
    }

    /// Set the status of one disk. Returns false if the disk is not on this host.
    pub fn set_disk_status(&mut self, disk_id: &str, status: DiskStatus) -> bool {
        match self.disks.iter_mut().find(|d| d.id == disk_id) {
            Some(disk) => {
                disk.status = status;
                true
            }
            None => false,
        }
    }

    pub fn disk(&self, disk_id: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.id == disk_id)
    }

    pub fn available_disks(&self) -> impl Iterator<Item = &Disk> {
        self.disks.iter().filter(|d| d.is_available())
    }

    /// `free <= total` for both cores and memory.
    pub fn counters_consistent(&self) -> bool {
        self.free_cpu_cores <= self.cpu_cores && self.free_memory <= self.memory
    }
}
