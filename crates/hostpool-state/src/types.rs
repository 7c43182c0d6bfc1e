//! Domain types for the hostpool inventory store.
//!
//! These types represent the persisted state of hosts, their disks, and the
//! reservation records that tie capacity on a host to the cluster holding
//! it. All types are serializable to/from JSON for storage in redb tables.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Unique identifier for a host.
pub type HostId = String;

/// Unique identifier for a disk (unique across hosts).
pub type DiskId = String;

/// Declares a closed enum whose variants have a fixed wire label, with
/// `as_str`, `Display` and a validating `FromStr`.
macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = StateError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(StateError::Invalid(format!(
                        "{} must be one of [{}], got {other:?}",
                        stringify!($name),
                        [$($label),+].join(" | "),
                    ))),
                }
            }
        }
    };
}

labelled_enum! {
    /// CPU architecture of a host.
    Arch {
        X86 => "X86",
        Arm64 => "ARM64",
    }
}

labelled_enum! {
    /// What a host is intended to run.
    Purpose {
        Compute => "Compute",
        Storage => "Storage",
        General => "General",
    }
}

labelled_enum! {
    /// Disk class of a host or a single disk.
    DiskType {
        NvmeSsd => "nvme-ssd",
        Ssd => "ssd",
        Sata => "sata",
    }
}

labelled_enum! {
    /// Administrative status. Only `Online` hosts are ever allocated.
    HostStatus {
        Online => "Online",
        Offline => "Offline",
        Deleted => "Deleted",
    }
}

labelled_enum! {
    /// Load classification, derived from free capacity and disk states.
    HostStat {
        Loadless => "Loadless",
        Inused => "Inused",
        Exhaust => "Exhaust",
        /// Granted to a single holder; never auto-selected.
        Exclusive => "Exclusive",
    }
}

labelled_enum! {
    /// Allocation state of a single disk.
    DiskStatus {
        Available => "Available",
        Inused => "Inused",
        Exhaust => "Exhaust",
    }
}

// ── Host ──────────────────────────────────────────────────────────

/// How the control plane logs into a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "auth", rename_all = "snake_case")]
pub enum Credential {
    Password { user_name: String, password: String },
    /// Key authentication. `None` uses the configured default key.
    Key {
        user_name: String,
        key_path: Option<String>,
    },
}

impl Credential {
    pub fn user_name(&self) -> &str {
        match self {
            Credential::Password { user_name, .. } | Credential::Key { user_name, .. } => user_name,
        }
    }
}

/// A disk attached to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub id: DiskId,
    pub host_id: HostId,
    /// Device name, e.g. `sdb` or `nvme0n1`.
    pub name: String,
    /// Capacity in GB.
    pub capacity: u32,
    /// Mount path, e.g. `/data1`. Unique per host.
    pub path: String,
    pub disk_type: DiskType,
    pub status: DiskStatus,
}

/// A physical or virtual machine in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub ip: String,
    pub credential: Credential,
    pub host_name: String,
    pub arch: Arch,
    pub os: String,
    pub kernel: String,
    /// Free-form spec string recorded at import, e.g. `8C16G`.
    pub spec: String,
    pub cpu_cores: u32,
    /// Memory in GB.
    pub memory: u32,
    pub free_cpu_cores: u32,
    pub free_memory: u32,
    /// Network class, e.g. `1GE` or `10GE`.
    pub nic: String,
    pub region: String,
    pub zone: String,
    pub rack: String,
    /// Product the host is dedicated to, e.g. `TiDB`.
    pub cluster_type: String,
    pub purpose: Purpose,
    pub disk_type: DiskType,
    /// Reserved hosts are never allocated, even when free.
    pub reserved: bool,
    /// Bit set of labels, see [`crate::labels`].
    pub traits: u64,
    pub status: HostStatus,
    pub stat: HostStat,
    pub disks: Vec<Disk>,
    /// Unix timestamp (seconds) of import.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last mutation.
    pub updated_at: u64,
    /// Unix timestamp (seconds) of soft deletion.
    pub deleted_at: Option<u64>,
    /// Optimistic-concurrency token, bumped by every committed mutation.
    pub revision: u64,
}

// ── Reservations ──────────────────────────────────────────────────

/// Cores and memory held on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedCompute {
    pub id: String,
    pub host_id: HostId,
    /// Cluster holding the reservation.
    pub holder_id: String,
    /// Allocation call that created it.
    pub request_id: String,
    pub cpu_cores: u32,
    pub memory: u32,
    pub created_at: u64,
}

/// A whole disk held on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedDisk {
    pub id: String,
    pub host_id: HostId,
    pub holder_id: String,
    pub request_id: String,
    pub disk_id: DiskId,
    pub capacity: u32,
    pub created_at: u64,
}

/// Concrete ports held on a host, picked from `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedPort {
    pub id: String,
    pub host_id: HostId,
    pub holder_id: String,
    pub request_id: String,
    pub start: u16,
    pub end: u16,
    pub ports: Vec<u16>,
    pub created_at: u64,
}

/// Any reservation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reservation {
    Compute(UsedCompute),
    Disk(UsedDisk),
    Port(UsedPort),
}

impl Reservation {
    pub fn id(&self) -> &str {
        match self {
            Reservation::Compute(r) => &r.id,
            Reservation::Disk(r) => &r.id,
            Reservation::Port(r) => &r.id,
        }
    }

    pub fn host_id(&self) -> &str {
        match self {
            Reservation::Compute(r) => &r.host_id,
            Reservation::Disk(r) => &r.host_id,
            Reservation::Port(r) => &r.host_id,
        }
    }

    pub fn holder_id(&self) -> &str {
        match self {
            Reservation::Compute(r) => &r.holder_id,
            Reservation::Disk(r) => &r.holder_id,
            Reservation::Port(r) => &r.holder_id,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Reservation::Compute(r) => &r.request_id,
            Reservation::Disk(r) => &r.request_id,
            Reservation::Port(r) => &r.request_id,
        }
    }

    /// Build the composite key for the record's table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.host_id(), self.id())
    }
}

/// All reservation records held on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostReservations {
    pub computes: Vec<UsedCompute>,
    pub disks: Vec<UsedDisk>,
    pub ports: Vec<UsedPort>,
}

impl HostReservations {
    pub fn is_empty(&self) -> bool {
        self.computes.is_empty() && self.disks.is_empty() && self.ports.is_empty()
    }

    /// Every port currently held on the host.
    pub fn reserved_ports(&self) -> BTreeSet<u16> {
        self.ports.iter().flat_map(|p| p.ports.iter().copied()).collect()
    }

    pub fn push(&mut self, reservation: Reservation) {
        match reservation {
            Reservation::Compute(r) => self.computes.push(r),
            Reservation::Disk(r) => self.disks.push(r),
            Reservation::Port(r) => self.ports.push(r),
        }
    }

    pub fn into_reservations(self) -> impl Iterator<Item = Reservation> {
        self.computes
            .into_iter()
            .map(Reservation::Compute)
            .chain(self.disks.into_iter().map(Reservation::Disk))
            .chain(self.ports.into_iter().map(Reservation::Port))
    }
}

/// Generate a fresh identifier, e.g. `host-1f0c…`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
