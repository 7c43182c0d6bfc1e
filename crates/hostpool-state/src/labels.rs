//! Host trait labels.
//!
//! A host's `traits` field is a bit set over a fixed label table built from
//! its cluster type, purpose and disk type, so filters can match a host with
//! a single mask test instead of comparing strings.

use crate::error::{StateError, StateResult};
use crate::types::{DiskType, Purpose};

/// Label table. A label's bit is `1 << index`; the order is persisted and
/// must only ever be appended to.
const LABELS: &[&str] = &[
    // Cluster types.
    "TiDB",
    "DM",
    "TiDB-Cloud",
    "TiDB-Enterprise",
    // Purposes.
    "Compute",
    "Storage",
    "General",
    // Disk types.
    "nvme-ssd",
    "ssd",
    "sata",
];

/// Bit for a single label, or `None` if the label is unknown.
pub fn label_bit(label: &str) -> Option<u64> {
    LABELS
        .iter()
        .position(|l| *l == label)
        .map(|index| 1u64 << index)
}

/// Labels encoded in a trait set, in table order.
pub fn labels_of(traits: u64) -> Vec<&'static str> {
    LABELS
        .iter()
        .enumerate()
        .filter(|(index, _)| traits & (1u64 << index) != 0)
        .map(|(_, label)| *label)
        .collect()
}

/// Build the trait set of a host.
pub fn host_traits(cluster_type: &str, purpose: Purpose, disk_type: DiskType) -> StateResult<u64> {
    let cluster = label_bit(cluster_type).ok_or_else(|| {
        StateError::Invalid(format!("unknown cluster type {cluster_type:?}"))
    })?;
    let purpose = label_bit(purpose.as_str())
        .ok_or_else(|| StateError::Invalid(format!("purpose {purpose} has no label")))?;
    let disk = label_bit(disk_type.as_str())
        .ok_or_else(|| StateError::Invalid(format!("disk type {disk_type} has no label")))?;
    Ok(cluster | purpose | disk)
}

/// Whether every bit in `mask` is set in `traits`.
pub fn matches(traits: u64, mask: u64) -> bool {
    traits & mask == mask
}
