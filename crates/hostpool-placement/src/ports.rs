//! Free port picking.

use std::collections::BTreeSet;

use crate::request::PortRequirement;

/// Pick the lowest `port_cnt` ports in `[start, end]` not already in `held`.
///
/// Returns `None` if the range cannot satisfy the count.
pub fn pick_ports(held: &BTreeSet<u16>, req: &PortRequirement) -> Option<Vec<u16>> {
    let wanted = usize::from(req.port_cnt);
    let picked: Vec<u16> = (req.start..=req.end)
        .filter(|port| !held.contains(port))
        .take(wanted)
        .collect();
    (picked.len() == wanted).then_some(picked)
}
