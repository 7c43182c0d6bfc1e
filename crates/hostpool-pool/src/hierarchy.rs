//! Failure-domain tree: region, zone, rack, host.

use std::collections::BTreeMap;

use hostpool_state::Host;
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HierarchyLevel {
    Root,
    Region,
    Zone,
    Rack,
    Host,
}

impl HierarchyLevel {
    fn below(self) -> Option<HierarchyLevel> {
        match self {
            HierarchyLevel::Root => Some(HierarchyLevel::Region),
            HierarchyLevel::Region => Some(HierarchyLevel::Zone),
            HierarchyLevel::Zone => Some(HierarchyLevel::Rack),
            HierarchyLevel::Rack => Some(HierarchyLevel::Host),
            HierarchyLevel::Host => None,
        }
    }

    fn descend(self, steps: u32) -> Option<HierarchyLevel> {
        (0..steps).try_fold(self, |level, _| level.below())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Comma-joined path, e.g. `r1,z1,k1`.
    pub code: String,
    /// Code of the parent node, empty at the top.
    pub prefix: String,
    pub name: String,
    pub level: HierarchyLevel,
    /// Matching hosts in this subtree.
    pub host_count: usize,
    pub sub_nodes: Vec<HierarchyNode>,
}

/// Build the tree of `hosts` whose top nodes sit at `level`, with `depth`
/// levels below them. The returned root holds the top nodes.
pub fn build_hierarchy(
    hosts: &[Host],
    level: HierarchyLevel,
    depth: u32,
) -> PoolResult<HierarchyNode> {
    if !matches!(
        level,
        HierarchyLevel::Region | HierarchyLevel::Zone | HierarchyLevel::Rack
    ) {
        return Err(PoolError::Validation(format!(
            "hierarchy must start at Region, Zone or Rack, got {level:?}"
        )));
    }
    let Some(last) = level.descend(depth) else {
        return Err(PoolError::Validation(format!(
            "depth {depth} below {level:?} goes past Host"
        )));
    };

    let members: Vec<&Host> = hosts.iter().collect();
    Ok(HierarchyNode {
        code: String::new(),
        prefix: String::new(),
        name: "root".to_string(),
        level: HierarchyLevel::Root,
        host_count: members.len(),
        sub_nodes: nodes_at(&members, level, last),
    })
}

fn nodes_at(hosts: &[&Host], level: HierarchyLevel, last: HierarchyLevel) -> Vec<HierarchyNode> {
    // code -> (name, prefix, members)
    let mut groups: BTreeMap<String, (String, String, Vec<&Host>)> = BTreeMap::new();
    for &host in hosts {
        let (name, prefix) = match level {
            HierarchyLevel::Root | HierarchyLevel::Region => (host.region.clone(), String::new()),
            HierarchyLevel::Zone => (host.zone.clone(), host.region.clone()),
            HierarchyLevel::Rack => (host.rack.clone(), format!("{},{}", host.region, host.zone)),
            HierarchyLevel::Host => (
                host.host_name.clone(),
                format!("{},{},{}", host.region, host.zone, host.rack),
            ),
        };
        let code = match level {
            HierarchyLevel::Host => format!("{prefix},{}", host.id),
            _ if prefix.is_empty() => name.clone(),
            _ => format!("{prefix},{name}"),
        };
        groups
            .entry(code)
            .or_insert_with(|| (name, prefix, Vec::new()))
            .2
            .push(host);
    }

    groups
        .into_iter()
        .map(|(code, (name, prefix, members))| {
            let sub_nodes = match level.below() {
                Some(next) if level < last => nodes_at(&members, next, last),
                _ => Vec::new(),
            };
            HierarchyNode {
                code,
                prefix,
                name,
                level,
                host_count: members.len(),
                sub_nodes,
            }
        })
        .collect()
}
