//! Batch allocation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use hostpool_core::{IsolationScope, OpContext};
use hostpool_placement::{
    AllocRsp, BatchAllocRequest, BatchAllocResponse, HostSlot, PlacementError, select_hosts,
};
use hostpool_state::{ChangeSet, HostInventory, HostReservations, Reservation, epoch_secs};
use tracing::{debug, info, warn};

use crate::error::{AllocError, AllocResult};
use crate::reserve::reserve;
use crate::working::{load_snapshot, with_store};

/// Allocation and recycling engine over a [`HostInventory`].
///
/// Holds no state besides the store handle; concurrent calls plan
/// independently and race only at commit.
#[derive(Clone)]
pub struct Allocator {
    pub(crate) store: Arc<dyn HostInventory>,
    isolation: IsolationScope,
}

impl Allocator {
    pub fn new(store: Arc<dyn HostInventory>, isolation: IsolationScope) -> Self {
        Self { store, isolation }
    }

    /// Grant every requirement of every request in `batch`, or nothing.
    pub async fn allocate(
        &self,
        ctx: &OpContext,
        batch: &BatchAllocRequest,
    ) -> AllocResult<BatchAllocResponse> {
        ctx.check()?;
        validate(batch)?;

        let snapshot = ctx.run(with_store(&self.store, load_snapshot)).await??;
        let mut held: HashMap<String, HostReservations> = HashMap::new();
        for r in snapshot.reservations {
            held.entry(r.host_id().to_string()).or_default().push(r);
        }
        let none = HostReservations::default();
        let mut slots: Vec<HostSlot> = snapshot
            .hosts
            .into_iter()
            .map(|host| {
                let records = held.get(&host.id).unwrap_or(&none);
                HostSlot::new(host, records)
            })
            .collect();

        let now = epoch_secs();
        let mut touched: BTreeSet<usize> = BTreeSet::new();
        let mut inserts: Vec<Reservation> = Vec::new();
        let mut excluded: HashSet<String> = HashSet::new();
        let mut response = BatchAllocResponse::default();

        for (b, alloc_req) in batch.batch_requests.iter().enumerate() {
            if self.isolation == IsolationScope::Request {
                excluded.clear();
            }
            let mut rsp = AllocRsp::default();

            for (r, requirement) in alloc_req.requires.iter().enumerate() {
                ctx.check()?;

                let chosen = select_hosts(&slots, requirement, &excluded).map_err(|e| match e {
                    PlacementError::Invalid(msg) => {
                        AllocError::Validation(format!("batch {b} requirement {r}: {msg}"))
                    }
                    insufficient => AllocError::Capacity {
                        batch: b,
                        requirement: r,
                        reason: insufficient.to_string(),
                    },
                })?;

                for index in chosen {
                    let slot = &mut slots[index];
                    let grant = reserve(slot, requirement, &alloc_req.applicant, r, now).map_err(
                        |reason| AllocError::Capacity {
                            batch: b,
                            requirement: r,
                            reason: format!("host {} became {reason}", slot.host.id),
                        },
                    )?;
                    if self.isolation != IsolationScope::None {
                        excluded.insert(slot.host.id.clone());
                    }
                    touched.insert(index);
                    inserts.extend(grant.records);
                    rsp.results.push(grant.resource);
                }
            }

            debug!(
                batch = b,
                holder_id = %alloc_req.applicant.holder_id,
                request_id = %alloc_req.applicant.request_id,
                hosts = rsp.results.len(),
                "request planned"
            );
            response.batch_results.push(rsp);
        }

        // Cancellation after this point would race the commit.
        ctx.check()?;

        let change = ChangeSet {
            hosts: touched.iter().map(|&i| slots[i].host.clone()).collect(),
            insert: inserts,
            remove: Vec::new(),
        };
        let records = change.insert.len();
        let hosts = change.hosts.len();
        if let Err(e) = with_store(&self.store, move |store| store.commit(&change)).await {
            warn!(error = %e, "allocation commit failed");
            return Err(e);
        }

        info!(
            requests = batch.batch_requests.len(),
            hosts,
            records,
            "batch allocated"
        );
        Ok(response)
    }
}

fn validate(batch: &BatchAllocRequest) -> AllocResult<()> {
    if batch.batch_requests.is_empty() {
        return Err(AllocError::Validation("batch has no requests".to_string()));
    }
    for (b, req) in batch.batch_requests.iter().enumerate() {
        if req.applicant.holder_id.is_empty() || req.applicant.request_id.is_empty() {
            return Err(AllocError::Validation(format!(
                "batch {b}: applicant needs holder_id and request_id"
            )));
        }
        if req.requires.is_empty() {
            return Err(AllocError::Validation(format!("batch {b}: no requirements")));
        }
    }
    Ok(())
}
