//! The resource pool facade.

use std::collections::HashSet;
use std::sync::Arc;

use hostpool_allocator::Allocator;
use hostpool_core::{OpContext, PoolConfig};
use hostpool_placement::{BatchAllocRequest, BatchAllocResponse, Location, RecycleRequest};
use hostpool_state::{ChangeSet, Host, HostId, HostInventory, HostStatus, StateResult, epoch_secs};
use hostpool_verify::{RemoteExecutor, Verifier};
use tracing::{debug, info, warn};

use crate::error::{PoolError, PoolResult};
use crate::filter::{DiskFilter, HostFilter, Page};
use crate::hierarchy::{HierarchyLevel, HierarchyNode, build_hierarchy};
use crate::spec::HostSpec;
use crate::stocks::{Stocks, count_stocks};

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Persist hosts without running the verification pipeline.
    pub skip_verify: bool,
}

/// Outcome of an import. Hosts are handled independently: `host_ids` lists
/// every host persisted, `error` the first host that was not.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub host_ids: Vec<HostId>,
    pub error: Option<PoolError>,
}

/// Entry point for every inventory operation.
///
/// Holds the store, the verifier and the allocator; no business state of
/// its own, so clones share nothing but the store.
#[derive(Clone)]
pub struct ResourcePool {
    store: Arc<dyn HostInventory>,
    verifier: Verifier,
    verify_enabled: bool,
    allocator: Allocator,
}

impl ResourcePool {
    pub fn new(
        store: Arc<dyn HostInventory>,
        executor: Arc<dyn RemoteExecutor>,
        config: &PoolConfig,
    ) -> Self {
        Self {
            allocator: Allocator::new(Arc::clone(&store), config.allocation.isolation),
            verifier: Verifier::new(executor, config.verify.clone()),
            verify_enabled: config.verify.enabled,
            store,
        }
    }

    // ── Inventory ──────────────────────────────────────────────

    /// Validate, verify and persist each host.
    pub async fn import_hosts(
        &self,
        ctx: &OpContext,
        specs: Vec<HostSpec>,
        options: ImportOptions,
    ) -> ImportReport {
        let mut report = ImportReport::default();
        let verify = self.verify_enabled && !options.skip_verify;

        for spec in specs {
            if let Err(e) = ctx.check() {
                if report.error.is_none() {
                    report.error = Some(e.into());
                }
                break;
            }
            let ip = spec.ip.clone();
            match self.import_one(ctx, spec, verify).await {
                Ok(id) => {
                    info!(host_id = %id, %ip, "host imported");
                    report.host_ids.push(id);
                }
                Err(e) => {
                    warn!(%ip, kind = %e.kind(), error = %e, "host not imported");
                    if report.error.is_none() {
                        report.error = Some(e);
                    }
                }
            }
        }
        report
    }

    async fn import_one(&self, ctx: &OpContext, spec: HostSpec, verify: bool) -> PoolResult<HostId> {
        let host = spec.into_host(epoch_secs())?;
        if verify {
            self.verifier.verify(ctx, &host).await?;
        } else {
            debug!(ip = %host.ip, "verification skipped");
        }
        ctx.check()?;
        let stored = self.blocking(move |store| store.insert_host(&host)).await?;
        Ok(stored.id)
    }

    /// Soft-delete hosts that hold nothing. Either every host is deleted or
    /// none is.
    pub async fn delete_hosts(&self, ctx: &OpContext, host_ids: &[HostId]) -> PoolResult<()> {
        ctx.check()?;
        check_ids(host_ids)?;
        let hosts = self.live_hosts(ctx, host_ids).await?;

        // Past this check the delete runs to completion.
        ctx.check()?;
        self.blocking(move |store| store.delete_hosts(&hosts, epoch_secs()))
            .await?;

        for id in host_ids {
            info!(host_id = %id, "host deleted");
        }
        Ok(())
    }

    /// Matching hosts sorted by id, one page at a time.
    pub async fn query_hosts(
        &self,
        ctx: &OpContext,
        filter: &HostFilter,
        page: Page,
    ) -> PoolResult<Vec<Host>> {
        let mut hosts = self.matching_hosts(ctx, filter).await?;
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        let window = page.window(hosts.len())?;
        Ok(hosts.drain(window).collect())
    }

    pub async fn update_host_status(
        &self,
        ctx: &OpContext,
        host_ids: &[HostId],
        status: HostStatus,
    ) -> PoolResult<()> {
        if status == HostStatus::Deleted {
            return Err(PoolError::Validation(
                "hosts are deleted through delete_hosts".to_string(),
            ));
        }
        self.update_hosts(ctx, host_ids, move |host| host.status = status)
            .await?;
        info!(hosts = host_ids.len(), %status, "host status updated");
        Ok(())
    }

    pub async fn update_host_reserved(
        &self,
        ctx: &OpContext,
        host_ids: &[HostId],
        reserved: bool,
    ) -> PoolResult<()> {
        self.update_hosts(ctx, host_ids, move |host| host.reserved = reserved)
            .await?;
        info!(hosts = host_ids.len(), reserved, "host reserved flag updated");
        Ok(())
    }

    // ── Read models ────────────────────────────────────────────

    pub async fn get_hierarchy(
        &self,
        ctx: &OpContext,
        filter: &HostFilter,
        level: HierarchyLevel,
        depth: u32,
    ) -> PoolResult<HierarchyNode> {
        let hosts = self.matching_hosts(ctx, filter).await?;
        build_hierarchy(&hosts, level, depth)
    }

    /// Capacity that an allocation could still draw on. Reserves nothing.
    pub async fn get_stocks(
        &self,
        ctx: &OpContext,
        location: &Location,
        host_filter: &HostFilter,
        disk_filter: &DiskFilter,
    ) -> PoolResult<Stocks> {
        let hosts = self.matching_hosts(ctx, host_filter).await?;
        Ok(count_stocks(&hosts, location, host_filter, disk_filter))
    }

    // ── Allocation ─────────────────────────────────────────────

    pub async fn allocate(
        &self,
        ctx: &OpContext,
        batch: &BatchAllocRequest,
    ) -> PoolResult<BatchAllocResponse> {
        Ok(self.allocator.allocate(ctx, batch).await?)
    }

    pub async fn recycle(&self, ctx: &OpContext, request: &RecycleRequest) -> PoolResult<()> {
        Ok(self.allocator.recycle(ctx, request).await?)
    }

    // ── Helpers ────────────────────────────────────────────────

    async fn matching_hosts(&self, ctx: &OpContext, filter: &HostFilter) -> PoolResult<Vec<Host>> {
        let filter = filter.clone();
        ctx.run(self.blocking(move |store| {
            Ok(store
                .list_hosts()?
                .into_iter()
                .filter(|h| filter.matches(h))
                .collect::<Vec<Host>>())
        }))
        .await?
    }

    /// Apply `change` to every live host in `host_ids` and commit them
    /// together, revision-checked.
    async fn update_hosts<F>(&self, ctx: &OpContext, host_ids: &[HostId], change: F) -> PoolResult<()>
    where
        F: Fn(&mut Host),
    {
        ctx.check()?;
        check_ids(host_ids)?;
        let mut hosts = self.live_hosts(ctx, host_ids).await?;
        let now = epoch_secs();
        for host in &mut hosts {
            change(host);
            host.updated_at = now;
        }

        ctx.check()?;
        let change = ChangeSet {
            hosts,
            ..Default::default()
        };
        self.blocking(move |store| store.commit(&change)).await
    }

    /// Current copies of `host_ids`, failing on any missing or deleted one.
    async fn live_hosts(&self, ctx: &OpContext, host_ids: &[HostId]) -> PoolResult<Vec<Host>> {
        let ids = host_ids.to_vec();
        ctx.run(self.blocking(move |store| {
            ids.iter()
                .map(|id| live_host(store, id))
                .collect::<StateResult<Vec<Host>>>()
        }))
        .await?
    }

    /// Run a blocking store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> PoolResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HostInventory) -> StateResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| PoolError::Internal(format!("store task failed: {e}")))?
            .map_err(PoolError::from)
    }
}

/// Non-empty and free of duplicates.
fn check_ids(host_ids: &[HostId]) -> PoolResult<()> {
    if host_ids.is_empty() {
        return Err(PoolError::Validation("no host ids given".to_string()));
    }
    let mut seen = HashSet::new();
    for id in host_ids {
        if !seen.insert(id) {
            return Err(PoolError::Validation(format!("duplicate host id {id}")));
        }
    }
    Ok(())
}

fn live_host(store: &dyn HostInventory, id: &str) -> StateResult<Host> {
    match store.get_host(id)? {
        Some(host) if host.status != HostStatus::Deleted => Ok(host),
        _ => Err(hostpool_state::StateError::NotFound(format!("host {id}"))),
    }
}
