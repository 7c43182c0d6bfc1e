//! Subcommand handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hostpool_core::{OpContext, PoolConfig};
use hostpool_placement::{BatchAllocRequest, Location, RecycleRequest};
use hostpool_pool::{
    DiskFilter, HierarchyLevel, HostFilter, HostSpec, ImportOptions, Page, ResourcePool,
};
use hostpool_state::{Credential, Host, HostInventory, StateStore};
use hostpool_verify::OpenSshExecutor;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{Command, FilterArgs, LevelArg};

pub async fn run(command: Command, config: PoolConfig, timeout: Option<Duration>) -> anyhow::Result<()> {
    let store = StateStore::open(&config.store.path)
        .with_context(|| format!("opening inventory {}", config.store.path.display()))?;
    info!(path = %config.store.path.display(), "inventory opened");
    let store: Arc<dyn HostInventory> = Arc::new(store);
    let executor = Arc::new(OpenSshExecutor::new(config.verify.sudo));
    let pool = ResourcePool::new(store, executor, &config);

    // Ctrl-C cancels the running operation; nothing half-done is committed.
    let (cancel_tx, ctx) = OpContext::cancellable();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            let _ = cancel_tx.send(true);
        }
    });
    let ctx = match timeout {
        Some(t) => ctx.with_timeout(t),
        None => ctx,
    };

    match command {
        Command::Import { file, skip_verify } => {
            let specs: Vec<HostSpec> = read_json(&file)?;
            let report = pool
                .import_hosts(&ctx, specs, ImportOptions { skip_verify })
                .await;
            print_json(&serde_json::json!({
                "host_ids": report.host_ids,
                "error": report.error.as_ref().map(|e| serde_json::json!({
                    "kind": e.kind(),
                    "stage": e.stage().map(|s| s.to_string()),
                    "message": e.to_string(),
                })),
            }))?;
            if let Some(e) = report.error {
                return Err(e.into());
            }
        }
        Command::Query {
            filter,
            page,
            page_size,
        } => {
            let hosts = pool
                .query_hosts(&ctx, &host_filter(filter), Page::new(page, page_size))
                .await?;
            let hosts: Vec<Host> = hosts.into_iter().map(redact).collect();
            print_json(&hosts)?;
        }
        Command::Hierarchy {
            filter,
            level,
            depth,
        } => {
            let level = match level {
                LevelArg::Region => HierarchyLevel::Region,
                LevelArg::Zone => HierarchyLevel::Zone,
                LevelArg::Rack => HierarchyLevel::Rack,
            };
            let tree = pool
                .get_hierarchy(&ctx, &host_filter(filter), level, depth)
                .await?;
            print_json(&tree)?;
        }
        Command::Stocks {
            filter,
            min_disk_capacity,
        } => {
            let location = Location {
                region: filter.region.clone().unwrap_or_default(),
                zone: filter.zone.clone().unwrap_or_default(),
                rack: filter.rack.clone().unwrap_or_default(),
                host: String::new(),
            };
            let disk_filter = DiskFilter {
                min_capacity: min_disk_capacity,
                ..Default::default()
            };
            let stocks = pool
                .get_stocks(&ctx, &location, &host_filter(filter), &disk_filter)
                .await?;
            print_json(&stocks)?;
        }
        Command::Delete { host_ids } => {
            pool.delete_hosts(&ctx, &host_ids).await?;
            print_json(&serde_json::json!({ "deleted": host_ids }))?;
        }
        Command::Status { status, host_ids } => {
            pool.update_host_status(&ctx, &host_ids, status).await?;
            print_json(&serde_json::json!({ "updated": host_ids, "status": status }))?;
        }
        Command::Reserve { reserved, host_ids } => {
            pool.update_host_reserved(&ctx, &host_ids, reserved).await?;
            print_json(&serde_json::json!({ "updated": host_ids, "reserved": reserved }))?;
        }
        Command::Allocate { file } => {
            let batch: BatchAllocRequest = read_json(&file)?;
            let response = pool.allocate(&ctx, &batch).await?;
            print_json(&response)?;
        }
        Command::Recycle { file } => {
            let request: RecycleRequest = read_json(&file)?;
            pool.recycle(&ctx, &request).await?;
            print_json(&serde_json::json!({ "recycled": request.recycle_reqs.len() }))?;
        }
    }
    Ok(())
}

fn host_filter(args: FilterArgs) -> HostFilter {
    HostFilter {
        host_id: args.host_id,
        purpose: args.purpose,
        status: args.status,
        stat: args.stat,
        arch: args.arch,
        region: args.region,
        zone: args.zone,
        rack: args.rack,
        reserved: args.reserved,
    }
}

/// Never print stored passwords.
fn redact(mut host: Host) -> Host {
    if let Credential::Password { password, .. } = &mut host.credential {
        *password = "******".to_string();
    }
    host
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
