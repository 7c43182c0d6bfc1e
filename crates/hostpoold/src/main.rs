//! hostpoold — operate a hostpool inventory.
//!
//! Opens the inventory named by `pool.toml` and runs one pool operation per
//! invocation, printing the result as JSON on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! hostpoold --config pool.toml import --file hosts.json
//! hostpoold query --purpose Storage --page 1 --page-size 50
//! hostpoold hierarchy --level region --depth 2
//! hostpoold allocate --file batch.json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use hostpool_state::{Arch, HostStat, HostStatus, Purpose};

mod commands;

#[derive(Parser)]
#[command(name = "hostpoold", about = "hostpool inventory admin", version)]
struct Cli {
    /// Path to pool.toml. Defaults apply when absent.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Inventory file, overriding `[store] path`.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Give up after this many seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify and add hosts from a JSON array of host records.
    Import {
        #[arg(short, long)]
        file: PathBuf,
        /// Persist without running verification.
        #[arg(long)]
        skip_verify: bool,
    },
    /// List hosts.
    Query {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        page_size: u32,
    },
    /// Print the region/zone/rack tree.
    Hierarchy {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_enum, default_value = "region")]
        level: LevelArg,
        #[arg(long, default_value = "2")]
        depth: u32,
    },
    /// Sum free capacity.
    Stocks {
        #[command(flatten)]
        filter: FilterArgs,
        /// Only count disks of at least this many GB.
        #[arg(long)]
        min_disk_capacity: Option<u32>,
    },
    /// Soft-delete hosts that hold nothing.
    Delete {
        #[arg(required = true)]
        host_ids: Vec<String>,
    },
    /// Set hosts Online or Offline.
    Status {
        #[arg(long)]
        status: HostStatus,
        #[arg(required = true)]
        host_ids: Vec<String>,
    },
    /// Mark hosts reserved, or release them with `--reserved false`.
    Reserve {
        #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
        reserved: bool,
        #[arg(required = true)]
        host_ids: Vec<String>,
    },
    /// Run a batch allocation read from JSON.
    Allocate {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run a recycle request read from JSON.
    Recycle {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(clap::Args, Default)]
struct FilterArgs {
    #[arg(long)]
    host_id: Option<String>,
    #[arg(long)]
    purpose: Option<Purpose>,
    #[arg(long)]
    status: Option<HostStatus>,
    #[arg(long)]
    stat: Option<HostStat>,
    #[arg(long)]
    arch: Option<Arch>,
    #[arg(long)]
    region: Option<String>,
    #[arg(long)]
    zone: Option<String>,
    #[arg(long)]
    rack: Option<String>,
    #[arg(long)]
    reserved: Option<bool>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
    Region,
    Zone,
    Rack,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let mut config = match &cli.config {
        Some(path) => hostpool_core::PoolConfig::from_file(path)?,
        None => hostpool_core::PoolConfig::default(),
    };
    if let Some(store) = cli.store {
        config.store.path = store;
    }

    commands::run(cli.command, config, cli.timeout.map(Duration::from_secs)).await
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,hostpool=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
