//! poolsmith - single-host storage provisioner CLI
//!
//! Each provisioning stage is a subcommand over one shared key=value
//! configuration file. `validate`, `inventory` and `plan` are read-only and
//! safely re-runnable; `build-pool` is destructive and gated; `mount` runs
//! the cloud-mount supervisor in the foreground.

use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use poolsmith::adapters::RcloneStore;
use poolsmith::capacity::{self, format_bytes, CapacityRequest};
use poolsmith::exec::{CommandRunnerRef, SystemRunner};
use poolsmith::mount::{MountSupervisor, SupervisorConfig};
use poolsmith::pool::{self, BuildOutcome, FastTarget, PoolBuilder};
use poolsmith::ports::{LogAlertSink, RemoteStore};
use poolsmith::{
    topology, BlockDevice, DeviceKind, DeviceScanner, Error, Inventory, ProvisionConfig,
    Result, ScannerConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Single-host storage provisioner: redundant pool, cache tier, cloud mount
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the key=value configuration file
    #[arg(long, env = "POOLSMITH_CONFIG", default_value = "/etc/poolsmith.conf")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check configuration consistency without touching anything
    Validate,
    /// List and classify candidate block devices
    Inventory {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Compute the caching split and capacity plan
    Plan {
        /// Emit JSON instead of a report
        #[arg(long)]
        json: bool,
        /// Override the pool size (e.g. "10T"); default derives from devices
        #[arg(long)]
        total: Option<String>,
    },
    /// Wipe devices and build the redundant pool (destructive)
    BuildPool {
        /// Skip the interactive confirmation gate
        #[arg(long)]
        yes: bool,
    },
    /// Mount the cloud remote and supervise its health
    Mount,
    /// Stop the cloud mount
    Unmount,
    /// Re-assert the bcache cache mode (run at boot)
    AssertCacheMode,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run(cli).await {
        error!("{e}");
        if let Some(remedy) = e.remediation() {
            error!("remediation: {remedy}");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ProvisionConfig::from_file(&cli.config)?;
    let runner: CommandRunnerRef = Arc::new(SystemRunner);

    match cli.command {
        Command::Validate => validate(&config),
        Command::Inventory { json } => inventory_report(json),
        Command::Plan { json, total } => plan_report(&config, json, total),
        Command::BuildPool { yes } => build_pool(&config, runner, yes).await,
        Command::Mount => mount(&config, runner).await,
        Command::Unmount => unmount(&config, runner).await,
        Command::AssertCacheMode => assert_cache_mode(&config, runner),
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Device Resolution
// =============================================================================

fn scan_inventory() -> Result<Inventory> {
    let report = DeviceScanner::new(ScannerConfig::default()).scan()?;
    Ok(Inventory::new(report.devices, Path::new("/proc/mounts")))
}

/// Backing pool devices: explicit config list, otherwise rotational autodetect
fn resolve_backing(config: &ProvisionConfig, inventory: &Inventory) -> Result<Vec<BlockDevice>> {
    if !config.data_devices.is_empty() {
        return config
            .data_devices
            .iter()
            .map(|p| inventory.by_path(p))
            .collect();
    }
    let found = inventory.candidates(DeviceKind::Rotational);
    if found.is_empty() {
        return Err(Error::NoDeviceFound {
            kind: DeviceKind::Rotational.to_string(),
        });
    }
    Ok(found)
}

/// Fast target: an explicit config path names either a whole device to
/// carve or a partition the operator carved ahead of time (the scanner only
/// lists whole disks, so a path absent from the inventory is a partition).
/// Otherwise the best autodetected device. Absence disables caching and is
/// not an error.
fn resolve_fast(config: &ProvisionConfig, inventory: &Inventory) -> Result<Option<FastTarget>> {
    if let Some(ref path) = config.fast_device {
        return match inventory.by_path(path) {
            Ok(device) => Ok(Some(FastTarget::Device(device))),
            Err(_) if Path::new(path).exists() => Ok(Some(FastTarget::Partition(path.clone()))),
            Err(e) => Err(e),
        };
    }
    Ok(inventory
        .candidates(DeviceKind::Fast)
        .into_iter()
        .next()
        .map(FastTarget::Device))
}

// =============================================================================
// Subcommands
// =============================================================================

fn validate(config: &ProvisionConfig) -> Result<()> {
    config.validate()?;

    for device in &config.data_devices {
        if !Path::new(device).exists() {
            return Err(Error::DeviceNotFound {
                device: device.clone(),
            });
        }
    }
    if let Some(ref fast) = config.fast_device {
        if !Path::new(fast).exists() {
            return Err(Error::DeviceNotFound {
                device: fast.clone(),
            });
        }
    }

    let inventory = scan_inventory()?;
    let backing = resolve_backing(config, &inventory)?;
    let fraction = topology::validate(config.redundancy, backing.len())?;
    let fast = resolve_fast(config, &inventory)?;

    // Dry-run the planners so policy problems surface before any build
    let usable = estimated_pool_bytes(config, &backing, fast.as_ref(), fraction)?;
    capacity::allocate(&capacity_request(config, usable))?;

    info!(
        devices = backing.len(),
        redundancy = %config.redundancy,
        usable = %format_bytes(usable),
        caching = fast.is_some(),
        "configuration valid"
    );
    println!("configuration valid");
    Ok(())
}

/// Usable capacity estimate, with the cache-tier dry run folded in
fn estimated_pool_bytes(
    config: &ProvisionConfig,
    backing: &[BlockDevice],
    fast: Option<&FastTarget>,
    fraction: f64,
) -> Result<u64> {
    match fast {
        Some(FastTarget::Device(device)) => {
            pool::plan(device, config.os_reserve_bytes, config.minimum_cache_bytes)?;
        }
        Some(FastTarget::Partition(path)) => {
            info!(partition = %path, "using operator-carved cache partition");
        }
        None => info!("no fast device: caching tier disabled"),
    }
    let sizes: Vec<u64> = backing.iter().map(|d| d.size_bytes).collect();
    Ok(pool::estimated_capacity(&sizes, fraction))
}

fn capacity_request(config: &ProvisionConfig, total_bytes: u64) -> CapacityRequest {
    CapacityRequest {
        total_bytes,
        user_count: config.user_count(),
        per_user_quota_bytes: config.per_user_quota_bytes,
        snapshot_overhead_ratio: config.snapshot_overhead_ratio,
        safety_margin_percent: config.safety_margin_percent,
        minimum_cache_bytes: config.minimum_cache_bytes,
    }
}

fn inventory_report(json: bool) -> Result<()> {
    let inventory = scan_inventory()?;
    if json {
        println!("{}", serde_json::to_string_pretty(inventory.devices())?);
        return Ok(());
    }
    for kind in [DeviceKind::Fast, DeviceKind::Rotational] {
        println!("{kind} candidates:");
        for device in inventory.candidates(kind) {
            println!(
                "  {:<16} {:>10}  {}",
                device.path,
                format_bytes(device.size_bytes),
                device.transport
            );
        }
    }
    Ok(())
}

fn plan_report(config: &ProvisionConfig, json: bool, total: Option<String>) -> Result<()> {
    let inventory = scan_inventory()?;
    let backing = resolve_backing(config, &inventory)?;
    let fraction = topology::validate(config.redundancy, backing.len())?;
    let fast = resolve_fast(config, &inventory)?;

    let tier_plan = match fast {
        Some(FastTarget::Device(ref device)) => Some(pool::plan(
            device,
            config.os_reserve_bytes,
            config.minimum_cache_bytes,
        )?),
        _ => None,
    };

    let total_bytes = match total {
        Some(ref text) => poolsmith::config::parse_size(text)?,
        None => {
            let sizes: Vec<u64> = backing.iter().map(|d| d.size_bytes).collect();
            pool::estimated_capacity(&sizes, fraction)
        }
    };
    let plan = capacity::allocate(&capacity_request(config, total_bytes))?;

    if json {
        let report = serde_json::json!({
            "cache_tier": tier_plan,
            "capacity": plan,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match (&fast, tier_plan) {
        (_, Some(tier)) => println!(
            "cache tier: os {} / cache {}{}",
            format_bytes(tier.os_partition_bytes),
            format_bytes(tier.cache_partition_bytes),
            if tier.undersized { " (undersized)" } else { "" }
        ),
        (Some(FastTarget::Partition(path)), None) => {
            println!("cache tier: operator-carved partition {path}")
        }
        _ => println!("cache tier: disabled (no fast device)"),
    }
    println!("pool capacity:  {}", format_bytes(plan.total_bytes));
    println!("reserved:       {}", format_bytes(plan.reserved_bytes));
    println!("safe limit:     {}", format_bytes(plan.safe_limit_bytes));
    println!("free:           {}", format_bytes(plan.free_bytes));
    println!("cloud cache:    {}", format_bytes(plan.cache_budget_bytes));
    Ok(())
}

async fn build_pool(config: &ProvisionConfig, runner: CommandRunnerRef, yes: bool) -> Result<()> {
    ensure_root()?;
    let inventory = scan_inventory()?;
    let backing = resolve_backing(config, &inventory)?;
    let backing_paths: Vec<String> = backing.iter().map(|d| d.path.clone()).collect();
    let fast = resolve_fast(config, &inventory)?;

    // The destructive gate: explicit flag or an interactive "yes"
    let confirmed =
        yes || confirm_destruction(&backing_paths, fast.as_ref().map(FastTarget::path))?;

    let builder = PoolBuilder::new(config.clone(), runner);
    let outcome = builder
        .build(&backing_paths, fast.as_ref(), confirmed)
        .await?;

    match outcome {
        BuildOutcome::Provisioned { uuid, devices } => {
            println!("pool created: UUID={uuid} across {} devices", devices.len());
        }
        BuildOutcome::AlreadyProvisioned { source } => {
            println!("pool already mounted from {source}; nothing changed");
        }
    }
    Ok(())
}

fn confirm_destruction(backing: &[String], fast: Option<&str>) -> Result<bool> {
    println!("ALL DATA WILL BE DESTROYED on:");
    for device in backing {
        println!("  {device}");
    }
    if let Some(fast) = fast {
        println!("  {fast} (cache)");
    }
    print!("type 'yes' to continue: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}

async fn mount(config: &ProvisionConfig, runner: CommandRunnerRef) -> Result<()> {
    ensure_root()?;
    if config.remote_name.is_empty() {
        return Err(Error::Configuration(
            "remote is not set; cannot mount a cloud share".into(),
        ));
    }

    // The cache budget is recomputed from the live pool size on every mount
    let total_bytes = mounted_pool_bytes(runner.as_ref(), &config.pool_mountpoint).await?;
    let plan = capacity::allocate(&capacity_request(config, total_bytes))?;
    info!(
        budget = %format_bytes(plan.cache_budget_bytes),
        "cloud cache budget computed"
    );

    let mut supervisor_config = SupervisorConfig::from(config);
    supervisor_config.options.cache_budget_bytes = plan.cache_budget_bytes;

    let store = Arc::new(RcloneStore::new(runner));
    let supervisor = Arc::new(MountSupervisor::new(
        supervisor_config,
        store,
        Arc::new(LogAlertSink),
    ));

    let loop_handle = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run().await })
    };

    tokio::signal::ctrl_c().await?;
    warn!("shutdown requested, stopping cloud mount");
    supervisor.stop();
    loop_handle
        .await
        .map_err(|e| Error::Configuration(format!("supervisor task failed: {e}")))??;
    Ok(())
}

async fn unmount(config: &ProvisionConfig, runner: CommandRunnerRef) -> Result<()> {
    ensure_root()?;
    let store = RcloneStore::new(runner);
    store.unmount(&config.cloud_mountpoint).await?;
    println!("unmounted {}", config.cloud_mountpoint.display());
    Ok(())
}

fn assert_cache_mode(config: &ProvisionConfig, runner: CommandRunnerRef) -> Result<()> {
    ensure_root()?;
    let inventory = scan_inventory()?;
    let backing = resolve_backing(config, &inventory)?;
    let paths: Vec<String> = backing.iter().map(|d| d.path.clone()).collect();
    let builder = PoolBuilder::new(config.clone(), runner);
    builder.reassert_cache_mode(&paths)?;
    info!(mode = %config.cache_mode, devices = paths.len(), "cache mode re-asserted");
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

/// Mutating subcommands require root. Fails closed: an unreadable or
/// unparsable status file is an error, never assumed to be root.
fn ensure_root() -> Result<()> {
    let status = std::fs::read_to_string("/proc/self/status")
        .map_err(|e| Error::Configuration(format!("cannot determine effective uid: {e}")))?;
    match effective_uid(&status) {
        Some(0) => Ok(()),
        Some(_) => Err(Error::Configuration(
            "this command must run as root".into(),
        )),
        None => Err(Error::Configuration(
            "cannot determine effective uid from /proc/self/status".into(),
        )),
    }
}

/// Effective uid from a `/proc/<pid>/status` `Uid:` line
/// (columns: real, effective, saved, filesystem)
fn effective_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(1))
        .and_then(|id| id.parse().ok())
}

/// Size of the mounted pool filesystem in bytes
async fn mounted_pool_bytes(
    runner: &dyn poolsmith::exec::CommandRunner,
    mountpoint: &Path,
) -> Result<u64> {
    let target = mountpoint.display().to_string();
    let output = poolsmith::exec::run_checked(
        runner,
        "df",
        &["--block-size=1", "--output=size", target.as_str()],
    )
    .await?;
    output
        .stdout
        .lines()
        .nth(1)
        .and_then(|line| line.trim().parse().ok())
        .ok_or_else(|| {
            Error::Configuration(format!("cannot determine pool size at {target}"))
        })
}

#[cfg(test)]
mod tests {
    use super::effective_uid;

    #[test]
    fn test_effective_uid_reads_second_column() {
        let status = "Name:\tpoolsmith\nUid:\t1000\t0\t0\t0\nGid:\t1000\t1000\t1000\t1000\n";
        assert_eq!(effective_uid(status), Some(0));
        let status = "Uid:\t1000\t1000\t1000\t1000\n";
        assert_eq!(effective_uid(status), Some(1000));
    }

    #[test]
    fn test_effective_uid_missing_line_is_none() {
        assert_eq!(effective_uid("Name:\tpoolsmith\n"), None);
        assert_eq!(effective_uid("Uid:\n"), None);
    }
}
