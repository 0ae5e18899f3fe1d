use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use volume_backup::config::{self, expand_tilde, Config, GlobalConfig};
use volume_backup::labels::LabelKeys;
use volume_backup::managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
use volume_backup::managers::restore::{self, RestoreManager};
use volume_backup::strategies::{build_destination, DestinationStrategy};
use volume_backup::utils::cron;
use volume_backup::utils::locker::ScheduleLock;
use volume_backup::utils::runtime::{ContainerRuntime, DockerCli};
use volume_backup::{BackupManager, CycleReport, TaskRunner};

#[derive(Parser)]
#[command(name = "volume-backup")]
#[command(about = "Backs up docker volumes of labelled containers", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/volume-backup/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup cycle for a schedule (defaults to every enabled schedule)
    Run {
        #[arg(short, long)]
        schedule: Option<String>,
    },

    /// List stored snapshots as JSON
    List {
        /// Destination to list (required when more than one is configured)
        #[arg(short, long)]
        destination: Option<String>,

        /// Only volumes whose name contains this string
        #[arg(short, long)]
        filter: Option<String>,

        /// Only the newest snapshot of each volume
        #[arg(long)]
        newest_only: bool,
    },

    /// Restore volumes from their newest (or an explicit) snapshot
    Restore {
        /// Comma-separated volume names (defaults to every volume with a snapshot)
        #[arg(long, value_delimiter = ',')]
        volumes: Vec<String>,

        /// Snapshot file name or object key (single volume only)
        #[arg(long)]
        snapshot: Option<String>,

        #[arg(short, long)]
        destination: Option<String>,
    },

    /// Create a volume and fill it from an archive on this host
    CreateVolume {
        #[arg(long)]
        archive: PathBuf,

        #[arg(long)]
        volume: String,
    },

    /// Install cron jobs for every enabled schedule
    Setup {
        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration file
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { schedule } => {
            let (config, _log_guard) = load(&cli.config)?;
            handle_run(&config, schedule.as_deref())
        }
        Commands::List {
            destination,
            filter,
            newest_only,
        } => {
            let (config, _log_guard) = load(&cli.config)?;
            handle_list(&config, destination.as_deref(), filter.as_deref(), newest_only)
        }
        Commands::Restore {
            volumes,
            snapshot,
            destination,
        } => {
            let (config, _log_guard) = load(&cli.config)?;
            handle_restore(&config, &volumes, snapshot.as_deref(), destination.as_deref())
        }
        // works without a config file
        Commands::CreateVolume { archive, volume } => {
            init_console_logging();
            handle_create_volume(&archive, &volume)
        }
        Commands::Setup { dry_run } => {
            let (config, _log_guard) = load(&cli.config)?;
            handle_setup(&config, &cli.config, dry_run)
        }
        Commands::Validate => {
            let (config, _log_guard) = load(&cli.config)?;
            handle_validate(&config);
            Ok(())
        }
    }
}

/// Load the config file and start logging as it configures
fn load(config_path: &Path) -> Result<(Config, LogGuard)> {
    let config = config::load_config(config_path)
        .context(format!("Failed to load config {:?}", config_path))?;
    let log_guard = init_logging(&LoggingConfig::from_global(&config.global))?;
    Ok((config, log_guard))
}

fn handle_validate(config: &Config) {
    println!("Configuration is valid!");
    println!("Schedules: {}", config.schedules.len());
    let mut names: Vec<_> = config.schedules.keys().collect();
    names.sort();
    for name in names {
        let schedule = &config.schedules[name];
        println!(
            "  {} ({}){}: {} destination(s)",
            name,
            schedule.schedule,
            if schedule.enabled { "" } else { " [disabled]" },
            schedule.destinations.len()
        );
    }
}

fn docker_runtime(global: &GlobalConfig) -> Arc<dyn ContainerRuntime> {
    Arc::new(DockerCli::new(Duration::from_secs(global.docker_timeout_seconds)))
}

fn task_runner(runtime: Arc<dyn ContainerRuntime>, global: &GlobalConfig, image: &str) -> TaskRunner {
    let timeout = match global.task_timeout_seconds {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    TaskRunner::new(runtime, image, LabelKeys::new(&global.label_prefix), timeout)
}

fn restore_manager(config: &Config, destination: Option<&str>) -> Result<RestoreManager> {
    let destination = build_destination(config::resolve_destination(config, destination)?)?;
    let runtime = docker_runtime(&config.global);
    let runner = task_runner(runtime.clone(), &config.global, &config.global.restore_image);
    Ok(RestoreManager::new(runtime, runner, destination))
}

fn handle_run(config: &Config, schedule: Option<&str>) -> Result<()> {
    let mut names: Vec<&str> = match schedule {
        Some(name) => {
            config::find_schedule(config, name)?;
            vec![name]
        }
        None => config
            .schedules
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(name, _)| name.as_str())
            .collect(),
    };
    names.sort();

    let runtime = docker_runtime(&config.global);
    let lock_dir = expand_tilde(&config.global.lock_directory);
    let mut failed = Vec::new();

    for name in names {
        match run_schedule(config, &runtime, &lock_dir, name) {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
                if report.has_failures() {
                    failed.push(name.to_string());
                }
            }
            Err(e) => {
                error!("Schedule '{}' failed: {:#}", name, e);
                failed.push(name.to_string());
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("Backup failed for schedule(s): {}", failed.join(", "));
    }
    Ok(())
}

/// One cycle of one schedule, holding its lock for the duration
fn run_schedule(
    config: &Config,
    runtime: &Arc<dyn ContainerRuntime>,
    lock_dir: &Path,
    name: &str,
) -> Result<CycleReport> {
    let schedule = config::find_schedule(config, name)?;
    let _lock = ScheduleLock::acquire(lock_dir, name)?;

    info!("Running schedule: {}", name);
    let destinations = schedule
        .destinations
        .iter()
        .map(build_destination)
        .collect::<Result<Vec<Box<dyn DestinationStrategy>>>>()?;

    let manager = BackupManager::new(
        runtime.clone(),
        task_runner(runtime.clone(), &config.global, &config.global.helper_image),
        destinations,
        LabelKeys::new(&config.global.label_prefix),
    )
    .with_schedule_key(schedule.schedule_key.clone());

    manager.run_backup_cycle()
}

fn handle_list(
    config: &Config,
    destination: Option<&str>,
    filter: Option<&str>,
    newest_only: bool,
) -> Result<()> {
    let snapshots = restore_manager(config, destination)?.list_snapshots(filter, newest_only)?;
    println!("{}", serde_json::to_string_pretty(&snapshots)?);
    Ok(())
}

fn handle_restore(
    config: &Config,
    volumes: &[String],
    snapshot: Option<&str>,
    destination: Option<&str>,
) -> Result<()> {
    let report = restore_manager(config, destination)?.restore_many(volumes, snapshot)?;
    println!("{}", serde_json::to_string_pretty(&report.restored)?);

    if !report.failed.is_empty() {
        for (volume, e) in &report.failed {
            eprintln!("✗ {}: {:#}", volume, e);
        }
        anyhow::bail!("{} volume(s) could not be restored", report.failed.len());
    }
    Ok(())
}

fn handle_create_volume(archive: &Path, volume: &str) -> Result<()> {
    let global = GlobalConfig::default();
    let archive = std::fs::canonicalize(archive).context(format!("Archive {:?} not found", archive))?;

    let runtime = docker_runtime(&global);
    let runner = task_runner(runtime.clone(), &global, &global.restore_image);
    restore::create_volume_from_archive(runtime.as_ref(), &runner, volume, &archive)?;

    println!("✓ Volume {} created from {}", volume, archive.display());
    Ok(())
}

fn handle_setup(config: &Config, config_path: &Path, dry_run: bool) -> Result<()> {
    println!("=== Installing cron jobs ===\n");
    if dry_run {
        println!("DRY RUN MODE - No changes will be made\n");
    }

    let config_path = std::fs::canonicalize(config_path).unwrap_or_else(|_| config_path.to_path_buf());
    let mut names: Vec<_> = config.schedules.keys().collect();
    names.sort();

    let mut failures = 0;
    for name in names {
        let schedule = &config.schedules[name];
        if !schedule.enabled {
            println!("  - Skipping {} (disabled)", name);
            if !dry_run {
                cron::remove_cron_job(name)?;
            }
            continue;
        }

        match cron::add_cron_job(name, &schedule.schedule, &config_path, dry_run) {
            Ok(()) => println!("  ✓ {} ({})", name, schedule.schedule),
            Err(e) => {
                eprintln!("  ✗ Failed to add job for {}: {:#}", name, e);
                failures += 1;
            }
        }
    }

    if !dry_run {
        let installed = cron::list_cron_jobs()?;
        println!("\n{} cron job(s) installed", installed.len());
    }

    if failures > 0 {
        anyhow::bail!("{} cron job(s) could not be installed", failures);
    }
    Ok(())
}
