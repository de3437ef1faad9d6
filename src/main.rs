use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use hbnb_deploy::config::{AppConfig, DEFAULT_CONFIG_PATH};
use hbnb_deploy::context::AppContext;
use hbnb_deploy::core::{
    Deployer, DeployReport, Monitor, RollbackOutcome, TargetOutcome, save_metrics,
};
use hbnb_deploy::logging::{self, LogConfig};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "hbnb-deploy")]
#[command(about = "Deploy and monitor the HBnB static site", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Record remote commands instead of running them
    #[arg(long, global = true)]
    simulation: bool,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack the site and deploy it to every web server
    Deploy,
    /// Create a release archive without deploying it
    Pack,
    /// Deploy an existing release archive
    DeployArchive { archive: PathBuf },
    /// Collect server metrics and report threshold alerts
    Monitor {
        /// Also write the samples to the metrics directory
        #[arg(long)]
        save: bool,
    },
    /// Push the nginx server block to web servers
    SetupProxy {
        /// Only this target
        #[arg(long)]
        target: Option<String>,
    },
    /// Restore a target from a local backup
    Rollback {
        target: String,
        /// Defaults to the newest backup for the target
        #[arg(long)]
        backup: Option<PathBuf>,
    },
    /// Prune old backups and release archives
    Cleanup {
        /// Defaults to deployment.keep_releases
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Write the default configuration file
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

/// CLI values layered over the config file; unset flags are left out.
#[derive(Serialize)]
struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    simulation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_logs: Option<bool>,
}

impl From<&GlobalArgs> for Overrides {
    fn from(args: &GlobalArgs) -> Self {
        Self {
            simulation: args.simulation.then_some(true),
            verbose: args.verbose.then_some(true),
            json_logs: args.json_logs.then_some(true),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config_path = cli
        .global
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if let Commands::InitConfig { force } = cli.command {
        return init_config(&config_path, force);
    }

    let config = AppConfig::new(Some(&config_path), Some(&Overrides::from(&cli.global)))
        .context("Failed to load configuration")?;

    let _log_guard =
        logging::init(&LogConfig::from(&config)).context("Failed to initialize logging")?;

    let ctx = AppContext::new(config).context("Failed to initialize")?;

    match cli.command {
        Commands::Deploy => {
            let report = Deployer::new(ctx).deploy().await.context("Deploy failed")?;
            Ok(print_report(&report))
        }
        Commands::Pack => {
            let release = Deployer::new(ctx.clone())
                .archiver()
                .pack(&ctx.config.source_dir)
                .await?;
            println!("{}", release.archive_path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::DeployArchive { archive } => {
            let report = Deployer::new(ctx)
                .deploy_archive(&archive)
                .await
                .context("Deploy failed")?;
            Ok(print_report(&report))
        }
        Commands::Monitor { save } => run_monitor(ctx, save).await,
        Commands::SetupProxy { target } => setup_proxy(ctx, target.as_deref()).await,
        Commands::Rollback { target, backup } => rollback(ctx, &target, backup).await,
        Commands::Cleanup { keep } => cleanup(ctx, keep),
        Commands::InitConfig { force } => init_config(&config_path, force),
    }
}

fn init_config(path: &std::path::Path, force: bool) -> Result<ExitCode> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    AppConfig::default()
        .write_to(path)
        .context("Failed to write config file")?;
    println!("Wrote {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &DeployReport) -> ExitCode {
    for target in &report.targets {
        match &target.outcome {
            TargetOutcome::Done => println!("  {}: deployed {}", target.target, report.release.name),
            TargetOutcome::Failed {
                step,
                error,
                rollback,
            } => {
                println!("  {}: failed at {}: {}", target.target, step, error);
                match rollback {
                    RollbackOutcome::NotAttempted => println!("  {}: no backup to restore", target.target),
                    RollbackOutcome::Restored(path) => {
                        println!("  {}: restored {}", target.target, path.display())
                    }
                    RollbackOutcome::Failed(e) => println!("  {}: rollback failed: {}", target.target, e),
                }
            }
        }
    }

    if report.succeeded() {
        println!("New version deployed! ({})", report.release.name);
        ExitCode::SUCCESS
    } else {
        let failed = report
            .failure()
            .map(|t| t.target.as_str())
            .unwrap_or("unknown target");
        eprintln!("Deployment {} failed on {}", report.deploy_id, failed);
        ExitCode::FAILURE
    }
}

async fn run_monitor(ctx: AppContext, save: bool) -> Result<ExitCode> {
    let monitor = Monitor::new(ctx.clone());
    let report = monitor.monitor_all(&ctx.config.targets).await;

    if save {
        let path = save_metrics(&ctx.config.metrics_dir, &report.samples)
            .context("Failed to save metrics")?;
        println!("Metrics saved to {}", path.display());
    }

    monitor.send_alerts(&report.alerts).await;

    if report.alerts.is_empty() {
        println!("No alerts ({} server(s) sampled)", report.samples.len());
    } else {
        for alert in &report.alerts {
            println!("{}", alert);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn setup_proxy(ctx: AppContext, only: Option<&str>) -> Result<ExitCode> {
    let targets: Vec<_> = ctx
        .config
        .web_targets()
        .filter(|t| only.is_none_or(|name| t.name == name))
        .cloned()
        .collect();

    if targets.is_empty() {
        bail!("No matching web targets");
    }

    let deployer = Deployer::new(ctx);
    for target in &targets {
        if let Err(e) = deployer.proxy().apply(target).await {
            eprintln!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
        println!("  {}: nginx configuration updated", target.name);
    }
    Ok(ExitCode::SUCCESS)
}

async fn rollback(ctx: AppContext, name: &str, backup: Option<PathBuf>) -> Result<ExitCode> {
    let target = ctx
        .config
        .target(name)
        .cloned()
        .with_context(|| format!("Unknown target: {}", name))?;

    let deployer = Deployer::new(ctx);
    let backup = match backup {
        Some(path) => path,
        None => deployer
            .backups()
            .latest_backup(&target.name)?
            .with_context(|| format!("No backups found for {}", target.name))?,
    };

    match deployer.backups().restore_backup(&target, &backup).await {
        Ok(()) => {
            println!("Restored {} on {}", backup.display(), target.name);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn cleanup(ctx: AppContext, keep: Option<usize>) -> Result<ExitCode> {
    let keep = keep.unwrap_or(ctx.config.deployment.keep_releases);
    let deployer = Deployer::new(ctx);

    let backups = deployer.backups().cleanup_old_backups(keep)?;
    let releases = deployer.archiver().prune(keep)?;

    println!(
        "Removed {} backup(s) and {} release archive(s)",
        backups.len(),
        releases.len()
    );
    Ok(ExitCode::SUCCESS)
}
