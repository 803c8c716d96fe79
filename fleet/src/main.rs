//! Fleet Upgrade - Entry Point
//!
//! Rolls new image versions out to a fleet of docker-compose hosts.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use fleet_upgrade::app::options::AppOptions;
use fleet_upgrade::app::run::{load_hosts, load_manifest, load_settings, run_staging, run_upgrade};
use fleet_upgrade::deploy::fsm::UpgradeState;
use fleet_upgrade::deploy::staging::StagingReport;
use fleet_upgrade::logs::init_logging;
use fleet_upgrade::models::manifest::ManifestIndex;
use fleet_upgrade::models::report::{FleetReport, HostOutcome};
use fleet_upgrade::utils::version_info;

#[derive(Debug, Parser)]
#[command(name = "fleet-upgrade", version, about = "Rolling compose upgrades over SSH")]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, env = "FLEET_SETTINGS")]
    settings: Option<PathBuf>,

    /// Host inventory (YAML)
    #[arg(long, default_value = "server.yaml")]
    hosts: PathBuf,

    /// Upgrade manifest, one `image:tag` per line
    #[arg(long, default_value = "upgrade.txt")]
    manifest: PathBuf,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upgrade every host whose services appear in the manifest
    Upgrade,

    /// Load an image archive on the staging host and push the manifest images
    Load {
        /// Archive path on the staging host
        archive: String,
    },

    /// Show the parsed manifest without contacting any host
    Plan,

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Command::Version = cli.command {
        println!("{}", serde_json::to_string_pretty(&version_info())?);
        return Ok(ExitCode::SUCCESS);
    }

    let settings = load_settings(cli.settings.as_deref())
        .await
        .context("loading settings")?;
    let options = AppOptions::from_settings(&settings)?;
    let _log_guard = init_logging(options.log.clone()).context("initializing logging")?;

    let index = load_manifest(&cli.manifest)
        .await
        .with_context(|| format!("loading manifest {}", cli.manifest.display()))?;

    match cli.command {
        Command::Plan => {
            print_plan(&index, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Upgrade => {
            let hosts = load_hosts(&cli.hosts)
                .await
                .with_context(|| format!("loading hosts {}", cli.hosts.display()))?;
            let report = run_upgrade(&options, hosts, index).await;
            print_report(&report, cli.json)?;
            Ok(ExitCode::from(report.exit_code() as u8))
        }
        Command::Load { archive } => {
            let hosts = load_hosts(&cli.hosts)
                .await
                .with_context(|| format!("loading hosts {}", cli.hosts.display()))?;
            let report = run_staging(&options, &hosts, &index, &archive).await?;
            print_staging(&report, cli.json)?;
            Ok(if report.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Version => Ok(ExitCode::SUCCESS),
    }
}

fn print_plan(index: &ManifestIndex, json: bool) -> anyhow::Result<()> {
    if json {
        let entries: Vec<_> = index.iter().collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in index.iter() {
        println!("{:<24} {:<12} {}", entry.service.bold(), entry.tag, entry.image);
    }
    Ok(())
}

fn print_report(report: &FleetReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for host in &report.hosts {
        print_host(host);
    }
    println!(
        "\n{} done, {} skipped, {} failed",
        report.count(UpgradeState::Done).to_string().green(),
        report.count(UpgradeState::Skipped).to_string().yellow(),
        report.count(UpgradeState::Failed).to_string().red(),
    );
    Ok(())
}

fn print_host(host: &HostOutcome) {
    let status = match host.state {
        UpgradeState::Done => "DONE".green().bold(),
        UpgradeState::Skipped => "SKIPPED".yellow().bold(),
        _ => "FAILED".red().bold(),
    };
    println!("{} {}", status, host.host);
    if !host.matched.is_empty() {
        println!("  matched:   {}", host.matched.join(", "));
    }
    if !host.restarted.is_empty() {
        println!("  restarted: {}", host.restarted.join(", "));
    }
    if !host.failed_services.is_empty() {
        println!("  failed:    {}", host.failed_services.join(", ").red());
    }
    if let Some(patch) = &host.patch {
        if !patch.missing.is_empty() {
            println!("  not in env file: {}", patch.missing.join(", ").yellow());
        }
    }
    if let Some(error) = &host.error {
        println!("  error:     {}", error.to_string().red());
    }
}

fn print_staging(report: &StagingReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("Loaded {} on {}", report.archive, report.host);
    for image in &report.pushed {
        println!("  {} {}", "pushed".green(), image);
    }
    for image in &report.failed {
        println!("  {} {}", "failed".red(), image);
    }
    Ok(())
}
