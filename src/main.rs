//! Historical Data Exporter
//!
//! Lists the model catalogue of an EnOS organization and exports historical
//! data of the matching device assets to one CSV file per asset.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use enos_history_export::{
    AssetReport, AssetStatus, Config, CsvWriter, ExportRequest, ExportSettings, ExportTarget, Exporter,
    ModelSelection, PlatformConfig, ProgressObserver, RunOutcome, SampleInterval,
};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "enos-history-export")]
#[command(about = "Export historical IoT device data to CSV", long_about = None)]
struct Args {
    /// Path to the configuration YAML file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Project to use from the configuration file
    #[arg(short, long, value_name = "NAME", global = true)]
    project: Option<String>,

    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(subcommand)]
    command: Command,
}

/// Credentials used when no project is picked from a config file
#[derive(clap::Args, Debug)]
struct CredentialArgs {
    #[arg(long, env = "ACCESS_KEY", hide_env_values = true, global = true)]
    access_key: Option<String>,

    #[arg(long, env = "SECRET_KEY", hide_env_values = true, global = true)]
    secret_key: Option<String>,

    #[arg(long, env = "API_GATEWAY", global = true)]
    api_gateway: Option<String>,

    #[arg(long, env = "ORG_ID", global = true)]
    org_id: Option<String>,

    #[arg(long, env = "PROJECT_NAME", global = true)]
    project_name: Option<String>,
}

impl CredentialArgs {
    fn into_platform_config(self) -> PlatformConfig {
        PlatformConfig {
            access_key: self.access_key.unwrap_or_default(),
            secret_key: self.secret_key.unwrap_or_default(),
            api_gateway: self.api_gateway.unwrap_or_default(),
            org_id: self.org_id.unwrap_or_default(),
            project_name: self.project_name.unwrap_or_default(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List models and their measure points
    Models,

    /// Export historical data of assets using the selected models
    Export {
        /// Start date, YYYY-MM-DD (00:00:00) or "YYYY-MM-DD HH:MM:SS"
        #[arg(short, long)]
        start: String,

        /// End date, YYYY-MM-DD (23:59:59) or "YYYY-MM-DD HH:MM:SS"
        #[arg(short, long)]
        end: String,

        /// Comma-separated model ids; all models when omitted
        #[arg(short, long, value_delimiter = ',')]
        models: Vec<String>,

        /// Sampling interval in minutes (1, 5, 10, 15, 30, 60)
        #[arg(short, long)]
        interval: Option<u32>,

        /// Output base directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let (platform, mut settings) = load_settings(args.config.as_ref(), args.project.as_deref(), args.credentials)?;

    match args.command {
        Command::Models => {
            let exporter = Exporter::new(platform, settings)?;
            list_models(&exporter).await
        }
        Command::Export {
            start,
            end,
            models,
            interval,
            output,
        } => {
            if let Some(minutes) = interval {
                settings.interval_minutes = SampleInterval::new(minutes)?;
            }
            if let Some(dir) = output {
                settings.output_dir = dir;
            }
            let selection = if models.is_empty() {
                ModelSelection::All
            } else {
                ModelSelection::Ids(models)
            };
            let exporter = Exporter::new(platform, settings)?;
            run_export(&exporter, ExportRequest { start, end, models: selection }).await
        }
    }
}

/// Pick credentials from the config file or the environment
fn load_settings(
    config_path: Option<&PathBuf>,
    project: Option<&str>,
    credentials: CredentialArgs,
) -> Result<(PlatformConfig, ExportSettings)> {
    let Some(path) = config_path else {
        if project.is_some() {
            bail!("--project requires --config");
        }
        info!("Using credentials from command line / environment");
        return Ok((credentials.into_platform_config(), ExportSettings::default()));
    };

    info!("Loading configuration from {:?}", path);
    let config = Config::from_file(path).context("Failed to load configuration")?;

    let platform = match project {
        Some(name) => config.find_project(name)?.clone(),
        None if config.projects.len() == 1 => config.projects[0].clone(),
        None if config.projects.is_empty() => credentials.into_platform_config(),
        None => bail!(
            "Configuration has {} projects, pick one with --project",
            config.projects.len()
        ),
    };

    Ok((platform, config.export))
}

async fn list_models(exporter: &Exporter) -> Result<()> {
    let models = exporter.list_models().await?;
    if models.is_empty() {
        warn!("No models found. Please check your credentials and try again.");
        return Ok(());
    }

    println!("Found {} models", models.len());
    for model in models {
        println!("{} ({} points)", model.model_id, model.point_identifiers.len());
        for point in &model.point_identifiers {
            println!("  {}", point);
        }
    }
    Ok(())
}

/// Progress bar over assets
struct AssetProgress {
    bar: ProgressBar,
}

impl ProgressObserver for AssetProgress {
    fn asset_started(&self, index: usize, total: usize, target: &ExportTarget) {
        if index == 0 {
            self.bar.set_length(total as u64);
        }
        self.bar.set_message(format!("{} ({})", target.device_name, target.asset_id));
    }

    fn asset_finished(&self, _report: &AssetReport) {
        self.bar.inc(1);
    }
}

async fn run_export(exporter: &Exporter, request: ExportRequest) -> Result<()> {
    let started = Instant::now();

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding requests");
            on_ctrl_c.cancel();
        }
    });

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} assets - {msg}")?
            .progress_chars("█▓▒░  "),
    );
    let progress = AssetProgress { bar };

    let mut writer = CsvWriter::for_project(&exporter.settings().output_dir, &exporter.config().project_name);
    let outcome = exporter.run(&request, &mut writer, &progress, &cancel).await;
    progress.bar.finish_and_clear();

    let reports = match outcome? {
        RunOutcome::NoMatchingAssets => {
            println!("No matching assets were found for the selected models.");
            return Ok(());
        }
        RunOutcome::Completed(reports) => reports,
    };

    let mut failed = 0;
    for report in &reports {
        let name = format!("{} ({})", report.target.device_name, report.target.asset_id);
        match &report.status {
            AssetStatus::Exported(export) => {
                let path = report.written.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
                println!("{}: {} rows -> {}", name, export.table.len(), path);
            }
            AssetStatus::NothingToExport if report.is_partial() => println!(
                "{}: no data from {} of {} windows; {} failed",
                name,
                report.fetched_windows(),
                report.windows,
                report.failed_windows.len()
            ),
            AssetStatus::NothingToExport => println!("{}: no data", name),
            AssetStatus::AllWindowsFailed => println!("{}: all {} windows failed", name, report.windows),
            // a cancelled run ends with ExportError::Cancelled
            _ => {}
        }
        if report.is_incomplete() {
            failed += 1;
        }
        if !report.failed_windows.is_empty() {
            println!("  {} of {} windows failed:", report.failed_windows.len(), report.windows);
            for (window, e) in &report.failed_windows {
                println!("    {} {}", window, e);
            }
        }
        if !report.truncated_windows.is_empty() {
            println!(
                "  {} windows hit the page size limit and may be incomplete",
                report.truncated_windows.len()
            );
        }
    }

    println!("Process completed in {:.2} seconds!", started.elapsed().as_secs_f64());
    if failed > 0 {
        bail!("{} of {} assets were not exported because of failed windows", failed, reports.len());
    }
    Ok(())
}
