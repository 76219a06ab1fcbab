//! Export pipeline
//!
//! catalogue → match → plan windows → fetch per asset → pivot → writer.
//! Assets are processed one after another; windows of one asset are fetched
//! concurrently by the [`FetchOrchestrator`].

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalogue::{match_assets, ExportTarget, MatchOutcome, Model};
use crate::config::{ExportSettings, PlatformConfig};
use crate::error::{ExportError, FetchError};
use crate::fetch::{summarize, FetchOrchestrator, FetchSettings, FetchSummary};
use crate::http_client::{PlatformApi, PlatformClient};
use crate::pivot::{pivot, PivotTable};
use crate::window::{resolve_range, split_into_daily_windows, TimeWindow};
use crate::writer::{sanitize_file_component, TableWriter};

/// Which models to export
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    /// Every model in the catalogue
    All,
    /// Only these model ids
    Ids(Vec<String>),
}

/// What the caller asked for
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`, local to the configured timezone
    pub start: String,
    pub end: String,
    pub models: ModelSelection,
}

/// Assets and windows to fetch
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub targets: Vec<ExportTarget>,
    pub windows: Vec<TimeWindow>,
}

#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Ready(ExportPlan),
    NoMatchingAssets,
}

/// Finished table of one asset
#[derive(Debug, Clone, PartialEq)]
pub struct AssetExport {
    pub asset_id: String,
    pub device_name: String,
    pub table: PivotTable,
}

impl AssetExport {
    /// Suggested file name without extension: `{deviceName}-{assetId}`
    pub fn file_stem(&self) -> String {
        format!(
            "{}-{}",
            sanitize_file_component(&self.device_name),
            sanitize_file_component(&self.asset_id)
        )
    }
}

#[derive(Debug)]
pub enum AssetStatus {
    Exported(AssetExport),
    /// Fetches succeeded but returned no samples
    NothingToExport,
    /// Every window fetch failed
    AllWindowsFailed,
    Cancelled,
}

/// Per-asset result with the windows that went wrong
#[derive(Debug)]
pub struct AssetReport {
    pub target: ExportTarget,
    pub status: AssetStatus,
    pub windows: usize,
    pub failed_windows: Vec<(TimeWindow, FetchError)>,
    pub truncated_windows: Vec<TimeWindow>,
    pub skipped_records: usize,
    /// Set once the table has been handed to a writer
    pub written: Option<PathBuf>,
}

impl AssetReport {
    /// Windows that returned a response, with or without samples
    pub fn fetched_windows(&self) -> usize {
        self.windows.saturating_sub(self.failed_windows.len())
    }

    /// Some windows failed while others were fetched
    pub fn is_partial(&self) -> bool {
        !self.failed_windows.is_empty() && self.fetched_windows() > 0
    }

    /// No table was written and at least one window was never fetched
    pub fn is_incomplete(&self) -> bool {
        !self.failed_windows.is_empty() && !matches!(self.status, AssetStatus::Exported(_))
    }
}

/// Result of a whole run
#[derive(Debug)]
pub enum RunOutcome {
    NoMatchingAssets,
    Completed(Vec<AssetReport>),
}

/// Hook for progress display
pub trait ProgressObserver: Send + Sync {
    fn asset_started(&self, _index: usize, _total: usize, _target: &ExportTarget) {}
    fn asset_finished(&self, _report: &AssetReport) {}
}

impl ProgressObserver for () {}

/// Runs exports for one platform organization
pub struct Exporter {
    config: PlatformConfig,
    settings: ExportSettings,
    api: Arc<dyn PlatformApi>,
    orchestrator: FetchOrchestrator,
}

impl Exporter {
    /// Build the HTTP client; configuration is validated by [`Exporter::with_api`]
    pub fn new(config: PlatformConfig, settings: ExportSettings) -> Result<Self, ExportError> {
        let client = PlatformClient::new(config.clone(), &settings)
            .map_err(ExportError::Client)?;
        Self::with_api(config, settings, Arc::new(client))
    }

    /// Use a caller-provided platform implementation
    pub fn with_api(
        config: PlatformConfig,
        settings: ExportSettings,
        api: Arc<dyn PlatformApi>,
    ) -> Result<Self, ExportError> {
        config.validate()?;
        settings.validate()?;
        let orchestrator = FetchOrchestrator::new(api.clone(), FetchSettings::from(&settings));
        Ok(Self {
            config,
            settings,
            api,
            orchestrator,
        })
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub async fn list_models(&self) -> Result<Vec<Model>, ExportError> {
        self.api
            .search_models()
            .await
            .map_err(|source| ExportError::Catalogue { what: "models", source })
    }

    /// Resolve the range, read the catalogue and match assets.
    ///
    /// Range problems are reported before any request is made.
    pub async fn prepare(
        &self,
        request: &ExportRequest,
        cancel: &CancellationToken,
    ) -> Result<PlanOutcome, ExportError> {
        let tz = self.settings.tz()?;
        let (start, end) = resolve_range(&request.start, &request.end, tz)?;
        let windows = split_into_daily_windows(start, end);
        info!(
            "Planned {} windows from {} to {} ({})",
            windows.len(),
            start,
            end,
            tz.name()
        );

        let catalogue = async {
            let assets = self
                .api
                .search_device_assets()
                .await
                .map_err(|source| ExportError::Catalogue { what: "device assets", source })?;
            let models = self.list_models().await?;
            Ok::<_, ExportError>((assets, models))
        };
        let (assets, models) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExportError::Cancelled),
            result = catalogue => result?,
        };

        let selected = select_models(models, &request.models);
        info!("Processing {} selected models", selected.len());

        match match_assets(&assets, &selected) {
            MatchOutcome::Matched(targets) => Ok(PlanOutcome::Ready(ExportPlan { targets, windows })),
            MatchOutcome::NoMatchingAssets => {
                warn!("No matching assets found for the selected models");
                Ok(PlanOutcome::NoMatchingAssets)
            }
        }
    }

    /// Fetch and pivot one asset. Window failures end up in the report.
    pub async fn export_asset(
        &self,
        target: &ExportTarget,
        windows: &[TimeWindow],
        cancel: &CancellationToken,
    ) -> AssetReport {
        if target.point_identifiers.is_empty() {
            warn!("Model {} of asset {} has no points, nothing to fetch", target.model_id, target.asset_id);
            return AssetReport {
                target: target.clone(),
                status: AssetStatus::NothingToExport,
                windows: windows.len(),
                failed_windows: Vec::new(),
                truncated_windows: Vec::new(),
                skipped_records: 0,
                written: None,
            };
        }

        info!("Fetching historical data for {} ({})", target.device_name, target.asset_id);
        let outcomes = self.orchestrator.fetch_all(target, windows, cancel).await;
        let summary = summarize(outcomes);

        let cancelled = summary.was_cancelled();
        let all_failed = summary.all_failed();
        let FetchSummary {
            samples_by_window,
            failures,
            truncated,
            skipped_records,
        } = summary;

        let status = if cancelled {
            AssetStatus::Cancelled
        } else if all_failed {
            error!("All {} windows failed for asset {}", windows.len(), target.asset_id);
            AssetStatus::AllWindowsFailed
        } else {
            match pivot(samples_by_window, self.settings.interval_minutes) {
                Some(table) => AssetStatus::Exported(AssetExport {
                    asset_id: target.asset_id.clone(),
                    device_name: target.device_name.clone(),
                    table,
                }),
                None => {
                    info!("No data returned for asset {}", target.asset_id);
                    AssetStatus::NothingToExport
                }
            }
        };

        AssetReport {
            target: target.clone(),
            status,
            windows: windows.len(),
            failed_windows: failures,
            truncated_windows: truncated,
            skipped_records,
            written: None,
        }
    }

    /// Prepare, export every matched asset in turn and write the tables
    pub async fn run(
        &self,
        request: &ExportRequest,
        writer: &mut dyn TableWriter,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ExportError> {
        let plan = match self.prepare(request, cancel).await? {
            PlanOutcome::Ready(plan) => plan,
            PlanOutcome::NoMatchingAssets => return Ok(RunOutcome::NoMatchingAssets),
        };

        let total = plan.targets.len();
        let mut reports = Vec::with_capacity(total);
        for (idx, target) in plan.targets.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            info!("Processing asset {} of {}", idx + 1, total);
            progress.asset_started(idx, total, target);

            let mut report = self.export_asset(target, &plan.windows, cancel).await;
            if matches!(report.status, AssetStatus::Cancelled) {
                return Err(ExportError::Cancelled);
            }
            if let AssetStatus::Exported(export) = &report.status {
                let path = writer.write_table(export).await.map_err(ExportError::Output)?;
                report.written = Some(path);
            }

            progress.asset_finished(&report);
            reports.push(report);
        }

        Ok(RunOutcome::Completed(reports))
    }
}

/// Keep the catalogue models the caller picked, in catalogue order
fn select_models(models: Vec<Model>, selection: &ModelSelection) -> Vec<Model> {
    match selection {
        ModelSelection::All => models,
        ModelSelection::Ids(ids) => {
            for id in ids {
                if !models.iter().any(|m| &m.model_id == id) {
                    warn!("Model {} not found in catalogue, ignoring", id);
                }
            }
            models
                .into_iter()
                .filter(|m| ids.contains(&m.model_id))
                .collect()
        }
    }
}
