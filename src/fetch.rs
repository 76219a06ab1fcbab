//! Concurrent per-window fetching
//!
//! For one asset, every window becomes one raw query. Queries run with bounded
//! concurrency and each one gets its own timeout. Results come back in window
//! order regardless of completion order, and a failed window is reported as a
//! value next to its siblings instead of aborting them.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalogue::ExportTarget;
use crate::config::ExportSettings;
use crate::error::FetchError;
use crate::http_client::{PlatformApi, RawQuery};
use crate::rounding::SampleInterval;
use crate::sample::RawSample;
use crate::window::TimeWindow;

/// Knobs of the orchestrator
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub interval: SampleInterval,
    pub page_size: usize,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
}

impl From<&ExportSettings> for FetchSettings {
    fn from(settings: &ExportSettings) -> Self {
        Self {
            interval: settings.interval_minutes,
            page_size: settings.page_size,
            max_concurrency: settings.max_concurrency,
            request_timeout: settings.request_timeout(),
        }
    }
}

/// Samples of one successfully fetched window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFetch {
    pub samples: Vec<RawSample>,
    /// Records skipped for having an unexpected shape
    pub skipped: usize,
    /// The platform returned a full page, so later records may be missing
    pub truncated: bool,
}

/// Outcome of one window, tagged with its position in the plan
#[derive(Debug)]
pub struct WindowOutcome {
    pub index: usize,
    pub window: TimeWindow,
    pub result: Result<WindowFetch, FetchError>,
}

/// Issues and collects the window queries for an asset
#[derive(Clone)]
pub struct FetchOrchestrator {
    api: Arc<dyn PlatformApi>,
    settings: FetchSettings,
}

impl FetchOrchestrator {
    pub fn new(api: Arc<dyn PlatformApi>, settings: FetchSettings) -> Self {
        Self { api, settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Fetch every window for `target`, one outcome per window in window order.
    ///
    /// Never fails as a whole; cancelling `cancel` resolves every outstanding
    /// window as [`FetchError::Cancelled`].
    pub async fn fetch_all(
        &self,
        target: &ExportTarget,
        windows: &[TimeWindow],
        cancel: &CancellationToken,
    ) -> Vec<WindowOutcome> {
        let concurrency = self.settings.max_concurrency.max(1);
        debug!(
            "Fetching {} windows for asset {} ({} at a time)",
            windows.len(),
            target.asset_id,
            concurrency
        );

        // `buffered` yields in input order, whatever order the queries finish in
        stream::iter(windows.iter().copied().enumerate())
            .map(|(index, window)| self.fetch_window(target, index, window, cancel))
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn fetch_window(
        &self,
        target: &ExportTarget,
        index: usize,
        window: TimeWindow,
        cancel: &CancellationToken,
    ) -> WindowOutcome {
        let query = RawQuery::new(target, &window, self.settings.interval.seconds(), self.settings.page_size);
        let timeout = self.settings.request_timeout;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            response = tokio::time::timeout(timeout, self.api.query_raw(&query)) => {
                response.unwrap_or(Err(FetchError::Timeout(timeout)))
            }
        };

        let result = result.map(|parsed| {
            let truncated = parsed.record_count >= self.settings.page_size;
            if truncated {
                warn!(
                    "Window {} for asset {} returned a full page of {} records, data may be truncated",
                    window, target.asset_id, parsed.record_count
                );
            }
            WindowFetch {
                samples: parsed.samples,
                skipped: parsed.skipped,
                truncated,
            }
        });

        match &result {
            Ok(fetch) => debug!(
                "Window {} for asset {}: {} samples",
                window,
                target.asset_id,
                fetch.samples.len()
            ),
            Err(e) => warn!("Window {} for asset {} failed: {}", window, target.asset_id, e),
        }

        WindowOutcome { index, window, result }
    }
}

/// Successes and failures of one asset's windows, separated
#[derive(Debug, Default)]
pub struct FetchSummary {
    /// Samples of each successful window, in window order
    pub samples_by_window: Vec<Vec<RawSample>>,
    pub failures: Vec<(TimeWindow, FetchError)>,
    pub truncated: Vec<TimeWindow>,
    pub skipped_records: usize,
}

impl FetchSummary {
    pub fn succeeded(&self) -> usize {
        self.samples_by_window.len()
    }

    /// At least one window was attempted and none succeeded
    pub fn all_failed(&self) -> bool {
        self.samples_by_window.is_empty() && !self.failures.is_empty()
    }

    pub fn was_cancelled(&self) -> bool {
        self.failures
            .iter()
            .any(|(_, e)| matches!(e, FetchError::Cancelled))
    }
}

/// Split outcomes into successful sample batches and failures
pub fn summarize(outcomes: Vec<WindowOutcome>) -> FetchSummary {
    let mut summary = FetchSummary::default();
    for outcome in outcomes {
        match outcome.result {
            Ok(fetch) => {
                if fetch.truncated {
                    summary.truncated.push(outcome.window);
                }
                summary.skipped_records += fetch.skipped;
                summary.samples_by_window.push(fetch.samples);
            }
            Err(e) => summary.failures.push((outcome.window, e)),
        }
    }

    info!(
        "{} windows succeeded, {} failed, {} truncated",
        summary.succeeded(),
        summary.failures.len(),
        summary.truncated.len()
    );
    summary
}
