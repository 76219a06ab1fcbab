//! Historical Data Export Library
//!
//! This library fetches historical time-series data for IoT device assets from
//! the EnOS platform and turns it into one wide table per asset: one row per
//! rounded local timestamp, one column per measure point.
//!
//! Pipeline:
//! - Catalogue: list models and device assets, match assets to selected models
//! - Windows: split the requested range into daily fetch windows
//! - Fetch: signed, concurrent per-window queries with per-window failure isolation
//! - Pivot: round timestamps and merge samples, first value wins

pub mod catalogue;
pub mod config;
pub mod error;
pub mod exporter;
pub mod fetch;
pub mod http_client;
pub mod pivot;
pub mod rounding;
pub mod sample;
pub mod signer;
pub mod window;
pub mod writer;

// Re-export commonly used types
pub use catalogue::{match_assets, Asset, ExportTarget, MatchOutcome, Model};
pub use config::{Config, ExportSettings, PlatformConfig};
pub use error::{ConfigError, ExportError, FetchError};
pub use exporter::{
    AssetExport, AssetReport, AssetStatus, ExportPlan, ExportRequest, Exporter, ModelSelection, PlanOutcome,
    ProgressObserver, RunOutcome,
};
pub use fetch::{summarize, FetchOrchestrator, FetchSettings, FetchSummary, WindowFetch, WindowOutcome};
pub use http_client::{PlatformApi, PlatformClient, RawQuery};
pub use pivot::{pivot, PivotRow, PivotTable, Pivoter};
pub use rounding::{round_to_interval, SampleInterval};
pub use sample::{ParsedSamples, RawSample};
pub use signer::{RequestSigner, SignedHeaders};
pub use window::{split_into_daily_windows, TimeWindow};
pub use writer::{CsvWriter, TableWriter};
