//! End-to-end export runs against an in-memory platform

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::json;
use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use enos_history_export::{
    Asset, AssetStatus, ConfigError, CsvWriter, ExportError, ExportRequest, ExportSettings, Exporter, FetchError,
    Model, ModelSelection, ParsedSamples, PlatformApi, PlatformConfig, RawQuery, RawSample, RunOutcome,
};

/// Platform double: two meters share a model, one inverter has its own
struct FakePlatform {
    /// `(assetId, day)` pairs whose query fails
    failing: HashSet<(String, String)>,
    /// Assets that have no data at all
    empty_assets: HashSet<String>,
    catalogue_calls: AtomicUsize,
    queries: Mutex<Vec<RawQuery>>,
}

impl FakePlatform {
    fn new() -> Self {
        Self {
            failing: HashSet::new(),
            empty_assets: HashSet::new(),
            catalogue_calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, asset_id: &str, day: &str) -> Self {
        self.failing.insert((asset_id.to_string(), day.to_string()));
        self
    }

    fn empty(mut self, asset_id: &str) -> Self {
        self.empty_assets.insert(asset_id.to_string());
        self
    }

    fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

fn sample(asset_id: &str, local: &str, point: &str, value: serde_json::Value) -> RawSample {
    RawSample {
        asset_id: asset_id.to_string(),
        timestamp_millis: None,
        local_time: NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S").unwrap(),
        point_identifier: point.to_string(),
        value,
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn search_models(&self) -> Result<Vec<Model>, FetchError> {
        self.catalogue_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            Model {
                model_id: "Meter".to_string(),
                point_identifiers: vec!["kwh".to_string()],
            },
            Model {
                model_id: "Inverter".to_string(),
                point_identifiers: vec!["kw".to_string(), "temp".to_string()],
            },
        ])
    }

    async fn search_device_assets(&self) -> Result<Vec<Asset>, FetchError> {
        self.catalogue_calls.fetch_add(1, Ordering::SeqCst);
        let asset = |id: &str, name: &str, model: &str| Asset {
            asset_id: id.to_string(),
            device_name: name.to_string(),
            model_id: model.to_string(),
        };
        Ok(vec![
            asset("m1", "Meter 1", "Meter"),
            asset("m2", "Meter 2", "Meter"),
            asset("inv1", "Inverter 1", "Inverter"),
            asset("x1", "Orphan", "Unknown"),
        ])
    }

    async fn query_raw(&self, query: &RawQuery) -> Result<ParsedSamples, FetchError> {
        self.queries.lock().unwrap().push(query.clone());

        let asset = query.asset_ids.clone();
        let day = query.start_time[..10].to_string();
        if self.failing.contains(&(asset.clone(), day.clone())) {
            return Err(FetchError::Api {
                code: 500,
                message: "internal error".to_string(),
            });
        }
        if self.empty_assets.contains(&asset) {
            return Ok(ParsedSamples::default());
        }

        // 10:01 and 10:02 both round to 10:00; 10:08 rounds to 10:10;
        // 23:58 rolls over into 00:00 of the next day.
        let samples = vec![
            sample(&asset, &format!("{} 10:01:00", day), "kwh", json!(format!("{}-first", day))),
            sample(&asset, &format!("{} 10:02:00", day), "kwh", json!(format!("{}-second", day))),
            sample(&asset, &format!("{} 10:08:00", day), "kwh", json!(7)),
            sample(&asset, &format!("{} 23:58:00", day), "kwh", json!(format!("{}-late", day))),
            sample(&asset, &format!("{} 00:01:00", day), "kwh", json!(format!("{}-early", day))),
        ];
        Ok(ParsedSamples {
            record_count: samples.len(),
            samples,
            skipped: 0,
        })
    }
}

fn platform_config() -> PlatformConfig {
    PlatformConfig {
        access_key: "aaaa-bbbb-cccc".to_string(),
        secret_key: "dddd-eeee-ffff".to_string(),
        api_gateway: "https://apim.example.com".to_string(),
        org_id: "o123".to_string(),
        project_name: "Plant A".to_string(),
    }
}

fn exporter(platform: Arc<FakePlatform>) -> Exporter {
    Exporter::with_api(platform_config(), ExportSettings::default(), platform).unwrap()
}

fn request(models: ModelSelection) -> ExportRequest {
    ExportRequest {
        start: "2024-01-01".to_string(),
        end: "2024-01-03".to_string(),
        models,
    }
}

fn meters() -> ModelSelection {
    ModelSelection::Ids(vec!["Meter".to_string()])
}

#[tokio::test]
async fn test_export_merges_windows_per_asset() {
    let platform = Arc::new(FakePlatform::new());
    let exporter = exporter(platform.clone());
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = CsvWriter::for_project(tmp.path().to_str().unwrap(), "Plant A");

    let outcome = exporter
        .run(&request(meters()), &mut writer, &(), &CancellationToken::new())
        .await
        .unwrap();
    let reports = match outcome {
        RunOutcome::Completed(reports) => reports,
        RunOutcome::NoMatchingAssets => panic!("expected matched assets"),
    };

    // Two meters, three daily windows each
    assert_eq!(reports.len(), 2);
    assert_eq!(platform.query_count(), 6);

    let report = &reports[0];
    assert_eq!(report.target.asset_id, "m1");
    assert_eq!(report.windows, 3);
    assert!(report.failed_windows.is_empty());
    let table = match &report.status {
        AssetStatus::Exported(export) => &export.table,
        other => panic!("unexpected status {:?}", other),
    };

    assert_eq!(table.columns, vec!["kwh".to_string()]);
    let times: Vec<String> = table
        .rows
        .iter()
        .map(|r| r.local_time.format("%Y-%m-%d %H:%M:%S").to_string())
        .collect();
    assert_eq!(
        times,
        vec![
            "2024-01-01 00:00:00",
            "2024-01-01 10:00:00",
            "2024-01-01 10:10:00",
            "2024-01-02 00:00:00",
            "2024-01-02 10:00:00",
            "2024-01-02 10:10:00",
            "2024-01-03 00:00:00",
            "2024-01-03 10:00:00",
            "2024-01-03 10:10:00",
            "2024-01-04 00:00:00",
        ]
    );

    // First sample seen wins within a bucket
    assert_eq!(table.rows[1].get("kwh"), Some(&json!("2024-01-01-first")));
    // Day 1's 23:58 is seen before day 2's 00:01
    assert_eq!(table.rows[3].get("kwh"), Some(&json!("2024-01-01-late")));

    let path = report.written.clone().unwrap();
    assert_eq!(path, tmp.path().join("Plant A").join("Meter 1-m1.csv"));
    let content = fs::read_to_string(path).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("localtime,kwh"));
    assert_eq!(lines.next(), Some("2024-01-01 00:00:00,2024-01-01-early"));
    assert_eq!(content.lines().count(), 11);

    assert!(tmp.path().join("Plant A").join("Meter 2-m2.csv").exists());
}

#[tokio::test]
async fn test_failed_window_gives_partial_export() {
    let platform = Arc::new(FakePlatform::new().failing("m2", "2024-01-02"));
    let exporter = exporter(platform);
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = CsvWriter::for_project(tmp.path().to_str().unwrap(), "Plant A");

    let outcome = exporter
        .run(&request(meters()), &mut writer, &(), &CancellationToken::new())
        .await
        .unwrap();
    let RunOutcome::Completed(reports) = outcome else {
        panic!("expected matched assets");
    };

    assert!(!reports[0].is_partial());

    let report = &reports[1];
    assert!(report.is_partial());
    assert_eq!(report.failed_windows.len(), 1);
    assert_eq!(report.failed_windows[0].0.start_iso(), "2024-01-02T00:00:00+08:00");
    assert!(matches!(report.failed_windows[0].1, FetchError::Api { code: 500, .. }));

    let AssetStatus::Exported(export) = &report.status else {
        panic!("expected partial data to be exported");
    };
    assert!(export
        .table
        .rows
        .iter()
        .all(|r| r.local_time.format("%Y-%m-%d").to_string() != "2024-01-02"
            || r.local_time.format("%H:%M").to_string() == "00:00"));
    assert_eq!(export.table.len(), 8);
    assert!(report.written.is_some());
}

#[tokio::test]
async fn test_all_windows_failed_and_empty_assets() {
    let platform = Arc::new(
        FakePlatform::new()
            .failing("inv1", "2024-01-01")
            .failing("inv1", "2024-01-02")
            .failing("inv1", "2024-01-03")
            .empty("m2"),
    );
    let exporter = exporter(platform);
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = CsvWriter::for_project(tmp.path().to_str().unwrap(), "Plant A");

    let outcome = exporter
        .run(&request(ModelSelection::All), &mut writer, &(), &CancellationToken::new())
        .await
        .unwrap();
    let RunOutcome::Completed(reports) = outcome else {
        panic!("expected matched assets");
    };

    // The orphan asset's model is not in the catalogue
    let ids: Vec<&str> = reports.iter().map(|r| r.target.asset_id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "inv1"]);

    assert!(matches!(reports[0].status, AssetStatus::Exported(_)));
    assert!(matches!(reports[1].status, AssetStatus::NothingToExport));
    assert!(reports[1].written.is_none());
    assert!(matches!(reports[2].status, AssetStatus::AllWindowsFailed));
    assert_eq!(reports[2].failed_windows.len(), 3);
    assert!(!reports[2].is_partial());
    assert!(reports[2].is_incomplete());

    assert!(!tmp.path().join("Plant A").join("Meter 2-m2.csv").exists());
    assert!(!tmp.path().join("Plant A").join("Inverter 1-inv1.csv").exists());
}

#[tokio::test]
async fn test_no_matching_assets() {
    let platform = Arc::new(FakePlatform::new());
    let exporter = exporter(platform.clone());
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = CsvWriter::for_project(tmp.path().to_str().unwrap(), "Plant A");

    let outcome = exporter
        .run(
            &request(ModelSelection::Ids(vec!["Transformer".to_string()])),
            &mut writer,
            &(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::NoMatchingAssets));
    assert_eq!(platform.query_count(), 0);
}

#[tokio::test]
async fn test_invalid_range_fails_before_any_request() {
    let platform = Arc::new(FakePlatform::new());
    let exporter = exporter(platform.clone());
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = CsvWriter::for_project(tmp.path().to_str().unwrap(), "Plant A");

    let backwards = ExportRequest {
        start: "2024-01-05".to_string(),
        end: "2024-01-03".to_string(),
        models: ModelSelection::All,
    };
    let err = exporter
        .run(&backwards, &mut writer, &(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::Config(ConfigError::InvalidRange(_))));
    assert_eq!(platform.catalogue_calls.load(Ordering::SeqCst), 0);
    assert_eq!(platform.query_count(), 0);
}

#[tokio::test]
async fn test_cancelled_run() {
    let platform = Arc::new(FakePlatform::new());
    let exporter = exporter(platform.clone());
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = CsvWriter::for_project(tmp.path().to_str().unwrap(), "Plant A");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = exporter
        .run(&request(meters()), &mut writer, &(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::Cancelled));
    assert_eq!(platform.query_count(), 0);
}

#[test]
fn test_invalid_credentials_are_rejected() {
    let mut config = platform_config();
    config.secret_key = "nohyphens".to_string();
    let result = Exporter::with_api(config, ExportSettings::default(), Arc::new(FakePlatform::new()));
    assert!(matches!(
        result,
        Err(ExportError::Config(ConfigError::InvalidKey { field: "SECRET_KEY", .. }))
    ));
}

#[tokio::test]
async fn test_empty_asset_with_failed_window_is_reported() {
    let platform = Arc::new(FakePlatform::new().empty("m2").failing("m2", "2024-01-02"));
    let exporter = exporter(platform);
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = CsvWriter::for_project(tmp.path().to_str().unwrap(), "Plant A");

    let outcome = exporter
        .run(&request(meters()), &mut writer, &(), &CancellationToken::new())
        .await
        .unwrap();
    let RunOutcome::Completed(reports) = outcome else {
        panic!("expected matched assets");
    };

    assert!(!reports[0].is_incomplete());

    let report = &reports[1];
    assert!(matches!(report.status, AssetStatus::NothingToExport));
    assert_eq!(report.windows, 3);
    assert_eq!(report.fetched_windows(), 2);
    assert_eq!(report.failed_windows.len(), 1);
    assert_eq!(report.failed_windows[0].0.start_iso(), "2024-01-02T00:00:00+08:00");
    assert!(report.is_partial());
    assert!(report.is_incomplete());
    assert!(report.written.is_none());
    assert!(!tmp.path().join("Plant A").join("Meter 2-m2.csv").exists());
}
