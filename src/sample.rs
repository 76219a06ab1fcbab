//! Raw time-series samples
//!
//! Each record of a raw query response carries `assetId`, `timestamp`,
//! `localtime` and exactly one more field named after the measured point.
//! Records are turned into tagged [`RawSample`]s here so nothing downstream
//! has to look for the "other" key.

use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::FetchError;

const ASSET_ID_FIELD: &str = "assetId";
const TIMESTAMP_FIELD: &str = "timestamp";
const LOCALTIME_FIELD: &str = "localtime";

/// Accepts `2024-01-01 10:00:00` with an optional fractional part
const LOCALTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One measurement of one point at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub asset_id: String,
    pub timestamp_millis: Option<i64>,
    /// Wall-clock time in the asset's local zone
    pub local_time: NaiveDateTime,
    pub point_identifier: String,
    pub value: Value,
}

/// Samples parsed from one window's response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSamples {
    pub samples: Vec<RawSample>,
    /// Records dropped because they did not have the expected shape
    pub skipped: usize,
    /// Number of records in the response, before skipping
    pub record_count: usize,
}

/// Parse the `data` object of a raw query response.
///
/// A `null` data means the platform had nothing for the window.
pub fn parse_raw_items(data: &Value) -> Result<ParsedSamples, FetchError> {
    if data.is_null() {
        return Ok(ParsedSamples::default());
    }

    let items = data
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("raw query response has no data.items array".into()))?;

    let mut parsed = ParsedSamples {
        samples: Vec::with_capacity(items.len()),
        skipped: 0,
        record_count: items.len(),
    };

    for (idx, item) in items.iter().enumerate() {
        match item.as_object().map(sample_from_record) {
            Some(Ok(sample)) => parsed.samples.push(sample),
            Some(Err(reason)) => {
                warn!("Record {} skipped: {}", idx, reason);
                parsed.skipped += 1;
            }
            None => {
                warn!("Record {} is not a JSON object, skipping", idx);
                parsed.skipped += 1;
            }
        }
    }

    debug!(
        "Parsed {} samples from {} records ({} skipped)",
        parsed.samples.len(),
        parsed.record_count,
        parsed.skipped
    );
    Ok(parsed)
}

fn sample_from_record(record: &Map<String, Value>) -> Result<RawSample, String> {
    let mut measurements = record
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), ASSET_ID_FIELD | TIMESTAMP_FIELD | LOCALTIME_FIELD));
    let (point_identifier, value) = measurements
        .next()
        .ok_or_else(|| "no measurement field".to_string())?;
    if let Some((extra, _)) = measurements.next() {
        debug!("Record has more than one measurement field, ignoring '{}'", extra);
    }

    let local_time = record
        .get(LOCALTIME_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| "missing localtime".to_string())
        .and_then(|raw| {
            NaiveDateTime::parse_from_str(raw, LOCALTIME_FORMAT)
                .map_err(|e| format!("bad localtime '{}': {}", raw, e))
        })?;

    let timestamp_millis = record.get(TIMESTAMP_FIELD).and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    });

    let asset_id = record
        .get(ASSET_ID_FIELD)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(RawSample {
        asset_id,
        timestamp_millis,
        local_time,
        point_identifier: point_identifier.clone(),
        value: value.clone(),
    })
}
