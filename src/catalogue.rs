//! Model catalogue and device assets
//!
//! Parses the model and device search responses and joins assets against the
//! selected models to decide what gets fetched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::FetchError;

/// Device type definition with the point identifiers it exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub model_id: String,
    pub point_identifiers: Vec<String>,
}

/// One device instance and the model it is assigned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub asset_id: String,
    pub device_name: String,
    pub model_id: String,
}

/// An asset selected for export together with the points to request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    pub asset_id: String,
    pub device_name: String,
    pub model_id: String,
    pub point_identifiers: Vec<String>,
}

impl ExportTarget {
    /// Comma-joined identifiers for the `pointIds` request field
    pub fn point_ids_csv(&self) -> String {
        self.point_identifiers.join(",")
    }
}

/// Result of joining assets against the selected models
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(Vec<ExportTarget>),
    /// No asset uses any of the selected models
    NoMatchingAssets,
}

impl MatchOutcome {
    pub fn targets(&self) -> &[ExportTarget] {
        match self {
            MatchOutcome::Matched(targets) => targets,
            MatchOutcome::NoMatchingAssets => &[],
        }
    }
}

/// Pair each asset with the selected model it belongs to.
///
/// Assets whose model is not selected are dropped. If a model id is selected
/// twice, the first definition is used.
pub fn match_assets(assets: &[Asset], models: &[Model]) -> MatchOutcome {
    let mut by_id: HashMap<&str, &Model> = HashMap::with_capacity(models.len());
    for model in models {
        by_id.entry(model.model_id.as_str()).or_insert(model);
    }

    let targets: Vec<ExportTarget> = assets
        .iter()
        .filter_map(|asset| {
            let model = by_id.get(asset.model_id.as_str())?;
            Some(ExportTarget {
                asset_id: asset.asset_id.clone(),
                device_name: asset.device_name.clone(),
                model_id: model.model_id.clone(),
                point_identifiers: model.point_identifiers.clone(),
            })
        })
        .collect();

    info!(
        "Matched {} of {} assets against {} selected models",
        targets.len(),
        assets.len(),
        models.len()
    );

    if targets.is_empty() {
        MatchOutcome::NoMatchingAssets
    } else {
        MatchOutcome::Matched(targets)
    }
}

/// One page of parsed search results
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of records the platform returned, including ones that were dropped
    pub raw_len: usize,
}

/// Parse the `data` of a model search response (`data.items[]`)
pub fn parse_models(data: &Value) -> Result<Page<Model>, FetchError> {
    let items = data
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("model search response has no data.items array".into()))?;

    let mut models = Vec::with_capacity(items.len());
    for item in items {
        let Some(model_id) = item.get("modelId").and_then(Value::as_str) else {
            warn!("Model record without modelId, skipping");
            continue;
        };
        let point_identifiers = extract_identifiers(item.get("measurepoints"));
        debug!("Model {} exposes {} points", model_id, point_identifiers.len());
        models.push(Model { model_id: model_id.to_string(), point_identifiers });
    }

    Ok(Page { items: models, raw_len: items.len() })
}

/// `measurepoints` comes back keyed by identifier; a plain list is accepted too
fn extract_identifiers(measurepoints: Option<&Value>) -> Vec<String> {
    let entries: Vec<&Value> = match measurepoints {
        Some(Value::Object(map)) => map.values().collect(),
        Some(Value::Array(list)) => list.iter().collect(),
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|mp| mp.get("identifier").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Parse the `data` of a device search response (`data[]`)
pub fn parse_assets(data: &Value) -> Result<Page<Asset>, FetchError> {
    let items = data
        .as_array()
        .ok_or_else(|| FetchError::Malformed("device search response data is not an array".into()))?;

    let mut assets = Vec::with_capacity(items.len());
    for item in items {
        let asset_id = item.get("assetId").and_then(Value::as_str);
        let model_id = item.get("modelId").and_then(Value::as_str);
        let (Some(asset_id), Some(model_id)) = (asset_id, model_id) else {
            warn!("Device record without assetId or modelId, skipping: {}", item);
            continue;
        };

        let device_name = item
            .get("deviceName")
            .and_then(|name| name.get("defaultValue"))
            .and_then(Value::as_str)
            .unwrap_or(asset_id);

        assets.push(Asset {
            asset_id: asset_id.to_string(),
            device_name: device_name.to_string(),
            model_id: model_id.to_string(),
        });
    }

    Ok(Page { items: assets, raw_len: items.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model(id: &str, points: &[&str]) -> Model {
        Model {
            model_id: id.to_string(),
            point_identifiers: points.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn asset(id: &str, name: &str, model_id: &str) -> Asset {
        Asset {
            asset_id: id.to_string(),
            device_name: name.to_string(),
            model_id: model_id.to_string(),
        }
    }

    #[test]
    fn test_match_no_assets() {
        let outcome = match_assets(&[], &[model("Meter", &["kwh"])]);
        assert_eq!(outcome, MatchOutcome::NoMatchingAssets);
        assert!(outcome.targets().is_empty());
    }

    #[test]
    fn test_match_no_shared_model() {
        let assets = [asset("a1", "Pump 1", "Pump"), asset("a2", "Pump 2", "Pump")];
        let outcome = match_assets(&assets, &[model("Meter", &["kwh"])]);
        assert_eq!(outcome, MatchOutcome::NoMatchingAssets);
    }

    #[test]
    fn test_match_drops_unselected_assets() {
        let assets = [
            asset("a1", "Meter 1", "Meter"),
            asset("a2", "Pump 1", "Pump"),
            asset("a3", "Meter 2", "Meter"),
        ];
        let models = [model("Meter", &["kwh", "kw"])];

        let outcome = match_assets(&assets, &models);
        let targets = outcome.targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].asset_id, "a1");
        assert_eq!(targets[1].asset_id, "a3");
        assert_eq!(targets[1].device_name, "Meter 2");
        assert_eq!(targets[0].point_ids_csv(), "kwh,kw");
    }

    #[test]
    fn test_match_duplicate_model_uses_first() {
        let assets = [asset("a1", "Meter 1", "Meter")];
        let models = [model("Meter", &["kwh"]), model("Meter", &["other"])];
        let outcome = match_assets(&assets, &models);
        assert_eq!(outcome.targets().len(), 1);
        assert_eq!(outcome.targets()[0].point_identifiers, vec!["kwh"]);
    }

    #[test]
    fn test_parse_models_keyed_measurepoints() {
        let data = json!({
            "items": [
                {
                    "modelId": "Inverter",
                    "modelIdPath": "/Inverter",
                    "measurepoints": {
                        "INV.P": {"identifier": "INV.P", "name": {"defaultValue": "Power"}},
                        "INV.Q": {"identifier": "INV.Q"}
                    }
                },
                {"modelId": "Empty"},
                {"modelIdPath": "/broken"}
            ]
        });

        let page = parse_models(&data).unwrap();
        assert_eq!(page.raw_len, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0], model("Inverter", &["INV.P", "INV.Q"]));
        assert!(page.items[1].point_identifiers.is_empty());
    }

    #[test]
    fn test_parse_models_list_measurepoints() {
        let data = json!({"items": [{"modelId": "M", "measurepoints": [{"identifier": "x"}, {"name": "no id"}]}]});
        let page = parse_models(&data).unwrap();
        assert_eq!(page.items[0].point_identifiers, vec!["x"]);
    }

    #[test]
    fn test_parse_models_missing_items() {
        assert!(matches!(parse_models(&json!({})), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn test_parse_assets() {
        let data = json!([
            {"assetId": "a1", "modelId": "Meter", "deviceName": {"defaultValue": "Meter 1", "i18nValue": {}}},
            {"assetId": "a2", "modelId": "Meter"},
            {"deviceName": {"defaultValue": "orphan"}}
        ]);

        let page = parse_assets(&data).unwrap();
        assert_eq!(page.raw_len, 3);
        assert_eq!(page.items, vec![asset("a1", "Meter 1", "Meter"), asset("a2", "a2", "Meter")]);
    }
}
