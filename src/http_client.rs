//! HTTP client for the platform's model, device and time-series services
//!
//! All three endpoints take a signed JSON POST and answer with an envelope of
//! the form `{"code": 0, "msg": "OK", "data": ...}`.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::catalogue::{parse_assets, parse_models, Asset, ExportTarget, Model};
use crate::config::{ExportSettings, PlatformConfig};
use crate::error::FetchError;
use crate::sample::{parse_raw_items, ParsedSamples};
use crate::signer::RequestSigner;
use crate::window::TimeWindow;

/// Upper bound on pages walked by a catalogue search
const MAX_SEARCH_PAGES: usize = 200;

/// Longest response body excerpt kept in an error
const ERROR_BODY_LIMIT: usize = 512;

/// Body of a raw time-series query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuery {
    pub point_ids: String,
    pub asset_ids: String,
    pub start_time: String,
    pub end_time: String,
    /// Sampling interval in seconds
    pub interval: u32,
    pub page_size: usize,
}

impl RawQuery {
    pub fn new(target: &ExportTarget, window: &TimeWindow, interval_seconds: u32, page_size: usize) -> Self {
        Self {
            point_ids: target.point_ids_csv(),
            asset_ids: target.asset_id.clone(),
            start_time: window.start_iso(),
            end_time: window.end_iso(),
            interval: interval_seconds,
            page_size,
        }
    }
}

/// Remote operations the exporter needs
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// All models of the organization with their point identifiers
    async fn search_models(&self) -> Result<Vec<Model>, FetchError>;

    /// All device assets of the organization
    async fn search_device_assets(&self) -> Result<Vec<Asset>, FetchError>;

    /// Samples for one asset over one window
    async fn query_raw(&self, query: &RawQuery) -> Result<ParsedSamples, FetchError>;
}

/// reqwest-backed platform client
pub struct PlatformClient {
    config: PlatformConfig,
    signer: RequestSigner,
    client: reqwest::Client,
    model_page_size: usize,
    device_page_size: usize,
}

impl PlatformClient {
    /// Create a new platform client
    pub fn new(config: PlatformConfig, settings: &ExportSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|source| FetchError::Transport {
                url: config.gateway().to_string(),
                source,
            })?;

        info!("Platform client ready for {} (org {})", config.gateway(), config.org_id);

        Ok(Self {
            signer: RequestSigner::new(config.secret_key.clone()),
            config,
            client,
            model_page_size: settings.model_page_size,
            device_page_size: settings.device_page_size,
        })
    }

    pub fn models_url(&self) -> String {
        format!(
            "{}/model-service/v2.1/thing-models?action=search&orgId={}",
            self.config.gateway(),
            self.config.org_id
        )
    }

    pub fn devices_url(&self) -> String {
        format!(
            "{}/connect-service/v2.1/devices?action=search&orgId={}",
            self.config.gateway(),
            self.config.org_id
        )
    }

    pub fn raw_url(&self) -> String {
        format!("{}/tsdb-service/v2.1/raw?orgId={}", self.config.gateway(), self.config.org_id)
    }

    /// Send a signed POST and return the envelope's `data`
    async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Value, FetchError> {
        let signed = self.signer.sign_now();

        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("AccessKey {}", self.config.access_key))
            .header("timestamp", signed.timestamp)
            .header("signature", signed.signature)
            .json(body)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(format!("invalid JSON from {}: {}", url, e)))?;

        unwrap_envelope(envelope)
    }
}

/// Check the platform status code and take out `data`
pub fn unwrap_envelope(envelope: Value) -> Result<Value, FetchError> {
    let Value::Object(mut map) = envelope else {
        return Err(FetchError::Malformed("response is not a JSON object".into()));
    };

    if let Some(code) = map.get("code").and_then(Value::as_i64) {
        if code != 0 {
            let message = map
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("no message")
                .to_string();
            return Err(FetchError::Api { code, message });
        }
    }

    Ok(map.remove("data").unwrap_or(Value::Null))
}

fn truncate(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn search_models(&self) -> Result<Vec<Model>, FetchError> {
        let url = self.models_url();
        let mut models = Vec::new();

        for page_no in 1..=MAX_SEARCH_PAGES {
            let body = json!({
                "projection": ["modelId", "modelIdPath", "measurepoints"],
                "pagination": { "pageNo": page_no, "pageSize": self.model_page_size }
            });
            let data = self.post_json(&url, &body).await?;
            let page = parse_models(&data)?;
            models.extend(page.items);

            if page.raw_len < self.model_page_size {
                break;
            }
            if page_no == MAX_SEARCH_PAGES {
                warn!("Model search stopped after {} pages", MAX_SEARCH_PAGES);
            }
        }

        info!("Found {} models", models.len());
        Ok(models)
    }

    async fn search_device_assets(&self) -> Result<Vec<Asset>, FetchError> {
        let url = self.devices_url();
        let mut assets = Vec::new();

        for page_no in 1..=MAX_SEARCH_PAGES {
            let body = json!({
                "pagination": { "pageNo": page_no, "pageSize": self.device_page_size }
            });
            let data = self.post_json(&url, &body).await?;
            let page = parse_assets(&data)?;
            assets.extend(page.items);

            if page.raw_len < self.device_page_size {
                break;
            }
            if page_no == MAX_SEARCH_PAGES {
                warn!("Device search stopped after {} pages", MAX_SEARCH_PAGES);
            }
        }

        info!("Found {} device assets", assets.len());
        Ok(assets)
    }

    async fn query_raw(&self, query: &RawQuery) -> Result<ParsedSamples, FetchError> {
        let data = self.post_json(&self.raw_url(), query).await?;
        parse_raw_items(&data)
    }
}
