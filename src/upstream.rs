//! The provider's HTTP endpoints.
//!
//! [`Upstream`] is the seam the monitor and the HTTP surface talk through;
//! [`KmoniClient`] is the live implementation.

use crate::clock::{self, TimeKey};
use crate::config::UpstreamConfig;
use crate::types::{IntensityType, StationSource};
use chrono::NaiveDateTime;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER};
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";
const ACCEPT_IMAGE: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with {status}")]
    Status { url: String, status: StatusCode },
    #[error("unrecognised provider timestamp {0:?}")]
    Timestamp(String),
}

impl UpstreamError {
    /// HTTP status reported by the provider, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            UpstreamError::Transport { source, .. } => source.status(),
            UpstreamError::Timestamp(_) => None,
        }
    }
}

/// The provider's self-reported latest publication time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestTime {
    pub time: NaiveDateTime,
    pub raw: String,
}

impl LatestTime {
    pub fn parse(raw: &str) -> Result<Self, UpstreamError> {
        let time = clock::parse_provider_time(raw)
            .ok_or_else(|| UpstreamError::Timestamp(raw.to_string()))?;
        Ok(Self { time, raw: raw.to_string() })
    }
}

pub trait Upstream: Send + Sync + 'static {
    fn latest_time(&self) -> impl Future<Output = Result<LatestTime, UpstreamError>> + Send;

    /// EEW record for `key`. The payload is passed through untouched.
    fn eew(
        &self,
        key: &TimeKey,
    ) -> impl Future<Output = Result<serde_json::Value, UpstreamError>> + Send;

    /// Raster bytes for `key`, or `None` when the provider has no image for it.
    fn raster(
        &self,
        key: &TimeKey,
        kind: IntensityType,
        source: StationSource,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, UpstreamError>> + Send;
}

#[derive(Deserialize)]
struct LatestResponse {
    latest_time: String,
}

pub struct KmoniClient {
    http: reqwest::Client,
    base_url: String,
}

impl KmoniClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let referer = config
            .referer
            .clone()
            .unwrap_or_else(|| format!("{}/", base_url));

        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_str(&referer)?);
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { http, base_url })
    }

    pub fn latest_url(&self) -> String {
        format!("{}/webservice/server/pros/latest.json", self.base_url)
    }

    pub fn eew_url(&self, key: &TimeKey) -> String {
        format!("{}/webservice/hypo/eew/{}.json", self.base_url, key)
    }

    pub fn raster_url(&self, key: &TimeKey, kind: IntensityType, source: StationSource) -> String {
        let file_type = format!("{}_{}", kind, source);
        format!(
            "{}/data/map_img/RealTimeImg/{ft}/{}/{}.{ft}.gif",
            self.base_url,
            key.date_dir(),
            key,
            ft = file_type
        )
    }

    async fn get(
        &self,
        url: &str,
        accept: &'static str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, UpstreamError> {
        self.http
            .get(url)
            .header(ACCEPT, accept)
            .query(query)
            .send()
            .await
            .map_err(transport(url))
    }
}

fn transport(url: &str) -> impl FnOnce(reqwest::Error) -> UpstreamError + '_ {
    move |source| UpstreamError::Transport { url: url.to_string(), source }
}

impl Upstream for KmoniClient {
    async fn latest_time(&self) -> Result<LatestTime, UpstreamError> {
        let url = self.latest_url();
        // Cache buster, same as the provider's own page.
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let response = self.get(&url, ACCEPT_JSON, &[("_", stamp.to_string())]).await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status { url, status: response.status() });
        }
        let body: LatestResponse = response.json().await.map_err(transport(&url))?;
        LatestTime::parse(&body.latest_time)
    }

    async fn eew(&self, key: &TimeKey) -> Result<serde_json::Value, UpstreamError> {
        let url = self.eew_url(key);
        let response = self.get(&url, ACCEPT_JSON, &[]).await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status { url, status: response.status() });
        }
        response.json().await.map_err(transport(&url))
    }

    async fn raster(
        &self,
        key: &TimeKey,
        kind: IntensityType,
        source: StationSource,
    ) -> Result<Option<Vec<u8>>, UpstreamError> {
        let url = self.raster_url(key, kind, source);
        let response = self.get(&url, ACCEPT_IMAGE, &[]).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if !status.is_success() => Err(UpstreamError::Status { url, status }),
            _ => {
                let bytes = response.bytes().await.map_err(transport(&url))?;
                Ok(Some(bytes.to_vec()))
            }
        }
    }
}
