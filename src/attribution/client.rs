//! HTTP attribution client

use super::error::AttributionError;
use super::protocol::{
    parse_get_response, parse_success, GetTrackingRequest, SaveTrackingRequest,
    GET_TRACKING_PATH, HEALTH_PATH, SAVE_TRACKING_PATH,
};
use crate::config::AttributionConfig;
use crate::fingerprint::fingerprint_id;
use crate::models::{AttributionResult, Fingerprint, InstallParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Remote attribution operations the reconciler depends on.
#[async_trait]
pub trait AttributionBackend: Send + Sync {
    /// Ask the backend whether this fingerprint matches a recorded click.
    async fn fetch_install_params(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<AttributionResult, AttributionError>;

    /// Best-effort tracking record. Failures are logged, never propagated.
    async fn save_tracking_record(&self, fingerprint: &Fingerprint, params: &InstallParams)
        -> bool;
}

/// `reqwest`-backed client for the tracking API.
#[derive(Clone)]
pub struct HttpAttributionClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpAttributionClient {
    pub fn new(config: &AttributionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to build attribution HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Vec<u8>, AttributionError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(AttributionError::from_transport)?;
        Self::read_body(path, resp).await
    }

    async fn read_body(path: &str, resp: reqwest::Response) -> Result<Vec<u8>, AttributionError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(AttributionError::protocol(format!(
                "{} returned HTTP {}",
                path, status
            )));
        }
        let body = resp.bytes().await.map_err(AttributionError::from_transport)?;
        Ok(body.to_vec())
    }

    /// Record a click/install with the landing-page context the web SDK sends.
    pub async fn save_click(
        &self,
        fingerprint: &Fingerprint,
        params: &InstallParams,
        referrer: Option<&str>,
        url: Option<&str>,
    ) -> Result<bool, AttributionError> {
        let fingerprint_id = fingerprint_id(fingerprint);
        let request = SaveTrackingRequest {
            fingerprint_id: &fingerprint_id,
            fingerprint,
            params,
            timestamp: Utc::now().timestamp_millis(),
            referrer,
            url,
        };

        let body = self.post_json(SAVE_TRACKING_PATH, &request).await?;
        let saved = parse_success(&body)?;
        debug!(%fingerprint_id, saved, "Tracking record sent");
        Ok(saved)
    }

    /// `GET /tracking/health`
    pub async fn health(&self) -> Result<bool, AttributionError> {
        let resp = self
            .client
            .get(self.url(HEALTH_PATH))
            .send()
            .await
            .map_err(AttributionError::from_transport)?;
        let body = Self::read_body(HEALTH_PATH, resp).await?;
        parse_success(&body)
    }
}

#[async_trait]
impl AttributionBackend for HttpAttributionClient {
    async fn fetch_install_params(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<AttributionResult, AttributionError> {
        let fingerprint_id = fingerprint_id(fingerprint);
        let request = GetTrackingRequest {
            fingerprint_id: &fingerprint_id,
            fingerprint,
        };

        let started = Instant::now();
        let body = self.post_json(GET_TRACKING_PATH, &request).await?;
        let result = parse_get_response(&body)?;

        info!(
            %fingerprint_id,
            matched = result.is_matched(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Deferred install params fetched"
        );
        Ok(result)
    }

    async fn save_tracking_record(
        &self,
        fingerprint: &Fingerprint,
        params: &InstallParams,
    ) -> bool {
        match self.save_click(fingerprint, params, None, None).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "Tracking record save failed (ignored)");
                false
            }
        }
    }
}
