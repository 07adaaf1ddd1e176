//! HTTP client implementation for the Pivot health-data API.
//!
//! This module provides a reqwest-based implementation of the [`HealthDataApi`](crate::HealthDataApi) trait.

use crate::config::Config;
use crate::{HealthDataApi, PivotError, RefreshTokenResponse, UploadBatch};
use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};

const JSON_UTF8: &str = "application/json; charset=utf-8";
const API_VERSION: &str = "v1";
/// Placeholder replaced by the access token in upload endpoint templates.
pub const ACCESS_TOKEN_PLACEHOLDER: &str = "{accessToken}";

/// Client for the Pivot API using reqwest.
#[derive(Clone, Debug)]
pub struct ReqwestHealthClient {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestHealthClient {
    /// Create a new client with reqwest's default transport settings.
    ///
    /// # Arguments
    /// * `base_url` - The API root (e.g., "https://api.gopivot.example")
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a client honouring the configured request timeout.
    pub fn from_config(config: &Config) -> Result<Self, PivotError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Resolve the upload URL: the server-provided template with the token
    /// substituted, or `<base>/v1/gimmeData/<token>`.
    pub fn upload_url(&self, access_token: &str, template: Option<&str>) -> Result<Url, PivotError> {
        let construction = |e: String| PivotError::UploadRequestConstruction(e);
        match template.filter(|t| !t.trim().is_empty()) {
            Some(t) => {
                let resolved = t.replace(ACCESS_TOKEN_PLACEHOLDER, access_token);
                if resolved.starts_with("http://") || resolved.starts_with("https://") {
                    Url::parse(&resolved).map_err(|e| construction(e.to_string()))
                } else {
                    let joined = format!("{}/{}", self.base_url, resolved.trim_start_matches('/'));
                    Url::parse(&joined).map_err(|e| construction(e.to_string()))
                }
            }
            None => self
                .api_url(&["gimmeData", access_token])
                .map_err(construction),
        }
    }

    /// `<base>/v1/reAuth/<access>/<refresh>`
    pub fn refresh_url(&self, access_token: &str, refresh_token: &str) -> Result<Url, PivotError> {
        self.api_url(&["reAuth", access_token, refresh_token])
            .map_err(PivotError::RefreshRequestConstruction)
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, String> {
        let mut url = Url::parse(&self.base_url).map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|_| format!("base url cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .push(API_VERSION)
            .extend(segments);
        Ok(url)
    }

    /// Build an authenticated PUT request.
    fn put_request(&self, url: Url, token: &SecretString) -> reqwest::RequestBuilder {
        self.client
            .put(url)
            .bearer_auth(token.expose_secret())
            .header(CONTENT_TYPE, JSON_UTF8)
            .header(ACCEPT, JSON_UTF8)
    }

    /// Build a GET request expecting JSON.
    fn get_request(&self, url: Url) -> reqwest::RequestBuilder {
        self.client.get(url).header(ACCEPT, JSON_UTF8)
    }
}

#[async_trait]
impl HealthDataApi for ReqwestHealthClient {
    async fn upload_health_data(
        &self,
        access_token: &SecretString,
        endpoint_template: Option<&str>,
        batch: &UploadBatch,
    ) -> Result<u16, PivotError> {
        let url = self.upload_url(access_token.expose_secret(), endpoint_template)?;
        let body = batch.to_json_bytes()?;
        tracing::debug!(records = batch.len(), bytes = body.len(), "uploading health data");

        let resp = self.put_request(url, access_token).body(body).send().await?;
        let status = resp.status().as_u16();
        match status {
            200..=299 => Ok(status),
            401 => Err(PivotError::Unauthorized),
            100..=199 | 300..=399 => Err(PivotError::InvalidUploadResponse(format!(
                "unexpected status {status}"
            ))),
            _ => Err(PivotError::UnknownUploadResponseCode(status)),
        }
    }

    async fn refresh_tokens(
        &self,
        access_token: &SecretString,
        refresh_token: &SecretString,
    ) -> Result<RefreshTokenResponse, PivotError> {
        let url = self.refresh_url(access_token.expose_secret(), refresh_token.expose_secret())?;
        let resp = self.get_request(url).send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(PivotError::UnknownRefreshResponseCode(status));
        }

        // Read body as text first so we can report an empty body separately
        // from one that does not match the expected shape.
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Err(PivotError::EmptyRefreshResponse);
        }
        serde_json::from_str::<RefreshTokenResponse>(&text).map_err(|e| {
            let body_snippet: String = text.chars().take(256).collect();
            PivotError::InvalidRefreshResponse(format!("{e} - body: {body_snippet}"))
        })
    }
}
