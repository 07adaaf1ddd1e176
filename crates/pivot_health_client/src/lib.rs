//! Health record model, type catalog, upload wire format and the
//! `HealthDataApi` trait with its reqwest-based implementation.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod catalog;
pub mod config;
pub mod http_client;
pub mod record;
pub mod wire;

pub use record::{HealthRecord, Measurement, RecordSpan};
pub use wire::UploadBatch;

#[derive(Debug, Error)]
pub enum PivotError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no unit found for kind {0}")]
    NoUnitFound(String),
    #[error("no name found for kind {0}")]
    NoNameFound(String),
    #[error("unrecognized value {value} for category kind {kind}")]
    UnrecognizedCategoryValue { kind: String, value: i64 },
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("failed to create upload request: {0}")]
    UploadRequestConstruction(String),
    #[error("invalid upload response: {0}")]
    InvalidUploadResponse(String),
    #[error("unknown upload response code {0}")]
    UnknownUploadResponseCode(u16),
    #[error("upload rejected with 401 unauthorized")]
    Unauthorized,

    #[error("failed to create refresh request: {0}")]
    RefreshRequestConstruction(String),
    #[error("empty refresh response")]
    EmptyRefreshResponse,
    #[error("invalid refresh response: {0}")]
    InvalidRefreshResponse(String),
    #[error("unknown refresh response code {0}")]
    UnknownRefreshResponseCode(u16),
}

impl PivotError {
    /// Catalog lookup and record translation failures only affect one kind
    /// or one record; everything else ends the current upload attempt.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            PivotError::NoUnitFound(_)
                | PivotError::NoNameFound(_)
                | PivotError::UnrecognizedCategoryValue { .. }
                | PivotError::InvalidRecord(_)
        )
    }
}

/// Body returned by the token-refresh endpoint.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub data_path: String,
}

/// Remote side of the upload pipeline.
///
/// Implementations map a 401 on upload to [`PivotError::Unauthorized`] so the
/// caller can decide whether a refresh is still allowed.
#[async_trait]
pub trait HealthDataApi: Send + Sync + 'static {
    /// PUT one batch. Returns the HTTP status on success.
    async fn upload_health_data(
        &self,
        access_token: &SecretString,
        endpoint_template: Option<&str>,
        batch: &UploadBatch,
    ) -> Result<u16, PivotError>;

    /// Exchange an expired access token for a fresh token pair.
    async fn refresh_tokens(
        &self,
        access_token: &SecretString,
        refresh_token: &SecretString,
    ) -> Result<RefreshTokenResponse, PivotError>;
}
