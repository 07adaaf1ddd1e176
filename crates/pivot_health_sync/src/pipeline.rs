//! Serialize, upload, and recover from an expired access token exactly once.

use pivot_health_client::{HealthDataApi, HealthRecord, PivotError, UploadBatch};
use std::sync::Arc;

use crate::analytics::{self, AnalyticsEvent};
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{SyncError, SyncResult};

#[derive(Clone)]
pub struct UploadPipeline {
    api: Arc<dyn HealthDataApi>,
    credentials: CredentialStore,
}

impl UploadPipeline {
    pub fn new(api: Arc<dyn HealthDataApi>, credentials: CredentialStore) -> Self {
        Self { api, credentials }
    }

    /// Upload `records` as one batch and return how many were sent. Nothing
    /// is sent when none of them encode.
    ///
    /// A 401 triggers a single token refresh followed by a single retry; a
    /// second 401 is terminal.
    pub async fn upload(&self, records: &[HealthRecord]) -> SyncResult<usize> {
        let result = self.upload_with_refresh(records).await;
        let event = match &result {
            Ok(count) => AnalyticsEvent::HealthKitDataUploadSucceeded { count: *count },
            Err(e) => AnalyticsEvent::HealthKitDataUploadFailed {
                error: e.to_string(),
                count: records.len(),
            },
        };
        analytics::track(&event);
        result
    }

    async fn upload_with_refresh(&self, records: &[HealthRecord]) -> SyncResult<usize> {
        let batch = UploadBatch::from_records(records);
        if batch.is_empty() {
            tracing::info!(skipped = records.len(), "nothing encodable to upload");
            return Ok(0);
        }
        let mut creds = self
            .credentials
            .load()
            .await?
            .ok_or_else(|| SyncError::MissingCredentials("no access token stored".into()))?;
        let mut refreshed = false;

        loop {
            let outcome = self
                .api
                .upload_health_data(
                    &creds.access_token,
                    creds.upload_endpoint_template.as_deref(),
                    &batch,
                )
                .await;
            match outcome {
                Ok(status) => {
                    tracing::info!(status, records = batch.len(), "health data uploaded");
                    return Ok(batch.len());
                }
                Err(PivotError::Unauthorized) if !refreshed => {
                    refreshed = true;
                    tracing::warn!("upload unauthorized, refreshing access token");
                    let resp = self
                        .api
                        .refresh_tokens(&creds.access_token, &creds.refresh_token)
                        .await?;
                    let next = Credentials::from(resp);
                    self.credentials.save(&next).await?;
                    creds = next;
                }
                Err(e) => {
                    tracing::error!(error = %e, refreshed, "health data upload failed");
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_utils::ScriptedApi;
    use pivot_health_client::{RecordSpan, RefreshTokenResponse};
    use secrecy::ExposeSecret;

    fn records() -> Vec<HealthRecord> {
        let now = chrono::Utc::now();
        vec![HealthRecord::quantity(
            "stepCount",
            RecordSpan::new(now, now).unwrap(),
            10.0,
            "count",
            None,
        )]
    }

    async fn pipeline(api: Arc<ScriptedApi>) -> (UploadPipeline, CredentialStore) {
        let creds = CredentialStore::new(Arc::new(MemoryStore::new()));
        creds.save(&Credentials::new("old", "ref")).await.unwrap();
        (UploadPipeline::new(api, creds.clone()), creds)
    }

    fn new_tokens() -> RefreshTokenResponse {
        RefreshTokenResponse {
            access_token: "new".into(),
            refresh_token: "ref2".into(),
            data_path: "/v1/gimmeData/{accessToken}".into(),
        }
    }

    #[tokio::test]
    async fn success_reports_count() {
        let api = Arc::new(ScriptedApi::default());
        api.push_upload(Ok(200));
        let (p, _) = pipeline(api.clone()).await;
        assert_eq!(p.upload(&records()).await.unwrap(), 1);
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn single_401_refreshes_and_retries_once() {
        let api = Arc::new(ScriptedApi::default());
        api.push_upload(Err(PivotError::Unauthorized));
        api.push_upload(Ok(200));
        api.set_refresh(Ok(new_tokens()));
        let (p, creds) = pipeline(api.clone()).await;

        assert_eq!(p.upload(&records()).await.unwrap(), 1);
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(api.upload_tokens(), vec!["old", "new"]);

        let batches = api.uploaded_batches();
        assert_eq!(batches[0], batches[1]);

        let stored = creds.load().await.unwrap().unwrap();
        assert_eq!(stored.access_token.expose_secret(), "new");
        assert_eq!(stored.refresh_token.expose_secret(), "ref2");
    }

    #[tokio::test]
    async fn double_401_is_terminal() {
        let api = Arc::new(ScriptedApi::default());
        api.push_upload(Err(PivotError::Unauthorized));
        api.push_upload(Err(PivotError::Unauthorized));
        api.push_upload(Ok(200));
        api.set_refresh(Ok(new_tokens()));
        let (p, _) = pipeline(api.clone()).await;

        let err = p.upload(&records()).await.unwrap_err();
        assert!(matches!(err, SyncError::Api(PivotError::Unauthorized)));
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(api.upload_tokens().len(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_is_terminal_and_keeps_old_tokens() {
        let api = Arc::new(ScriptedApi::default());
        api.push_upload(Err(PivotError::Unauthorized));
        let (p, creds) = pipeline(api.clone()).await;

        let err = p.upload(&records()).await.unwrap_err();
        assert!(matches!(err, SyncError::Api(PivotError::EmptyRefreshResponse)));
        assert_eq!(api.upload_tokens().len(), 1);
        let stored = creds.load().await.unwrap().unwrap();
        assert_eq!(stored.access_token.expose_secret(), "old");
    }

    #[tokio::test]
    async fn other_status_is_not_retried() {
        let api = Arc::new(ScriptedApi::default());
        api.push_upload(Err(PivotError::UnknownUploadResponseCode(500)));
        let (p, _) = pipeline(api.clone()).await;
        assert!(p.upload(&records()).await.is_err());
        assert_eq!(api.upload_tokens().len(), 1);
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_network() {
        let api = Arc::new(ScriptedApi::default());
        let p = UploadPipeline::new(
            api.clone(),
            CredentialStore::new(Arc::new(MemoryStore::new())),
        );
        let err = p.upload(&records()).await.unwrap_err();
        assert!(matches!(err, SyncError::MissingCredentials(_)));
        assert!(api.upload_tokens().is_empty());
    }

    #[tokio::test]
    async fn unencodable_batch_is_not_sent() {
        let api = Arc::new(ScriptedApi::default());
        let p = UploadPipeline::new(
            api.clone(),
            CredentialStore::new(Arc::new(MemoryStore::new())),
        );
        let now = chrono::Utc::now();
        let records = vec![HealthRecord::category(
            "sleepAnalysis",
            RecordSpan::new(now, now).unwrap(),
            9,
        )];
        assert_eq!(p.upload(&records).await.unwrap(), 0);
        assert!(api.upload_tokens().is_empty());
        assert_eq!(api.refresh_calls(), 0);
    }
}
