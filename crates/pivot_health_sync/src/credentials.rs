use pivot_health_client::RefreshTokenResponse;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;

use crate::error::SyncResult;
use crate::store::{KeyValueStore, WriteBatch};

const ACCESS_TOKEN: &str = "access_token";
const REFRESH_TOKEN: &str = "refresh_token";
const DATA_PATH: &str = "data_path";
const DATAMATION_ID: &str = "datamation_id";

/// Tokens used by every upload attempt.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub upload_endpoint_template: Option<String>,
}

impl Credentials {
    pub fn new(access_token: &str, refresh_token: &str) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            refresh_token: SecretString::new(refresh_token.into()),
            upload_endpoint_template: None,
        }
    }

    pub fn with_endpoint_template(mut self, template: impl Into<String>) -> Self {
        self.upload_endpoint_template = Some(template.into());
        self
    }
}

impl From<RefreshTokenResponse> for Credentials {
    fn from(resp: RefreshTokenResponse) -> Self {
        Credentials::new(&resp.access_token, &resp.refresh_token)
            .with_endpoint_template(resp.data_path)
    }
}

/// Credentials persisted in the shared key-value store.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn get_string(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(match self.store.get(key).await? {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        })
    }

    /// `None` until both tokens have been received.
    pub async fn load(&self) -> SyncResult<Option<Credentials>> {
        let access = self.get_string(ACCESS_TOKEN).await?;
        let refresh = self.get_string(REFRESH_TOKEN).await?;
        let (Some(access), Some(refresh)) = (access, refresh) else {
            return Ok(None);
        };
        let mut creds = Credentials::new(&access, &refresh);
        creds.upload_endpoint_template = self.get_string(DATA_PATH).await?;
        Ok(Some(creds))
    }

    pub async fn save(&self, creds: &Credentials) -> SyncResult<()> {
        let mut entries = vec![
            (
                ACCESS_TOKEN.to_string(),
                Value::String(creds.access_token.expose_secret().to_string()),
            ),
            (
                REFRESH_TOKEN.to_string(),
                Value::String(creds.refresh_token.expose_secret().to_string()),
            ),
        ];
        if let Some(template) = &creds.upload_endpoint_template {
            entries.push((DATA_PATH.to_string(), Value::String(template.clone())));
        }
        self.store.set_many(entries).await
    }

    /// Tokens handed over by the web layer. Any previous endpoint template
    /// belongs to the old session and is dropped in the same write.
    pub async fn save_bridge_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        datamation_id: &str,
    ) -> SyncResult<()> {
        let batch = WriteBatch::new()
            .remove(DATA_PATH)
            .set(ACCESS_TOKEN, Value::String(access_token.to_string()))
            .set(REFRESH_TOKEN, Value::String(refresh_token.to_string()))
            .set(DATAMATION_ID, Value::String(datamation_id.to_string()));
        self.store.write(batch).await
    }

    pub async fn datamation_id(&self) -> SyncResult<Option<String>> {
        self.get_string(DATAMATION_ID).await
    }
}
