#![cfg(test)]

//! Shared fakes for unit tests.

use async_trait::async_trait;
use pivot_health_client::{HealthDataApi, PivotError, RefreshTokenResponse, UploadBatch};
use secrecy::{ExposeSecret, SecretString};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::collector::{HealthStore, RawSample, SampleQuery};
use crate::error::{SyncError, SyncResult};

/// Replays scripted upload statuses and records what it was called with.
/// Unscripted uploads answer 500.
#[derive(Default)]
pub struct ScriptedApi {
    uploads: Mutex<VecDeque<Result<u16, PivotError>>>,
    refresh: Mutex<Option<Result<RefreshTokenResponse, PivotError>>>,
    upload_tokens: Mutex<Vec<String>>,
    batches: Mutex<Vec<UploadBatch>>,
    refresh_calls: Mutex<u32>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedApi {
    pub fn push_upload(&self, result: Result<u16, PivotError>) {
        self.uploads.lock().unwrap().push_back(result);
    }

    pub fn set_refresh(&self, result: Result<RefreshTokenResponse, PivotError>) {
        *self.refresh.lock().unwrap() = Some(result);
    }

    /// Make every upload wait for a notification before answering.
    pub fn gate_uploads(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    pub fn upload_tokens(&self) -> Vec<String> {
        self.upload_tokens.lock().unwrap().clone()
    }

    pub fn uploaded_batches(&self) -> Vec<UploadBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn refresh_calls(&self) -> u32 {
        *self.refresh_calls.lock().unwrap()
    }
}

#[async_trait]
impl HealthDataApi for ScriptedApi {
    async fn upload_health_data(
        &self,
        access_token: &SecretString,
        _endpoint_template: Option<&str>,
        batch: &UploadBatch,
    ) -> Result<u16, PivotError> {
        self.upload_tokens
            .lock()
            .unwrap()
            .push(access_token.expose_secret().to_string());
        self.batches.lock().unwrap().push(batch.clone());
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(PivotError::UnknownUploadResponseCode(500)))
    }

    async fn refresh_tokens(
        &self,
        _access_token: &SecretString,
        _refresh_token: &SecretString,
    ) -> Result<RefreshTokenResponse, PivotError> {
        *self.refresh_calls.lock().unwrap() += 1;
        self.refresh
            .lock()
            .unwrap()
            .take()
            .unwrap_or(Err(PivotError::EmptyRefreshResponse))
    }
}

/// In-memory health store with per-kind canned answers.
#[derive(Default)]
pub struct FakeHealthStore {
    samples: Mutex<HashMap<String, Result<Vec<RawSample>, String>>>,
    delays: Mutex<HashMap<String, Duration>>,
    queries: Mutex<Vec<SampleQuery>>,
    background: Mutex<Vec<String>>,
    deny_authorization: bool,
}

impl FakeHealthStore {
    pub fn denying() -> Self {
        Self {
            deny_authorization: true,
            ..Self::default()
        }
    }

    pub fn with_samples(self, kind_id: &str, samples: Vec<RawSample>) -> Self {
        self.samples
            .lock()
            .unwrap()
            .insert(kind_id.to_string(), Ok(samples));
        self
    }

    pub fn with_failure(self, kind_id: &str, message: &str) -> Self {
        self.samples
            .lock()
            .unwrap()
            .insert(kind_id.to_string(), Err(message.to_string()));
        self
    }

    pub fn with_delay(self, kind_id: &str, delay: Duration) -> Self {
        self.delays
            .lock()
            .unwrap()
            .insert(kind_id.to_string(), delay);
        self
    }

    pub fn queries(&self) -> Vec<SampleQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn background_kinds(&self) -> Vec<String> {
        self.background.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthStore for FakeHealthStore {
    async fn request_authorization(&self, _kind_ids: &[String]) -> SyncResult<bool> {
        Ok(!self.deny_authorization)
    }

    async fn enable_background_delivery(&self, kind_id: &str) -> SyncResult<()> {
        self.background.lock().unwrap().push(kind_id.to_string());
        Ok(())
    }

    async fn query(&self, query: &SampleQuery) -> SyncResult<Vec<RawSample>> {
        self.queries.lock().unwrap().push(query.clone());
        let delay = self.delays.lock().unwrap().get(&query.kind_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let answer = self.samples.lock().unwrap().get(&query.kind_id).cloned();
        match answer {
            Some(Ok(samples)) => Ok(samples),
            Some(Err(message)) => Err(SyncError::query(&query.kind_id, message)),
            None => Ok(Vec::new()),
        }
    }
}
