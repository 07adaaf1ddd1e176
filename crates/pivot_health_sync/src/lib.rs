//! Background health-data sync: collect from the device health store, batch,
//! upload, and advance per-kind checkpoints only once the upload succeeded.

use pivot_health_client::HealthDataApi;
use pivot_health_client::http_client::ReqwestHealthClient;
use std::sync::Arc;
use std::time::Duration;

pub mod accumulator;
pub mod analytics;
pub mod bridge;
pub mod checkpoint;
pub mod collector;
pub mod credentials;
pub mod error;
pub mod pipeline;
pub mod replay;
pub mod settings;
pub mod store;

mod test_utils;

pub use accumulator::{
    AccumulatorState, BatchAccumulator, ObserverCompletion, WindowId, WindowOutcome, WindowReport,
};
pub use bridge::{BridgeDispatcher, BridgeMessage, BridgeReply};
pub use checkpoint::CheckpointStore;
pub use collector::{CollectionSummary, Collector, HealthStore, KindOutcome, RawSample, SampleQuery};
pub use credentials::{CredentialStore, Credentials};
pub use error::{SyncError, SyncResult};
pub use pipeline::UploadPipeline;
pub use settings::SyncSettings;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, WriteBatch};

/// Everything wired together over one key-value store.
#[derive(Clone)]
pub struct SyncService {
    credentials: CredentialStore,
    checkpoints: CheckpointStore,
    collector: Collector,
    bridge: BridgeDispatcher,
}

impl SyncService {
    pub fn new(
        api: Arc<dyn HealthDataApi>,
        health: Arc<dyn HealthStore>,
        store: Arc<dyn KeyValueStore>,
        window: Duration,
        lookback_months: u32,
    ) -> Self {
        let credentials = CredentialStore::new(store.clone());
        let checkpoints = CheckpointStore::new(store);
        let pipeline = UploadPipeline::new(api, credentials.clone());
        let accumulator = BatchAccumulator::new(pipeline, checkpoints.clone(), window);
        let collector = Collector::new(health, checkpoints.clone(), accumulator, lookback_months);
        let bridge = BridgeDispatcher::new(credentials.clone(), collector.clone());
        Self {
            credentials,
            checkpoints,
            collector,
            bridge,
        }
    }

    /// Build the HTTP client from `settings` and wire the rest around it.
    pub fn from_settings(
        settings: &SyncSettings,
        health: Arc<dyn HealthStore>,
        store: Arc<dyn KeyValueStore>,
    ) -> SyncResult<Self> {
        let api = ReqwestHealthClient::from_config(&settings.client)?;
        Ok(Self::new(
            Arc::new(api),
            health,
            store,
            settings.window,
            settings.lookback_months,
        ))
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn accumulator(&self) -> &BatchAccumulator {
        self.collector.accumulator()
    }

    pub async fn handle_bridge_message(&self, raw: &[u8]) -> SyncResult<BridgeReply> {
        let message = BridgeMessage::parse(raw)?;
        self.bridge.dispatch(&message).await
    }

    /// Run one collection pass and wait until its window has uploaded (or
    /// failed) and reset.
    pub async fn sync_and_wait(&self) -> SyncResult<(CollectionSummary, Option<WindowReport>)> {
        let summary = self.collector.fetch_all().await;
        let (completion, done) = ObserverCompletion::new();
        self.accumulator().defer_completion(completion).await;
        done.await.map_err(|_| SyncError::Cancelled)?;
        Ok((summary, self.accumulator().last_report().await))
    }
}
