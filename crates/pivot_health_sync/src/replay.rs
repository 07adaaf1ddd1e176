//! A [`HealthStore`] backed by a JSON export, used by the binary.
//!
//! The file is an object keyed by kind id:
//!
//! ```json
//! { "HKQuantityTypeIdentifierStepCount": [
//!     { "sample": "statistics", "start": "2024-05-01T00:00:00Z",
//!       "end": "2024-05-02T00:00:00Z", "sum": 8042.0 } ] }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use std::collections::HashMap;
use std::path::Path;

use crate::collector::{HealthStore, RawSample, SampleQuery};
use crate::error::SyncResult;

pub struct ReplayHealthStore {
    samples: HashMap<String, Vec<RawSample>>,
}

impl ReplayHealthStore {
    pub fn new(samples: HashMap<String, Vec<RawSample>>) -> Self {
        Self { samples }
    }

    pub async fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let samples = serde_json::from_slice(&bytes)?;
        Ok(Self::new(samples))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }
}

fn bounds(sample: &RawSample) -> (DateTime<Utc>, DateTime<Utc>) {
    match sample {
        RawSample::Statistics { start, end, .. }
        | RawSample::Category { start, end, .. }
        | RawSample::Workout { start, end, .. } => (*start, *end),
        RawSample::ActivitySummary { date, .. } => {
            let start = date.and_time(NaiveTime::MIN).and_utc();
            (start, start + chrono::Duration::days(1))
        }
    }
}

#[async_trait]
impl HealthStore for ReplayHealthStore {
    async fn request_authorization(&self, kind_ids: &[String]) -> SyncResult<bool> {
        tracing::debug!(kinds = kind_ids.len(), "replay store grants access");
        Ok(true)
    }

    async fn enable_background_delivery(&self, _kind_id: &str) -> SyncResult<()> {
        Ok(())
    }

    async fn query(&self, query: &SampleQuery) -> SyncResult<Vec<RawSample>> {
        let Some(samples) = self.samples.get(&query.kind_id) else {
            return Ok(Vec::new());
        };
        // daily buckets may begin before the cursor
        let from = query.bucket_anchor.unwrap_or(query.start);
        Ok(samples
            .iter()
            .filter(|s| {
                let (start, end) = bounds(s);
                end > from && start <= query.end
            })
            .cloned()
            .collect())
    }
}
