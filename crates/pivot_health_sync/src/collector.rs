//! Collection orchestration: one query per tracked kind, translated and fed
//! into the batch accumulator as each completes.

use async_trait::async_trait;
use chrono::{DateTime, Months, NaiveDate, Utc};
use futures_util::future::join_all;
use pivot_health_client::catalog::{self, Aggregation, CatalogEntry, KindShape};
use pivot_health_client::record::{ActivitySummaryRecord, WorkoutRecord};
use pivot_health_client::{HealthRecord, Measurement, PivotError, RecordSpan};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::accumulator::{BatchAccumulator, ObserverCompletion};
use crate::checkpoint::CheckpointStore;
use crate::error::{SyncError, SyncResult};

/// One result row as the health store hands it back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sample", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RawSample {
    /// A daily statistics bucket.
    Statistics {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sum: Option<f64>,
        average: Option<f64>,
        #[serde(default)]
        source: Option<String>,
    },
    Category {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        value: i64,
    },
    Workout {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        duration_secs: f64,
        activity_type: u32,
        #[serde(default)]
        total_distance_meters: Option<f64>,
        #[serde(default)]
        total_energy_kilocalories: Option<f64>,
    },
    ActivitySummary {
        date: NaiveDate,
        #[serde(default)]
        move_time_secs: Option<f64>,
        #[serde(default)]
        exercise_time_secs: Option<f64>,
        #[serde(default)]
        active_energy_kilocalories: Option<f64>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SampleQuery {
    pub kind_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Daily bucket anchor for aggregated kinds; `None` for raw samples.
    pub bucket_anchor: Option<DateTime<Utc>>,
}

impl SampleQuery {
    pub fn new(entry: &CatalogEntry, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let bucket_anchor = match entry.shape {
            KindShape::Quantity(_) => Some(start.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()),
            _ => None,
        };
        Self {
            kind_id: entry.kind_id.to_string(),
            start,
            end,
            bucket_anchor,
        }
    }
}

/// The device health database.
#[async_trait]
pub trait HealthStore: Send + Sync + 'static {
    /// Ask the user for read access. `Ok(false)` means access was refused.
    async fn request_authorization(&self, kind_ids: &[String]) -> SyncResult<bool>;

    async fn enable_background_delivery(&self, kind_id: &str) -> SyncResult<()>;

    async fn query(&self, query: &SampleQuery) -> SyncResult<Vec<RawSample>>;
}

/// Turn one raw sample into a record for `entry`.
pub fn translate(entry: &CatalogEntry, sample: &RawSample) -> Result<HealthRecord, PivotError> {
    match (entry.shape, sample) {
        (
            KindShape::Quantity(aggregation),
            RawSample::Statistics {
                start,
                end,
                sum,
                average,
                source,
            },
        ) => {
            let value = match aggregation {
                Aggregation::Sum => sum,
                Aggregation::Average => average,
            }
            .ok_or_else(|| {
                PivotError::InvalidRecord(format!(
                    "{} bucket has no {:?} value",
                    entry.display_name, aggregation
                ))
            })?;
            Ok(HealthRecord::quantity(
                entry.display_name,
                RecordSpan::new(*start, *end)?,
                value,
                entry.unit,
                source.clone(),
            ))
        }
        (KindShape::Category(_), RawSample::Category { start, end, value }) => {
            if entry.category_name(*value).is_none() {
                return Err(PivotError::UnrecognizedCategoryValue {
                    kind: entry.display_name.to_string(),
                    value: *value,
                });
            }
            Ok(HealthRecord::category(
                entry.display_name,
                RecordSpan::new(*start, *end)?,
                *value,
            ))
        }
        (
            KindShape::Workout,
            RawSample::Workout {
                start,
                end,
                duration_secs,
                activity_type,
                total_distance_meters,
                total_energy_kilocalories,
            },
        ) => Ok(HealthRecord::Workout(WorkoutRecord::new(
            RecordSpan::new(*start, *end)?,
            *duration_secs,
            *activity_type,
            *total_distance_meters,
            *total_energy_kilocalories,
        ))),
        (
            KindShape::ActivitySummary,
            RawSample::ActivitySummary {
                date,
                move_time_secs,
                exercise_time_secs,
                active_energy_kilocalories,
            },
        ) => Ok(HealthRecord::ActivitySummary(ActivitySummaryRecord {
            date: *date,
            move_time_secs: *move_time_secs,
            exercise_time_secs: *exercise_time_secs,
            active_energy: active_energy_kilocalories.map(|k| Measurement::new(k, entry.unit)),
        })),
        (_, other) => Err(PivotError::InvalidRecord(format!(
            "{} cannot be built from {other:?}",
            entry.display_name
        ))),
    }
}

/// Per-kind result of one collection pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KindOutcome {
    Forwarded { records: usize, skipped: usize },
    /// Nothing new; no checkpoint candidate.
    Empty,
    /// Forwarded after the window closed.
    Dropped,
    Failed(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    pub outcomes: Vec<(String, KindOutcome)>,
}

impl CollectionSummary {
    pub fn forwarded_records(&self) -> usize {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                KindOutcome::Forwarded { records, .. } => *records,
                _ => 0,
            })
            .sum()
    }

    pub fn failed_kinds(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, KindOutcome::Failed(_)))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

#[derive(Clone)]
pub struct Collector {
    store: Arc<dyn HealthStore>,
    checkpoints: CheckpointStore,
    accumulator: BatchAccumulator,
    lookback: Months,
    kinds: Vec<String>,
    clock: fn() -> DateTime<Utc>,
}

impl Collector {
    pub fn new(
        store: Arc<dyn HealthStore>,
        checkpoints: CheckpointStore,
        accumulator: BatchAccumulator,
        lookback_months: u32,
    ) -> Self {
        Self {
            store,
            checkpoints,
            accumulator,
            lookback: Months::new(lookback_months),
            kinds: catalog::tracked_kinds().map(str::to_string).collect(),
            clock: Utc::now,
        }
    }

    /// Restrict or extend the kinds queried by [`fetch_all`](Self::fetch_all).
    pub fn with_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn accumulator(&self) -> &BatchAccumulator {
        &self.accumulator
    }

    /// Request read access, turn on background delivery, then run one
    /// collection pass. Returns `None` when access was refused.
    pub async fn request_authorization_and_fetch(&self) -> SyncResult<Option<CollectionSummary>> {
        if !self.store.request_authorization(&self.kinds).await? {
            tracing::warn!("health data authorization refused");
            return Ok(None);
        }
        for kind in &self.kinds {
            if let Err(e) = self.store.enable_background_delivery(kind).await {
                tracing::warn!(kind = %kind, error = %e, "background delivery not enabled");
            }
        }
        Ok(Some(self.fetch_all().await))
    }

    /// Open a window and query every kind concurrently.
    pub async fn fetch_all(&self) -> CollectionSummary {
        self.accumulator.start().await;
        let outcomes = join_all(self.kinds.iter().map(|kind| async move {
            (kind.clone(), self.collect_kind(kind).await)
        }))
        .await;
        let summary = CollectionSummary { outcomes };
        tracing::info!(
            kinds = summary.outcomes.len(),
            records = summary.forwarded_records(),
            failed = summary.failed_kinds().len(),
            "collection pass finished"
        );
        summary
    }

    /// Handle a live-update notification for `kind_id`. `completion` fires
    /// once the window carrying the new data has committed or discarded.
    pub async fn on_observer_update(&self, kind_id: &str, completion: ObserverCompletion) -> KindOutcome {
        self.accumulator.start().await;
        let outcome = self.collect_kind(kind_id).await;
        self.accumulator.defer_completion(completion).await;
        outcome
    }

    /// Query one kind and forward whatever translates. Failures are logged
    /// and never propagate.
    pub async fn collect_kind(&self, kind_id: &str) -> KindOutcome {
        match self.try_collect_kind(kind_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                match &e {
                    SyncError::Api(api) if api.is_record_scoped() => {
                        tracing::warn!(kind = kind_id, error = %e, "kind not collectable, skipped");
                    }
                    _ => {
                        tracing::warn!(kind = kind_id, error = %e, "collection failed, no checkpoint candidate");
                    }
                }
                KindOutcome::Failed(e.to_string())
            }
        }
    }

    async fn try_collect_kind(&self, kind_id: &str) -> SyncResult<KindOutcome> {
        let entry = catalog::entry(kind_id)
            .ok_or_else(|| PivotError::NoNameFound(kind_id.to_string()))?;
        // results only count toward the window that was open when queried
        let window = self.accumulator.current_window().await;
        let now = (self.clock)();
        let start = match self.checkpoints.checkpoint(kind_id).await? {
            Some(checkpoint) => checkpoint.cursor,
            None => now.checked_sub_months(self.lookback).unwrap_or(now),
        };
        let query = SampleQuery::new(entry, start, now);
        tracing::debug!(kind = kind_id, %start, end = %now, "querying");

        let samples = self
            .store
            .query(&query)
            .await
            .map_err(|e| match e {
                SyncError::Query { .. } => e,
                other => SyncError::query(kind_id, other.to_string()),
            })?;
        if samples.is_empty() {
            tracing::debug!(kind = kind_id, "no samples");
            return Ok(KindOutcome::Empty);
        }

        let mut records = Vec::with_capacity(samples.len());
        let mut skipped = 0;
        for sample in &samples {
            match translate(entry, sample) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(kind = kind_id, error = %e, "skipping sample");
                }
            }
        }
        let count = records.len();
        let Some(window) = window else {
            tracing::debug!(kind = kind_id, dropped = count, "no window open, results dropped");
            return Ok(KindOutcome::Dropped);
        };
        if !self.accumulator.add(window, records, kind_id, now).await {
            return Ok(KindOutcome::Dropped);
        }
        Ok(KindOutcome::Forwarded {
            records: count,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{AccumulatorState, WindowOutcome};
    use crate::credentials::{CredentialStore, Credentials};
    use crate::pipeline::UploadPipeline;
    use crate::store::MemoryStore;
    use crate::test_utils::{FakeHealthStore, ScriptedApi};
    use chrono::TimeZone;
    use std::time::Duration;

    const STEPS: &str = "HKQuantityTypeIdentifierStepCount";
    const MASS: &str = "HKQuantityTypeIdentifierBodyMass";
    const SLEEP: &str = "HKCategoryTypeIdentifierSleepAnalysis";

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 15, 0, 0).unwrap()
    }

    fn day(d: u32) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap();
        (start, start + chrono::Duration::days(1))
    }

    fn steps_bucket(d: u32, sum: f64) -> RawSample {
        let (start, end) = day(d);
        RawSample::Statistics {
            start,
            end,
            sum: Some(sum),
            average: None,
            source: None,
        }
    }

    struct Fixture {
        collector: Collector,
        api: Arc<ScriptedApi>,
        store: Arc<FakeHealthStore>,
        checkpoints: CheckpointStore,
    }

    async fn fixture(store: FakeHealthStore, kinds: &[&str]) -> Fixture {
        let kv = Arc::new(MemoryStore::new());
        let creds = CredentialStore::new(kv.clone());
        creds.save(&Credentials::new("tok", "ref")).await.unwrap();
        let api = Arc::new(ScriptedApi::default());
        let checkpoints = CheckpointStore::new(kv);
        let acc = BatchAccumulator::new(
            UploadPipeline::new(api.clone(), creds),
            checkpoints.clone(),
            Duration::from_secs(30),
        );
        let store = Arc::new(store);
        let collector = Collector::new(store.clone(), checkpoints.clone(), acc, 3)
            .with_kinds(kinds.iter().copied())
            .with_clock(fixed_now);
        Fixture {
            collector,
            api,
            store,
            checkpoints,
        }
    }

    #[test]
    fn translate_picks_aggregation_per_kind() {
        let (start, end) = day(1);
        let sample = RawSample::Statistics {
            start,
            end,
            sum: Some(1.0),
            average: Some(70.5),
            source: None,
        };
        let rec = translate(catalog::entry(MASS).unwrap(), &sample).unwrap();
        match rec {
            HealthRecord::Quantity(q) => {
                assert_eq!(q.value, 70.5);
                assert_eq!(q.kind, "bodyMass");
            }
            other => panic!("unexpected {other:?}"),
        }
        let rec = translate(catalog::entry(STEPS).unwrap(), &sample).unwrap();
        assert!(matches!(rec, HealthRecord::Quantity(q) if q.value == 1.0 && q.unit == "count"));
    }

    #[test]
    fn translate_rejects_shape_mismatch_and_bad_category() {
        let (start, end) = day(1);
        let steps = catalog::entry(STEPS).unwrap();
        let cat = RawSample::Category { start, end, value: 1 };
        assert!(matches!(translate(steps, &cat), Err(PivotError::InvalidRecord(_))));

        let sleep = catalog::entry(SLEEP).unwrap();
        assert!(translate(sleep, &cat).is_ok());
        let bad = RawSample::Category { start, end, value: 9 };
        assert!(matches!(
            translate(sleep, &bad),
            Err(PivotError::UnrecognizedCategoryValue { value: 9, .. })
        ));
    }

    #[test]
    fn quantity_queries_are_bucketed_at_midnight() {
        let start = Utc.with_ymd_and_hms(2024, 2, 3, 17, 45, 0).unwrap();
        let q = SampleQuery::new(catalog::entry(STEPS).unwrap(), start, fixed_now());
        assert_eq!(
            q.bucket_anchor,
            Some(Utc.with_ymd_and_hms(2024, 2, 3, 0, 0, 0).unwrap())
        );
        let q = SampleQuery::new(catalog::entry(SLEEP).unwrap(), start, fixed_now());
        assert!(q.bucket_anchor.is_none());
    }

    #[test]
    fn raw_samples_deserialize_from_export_json() {
        let json = r#"[
            {"sample":"statistics","start":"2024-05-01T00:00:00Z","end":"2024-05-02T00:00:00Z","sum":1200.0,"average":null},
            {"sample":"workout","start":"2024-05-01T07:00:00Z","end":"2024-05-01T07:30:00Z","durationSecs":1800.0,"activityType":37,"totalDistanceMeters":5000.0},
            {"sample":"activitySummary","date":"2024-05-01","activeEnergyKilocalories":450.0}
        ]"#;
        let samples: Vec<RawSample> = serde_json::from_str(json).unwrap();
        assert_eq!(samples.len(), 3);
        assert!(matches!(
            samples[1],
            RawSample::Workout {
                activity_type: 37,
                total_energy_kilocalories: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn start_bound_uses_checkpoint_or_lookback() {
        let f = fixture(FakeHealthStore::default(), &[STEPS, MASS]).await;
        let cursor = Utc.with_ymd_and_hms(2024, 5, 9, 8, 0, 0).unwrap();
        f.checkpoints.write(STEPS, cursor).await.unwrap();

        f.collector.collect_kind(STEPS).await;
        f.collector.collect_kind(MASS).await;

        let queries = f.store.queries();
        assert_eq!(queries[0].start, cursor);
        assert_eq!(queries[0].end, fixed_now());
        assert_eq!(
            queries[1].start,
            Utc.with_ymd_and_hms(2024, 2, 10, 15, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn empty_and_failed_kinds_forward_no_candidate() {
        let store = FakeHealthStore::default()
            .with_samples(STEPS, vec![steps_bucket(9, 100.0)])
            .with_failure(SLEEP, "store unavailable");
        let f = fixture(store, &[STEPS, MASS, SLEEP, "HKQuantityTypeIdentifierNotReal"]).await;
        f.api.push_upload(Ok(200));

        let summary = f.collector.fetch_all().await;
        assert_eq!(summary.forwarded_records(), 1);
        assert_eq!(
            summary.failed_kinds(),
            vec![SLEEP, "HKQuantityTypeIdentifierNotReal"]
        );
        assert_eq!(f.collector.accumulator().pending_len().await, (1, 1));

        let report = f.collector.accumulator().flush_now().await.unwrap();
        assert_eq!(
            report.outcome,
            WindowOutcome::Uploaded {
                records: 1,
                checkpoints: 1
            }
        );
        assert_eq!(f.checkpoints.read(STEPS).await.unwrap(), Some(fixed_now()));
        assert!(f.checkpoints.read(MASS).await.unwrap().is_none());
        assert!(f.checkpoints.read(SLEEP).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn untranslatable_samples_are_skipped() {
        let (start, end) = day(9);
        let store = FakeHealthStore::default().with_samples(
            STEPS,
            vec![
                steps_bucket(8, 10.0),
                RawSample::Statistics {
                    start,
                    end,
                    sum: None,
                    average: None,
                    source: None,
                },
            ],
        );
        let f = fixture(store, &[STEPS]).await;
        f.collector.accumulator().start().await;
        assert_eq!(
            f.collector.collect_kind(STEPS).await,
            KindOutcome::Forwarded {
                records: 1,
                skipped: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn straggler_after_window_is_dropped() {
        let store = FakeHealthStore::default()
            .with_samples(STEPS, vec![steps_bucket(9, 100.0)])
            .with_samples(MASS, vec![steps_bucket(9, 70.0)])
            .with_delay(MASS, Duration::from_secs(45));
        let f = fixture(store, &[STEPS, MASS]).await;
        f.api.push_upload(Ok(200));
        let gate = f.api.gate_uploads();

        let collector = f.collector.clone();
        let pass = tokio::spawn(async move { collector.fetch_all().await });
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(f.collector.accumulator().state().await, AccumulatorState::Uploading);

        tokio::time::sleep(Duration::from_secs(15)).await;
        let summary = pass.await.unwrap();
        assert!(summary.outcomes.contains(&(MASS.to_string(), KindOutcome::Dropped)));

        gate.notify_one();
        while f.collector.accumulator().state().await != AccumulatorState::Ready {
            tokio::task::yield_now().await;
        }
        assert!(f.checkpoints.read(STEPS).await.unwrap().is_some());
        assert!(f.checkpoints.read(MASS).await.unwrap().is_none());
        assert_eq!(f.api.uploaded_batches()[0].len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn straggler_is_not_counted_toward_the_next_window() {
        let store = FakeHealthStore::default()
            .with_samples(STEPS, vec![steps_bucket(9, 100.0)])
            .with_samples(MASS, vec![steps_bucket(9, 70.0)])
            .with_delay(MASS, Duration::from_secs(45));
        let f = fixture(store, &[STEPS, MASS]).await;
        f.api.push_upload(Ok(200));

        let collector = f.collector.clone();
        let pass = tokio::spawn(async move { collector.fetch_all().await });
        tokio::time::sleep(Duration::from_secs(31)).await;
        while f.collector.accumulator().state().await != AccumulatorState::Ready {
            tokio::task::yield_now().await;
        }
        assert!(f.checkpoints.read(STEPS).await.unwrap().is_some());

        // a live update opens the next window before the slow query returns
        assert!(f.collector.accumulator().start().await);
        tokio::time::sleep(Duration::from_secs(15)).await;
        let summary = pass.await.unwrap();
        assert!(summary.outcomes.contains(&(MASS.to_string(), KindOutcome::Dropped)));
        assert_eq!(f.collector.accumulator().pending_len().await, (0, 0));
        assert!(f.checkpoints.read(MASS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn results_without_an_open_window_are_dropped() {
        let store = FakeHealthStore::default().with_samples(STEPS, vec![steps_bucket(9, 5.0)]);
        let f = fixture(store, &[STEPS]).await;
        assert_eq!(f.collector.collect_kind(STEPS).await, KindOutcome::Dropped);
        assert_eq!(f.collector.accumulator().pending_len().await, (0, 0));
    }

    #[tokio::test]
    async fn observer_completion_waits_for_upload() {
        let store = FakeHealthStore::default().with_samples(STEPS, vec![steps_bucket(9, 5.0)]);
        let f = fixture(store, &[STEPS]).await;
        f.api.push_upload(Err(PivotError::UnknownUploadResponseCode(503)));
        let (completion, mut done) = ObserverCompletion::new();

        let outcome = f.collector.on_observer_update(STEPS, completion).await;
        assert!(matches!(outcome, KindOutcome::Forwarded { records: 1, .. }));
        assert!(done.try_recv().is_err());

        let report = f.collector.accumulator().flush_now().await.unwrap();
        assert!(matches!(report.outcome, WindowOutcome::Failed(_)));
        assert_eq!(report.completions, 1);
        done.await.expect("completion fired after discard");
        assert!(f.checkpoints.read(STEPS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn authorization_refused_skips_collection() {
        let f = fixture(FakeHealthStore::denying(), &[STEPS]).await;
        assert!(f.collector.request_authorization_and_fetch().await.unwrap().is_none());
        assert!(f.store.queries().is_empty());
        assert_eq!(f.collector.accumulator().state().await, AccumulatorState::Ready);
    }

    #[tokio::test]
    async fn authorization_enables_background_delivery() {
        let f = fixture(FakeHealthStore::default(), &[STEPS, SLEEP]).await;
        let summary = f.collector.request_authorization_and_fetch().await.unwrap().unwrap();
        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(f.store.background_kinds(), vec![STEPS, SLEEP]);
    }
}
