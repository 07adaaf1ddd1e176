//! Fan-in of independently completing queries into one upload per window.
//!
//! ```text
//! Ready --start()--> Waiting --window elapses--> Uploading --done--> Ready
//! ```
//!
//! All mutable state sits behind one mutex. Results arriving after their
//! window closed are dropped; the next window re-queries them because their
//! checkpoints were never committed.

use chrono::{DateTime, Utc};
use pivot_health_client::HealthRecord;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot, watch};

use crate::checkpoint::CheckpointStore;
use crate::pipeline::UploadPipeline;

/// Identifies one collection window. Queries capture it when issued so
/// their results can only land in that window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccumulatorState {
    Ready,
    Waiting,
    Uploading,
}

/// Signal owed to the host for one observed change. Fired exactly once,
/// after the window that carries the change has committed or discarded.
#[derive(Debug)]
pub struct ObserverCompletion(oneshot::Sender<()>);

impl ObserverCompletion {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn complete(self) {
        // receiver may have gone away; nothing else to notify
        let _ = self.0.send(());
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WindowOutcome {
    Uploaded { records: usize, checkpoints: usize },
    /// Nothing to send; pending checkpoints (if any) were committed.
    Empty { checkpoints: usize },
    Failed(String),
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowReport {
    pub outcome: WindowOutcome,
    pub completions: usize,
}

#[derive(Default)]
struct Pending {
    records: Vec<HealthRecord>,
    checkpoints: HashMap<String, DateTime<Utc>>,
    completions: Vec<ObserverCompletion>,
}

struct Inner {
    state: AccumulatorState,
    window_id: u64,
    pending: Pending,
    cancel: Option<watch::Sender<bool>>,
    last_report: Option<WindowReport>,
}

#[derive(Clone)]
pub struct BatchAccumulator {
    inner: Arc<Mutex<Inner>>,
    pipeline: UploadPipeline,
    checkpoints: CheckpointStore,
    window: Duration,
}

impl BatchAccumulator {
    pub fn new(pipeline: UploadPipeline, checkpoints: CheckpointStore, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: AccumulatorState::Ready,
                window_id: 0,
                pending: Pending::default(),
                cancel: None,
                last_report: None,
            })),
            pipeline,
            checkpoints,
            window,
        }
    }

    pub async fn state(&self) -> AccumulatorState {
        self.inner.lock().await.state
    }

    /// Records and checkpoint candidates currently buffered.
    pub async fn pending_len(&self) -> (usize, usize) {
        let inner = self.inner.lock().await;
        (inner.pending.records.len(), inner.pending.checkpoints.len())
    }

    /// The window currently accepting results, if any.
    pub async fn current_window(&self) -> Option<WindowId> {
        let inner = self.inner.lock().await;
        (inner.state == AccumulatorState::Waiting).then_some(WindowId(inner.window_id))
    }

    /// Report of the most recently finished window.
    pub async fn last_report(&self) -> Option<WindowReport> {
        self.inner.lock().await.last_report.clone()
    }

    /// Open a collection window. Returns `false` (and leaves the running
    /// window and its timer untouched) unless the accumulator is `Ready`.
    pub async fn start(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != AccumulatorState::Ready {
            tracing::debug!(state = ?inner.state, "window already open");
            return false;
        }
        inner.state = AccumulatorState::Waiting;
        inner.window_id += 1;
        let id = inner.window_id;
        drop(inner);

        let this = self.clone();
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            this.close_window(Some(id)).await;
        });
        tracing::info!(window_secs = window.as_secs(), "collection window opened");
        true
    }

    /// Buffer query results and the cursor to commit if they upload.
    /// Dropped unless `window` is still open.
    pub async fn add(
        &self,
        window: WindowId,
        records: Vec<HealthRecord>,
        kind_id: &str,
        cursor: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != AccumulatorState::Waiting || inner.window_id != window.0 {
            tracing::debug!(
                kind = kind_id,
                dropped = records.len(),
                state = ?inner.state,
                "late results dropped"
            );
            return false;
        }
        tracing::debug!(kind = kind_id, records = records.len(), "results buffered");
        inner.pending.records.extend(records);
        inner.pending.checkpoints.insert(kind_id.to_string(), cursor);
        true
    }

    /// Hold `completion` until the current window finishes. Fires at once
    /// when no window is open.
    pub async fn defer_completion(&self, completion: ObserverCompletion) {
        let mut inner = self.inner.lock().await;
        if inner.state == AccumulatorState::Ready {
            drop(inner);
            completion.complete();
            return;
        }
        inner.pending.completions.push(completion);
    }

    /// Close the window now instead of waiting for the timer.
    pub async fn flush_now(&self) -> Option<WindowReport> {
        self.close_window(None).await
    }

    /// Abort an in-flight upload. Nothing is committed; deferred completions
    /// still fire.
    pub async fn cancel_upload(&self) -> bool {
        let inner = self.inner.lock().await;
        match (&inner.state, &inner.cancel) {
            (AccumulatorState::Uploading, Some(tx)) => tx.send(true).is_ok(),
            _ => false,
        }
    }

    async fn close_window(&self, expected_id: Option<u64>) -> Option<WindowReport> {
        let (records, checkpoints, mut cancel_rx) = {
            let mut inner = self.inner.lock().await;
            if inner.state != AccumulatorState::Waiting {
                return None;
            }
            if expected_id.is_some_and(|id| id != inner.window_id) {
                return None;
            }
            inner.state = AccumulatorState::Uploading;
            let (tx, rx) = watch::channel(false);
            inner.cancel = Some(tx);
            let records = std::mem::take(&mut inner.pending.records);
            let checkpoints = std::mem::take(&mut inner.pending.checkpoints);
            (records, checkpoints, rx)
        };
        tracing::info!(
            records = records.len(),
            kinds = checkpoints.len(),
            "collection window closed"
        );

        let outcome = if records.is_empty() {
            match self.checkpoints.commit(&checkpoints).await {
                Ok(n) => WindowOutcome::Empty { checkpoints: n },
                Err(e) => WindowOutcome::Failed(e.to_string()),
            }
        } else {
            tokio::select! {
                res = self.pipeline.upload(&records) => match res {
                    Ok(uploaded) => match self.checkpoints.commit(&checkpoints).await {
                        Ok(n) => WindowOutcome::Uploaded { records: uploaded, checkpoints: n },
                        Err(e) => {
                            tracing::error!(error = %e, "uploaded but failed to commit checkpoints");
                            WindowOutcome::Failed(e.to_string())
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, discarded = checkpoints.len(), "upload failed, checkpoints discarded");
                        WindowOutcome::Failed(e.to_string())
                    }
                },
                Ok(()) = cancel_rx.changed() => {
                    tracing::warn!(discarded = checkpoints.len(), "upload cancelled, checkpoints discarded");
                    WindowOutcome::Cancelled
                }
            }
        };

        let (report, completions) = {
            let mut inner = self.inner.lock().await;
            inner.state = AccumulatorState::Ready;
            inner.cancel = None;
            let completions = std::mem::take(&mut inner.pending.completions);
            let report = WindowReport {
                outcome,
                completions: completions.len(),
            };
            inner.last_report = Some(report.clone());
            (report, completions)
        };
        for completion in completions {
            completion.complete();
        }
        tracing::info!(outcome = ?report.outcome, "collection window finished");
        Some(report)
    }
}
