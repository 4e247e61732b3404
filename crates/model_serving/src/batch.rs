//! Priority batch queue.
//!
//! Requests wait in a heap ordered by priority (lower first) and then by
//! arrival. A background loop drains up to `batch_size` items once the queue
//! is full or `batch_timeout_ms` after the first item arrived, whichever comes
//! first. Drained items are grouped by prediction type so each model is warmed
//! once, then every item runs on its own task. A failing or panicking item
//! produces an error entry for that item only.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::{PredictionRequest, PredictionResult, ServingConfig};

/// Finished batches are kept this long for `get_batch_result`.
const RESULT_RETENTION: Duration = Duration::from_secs(600);

#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Called once per prediction type per drained batch, before its items run.
    async fn warm(&self, _prediction_type: &str) {}

    async fn handle(&self, req: PredictionRequest) -> anyhow::Result<PredictionResult>;

    /// Called for every item that ended in an error entry.
    fn on_failure(&self, _prediction_type: &str, _error: &str) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub request_id: String,
    pub prediction_type: String,
    pub result: Option<PredictionResult>,
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn is_ok(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub priority: u32,
    pub submitted: usize,
    /// In completion order.
    pub entries: Vec<BatchEntry>,
    pub complete: bool,
}

impl BatchResult {
    pub fn successes(&self) -> usize {
        self.entries.iter().filter(|e| e.is_ok()).count()
    }

    pub fn failures(&self) -> usize {
        self.entries.len() - self.successes()
    }
}

struct Queued {
    priority: u32,
    seq: u64,
    batch_id: String,
    request: PredictionRequest,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap pops the greatest; the greatest here is the lowest
    // priority number, then the earliest arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct BatchState {
    priority: u32,
    submitted: usize,
    entries: Vec<BatchEntry>,
    done: watch::Sender<bool>,
    finished_at: Option<Instant>,
}

impl BatchState {
    fn snapshot(&self, batch_id: &str) -> BatchResult {
        BatchResult {
            batch_id: batch_id.to_string(),
            priority: self.priority,
            submitted: self.submitted,
            entries: self.entries.clone(),
            complete: self.finished_at.is_some(),
        }
    }
}

pub struct BatchQueue {
    handler: Arc<dyn BatchHandler>,
    batch_size: usize,
    batch_timeout: Duration,
    queue: Mutex<BinaryHeap<Queued>>,
    batches: Mutex<HashMap<String, BatchState>>,
    notify: Notify,
    seq: AtomicU64,
}

impl BatchQueue {
    pub fn new(handler: Arc<dyn BatchHandler>, config: &ServingConfig) -> Self {
        Self {
            handler,
            batch_size: config.batch_size.max(1),
            batch_timeout: Duration::from_millis(config.batch_timeout_ms),
            queue: Mutex::new(BinaryHeap::new()),
            batches: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Enqueue `requests` under one batch id. Lower `priority` runs first.
    pub fn submit_batch(&self, requests: Vec<PredictionRequest>, priority: u32) -> String {
        let batch_id = uuid::Uuid::new_v4().to_string();
        let submitted = requests.len();
        let (done, _) = watch::channel(submitted == 0);
        {
            let mut batches = self.batches.lock();
            batches.retain(|_, b| {
                b.finished_at
                    .map_or(true, |at| at.elapsed() < RESULT_RETENTION)
            });
            batches.insert(
                batch_id.clone(),
                BatchState {
                    priority,
                    submitted,
                    entries: Vec::with_capacity(submitted),
                    done,
                    finished_at: (submitted == 0).then(Instant::now),
                },
            );
        }
        if submitted > 0 {
            let mut queue = self.queue.lock();
            for request in requests {
                queue.push(Queued {
                    priority,
                    seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
                    batch_id: batch_id.clone(),
                    request,
                });
            }
        }
        tracing::debug!(batch_id = %batch_id, submitted, priority, "batch submitted");
        self.notify.notify_one();
        batch_id
    }

    pub fn get_batch_result(&self, batch_id: &str) -> Option<BatchResult> {
        self.batches.lock().get(batch_id).map(|b| b.snapshot(batch_id))
    }

    /// Wait until every item of the batch has an entry.
    pub async fn wait_for_batch(&self, batch_id: &str) -> Option<BatchResult> {
        let mut rx = self.batches.lock().get(batch_id)?.done.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.get_batch_result(batch_id)
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.run(shutdown).await })
    }

    /// Drain loop. On shutdown, or once the shutdown sender is gone, the
    /// remaining items are processed before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.batch_size,
            timeout_ms = self.batch_timeout.as_millis() as u64,
            "batch queue started"
        );
        let mut stopping = false;
        while !stopping {
            if self.pending() == 0 {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = shutdown_requested(&mut shutdown) => stopping = true,
                }
                continue;
            }

            let deadline = tokio::time::sleep(self.batch_timeout);
            tokio::pin!(deadline);
            while !stopping && self.pending() < self.batch_size {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = &mut deadline => break,
                    _ = shutdown_requested(&mut shutdown) => stopping = true,
                }
            }

            let items = self.drain(self.batch_size);
            self.process(items).await;
        }

        while self.pending() > 0 {
            let items = self.drain(self.batch_size);
            self.process(items).await;
        }
        tracing::info!("batch queue stopped");
    }

    fn drain(&self, max: usize) -> Vec<Queued> {
        let mut queue = self.queue.lock();
        let n = max.min(queue.len());
        (0..n).filter_map(|_| queue.pop()).collect()
    }

    async fn process(&self, items: Vec<Queued>) {
        if items.is_empty() {
            return;
        }
        let count = items.len();
        let mut groups: BTreeMap<String, Vec<Queued>> = BTreeMap::new();
        for q in items {
            groups
                .entry(q.request.prediction_type.clone())
                .or_default()
                .push(q);
        }
        tracing::debug!(items = count, groups = groups.len(), "processing batch");

        let mut running = Vec::with_capacity(count);
        for (prediction_type, group) in groups {
            self.handler.warm(&prediction_type).await;
            for q in group {
                let handler = self.handler.clone();
                let request = q.request.clone();
                let task = tokio::spawn(async move { handler.handle(request).await });
                running.push((q, task));
            }
        }

        for (q, task) in running {
            let outcome = match task.await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("prediction task failed: {e}")),
            };
            self.complete_item(q, outcome);
        }
    }

    fn complete_item(&self, q: Queued, outcome: Result<PredictionResult, String>) {
        let entry = match outcome {
            Ok(result) => BatchEntry {
                request_id: q.request.request_id,
                prediction_type: q.request.prediction_type,
                result: Some(result),
                error: None,
            },
            Err(error) => {
                tracing::warn!(
                    batch_id = %q.batch_id,
                    request_id = %q.request.request_id,
                    error = %error,
                    "batch item failed"
                );
                self.handler.on_failure(&q.request.prediction_type, &error);
                BatchEntry {
                    request_id: q.request.request_id,
                    prediction_type: q.request.prediction_type,
                    result: None,
                    error: Some(error),
                }
            }
        };

        let mut batches = self.batches.lock();
        let Some(state) = batches.get_mut(&q.batch_id) else {
            return;
        };
        state.entries.push(entry);
        if state.entries.len() == state.submitted {
            state.finished_at = Some(Instant::now());
            state.done.send_replace(true);
            tracing::debug!(
                batch_id = %q.batch_id,
                failures = state.entries.iter().filter(|e| !e.is_ok()).count(),
                "batch complete"
            );
        }
    }
}

/// Resolves once `true` is sent or every sender is dropped.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            tracing::warn!("shutdown sender dropped, stopping batch queue");
            return;
        }
    }
}
