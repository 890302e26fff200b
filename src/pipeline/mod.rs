//! The pipeline service: a worker pool that leases tasks off the durable
//! queue, dispatches them by `Operation`, and republishes progress as
//! `ProgressEvent`s. One `tokio::spawn` per worker, looping claim → process
//! → report, across the six operations this pipeline supports, with
//! heartbeat-based lease renewal and cooperative cancellation.

pub mod events;
pub mod handler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::QueueSettings;
use crate::error::{PipelineError, Result};
use crate::models::{Operation, Task};
use crate::ocr::OcrEngine;
use crate::repository::queue::WorkQueue;
use crate::repository::RepositoryStore;

use events::{EventBus, ProgressEvent};
use handler::ExternalOperations;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub lease_duration: ChronoDuration,
    pub max_task_duration: ChronoDuration,
    pub cancellation_grace: Duration,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            worker_count: settings.max_concurrent,
            poll_interval: Duration::from_secs(settings.poll_interval),
            lease_duration: ChronoDuration::seconds(settings.lease_duration_secs),
            max_task_duration: ChronoDuration::seconds(settings.max_task_duration_secs),
            cancellation_grace: Duration::from_secs(settings.cancellation_grace_secs),
            batch_size: settings.batch_size,
        }
    }
}

/// A running (or stopped) pipeline service: a fixed worker pool plus a
/// maintenance loop that reclaims expired leases and force-expires
/// overdue tasks.
pub struct PipelineService {
    queue: WorkQueue,
    repo: Arc<RepositoryStore>,
    ocr: Arc<dyn OcrEngine>,
    external: Arc<dyn ExternalOperations>,
    events: EventBus,
    paused: Arc<AtomicBool>,
    cancel_tx: watch::Sender<bool>,
    config: PipelineConfig,
}

impl PipelineService {
    pub fn new(
        queue: WorkQueue,
        repo: Arc<RepositoryStore>,
        ocr: Arc<dyn OcrEngine>,
        external: Arc<dyn ExternalOperations>,
        config: PipelineConfig,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            queue,
            repo,
            ocr,
            external,
            events: EventBus::new(),
            paused: Arc::new(AtomicBool::new(false)),
            cancel_tx,
            config,
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Request cooperative shutdown. Workers mid-task finish within
    /// `cancellation_grace` before their lease is abandoned to the
    /// reclaim sweep.
    pub fn request_shutdown(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Run the worker pool and maintenance loop until shutdown is
    /// requested. Each worker and the maintenance loop run concurrently;
    /// this future resolves once every one of them has exited.
    pub async fn run(self: Arc<Self>) {
        let mut handles = Vec::with_capacity(self.config.worker_count + 1);

        for worker_id in 0..self.config.worker_count {
            let service = self.clone();
            handles.push(tokio::spawn(async move {
                service.worker_loop(worker_id).await;
            }));
        }

        {
            let service = self.clone();
            handles.push(tokio::spawn(async move {
                service.maintenance_loop().await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn worker_loop(&self, worker_id: usize) {
        let lease_owner = format!("worker-{worker_id}");
        let mut cancel_rx = self.cancel_tx.subscribe();
        loop {
            if *cancel_rx.borrow() {
                break;
            }
            if self.is_paused() {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            let leased = match self
                .queue
                .lease_batch(&lease_owner, self.config.lease_duration, self.config.batch_size)
                .await
            {
                Ok(leased) => leased,
                Err(e) => {
                    warn!("worker {worker_id}: lease attempt failed: {e}");
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            if leased.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = cancel_rx.changed() => {}
                }
                continue;
            };

            if leased.len() > 1 {
                info!(
                    "worker {worker_id}: dispatching batch of {} {} task(s)",
                    leased.len(),
                    leased[0].task.operation.as_str()
                );
            }
            // Batching preserves order within the batch; tasks run
            // sequentially so the handler's "amortize setup costs" contract
            // (e.g. one OCR-engine warmup for the whole batch) is met without
            // the dispatch loop itself needing to know which operations can
            // share setup.
            for leased_task in leased {
                self.run_task(worker_id, leased_task.task).await;
            }
        }
    }

    async fn run_task(&self, worker_id: usize, task: Task) {
        self.events.publish(ProgressEvent::TaskStarted {
            task_id: task.task_id.clone(),
            worker_id,
            operation: task.operation.as_str(),
        });

        let heartbeat_task_id = task.task_id.clone();
        let heartbeat_queue = self.queue.clone();
        let heartbeat_interval = self.config.lease_duration / 3;
        let stop_heartbeat = Arc::new(AtomicBool::new(false));
        let stop_flag = stop_heartbeat.clone();
        let heartbeat_handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(
                    heartbeat_interval.num_seconds().max(1) as u64,
                ))
                .await;
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                match heartbeat_queue
                    .heartbeat(&heartbeat_task_id, heartbeat_interval * 3)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) | Err(_) => break,
                }
            }
        });

        let result = self.dispatch(&task).await;
        stop_heartbeat.store(true, Ordering::SeqCst);
        heartbeat_handle.abort();

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.complete(&task.task_id).await {
                    warn!("worker {worker_id}: failed to mark {} complete: {e}", task.task_id);
                }
                self.events.publish(ProgressEvent::TaskCompleted {
                    task_id: task.task_id.clone(),
                    worker_id,
                });
                if task.operation == Operation::Ocr {
                    if let Err(e) = self
                        .queue
                        .enqueue(
                            task.page_id.clone(),
                            Operation::Segment,
                            task.parameters.clone().into_iter().collect(),
                            task.priority,
                            task.max_attempts,
                            task.bulk_id.clone(),
                        )
                        .await
                    {
                        warn!("worker {worker_id}: failed to chain segment task after ocr: {e}");
                    }
                }
            }
            Err(e) => {
                let next_status = self.queue.fail(&task.task_id, &e.to_string()).await.ok();
                let will_retry = matches!(next_status, Some(crate::models::TaskStatus::Pending));
                self.events.publish(ProgressEvent::TaskFailed {
                    task_id: task.task_id.clone(),
                    worker_id,
                    error: e.to_string(),
                    will_retry,
                });
            }
        }

        if let Some(bulk_id) = task.bulk_id.clone() {
            if let Ok(bulk) = self.queue.get_bulk(&bulk_id).await {
                self.events.publish(ProgressEvent::BulkProgress {
                    bulk_id,
                    succeeded: bulk.counters.succeeded,
                    failed: bulk.counters.failed,
                    total: bulk.counters.total,
                });
            }
        }
    }

    async fn dispatch(&self, task: &Task) -> Result<()> {
        match task.operation {
            Operation::Ocr => self.run_ocr(task).await,
            Operation::Segment => self.run_segment(task).await,
            Operation::Reindex => self.external.reindex(task).await,
            Operation::Export => self.external.export(task).await,
            Operation::Import => self.external.import(task).await,
            Operation::Promote => self.external.promote(task).await,
        }
    }

    async fn run_ocr(&self, task: &Task) -> Result<()> {
        let page_id = task
            .page_id
            .as_deref()
            .ok_or_else(|| PipelineError::Validation("ocr task missing page_id".into()))?;
        let page = self.repo.get_page(page_id).await?;
        let image_bytes = std::fs::read(&page.image_ref)?;
        let language_hint = task
            .parameters
            .get("language")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let output = self
            .ocr
            .run_ocr(&image_bytes, language_hint.as_deref())
            .await?;
        self.repo.attach_ocr(page_id, &output.text, &output.hocr).await
    }

    async fn run_segment(&self, task: &Task) -> Result<()> {
        let page_id = task
            .page_id
            .as_deref()
            .ok_or_else(|| PipelineError::Validation("segment task missing page_id".into()))?;
        let page = self.repo.get_page(page_id).await?;
        let hocr_path = page
            .hocr_ref
            .as_deref()
            .ok_or_else(|| PipelineError::Validation(format!("page {page_id} has no hOCR to segment")))?;
        let hocr = std::fs::read_to_string(hocr_path)?;
        let image_bytes = std::fs::read(&page.image_ref)?;
        let segments = self.ocr.analyze_layout(&hocr, &image_bytes).await?;
        if segments.is_empty() {
            info!("page {page_id}: layout analysis produced no segments above threshold");
        }
        self.repo.add_segments(page_id, &segments).await
    }

    /// Sweep expired leases back to `pending` and force-expire tasks that
    /// have overrun `max_task_duration`, on a loop ticking every poll
    /// interval.
    async fn maintenance_loop(&self) {
        let mut cancel_rx = self.cancel_tx.subscribe();
        loop {
            if *cancel_rx.borrow() {
                break;
            }
            match self.queue.reclaim_expired_leases().await {
                Ok(n) if n > 0 => info!("reclaimed {n} expired lease(s)"),
                Ok(_) => {}
                Err(e) => warn!("lease reclaim sweep failed: {e}"),
            }
            match self.queue.force_expire_overdue(self.config.max_task_duration).await {
                Ok(n) if n > 0 => warn!("force-expired {n} overdue task(s)"),
                Ok(_) => {}
                Err(e) => warn!("overdue sweep failed: {e}"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel_rx.changed() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_queue_settings_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.lease_duration, ChronoDuration::seconds(600));
        assert_eq!(config.max_task_duration, ChronoDuration::seconds(7200));
        assert_eq!(config.batch_size, 1);
    }
}
