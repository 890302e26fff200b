//! The persisted work queue: `enqueue`, `lease`, `heartbeat`, `complete`,
//! `fail`, `cancel`, and bulk-operation grouping. Claims are a transaction-
//! scoped atomic update rather than select-then-update, so two workers can
//! never lease the same task; leases carry priority and an optional bulk
//! grouping with time-bounded expiry.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::{backoff_delay, BulkOperation, BulkStatus, Operation, Task, TaskStatus};
use crate::schema::*;
use crate::with_conn;

use super::pool::DbPool;
use super::records::{parse_datetime, BulkRecord, TaskRecord};

/// Default backoff parameters for lease-expiry retries.
pub const DEFAULT_BASE_RETRY_DELAY_SECS: i64 = 300;
pub const DEFAULT_BACKOFF_CAP_SECS: i64 = 3600;

/// A task ready to run, freshly leased by a worker.
#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub task: Task,
    pub lease_expires_at: DateTime<Utc>,
}

/// The durable queue, backed by `processing_queue` / `bulk_processing_tasks`
/// in the repository's relational index. The repository store's `DbPool` is
/// shared rather than duplicated, since both own the same SQLite file.
#[derive(Clone)]
pub struct WorkQueue {
    pool: DbPool,
}

impl WorkQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new task in `pending` status.
    pub async fn enqueue(
        &self,
        page_id: Option<String>,
        operation: Operation,
        parameters: serde_json::Map<String, serde_json::Value>,
        priority: i32,
        max_attempts: i32,
        bulk_id: Option<String>,
    ) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();
        let record = TaskRecord {
            task_id: task_id.clone(),
            page_id,
            operation: operation.as_str().to_string(),
            parameters: serde_json::Value::Object(parameters).to_string(),
            priority,
            status: TaskStatus::Pending.as_str().to_string(),
            attempts: 0,
            max_attempts,
            last_error: None,
            lease_expires_at: None,
            leased_at: None,
            worker_id: None,
            bulk_id: bulk_id.clone(),
            enqueued_at: Utc::now().to_rfc3339(),
            next_eligible_at: None,
        };

        with_conn!(self.pool, conn, {
            diesel::insert_into(processing_queue::table)
                .values(&record)
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;

        if let Some(bulk_id) = &bulk_id {
            self.adjust_bulk_counters(bulk_id, 1, 0, 0, 0).await?;
        }

        Ok(task_id)
    }

    /// Create a named bulk-operation group.
    pub async fn bulk_create(&self, description: &str, operation: Operation) -> Result<String> {
        let bulk_id = Uuid::new_v4().to_string();
        let record = BulkRecord {
            bulk_id: bulk_id.clone(),
            description: description.to_string(),
            operation: operation.as_str().to_string(),
            status: BulkStatus::Running.as_str().to_string(),
            total: 0,
            pending: 0,
            in_progress: 0,
            succeeded: 0,
            failed: 0,
        };
        with_conn!(self.pool, conn, {
            diesel::insert_into(bulk_processing_tasks::table)
                .values(&record)
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        Ok(bulk_id)
    }

    /// Enqueue a batch of tasks that all belong to one bulk, in a single
    /// transaction so the bulk's counters never observe a partial insert.
    pub async fn bulk_enqueue(
        &self,
        bulk_id: &str,
        tasks: Vec<(Option<String>, Operation, serde_json::Map<String, serde_json::Value>, i32, i32)>,
    ) -> Result<Vec<String>> {
        let bulk_id = bulk_id.to_string();
        let now = Utc::now().to_rfc3339();
        let mut ids = Vec::with_capacity(tasks.len());
        let records: Vec<TaskRecord> = tasks
            .into_iter()
            .map(|(page_id, operation, parameters, priority, max_attempts)| {
                let task_id = Uuid::new_v4().to_string();
                ids.push(task_id.clone());
                TaskRecord {
                    task_id,
                    page_id,
                    operation: operation.as_str().to_string(),
                    parameters: serde_json::Value::Object(parameters).to_string(),
                    priority,
                    status: TaskStatus::Pending.as_str().to_string(),
                    attempts: 0,
                    max_attempts,
                    last_error: None,
                    lease_expires_at: None,
                    leased_at: None,
                    worker_id: None,
                    bulk_id: Some(bulk_id.clone()),
                    enqueued_at: now.clone(),
                    next_eligible_at: None,
                }
            })
            .collect();
        let count = records.len() as i32;

        with_conn!(self.pool, conn, {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let records = records;
                let bulk_id = bulk_id.clone();
                Box::pin(async move {
                    diesel::insert_into(processing_queue::table)
                        .values(&records)
                        .execute(conn)
                        .await?;
                    diesel::update(bulk_processing_tasks::table.find(&bulk_id))
                        .set((
                            bulk_processing_tasks::total
                                .eq(bulk_processing_tasks::total + count),
                            bulk_processing_tasks::pending
                                .eq(bulk_processing_tasks::pending + count),
                        ))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .await
            .map_err(PipelineError::from)
        })?;

        Ok(ids)
    }

    /// Atomically claim the highest-priority eligible `pending` task
    /// (tie-break: earliest `enqueued_at`), skipping tasks whose bulk is
    /// paused or whose `next_eligible_at` is in the future. Returns `None`
    /// if no task is eligible.
    pub async fn lease(&self, worker_id: &str, lease_duration: ChronoDuration) -> Result<Option<LeasedTask>> {
        let worker_id = worker_id.to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let lease_expires_at = now + lease_duration;
        let lease_expires_str = lease_expires_at.to_rfc3339();

        let record: Option<TaskRecord> = with_conn!(self.pool, conn, {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let now_str = now_str.clone();
                let worker_id = worker_id.clone();
                let lease_expires_str = lease_expires_str.clone();
                Box::pin(async move {
                    // Paused bulks' pending tasks are ineligible for lease.
                    let paused_bulks: Vec<String> = bulk_processing_tasks::table
                        .filter(bulk_processing_tasks::status.eq(BulkStatus::Paused.as_str()))
                        .select(bulk_processing_tasks::bulk_id)
                        .load(conn)
                        .await?;

                    let mut query = processing_queue::table
                        .filter(processing_queue::status.eq(TaskStatus::Pending.as_str()))
                        .filter(
                            processing_queue::next_eligible_at
                                .is_null()
                                .or(processing_queue::next_eligible_at.le(&now_str)),
                        )
                        .into_boxed();
                    for bulk_id in &paused_bulks {
                        query = query.filter(
                            processing_queue::bulk_id
                                .is_null()
                                .or(processing_queue::bulk_id.ne(bulk_id)),
                        );
                    }
                    let candidate: Option<TaskRecord> = query
                        .order((
                            processing_queue::priority.asc(),
                            processing_queue::enqueued_at.asc(),
                        ))
                        .limit(1)
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(candidate) = candidate else {
                        return Ok(None);
                    };

                    let updated = diesel::update(
                        processing_queue::table
                            .filter(processing_queue::task_id.eq(&candidate.task_id))
                            .filter(processing_queue::status.eq(TaskStatus::Pending.as_str())),
                    )
                    .set((
                        processing_queue::status.eq(TaskStatus::Leased.as_str()),
                        processing_queue::lease_expires_at.eq(&lease_expires_str),
                        processing_queue::leased_at.eq(&now_str),
                        processing_queue::worker_id.eq(&worker_id),
                        processing_queue::attempts.eq(processing_queue::attempts + 1),
                    ))
                    .execute(conn)
                    .await?;

                    // Another worker won the race inside this transaction's
                    // isolation window; report no task rather than double-lease.
                    if updated == 0 {
                        return Ok(None);
                    }

                    let mut leased = candidate;
                    leased.status = TaskStatus::Leased.as_str().to_string();
                    leased.lease_expires_at = Some(lease_expires_str.clone());
                    leased.leased_at = Some(now_str.clone());
                    leased.worker_id = Some(worker_id.clone());
                    leased.attempts += 1;
                    Ok(Some(leased))
                })
            })
            .await
            .map_err(PipelineError::from)
        })?;

        let Some(record) = record else { return Ok(None) };
        if let Some(bulk_id) = &record.bulk_id {
            self.adjust_bulk_counters(bulk_id, 0, -1, 1, 0).await?;
        }
        Ok(Some(LeasedTask {
            task: Task::try_from(record)?,
            lease_expires_at,
        }))
    }

    /// Lease up to `batch_size` pending tasks that share the same
    /// operation, parameters, and bulk as the highest-priority candidate,
    /// so the scheduler can dispatch them together and let the handler
    /// amortize setup costs. Never merges tasks from different bulks.
    /// `batch_size <= 1` degrades to a single `lease()`.
    pub async fn lease_batch(
        &self,
        worker_id: &str,
        lease_duration: ChronoDuration,
        batch_size: usize,
    ) -> Result<Vec<LeasedTask>> {
        if batch_size <= 1 {
            return Ok(self.lease(worker_id, lease_duration).await?.into_iter().collect());
        }

        let worker_id_owned = worker_id.to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let lease_expires_at = now + lease_duration;
        let lease_expires_str = lease_expires_at.to_rfc3339();

        let records: Vec<TaskRecord> = with_conn!(self.pool, conn, {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let now_str = now_str.clone();
                let worker_id = worker_id_owned.clone();
                let lease_expires_str = lease_expires_str.clone();
                Box::pin(async move {
                    let paused_bulks: Vec<String> = bulk_processing_tasks::table
                        .filter(bulk_processing_tasks::status.eq(BulkStatus::Paused.as_str()))
                        .select(bulk_processing_tasks::bulk_id)
                        .load(conn)
                        .await?;

                    let mut query = processing_queue::table
                        .filter(processing_queue::status.eq(TaskStatus::Pending.as_str()))
                        .filter(
                            processing_queue::next_eligible_at
                                .is_null()
                                .or(processing_queue::next_eligible_at.le(&now_str)),
                        )
                        .into_boxed();
                    for bulk_id in &paused_bulks {
                        query = query.filter(
                            processing_queue::bulk_id
                                .is_null()
                                .or(processing_queue::bulk_id.ne(bulk_id)),
                        );
                    }
                    let candidate: Option<TaskRecord> = query
                        .order((
                            processing_queue::priority.asc(),
                            processing_queue::enqueued_at.asc(),
                        ))
                        .limit(1)
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(candidate) = candidate else {
                        return Ok(Vec::new());
                    };

                    // Same operation, same parameters, same bulk (including
                    // "no bulk" matching "no bulk") — identical-work grouping.
                    let mut group_query = processing_queue::table
                        .filter(processing_queue::status.eq(TaskStatus::Pending.as_str()))
                        .filter(processing_queue::operation.eq(&candidate.operation))
                        .filter(processing_queue::parameters.eq(&candidate.parameters))
                        .filter(
                            processing_queue::next_eligible_at
                                .is_null()
                                .or(processing_queue::next_eligible_at.le(&now_str)),
                        )
                        .into_boxed();
                    group_query = match &candidate.bulk_id {
                        Some(bulk_id) => group_query.filter(processing_queue::bulk_id.eq(bulk_id)),
                        None => group_query.filter(processing_queue::bulk_id.is_null()),
                    };

                    let group: Vec<TaskRecord> = group_query
                        .order(processing_queue::enqueued_at.asc())
                        .limit(batch_size as i64)
                        .load(conn)
                        .await?;

                    let mut leased = Vec::with_capacity(group.len());
                    for mut record in group {
                        let updated = diesel::update(
                            processing_queue::table
                                .filter(processing_queue::task_id.eq(&record.task_id))
                                .filter(processing_queue::status.eq(TaskStatus::Pending.as_str())),
                        )
                        .set((
                            processing_queue::status.eq(TaskStatus::Leased.as_str()),
                            processing_queue::lease_expires_at.eq(&lease_expires_str),
                            processing_queue::leased_at.eq(&now_str),
                            processing_queue::worker_id.eq(&worker_id),
                            processing_queue::attempts.eq(processing_queue::attempts + 1),
                        ))
                        .execute(conn)
                        .await?;

                        // Lost the race to another worker between select and
                        // update inside this same transaction's window; skip.
                        if updated == 0 {
                            continue;
                        }
                        record.status = TaskStatus::Leased.as_str().to_string();
                        record.lease_expires_at = Some(lease_expires_str.clone());
                        record.leased_at = Some(now_str.clone());
                        record.worker_id = Some(worker_id.clone());
                        record.attempts += 1;
                        leased.push(record);
                    }
                    Ok(leased)
                })
            })
            .await
            .map_err(PipelineError::from)
        })?;

        let mut bulk_deltas: std::collections::HashMap<String, i32> = std::collections::HashMap::new();
        for record in &records {
            if let Some(bulk_id) = &record.bulk_id {
                *bulk_deltas.entry(bulk_id.clone()).or_insert(0) += 1;
            }
        }
        for (bulk_id, count) in bulk_deltas {
            self.adjust_bulk_counters(&bulk_id, 0, -count, count, 0).await?;
        }

        records
            .into_iter()
            .map(|record| {
                Ok(LeasedTask {
                    task: Task::try_from(record)?,
                    lease_expires_at,
                })
            })
            .collect()
    }

    /// Renew a worker's lease on a task it still holds. Returns `false`
    /// (rather than erroring) if the task was cancelled out from under the
    /// worker, so the caller's heartbeat loop can detect cancellation.
    pub async fn heartbeat(&self, task_id: &str, lease_duration: ChronoDuration) -> Result<bool> {
        let task: TaskRecord = with_conn!(self.pool, conn, {
            processing_queue::table
                .find(task_id)
                .first(&mut conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        PipelineError::NotFound(format!("task {task_id}"))
                    }
                    other => PipelineError::from(other),
                })
        })?;

        if task.status == TaskStatus::Cancelled.as_str() {
            return Ok(false);
        }
        if task.status != TaskStatus::Leased.as_str() {
            return Err(PipelineError::Validation(format!(
                "task {task_id} is {} ; heartbeat requires leased",
                task.status
            )));
        }

        let new_expiry = (Utc::now() + lease_duration).to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(processing_queue::table.find(task_id))
                .set(processing_queue::lease_expires_at.eq(new_expiry))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        Ok(true)
    }

    /// Mark a task as succeeded.
    pub async fn complete(&self, task_id: &str) -> Result<()> {
        let task: TaskRecord = self.get_record(task_id).await?;
        with_conn!(self.pool, conn, {
            diesel::update(processing_queue::table.find(task_id))
                .set((
                    processing_queue::status.eq(TaskStatus::Succeeded.as_str()),
                    processing_queue::last_error.eq(None::<String>),
                    processing_queue::leased_at.eq(None::<String>),
                ))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        if let Some(bulk_id) = &task.bulk_id {
            self.adjust_bulk_counters(bulk_id, 0, -1, 0, 1).await?;
            self.maybe_complete_bulk(bulk_id).await?;
        }
        Ok(())
    }

    /// Record a failure. Reverts to `pending` with a backoff-delayed
    /// `next_eligible_at` if attempts remain, otherwise moves to `failed`.
    pub async fn fail(&self, task_id: &str, error: &str) -> Result<TaskStatus> {
        let task: TaskRecord = self.get_record(task_id).await?;
        let next_status = if task.attempts < task.max_attempts {
            TaskStatus::Pending
        } else {
            TaskStatus::Failed
        };

        let next_eligible = if next_status == TaskStatus::Pending {
            let delay = backoff_delay(
                task.attempts,
                DEFAULT_BASE_RETRY_DELAY_SECS,
                DEFAULT_BACKOFF_CAP_SECS,
            );
            Some((Utc::now() + ChronoDuration::seconds(delay)).to_rfc3339())
        } else {
            None
        };

        with_conn!(self.pool, conn, {
            diesel::update(processing_queue::table.find(task_id))
                .set((
                    processing_queue::status.eq(next_status.as_str()),
                    processing_queue::last_error.eq(Some(error.to_string())),
                    processing_queue::next_eligible_at.eq(next_eligible),
                    processing_queue::lease_expires_at.eq(None::<String>),
                    processing_queue::leased_at.eq(None::<String>),
                ))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;

        if let Some(bulk_id) = &task.bulk_id {
            match next_status {
                TaskStatus::Pending => self.adjust_bulk_counters(bulk_id, 0, 1, -1, 0).await?,
                TaskStatus::Failed => {
                    self.adjust_bulk_counters(bulk_id, 0, 0, -1, 0).await?;
                    self.bump_bulk_failed(bulk_id).await?;
                    self.maybe_complete_bulk(bulk_id).await?;
                }
                _ => unreachable!(),
            }
        }
        Ok(next_status)
    }

    /// Cancel a task. A `leased` task is marked `cancelled`; the worker
    /// observes this on its next `heartbeat` and aborts within the grace
    /// window.
    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        let task: TaskRecord = self.get_record(task_id).await?;
        if TaskStatus::from_str(&task.status)
            .map(|s| s.is_terminal())
            .unwrap_or(true)
        {
            return Err(PipelineError::Validation(format!(
                "task {task_id} is already terminal ({})",
                task.status
            )));
        }
        let was_pending = task.status == TaskStatus::Pending.as_str();
        with_conn!(self.pool, conn, {
            diesel::update(processing_queue::table.find(task_id))
                .set((
                    processing_queue::status.eq(TaskStatus::Cancelled.as_str()),
                    processing_queue::leased_at.eq(None::<String>),
                ))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        if let Some(bulk_id) = &task.bulk_id {
            if was_pending {
                self.adjust_bulk_counters(bulk_id, 0, -1, 0, 0).await?;
            } else {
                self.adjust_bulk_counters(bulk_id, 0, 0, -1, 0).await?;
            }
        }
        Ok(())
    }

    /// Sweep leases whose `lease_expires_at` has passed, returning them to
    /// `pending` and incrementing the `lost_lease` counter. Called
    /// periodically by the pipeline scheduler.
    pub async fn reclaim_expired_leases(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let expired: Vec<TaskRecord> = with_conn!(self.pool, conn, {
            processing_queue::table
                .filter(processing_queue::status.eq(TaskStatus::Leased.as_str()))
                .filter(processing_queue::lease_expires_at.le(&now))
                .load(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;

        for task in &expired {
            with_conn!(self.pool, conn, {
                diesel::update(processing_queue::table.find(&task.task_id))
                    .set((
                        processing_queue::status.eq(TaskStatus::Pending.as_str()),
                        processing_queue::lease_expires_at.eq(None::<String>),
                        processing_queue::leased_at.eq(None::<String>),
                        processing_queue::worker_id.eq(None::<String>),
                    ))
                    .execute(&mut conn)
                    .await
                    .map_err(PipelineError::from)
            })?;
            if let Some(bulk_id) = &task.bulk_id {
                self.adjust_bulk_counters(bulk_id, 0, 1, -1, 0).await?;
            }
        }

        if !expired.is_empty() {
            self.increment_lost_lease(expired.len() as i32).await?;
        }
        Ok(expired.len() as u64)
    }

    /// Force-expire tasks that have been leased (i.e. actively running)
    /// longer than `max_task_duration`, marking them `failed` with reason
    /// `timeout` regardless of remaining attempts. Measured from
    /// `leased_at`, not `enqueued_at` — a task that merely sat `pending` in
    /// a backlog past the cutoff has not overrun anything.
    pub async fn force_expire_overdue(&self, max_task_duration: ChronoDuration) -> Result<u64> {
        let cutoff = (Utc::now() - max_task_duration).to_rfc3339();
        let overdue: Vec<TaskRecord> = with_conn!(self.pool, conn, {
            processing_queue::table
                .filter(processing_queue::status.eq(TaskStatus::Leased.as_str()))
                .filter(processing_queue::leased_at.le(&cutoff))
                .load(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        for task in &overdue {
            self.fail_direct(&task.task_id, "timeout").await?;
        }
        Ok(overdue.len() as u64)
    }

    /// Force a task directly to `failed`, bypassing the retry schedule.
    /// Used for timeouts and corrupt-data errors that must never retry.
    async fn fail_direct(&self, task_id: &str, error: &str) -> Result<()> {
        let task: TaskRecord = self.get_record(task_id).await?;
        with_conn!(self.pool, conn, {
            diesel::update(processing_queue::table.find(task_id))
                .set((
                    processing_queue::status.eq(TaskStatus::Failed.as_str()),
                    processing_queue::last_error.eq(Some(error.to_string())),
                    processing_queue::lease_expires_at.eq(None::<String>),
                    processing_queue::leased_at.eq(None::<String>),
                ))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        if let Some(bulk_id) = &task.bulk_id {
            self.adjust_bulk_counters(bulk_id, 0, -1, -1, 0).await?;
            self.bump_bulk_failed(bulk_id).await?;
            self.maybe_complete_bulk(bulk_id).await?;
        }
        Ok(())
    }

    pub async fn pause_bulk(&self, bulk_id: &str) -> Result<()> {
        self.set_bulk_status(bulk_id, BulkStatus::Paused).await
    }

    pub async fn resume_bulk(&self, bulk_id: &str) -> Result<()> {
        self.set_bulk_status(bulk_id, BulkStatus::Running).await
    }

    pub async fn cancel_bulk(&self, bulk_id: &str) -> Result<()> {
        let pending: Vec<String> = with_conn!(self.pool, conn, {
            processing_queue::table
                .filter(processing_queue::bulk_id.eq(bulk_id))
                .filter(processing_queue::status.eq(TaskStatus::Pending.as_str()))
                .select(processing_queue::task_id)
                .load(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        for task_id in pending {
            self.cancel(&task_id).await?;
        }
        self.set_bulk_status(bulk_id, BulkStatus::Cancelled).await
    }

    /// Requeue only the `failed` children of a bulk.
    pub async fn retry_failed(&self, bulk_id: &str) -> Result<u64> {
        let failed: Vec<TaskRecord> = with_conn!(self.pool, conn, {
            processing_queue::table
                .filter(processing_queue::bulk_id.eq(bulk_id))
                .filter(processing_queue::status.eq(TaskStatus::Failed.as_str()))
                .load(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        let count = failed.len() as i32;
        for task in &failed {
            with_conn!(self.pool, conn, {
                diesel::update(processing_queue::table.find(&task.task_id))
                    .set((
                        processing_queue::status.eq(TaskStatus::Pending.as_str()),
                        processing_queue::attempts.eq(0),
                        processing_queue::last_error.eq(None::<String>),
                        processing_queue::next_eligible_at.eq(None::<String>),
                    ))
                    .execute(&mut conn)
                    .await
                    .map_err(PipelineError::from)
            })?;
        }
        if count > 0 {
            with_conn!(self.pool, conn, {
                diesel::update(bulk_processing_tasks::table.find(bulk_id))
                    .set((
                        bulk_processing_tasks::pending.eq(bulk_processing_tasks::pending + count),
                        bulk_processing_tasks::failed.eq(bulk_processing_tasks::failed - count),
                        bulk_processing_tasks::status.eq(BulkStatus::Running.as_str()),
                    ))
                    .execute(&mut conn)
                    .await
                    .map_err(PipelineError::from)
            })?;
        }
        Ok(count as u64)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        Task::try_from(self.get_record(task_id).await?)
    }

    pub async fn get_bulk(&self, bulk_id: &str) -> Result<BulkOperation> {
        let record: BulkRecord = with_conn!(self.pool, conn, {
            bulk_processing_tasks::table
                .find(bulk_id)
                .first(&mut conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        PipelineError::NotFound(format!("bulk {bulk_id}"))
                    }
                    other => PipelineError::from(other),
                })
        })?;
        BulkOperation::try_from(record)
    }

    pub async fn lost_lease_count(&self) -> Result<i32> {
        let count: Option<i32> = with_conn!(self.pool, conn, {
            queue_counters::table
                .find(1)
                .select(queue_counters::lost_lease_count)
                .first(&mut conn)
                .await
                .optional()
                .map_err(PipelineError::from)
        })?;
        Ok(count.unwrap_or(0))
    }

    async fn get_record(&self, task_id: &str) -> Result<TaskRecord> {
        with_conn!(self.pool, conn, {
            processing_queue::table
                .find(task_id)
                .first(&mut conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        PipelineError::NotFound(format!("task {task_id}"))
                    }
                    other => PipelineError::from(other),
                })
        })
    }

    async fn set_bulk_status(&self, bulk_id: &str, status: BulkStatus) -> Result<()> {
        with_conn!(self.pool, conn, {
            diesel::update(bulk_processing_tasks::table.find(bulk_id))
                .set(bulk_processing_tasks::status.eq(status.as_str()))
                .execute(&mut conn)
                .await
                .map(|_| ())
                .map_err(PipelineError::from)
        })
    }

    async fn bump_bulk_failed(&self, bulk_id: &str) -> Result<()> {
        with_conn!(self.pool, conn, {
            diesel::update(bulk_processing_tasks::table.find(bulk_id))
                .set(bulk_processing_tasks::failed.eq(bulk_processing_tasks::failed + 1))
                .execute(&mut conn)
                .await
                .map(|_| ())
                .map_err(PipelineError::from)
        })
    }

    async fn adjust_bulk_counters(
        &self,
        bulk_id: &str,
        total: i32,
        pending: i32,
        in_progress: i32,
        succeeded: i32,
    ) -> Result<()> {
        with_conn!(self.pool, conn, {
            diesel::update(bulk_processing_tasks::table.find(bulk_id))
                .set((
                    bulk_processing_tasks::total.eq(bulk_processing_tasks::total + total),
                    bulk_processing_tasks::pending.eq(bulk_processing_tasks::pending + pending),
                    bulk_processing_tasks::in_progress
                        .eq(bulk_processing_tasks::in_progress + in_progress),
                    bulk_processing_tasks::succeeded
                        .eq(bulk_processing_tasks::succeeded + succeeded),
                ))
                .execute(&mut conn)
                .await
                .map(|_| ())
                .map_err(PipelineError::from)
        })
    }

    /// A bulk completes (`status=completed`) iff every child task reached a
    /// terminal state, regardless of whether any failed.
    async fn maybe_complete_bulk(&self, bulk_id: &str) -> Result<()> {
        let bulk = self.get_bulk(bulk_id).await?;
        if bulk.status == BulkStatus::Running && bulk.counters.all_terminal() {
            self.set_bulk_status(bulk_id, BulkStatus::Completed).await?;
        }
        Ok(())
    }

    async fn increment_lost_lease(&self, n: i32) -> Result<()> {
        with_conn!(self.pool, conn, {
            diesel::update(queue_counters::table.find(1))
                .set(
                    queue_counters::lost_lease_count
                        .eq(queue_counters::lost_lease_count + n),
                )
                .execute(&mut conn)
                .await
                .map(|_| ())
                .map_err(PipelineError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::migrations::{run_migrations, REPOSITORY_MIGRATIONS};

    async fn test_queue() -> (WorkQueue, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("repo.sqlite");
        let url = db_path.display().to_string();
        run_migrations(&url, REPOSITORY_MIGRATIONS).await.unwrap();
        (WorkQueue::new(DbPool::new(url)), dir)
    }

    #[tokio::test]
    async fn enqueue_and_lease_roundtrip() {
        let (queue, _dir) = test_queue().await;
        let task_id = queue
            .enqueue(None, Operation::Ocr, serde_json::Map::new(), 10, 3, None)
            .await
            .unwrap();

        let leased = queue
            .lease("worker-1", ChronoDuration::seconds(30))
            .await
            .unwrap()
            .expect("task should be leased");
        assert_eq!(leased.task.task_id, task_id);
        assert_eq!(leased.task.status, TaskStatus::Leased);
        assert_eq!(leased.task.attempts, 1);
    }

    #[tokio::test]
    async fn batch_lease_groups_identical_work_within_one_bulk() {
        let (queue, _dir) = test_queue().await;
        let bulk_id = queue.bulk_create("backfill", Operation::Ocr).await.unwrap();
        let other_bulk = queue.bulk_create("backfill-2", Operation::Ocr).await.unwrap();

        let mut params = serde_json::Map::new();
        params.insert("language".into(), serde_json::Value::String("eng".into()));
        queue
            .bulk_enqueue(
                &bulk_id,
                vec![
                    (None, Operation::Ocr, params.clone(), 10, 3),
                    (None, Operation::Ocr, params.clone(), 10, 3),
                    (None, Operation::Ocr, params.clone(), 10, 3),
                ],
            )
            .await
            .unwrap();
        // Same operation/parameters but a different bulk must never be
        // folded into the first bulk's batch.
        queue
            .bulk_enqueue(&other_bulk, vec![(None, Operation::Ocr, params.clone(), 10, 3)])
            .await
            .unwrap();
        // Different parameters within the same bulk must not batch together.
        let mut other_params = serde_json::Map::new();
        other_params.insert("language".into(), serde_json::Value::String("fra".into()));
        queue
            .bulk_enqueue(&bulk_id, vec![(None, Operation::Ocr, other_params, 10, 3)])
            .await
            .unwrap();

        let batch = queue
            .lease_batch("worker-1", ChronoDuration::seconds(30), 10)
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
        for leased in &batch {
            assert_eq!(leased.task.bulk_id.as_deref(), Some(bulk_id.as_str()));
            assert_eq!(leased.task.status, TaskStatus::Leased);
        }
    }

    #[tokio::test]
    async fn only_one_worker_wins_the_lease() {
        let (queue, _dir) = test_queue().await;
        queue
            .enqueue(None, Operation::Ocr, serde_json::Map::new(), 10, 3, None)
            .await
            .unwrap();

        let a = queue.lease("worker-a", ChronoDuration::seconds(30)).await.unwrap();
        let b = queue.lease("worker-b", ChronoDuration::seconds(30)).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn priority_then_enqueue_time_orders_lease() {
        let (queue, _dir) = test_queue().await;
        let low_pri = queue
            .enqueue(None, Operation::Ocr, serde_json::Map::new(), 50, 3, None)
            .await
            .unwrap();
        let high_pri = queue
            .enqueue(None, Operation::Ocr, serde_json::Map::new(), 5, 3, None)
            .await
            .unwrap();

        let first = queue
            .lease("w", ChronoDuration::seconds(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.task.task_id, high_pri);
        let second = queue
            .lease("w", ChronoDuration::seconds(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.task.task_id, low_pri);
    }

    #[tokio::test]
    async fn exhausted_retries_move_to_failed() {
        let (queue, _dir) = test_queue().await;
        let task_id = queue
            .enqueue(None, Operation::Ocr, serde_json::Map::new(), 10, 2, None)
            .await
            .unwrap();

        for expected in [TaskStatus::Pending, TaskStatus::Failed] {
            queue.lease("w", ChronoDuration::seconds(30)).await.unwrap();
            let status = queue.fail(&task_id, "transient upstream error").await.unwrap();
            assert_eq!(status, expected);
            if status == TaskStatus::Pending {
                // Clear the backoff delay so the next lease can claim it
                // immediately instead of waiting out `next_eligible_at`.
                let task = queue.get_task(&task_id).await.unwrap();
                assert!(task.next_eligible_at.is_some());
                with_conn!(queue.pool, conn, {
                    diesel::update(processing_queue::table.find(&task_id))
                        .set(processing_queue::next_eligible_at.eq(None::<String>))
                        .execute(&mut conn)
                        .await
                        .unwrap()
                });
            }
        }

        let task = queue.get_task(&task_id).await.unwrap();
        assert_eq!(task.attempts, 2);
        assert!(task.last_error.is_some());
        assert!(queue
            .lease("w", ChronoDuration::seconds(30))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn bulk_completes_with_failures_present() {
        let (queue, _dir) = test_queue().await;
        let bulk_id = queue.bulk_create("backfill", Operation::Ocr).await.unwrap();
        let ids = queue
            .bulk_enqueue(
                &bulk_id,
                vec![
                    (None, Operation::Ocr, serde_json::Map::new(), 10, 1),
                    (None, Operation::Ocr, serde_json::Map::new(), 10, 1),
                ],
            )
            .await
            .unwrap();

        let first = queue.lease("w", ChronoDuration::seconds(30)).await.unwrap().unwrap();
        queue.complete(&first.task.task_id).await.unwrap();
        let second = queue.lease("w", ChronoDuration::seconds(30)).await.unwrap().unwrap();
        queue.fail(&second.task.task_id, "corrupt data").await.unwrap();

        let bulk = queue.get_bulk(&bulk_id).await.unwrap();
        assert_eq!(bulk.status, BulkStatus::Completed);
        assert_eq!(bulk.counters.succeeded, 1);
        assert_eq!(bulk.counters.failed, 1);
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn pause_bulk_hides_its_pending_tasks() {
        let (queue, _dir) = test_queue().await;
        let bulk_id = queue.bulk_create("backfill", Operation::Ocr).await.unwrap();
        queue
            .bulk_enqueue(
                &bulk_id,
                vec![(None, Operation::Ocr, serde_json::Map::new(), 10, 1)],
            )
            .await
            .unwrap();
        queue.pause_bulk(&bulk_id).await.unwrap();

        assert!(queue
            .lease("w", ChronoDuration::seconds(30))
            .await
            .unwrap()
            .is_none());

        queue.resume_bulk(&bulk_id).await.unwrap();
        assert!(queue
            .lease("w", ChronoDuration::seconds(30))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn expired_leases_are_reclaimed_and_counted() {
        let (queue, _dir) = test_queue().await;
        let task_id = queue
            .enqueue(None, Operation::Ocr, serde_json::Map::new(), 10, 3, None)
            .await
            .unwrap();
        queue
            .lease("w", ChronoDuration::seconds(-1))
            .await
            .unwrap();

        let reclaimed = queue.reclaim_expired_leases().await.unwrap();
        assert_eq!(reclaimed, 1);
        let task = queue.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(queue.lost_lease_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retry_failed_only_touches_failed_children() {
        let (queue, _dir) = test_queue().await;
        let bulk_id = queue.bulk_create("backfill", Operation::Ocr).await.unwrap();
        let ids = queue
            .bulk_enqueue(
                &bulk_id,
                vec![
                    (None, Operation::Ocr, serde_json::Map::new(), 10, 1),
                    (None, Operation::Ocr, serde_json::Map::new(), 10, 1),
                ],
            )
            .await
            .unwrap();
        let first = queue.lease("w", ChronoDuration::seconds(30)).await.unwrap().unwrap();
        queue.complete(&first.task.task_id).await.unwrap();
        let second = queue.lease("w", ChronoDuration::seconds(30)).await.unwrap().unwrap();
        queue.fail(&second.task.task_id, "corrupt data").await.unwrap();

        let retried = queue.retry_failed(&bulk_id).await.unwrap();
        assert_eq!(retried, 1);

        let succeeded_task = queue.get_task(&ids[0]).await.unwrap();
        assert_eq!(succeeded_task.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn force_expire_overdue_measures_lease_time_not_queue_time() {
        let (queue, _dir) = test_queue().await;
        let old_backlog_task = queue
            .enqueue(None, Operation::Ocr, serde_json::Map::new(), 10, 3, None)
            .await
            .unwrap();
        let stuck_task = queue
            .enqueue(None, Operation::Ocr, serde_json::Map::new(), 10, 3, None)
            .await
            .unwrap();

        // `old_backlog_task` sat pending for a long time before being
        // leased just now; it must not be force-expired on lease time alone.
        with_conn!(queue.pool, conn, {
            diesel::update(processing_queue::table.find(&old_backlog_task))
                .set(processing_queue::enqueued_at.eq("2000-01-01T00:00:00Z"))
                .execute(&mut conn)
                .await
                .unwrap()
        });
        queue.lease("w", ChronoDuration::seconds(600)).await.unwrap();

        // `stuck_task` was leased a long time ago and is genuinely overdue.
        queue.lease("w", ChronoDuration::seconds(600)).await.unwrap();
        with_conn!(queue.pool, conn, {
            diesel::update(processing_queue::table.find(&stuck_task))
                .set(processing_queue::leased_at.eq("2000-01-01T00:00:00Z"))
                .execute(&mut conn)
                .await
                .unwrap()
        });

        let expired = queue
            .force_expire_overdue(ChronoDuration::seconds(7200))
            .await
            .unwrap();
        assert_eq!(expired, 1);

        let backlog_task = queue.get_task(&old_backlog_task).await.unwrap();
        assert_eq!(backlog_task.status, TaskStatus::Leased);
        let stuck = queue.get_task(&stuck_task).await.unwrap();
        assert_eq!(stuck.status, TaskStatus::Failed);
        assert_eq!(stuck.last_error.as_deref(), Some("timeout"));
    }
}
