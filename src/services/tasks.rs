//! Job Manager
//!
//! Accepts generation requests, runs them on a bounded worker pool, exposes
//! progress and cancellation, and retains terminal state for later polling.
//!
//! Workers are tokio tasks consuming one shared FIFO queue. Cancellation is
//! cooperative: a `CancellationToken` per job, observed by the runner at its
//! safe points. A background reaper drops terminal jobs after the retention
//! window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TaskSettings;
use crate::models::job::{Job, JobInput, JobResultData, JobSnapshot, JobStatus};
use crate::utils::error::{AppError, AppResult};

/// Progress callback handed to the runner: (progress 0..=100, message).
pub type ProgressFn = Arc<dyn Fn(u8, &str) + Send + Sync>;

/// Executes one job. Implemented by the iteration engine; tests inject mocks.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(
        &self,
        job_id: Uuid,
        input: JobInput,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> AppResult<JobResultData>;
}

/// Outcome of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The signal was set (and a queued job went terminal immediately)
    Signalled,
    /// The job was already terminal; nothing changed
    Late,
}

/// Counts surfaced by the statistics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatistics {
    pub total_tasks: usize,
    pub running_tasks: usize,
    pub queued_tasks: usize,
    pub max_workers: usize,
    pub status_counts: HashMap<String, usize>,
}

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
}

struct Inner {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    queue_tx: mpsc::Sender<Uuid>,
    busy: AtomicUsize,
    settings: TaskSettings,
}

/// Bounded-pool asynchronous job manager
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    /// Create the manager and spawn its worker pool and reaper.
    pub fn start(settings: TaskSettings, runner: Arc<dyn JobRunner>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel::<Uuid>(settings.max_pending_tasks.max(1));
        let inner = Arc::new(Inner {
            jobs: Mutex::new(HashMap::new()),
            queue_tx,
            busy: AtomicUsize::new(0),
            settings,
        });

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for worker_id in 0..inner.settings.max_workers {
            let inner = inner.clone();
            let runner = runner.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, inner, runner, queue_rx).await;
            });
        }

        {
            let inner = inner.clone();
            tokio::spawn(async move {
                reaper_loop(inner).await;
            });
        }

        info!(
            workers = inner.settings.max_workers,
            queue = inner.settings.max_pending_tasks,
            "任务管理器已启动"
        );

        Self { inner }
    }

    /// Enqueue a job. Fails with `QueueFull` past the configured bound.
    pub fn submit(&self, input: JobInput) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        let job = Job::new(id, input);

        {
            let mut jobs = self.lock_jobs();
            jobs.insert(
                id,
                JobEntry {
                    job,
                    cancel: CancellationToken::new(),
                },
            );
        }

        if let Err(e) = self.inner.queue_tx.try_send(id) {
            self.lock_jobs().remove(&id);
            warn!(error = %e, "任务队列已满，拒绝提交");
            return Err(AppError::QueueFull("任务队列已满，请稍后重试".to_string()));
        }

        debug!(task_id = %id, "任务已提交");
        Ok(id)
    }

    /// Atomic snapshot of a job's observable fields.
    pub fn get(&self, id: Uuid) -> AppResult<JobSnapshot> {
        let jobs = self.lock_jobs();
        jobs.get(&id)
            .map(|entry| entry.job.snapshot())
            .ok_or_else(|| AppError::not_found("任务不存在"))
    }

    /// Set the cancellation signal. Idempotent.
    ///
    /// A queued job goes terminal immediately without running; a running job
    /// terminates at its next cancellation check.
    pub fn cancel(&self, id: Uuid) -> AppResult<CancelOutcome> {
        let mut jobs = self.lock_jobs();
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("任务不存在"))?;

        if entry.job.status.is_terminal() {
            return Ok(CancelOutcome::Late);
        }

        entry.cancel.cancel();
        if entry.job.status == JobStatus::Queued {
            entry.job.status = JobStatus::Cancelled;
            entry.job.message = "任务已取消".to_string();
            entry.job.finished_at = Some(Utc::now());
        } else {
            entry.job.message = "任务取消中...".to_string();
        }
        info!(task_id = %id, "收到取消请求");
        Ok(CancelOutcome::Signalled)
    }

    /// Counts by status, queue depth, busy workers.
    pub fn statistics(&self) -> ManagerStatistics {
        let jobs = self.lock_jobs();
        let mut status_counts: HashMap<String, usize> = HashMap::new();
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            status_counts.insert(status.to_string(), 0);
        }
        for entry in jobs.values() {
            *status_counts
                .entry(entry.job.status.to_string())
                .or_insert(0) += 1;
        }
        ManagerStatistics {
            total_tasks: jobs.len(),
            running_tasks: self.inner.busy.load(Ordering::Relaxed),
            queued_tasks: status_counts.get("queued").copied().unwrap_or(0),
            max_workers: self.inner.settings.max_workers,
            status_counts,
        }
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JobEntry>> {
        self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_jobs(inner: &Inner) -> std::sync::MutexGuard<'_, HashMap<Uuid, JobEntry>> {
    inner.jobs.lock().unwrap_or_else(|e| e.into_inner())
}

/// Stamp a progress update, coalesced and clamped monotone.
///
/// Runner-reported progress is capped at 99: the manager alone sets 100 at
/// completion, so observers never see progress=100 on a non-completed job.
fn update_progress(inner: &Inner, id: Uuid, progress: u8, message: &str) {
    let mut jobs = lock_jobs(inner);
    if let Some(entry) = jobs.get_mut(&id) {
        if entry.job.status == JobStatus::Running {
            let capped = progress.min(99);
            entry.job.progress = entry.job.progress.max(capped);
            entry.job.message = message.to_string();
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    inner: Arc<Inner>,
    runner: Arc<dyn JobRunner>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Uuid>>>,
) {
    loop {
        let id = {
            let mut rx = queue_rx.lock().await;
            match rx.recv().await {
                Some(id) => id,
                None => break,
            }
        };

        let claimed = {
            let mut jobs = lock_jobs(&inner);
            match jobs.get_mut(&id) {
                // Cancelled while queued, or already reaped: skip.
                Some(entry) if entry.job.status == JobStatus::Queued => {
                    entry.job.status = JobStatus::Running;
                    entry.job.started_at = Some(Utc::now());
                    entry.job.message = "任务执行中...".to_string();
                    entry.job.progress = entry.job.progress.max(1);
                    Some((entry.job.input.clone(), entry.cancel.clone()))
                }
                _ => None,
            }
        };
        let Some((input, cancel)) = claimed else {
            continue;
        };

        info!(worker = worker_id, task_id = %id, "开始执行任务");
        inner.busy.fetch_add(1, Ordering::Relaxed);

        let progress: ProgressFn = {
            let inner = inner.clone();
            Arc::new(move |p, msg| update_progress(&inner, id, p, msg))
        };

        let outcome = tokio::time::timeout(
            inner.settings.task_timeout,
            runner.run(id, input, progress, cancel.clone()),
        )
        .await;

        inner.busy.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            Err(_) => {
                cancel.cancel();
                warn!(task_id = %id, "任务执行超时");
                finish_failed(&inner, id, "TimeoutError: 任务执行超时".to_string());
            }
            Ok(Ok(result)) => {
                info!(task_id = %id, "任务执行成功");
                finish_completed(&inner, id, result);
            }
            Ok(Err(e)) if e.is_cancelled() => {
                info!(task_id = %id, "任务已取消");
                finish_cancelled(&inner, id);
            }
            Ok(Err(e)) => {
                error!(task_id = %id, error = %e, "任务执行失败");
                finish_failed(&inner, id, format!("{}: {}", e.kind(), e));
            }
        }
    }
}

fn finish_completed(inner: &Inner, id: Uuid, result: JobResultData) {
    let mut jobs = lock_jobs(inner);
    if let Some(entry) = jobs.get_mut(&id) {
        if entry.job.status.is_terminal() {
            return;
        }
        entry.job.status = JobStatus::Completed;
        entry.job.progress = 100;
        entry.job.message = "任务完成".to_string();
        entry.job.result = Some(result);
        entry.job.finished_at = Some(Utc::now());
    }
}

fn finish_cancelled(inner: &Inner, id: Uuid) {
    let mut jobs = lock_jobs(inner);
    if let Some(entry) = jobs.get_mut(&id) {
        if entry.job.status.is_terminal() {
            return;
        }
        entry.job.status = JobStatus::Cancelled;
        entry.job.message = "任务已取消".to_string();
        entry.job.finished_at = Some(Utc::now());
    }
}

fn finish_failed(inner: &Inner, id: Uuid, error: String) {
    let mut jobs = lock_jobs(inner);
    if let Some(entry) = jobs.get_mut(&id) {
        if entry.job.status.is_terminal() {
            return;
        }
        entry.job.status = JobStatus::Failed;
        entry.job.message = format!("任务失败: {}", error);
        entry.job.error = Some(error);
        entry.job.finished_at = Some(Utc::now());
    }
}

async fn reaper_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.settings.cleanup_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(inner.settings.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let mut jobs = lock_jobs(&inner);
        let before = jobs.len();
        jobs.retain(|_, entry| {
            !(entry.job.status.is_terminal()
                && entry.job.finished_at.map(|t| t < cutoff).unwrap_or(false))
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, "清理过期任务");
        }
    }
}
