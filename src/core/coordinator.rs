//! 批量上传调度
//!
//! 调度循环是 `BatchRun` 唯一的写者：worker 只拿到路径和元数据，
//! 结果通过 channel 回到循环里再更新任务状态和计数。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use crate::config::Credentials;
use crate::utils::{FixedDelayRetry, RetryDecision, RetryPolicy};
use super::errors::{BatchError, Result, UploadError};
use super::run::BatchRun;
use super::stats::{BatchSummary, StatsAggregator, report};
use super::traits::UploadClient;
use super::types::{BatchEvent, JobStatus, RejectReason, UploadPolicy};
use super::worker::{SessionCache, UploadWorker, submit_metadata};

enum WorkerMessage {
    /// 一次尝试结束
    Finished {
        index: usize,
        result: std::result::Result<(), UploadError>,
    },

    /// 重试等待结束，重新入队
    RetryReady {
        index: usize,
    },

    /// 等待期间被取消，任务保持 Pending
    RetryAbandoned {
        index: usize,
    },
}

/// 并发受限的上传调度器
pub struct UploadCoordinator {
    client: Arc<dyn UploadClient>,
    retry: Arc<dyn RetryPolicy>,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<BatchEvent>,
}

impl UploadCoordinator {
    pub fn new(client: Arc<dyn UploadClient>) -> Self {
        // 最大缓存 256 个事件
        let (event_tx, _) = broadcast::channel(256);

        Self {
            client,
            retry: Arc::new(FixedDelayRetry),
            cancel: CancellationToken::new(),
            event_tx,
        }
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// 取消后不再派发新任务，正在进行的尝试会自然结束
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.event_tx.subscribe()
    }

    /// 执行批次，直到所有任务结束或被取消
    ///
    /// 只有配置、登录问题会返回错误；单个任务的失败记录在任务上。
    pub async fn run(
        &self,
        run: &mut BatchRun,
        policy: &UploadPolicy,
        credentials: &Credentials,
    ) -> Result<BatchSummary> {
        if run.is_finished() {
            return Err(BatchError::AlreadyFinished);
        }
        policy.validate()?;

        if !credentials.is_configured() {
            return Err(BatchError::Auth("no credentials configured".to_string()));
        }

        let sessions = Arc::new(SessionCache::new(self.client.clone(), credentials.clone()));
        sessions.get().await.map_err(|err| match err {
            UploadError::Auth(message) => BatchError::Auth(message),
            err => BatchError::Preflight(err),
        })?;

        let policy = Arc::new(policy.clone());
        let worker = Arc::new(UploadWorker {
            client: self.client.clone(),
            sessions,
            policy: policy.clone(),
        });

        let (message_tx, mut message_rx) = mpsc::unbounded_channel();
        let mut queue: VecDeque<usize> = (0..run.len())
            .filter(|index| run.job(*index).is_some_and(|job| job.status == JobStatus::Pending))
            .collect();
        let mut stats = StatsAggregator::new();
        let mut in_flight = 0usize;
        let mut parked = 0usize;

        info!(
            jobs = queue.len(),
            concurrency = policy.concurrency,
            max_retries = policy.max_retries,
            "starting batch upload"
        );
        run.mark_started();

        // 主事件循环
        loop {
            while in_flight < policy.concurrency && !self.cancel.is_cancelled() {
                let Some(index) = queue.pop_front() else {
                    break;
                };
                if self.dispatch(run, index, &policy, &worker, &message_tx, &mut stats).await {
                    in_flight += 1;
                }
            }

            let drained = queue.is_empty() || self.cancel.is_cancelled();
            if in_flight == 0 && parked == 0 && drained {
                break;
            }

            let Some(message) = message_rx.recv().await else {
                break;
            };

            match message {
                WorkerMessage::Finished { index, result } => {
                    in_flight -= 1;
                    if self.handle_result(run, index, result, &policy, &message_tx, &mut stats) {
                        parked += 1;
                    }
                }
                WorkerMessage::RetryReady { index } => {
                    parked -= 1;
                    // 重试的任务排在最前面
                    queue.push_front(index);
                }
                WorkerMessage::RetryAbandoned { index } => {
                    parked -= 1;
                    if let Some(job) = run.job(index) {
                        info!(job = %job.display_name, "retry abandoned, job left pending");
                    }
                }
            }
        }

        let cancelled = run.jobs().iter().any(|job| !job.is_terminal());
        run.mark_finished(cancelled);

        let counters = run.counters();
        if cancelled {
            warn!(pending = run.count_status(JobStatus::Pending), "batch upload cancelled");
        }
        info!(
            total = counters.total,
            succeeded = counters.succeeded,
            failed = counters.failed,
            skipped = counters.skipped,
            duration_ms = run.duration_ms(),
            "batch upload finished"
        );
        self.emit(BatchEvent::RunFinished {
            succeeded: counters.succeeded,
            failed: counters.failed,
            skipped: counters.skipped,
            cancelled,
        });

        Ok(report(run))
    }

    /// 返回 true 表示已交给 worker
    async fn dispatch(
        &self,
        run: &mut BatchRun,
        index: usize,
        policy: &Arc<UploadPolicy>,
        worker: &Arc<UploadWorker>,
        message_tx: &mpsc::UnboundedSender<WorkerMessage>,
        stats: &mut StatsAggregator,
    ) -> bool {
        let total = run.len();
        let Some(job) = run.job_mut(index) else {
            return false;
        };

        // 扫描之后文件可能被删除或修改
        if job.attempt_count == 0 {
            if let Err(reason) = recheck(&job.source_path, policy).await {
                warn!(job = %job.display_name, %reason, "file no longer matches policy, skipping");
                if let Err(err) = job.mark_skipped(reason.to_string()) {
                    error!(job = %job.display_name, error = %err, "cannot skip job");
                    return false;
                }
                let event = BatchEvent::JobFinished {
                    job_id: job.id,
                    name: job.display_name.clone(),
                    status: job.status,
                    error: job.last_error.clone(),
                };
                run.record_terminal(stats, index);
                self.emit(event);
                return false;
            }
        }

        let attempt = match job.start_attempt() {
            Ok(attempt) => attempt,
            Err(err) => {
                error!(job = %job.display_name, error = %err, "cannot start job");
                return false;
            }
        };

        info!(
            job = %job.display_name,
            position = index + 1,
            total,
            attempt,
            "uploading"
        );
        self.emit(BatchEvent::JobStarted {
            job_id: job.id,
            name: job.display_name.clone(),
            attempt,
        });

        let path = job.source_path.clone();
        let metadata = submit_metadata(job, policy);
        let worker = worker.clone();
        let message_tx = message_tx.clone();

        tokio::spawn(async move {
            let attempt = tokio::spawn(async move { worker.run(&path, &metadata).await });
            let result = match attempt.await {
                Ok(result) => result,
                Err(err) => Err(UploadError::Transport(format!("Task panicked: {}", err))),
            };

            // 通知完成
            let _ = message_tx.send(WorkerMessage::Finished { index, result });
        });

        true
    }

    /// 返回 true 表示任务进入重试等待
    fn handle_result(
        &self,
        run: &mut BatchRun,
        index: usize,
        result: std::result::Result<(), UploadError>,
        policy: &UploadPolicy,
        message_tx: &mpsc::UnboundedSender<WorkerMessage>,
        stats: &mut StatsAggregator,
    ) -> bool {
        let Some(job) = run.job_mut(index) else {
            return false;
        };

        let err = match result {
            Ok(()) => {
                if let Err(err) = job.mark_succeeded() {
                    error!(job = %job.display_name, error = %err, "cannot complete job");
                    return false;
                }
                info!(job = %job.display_name, attempts = job.attempt_count, "upload succeeded");
                let event = BatchEvent::JobFinished {
                    job_id: job.id,
                    name: job.display_name.clone(),
                    status: job.status,
                    error: None,
                };
                run.record_terminal(stats, index);
                self.emit(event);
                return false;
            }
            Err(err) => err,
        };

        match self.retry.should_retry(job, &err, policy) {
            RetryDecision::Retry(delay) => {
                if let Err(transition) = job.requeue(err.to_string()) {
                    error!(job = %job.display_name, error = %transition, "cannot requeue job");
                    return false;
                }
                if self.cancel.is_cancelled() {
                    info!(job = %job.display_name, error = %err, "upload failed after cancellation, job left pending");
                    return false;
                }

                warn!(
                    job = %job.display_name,
                    attempt = job.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "upload failed, retrying"
                );
                self.emit(BatchEvent::JobRetrying {
                    job_id: job.id,
                    name: job.display_name.clone(),
                    attempt: job.attempt_count,
                    delay,
                    error: err.to_string(),
                });
                self.park(index, delay, message_tx);
                true
            }
            RetryDecision::GiveUp => {
                let message = if job.attempt_count > policy.max_retries {
                    UploadError::ExhaustedRetries {
                        attempts: job.attempt_count,
                        last: err.to_string(),
                    }
                    .to_string()
                } else {
                    err.to_string()
                };

                if let Err(transition) = job.mark_failed(message) {
                    error!(job = %job.display_name, error = %transition, "cannot fail job");
                    return false;
                }
                error!(
                    job = %job.display_name,
                    attempts = job.attempt_count,
                    error = %err,
                    "upload failed"
                );
                let event = BatchEvent::JobFinished {
                    job_id: job.id,
                    name: job.display_name.clone(),
                    status: job.status,
                    error: job.last_error.clone(),
                };
                run.record_terminal(stats, index);
                self.emit(event);
                false
            }
        }
    }

    /// 等待期间不占用 worker
    fn park(&self, index: usize, delay: Duration, message_tx: &mpsc::UnboundedSender<WorkerMessage>) {
        let cancel = self.cancel.clone();
        let message_tx = message_tx.clone();

        tokio::spawn(async move {
            let message = tokio::select! {
                _ = tokio::time::sleep(delay) => WorkerMessage::RetryReady { index },
                _ = cancel.cancelled() => WorkerMessage::RetryAbandoned { index },
            };
            let _ = message_tx.send(message);
        });
    }

    fn emit(&self, event: BatchEvent) {
        let _ = self.event_tx.send(event);
    }
}

async fn recheck(path: &std::path::Path, policy: &UploadPolicy) -> std::result::Result<(), RejectReason> {
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|err| RejectReason::Unreadable(err.to_string()))?;

    if metadata.file_type().is_symlink() {
        return Err(RejectReason::Symlink);
    }
    if !metadata.is_file() {
        return Err(RejectReason::NotAFile);
    }

    policy.check(path, metadata.len())
}
