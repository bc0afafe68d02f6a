use std::path::PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::errors::TransitionError;
use super::types::{JobId, JobStatus};

/// 标题长度上限（字符）
pub const MAX_TITLE_CHARS: usize = 80;

/// 单个文件的上传任务
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadJob {
    pub id: JobId,
    pub source_path: PathBuf,
    pub display_name: String,
    pub size: u64,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadJob {
    pub fn new(source_path: PathBuf, size: u64) -> Self {
        let display_name = source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_path.to_string_lossy().into_owned());

        Self {
            id: JobId::new(),
            source_path,
            display_name,
            size,
            status: JobStatus::Pending,
            attempt_count: 0,
            last_error: None,
            completed_at: None,
        }
    }

    /// 提交时使用的标题：去掉扩展名，截断到 80 个字符
    pub fn title(&self) -> String {
        let stem = self.source_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.display_name.clone());

        stem.chars().take(MAX_TITLE_CHARS).collect()
    }

    /// `Pending -> InProgress`，返回本次是第几次尝试
    pub fn start_attempt(&mut self) -> Result<u32, TransitionError> {
        self.transition(JobStatus::InProgress)?;
        self.attempt_count += 1;
        Ok(self.attempt_count)
    }

    pub fn mark_succeeded(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Succeeded)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// 失败但还会重试：回到 `Pending`
    pub fn requeue(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Pending)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.last_error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// 只允许在第一次派发之前跳过
    pub fn mark_skipped(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        if self.attempt_count > 0 {
            return Err(TransitionError { from: self.status, to: JobStatus::Skipped });
        }
        self.transition(JobStatus::Skipped)?;
        self.last_error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::Pending, JobStatus::Skipped)
                | (JobStatus::InProgress, JobStatus::Pending)
                | (JobStatus::InProgress, JobStatus::Succeeded)
                | (JobStatus::InProgress, JobStatus::Failed)
        );

        if !allowed {
            return Err(TransitionError { from: self.status, to });
        }

        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> UploadJob {
        UploadJob::new(PathBuf::from("/videos/day one.mp4"), 2048)
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.display_name, "day one.mp4");
        assert_eq!(job.attempt_count, 0);
        assert!(job.last_error.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_retry_cycle_then_success() {
        let mut job = job();
        assert_eq!(job.start_attempt(), Ok(1));
        job.requeue("boom").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.start_attempt(), Ok(2));
        job.mark_succeeded().unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempt_count, 2);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        let mut job = job();
        job.start_attempt().unwrap();
        job.mark_failed("nope").unwrap();

        assert!(job.start_attempt().is_err());
        assert!(job.mark_succeeded().is_err());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 1);
    }

    #[test]
    fn test_cannot_succeed_without_starting() {
        let mut job = job();
        let err = job.mark_succeeded().unwrap_err();
        assert_eq!(err.from, JobStatus::Pending);
        assert_eq!(err.to, JobStatus::Succeeded);
    }

    #[test]
    fn test_skip_only_before_first_dispatch() {
        let mut fresh = job();
        fresh.mark_skipped("gone").unwrap();
        assert_eq!(fresh.status, JobStatus::Skipped);
        assert_eq!(fresh.last_error.as_deref(), Some("gone"));

        let mut retried = job();
        retried.start_attempt().unwrap();
        retried.requeue("flaky").unwrap();
        assert!(retried.mark_skipped("gone").is_err());
        assert_eq!(retried.status, JobStatus::Pending);
    }

    #[test]
    fn test_title_drops_extension_and_truncates() {
        let long_name = format!("{}.mkv", "x".repeat(120));
        let job = UploadJob::new(PathBuf::from(long_name), 1);
        assert_eq!(job.title().chars().count(), MAX_TITLE_CHARS);
        assert!(!job.title().contains(".mkv"));
    }
}
