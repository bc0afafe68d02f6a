use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use super::job::UploadJob;
use super::stats::StatsAggregator;
use super::types::JobStatus;

/// 批次计数器
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunCounters {
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// 一次批量上传，独占所有任务
///
/// 扫描完成时创建；执行期间只由调度循环修改；所有任务结束或取消后不再变化。
#[derive(Debug, Clone)]
pub struct BatchRun {
    root: PathBuf,
    jobs: Vec<UploadJob>,
    counters: RunCounters,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    cancelled: bool,
}

impl BatchRun {
    pub fn new(root: impl Into<PathBuf>, jobs: Vec<UploadJob>) -> Self {
        let counters = RunCounters {
            total: jobs.len(),
            ..Default::default()
        };

        Self {
            root: root.into(),
            jobs,
            counters,
            started_at: None,
            finished_at: None,
            cancelled: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn jobs(&self) -> &[UploadJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// 结束（全部终态或已取消）之后不可再执行
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }

    pub fn count_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|job| job.status == status).count()
    }

    pub(crate) fn job(&self, index: usize) -> Option<&UploadJob> {
        self.jobs.get(index)
    }

    pub(crate) fn job_mut(&mut self, index: usize) -> Option<&mut UploadJob> {
        self.jobs.get_mut(index)
    }

    /// 任务到达终态后交给聚合器计数
    pub(crate) fn record_terminal(&mut self, stats: &mut StatsAggregator, index: usize) -> bool {
        match self.jobs.get(index) {
            Some(job) => stats.on_job_terminal(&mut self.counters, job),
            None => false,
        }
    }

    pub(crate) fn mark_started(&mut self) {
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_finished(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_counts_total() {
        let jobs = vec![
            UploadJob::new(PathBuf::from("a.mp4"), 1),
            UploadJob::new(PathBuf::from("b.mp4"), 2),
        ];
        let run = BatchRun::new("/videos", jobs);

        assert_eq!(run.counters().total, 2);
        assert_eq!(run.counters().finished(), 0);
        assert_eq!(run.count_status(JobStatus::Pending), 2);
        assert!(!run.is_finished());
        assert_eq!(run.duration_ms(), 0);
    }

    #[test]
    fn test_finish_sets_flags() {
        let mut run = BatchRun::new("/videos", Vec::new());
        run.mark_started();
        run.mark_finished(true);

        assert!(run.is_finished());
        assert!(run.was_cancelled());
        assert!(run.finished_at() >= run.started_at());
    }
}
