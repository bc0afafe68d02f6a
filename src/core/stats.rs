use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use serde::Serialize;
use tracing::warn;
use crate::utils::{format_bytes, format_duration};
use super::job::UploadJob;
use super::run::{BatchRun, RunCounters};
use super::types::{JobId, JobStatus};

/// 终态计数聚合器
///
/// 只有调度循环持有它（单写者），worker 通过 channel 把完成消息送过来。
/// 同一个任务只会被计数一次。
#[derive(Debug, Default)]
pub struct StatsAggregator {
    counted: HashSet<JobId>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回 false 表示没有计数（非终态或重复）
    pub fn on_job_terminal(&mut self, counters: &mut RunCounters, job: &UploadJob) -> bool {
        let slot = match job.status {
            JobStatus::Succeeded => &mut counters.succeeded,
            JobStatus::Failed => &mut counters.failed,
            JobStatus::Skipped => &mut counters.skipped,
            status => {
                warn!(job = %job.display_name, %status, "ignoring completion for non-terminal job");
                return false;
            }
        };

        if !self.counted.insert(job.id) {
            warn!(job = %job.display_name, "job already counted");
            return false;
        }

        *slot += 1;
        true
    }

    pub fn counted(&self) -> usize {
        self.counted.len()
    }
}

/// 单个任务的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

/// 批次汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub cancelled: bool,
    pub per_job: Vec<JobOutcome>,
}

impl BatchSummary {
    pub fn is_full_success(&self) -> bool {
        !self.cancelled && self.succeeded == self.total
    }

    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.succeeded + self.failed + self.skipped)
    }
}

/// 生成汇总，任务按扫描顺序输出
pub fn report(run: &BatchRun) -> BatchSummary {
    let counters = run.counters();
    let per_job = run.jobs()
        .iter()
        .map(|job| JobOutcome {
            name: job.display_name.clone(),
            path: job.source_path.clone(),
            size: job.size,
            status: job.status,
            attempts: job.attempt_count,
            error: job.last_error.clone(),
        })
        .collect();

    BatchSummary {
        total: counters.total,
        succeeded: counters.succeeded,
        failed: counters.failed,
        skipped: counters.skipped,
        duration_ms: run.duration_ms(),
        cancelled: run.was_cancelled(),
        per_job,
    }
}

const RULE: &str = "==================================================";

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for job in &self.per_job {
            let icon = match job.status {
                JobStatus::Succeeded => "✓",
                JobStatus::Pending => "·",
                _ => "✗",
            };
            let plural = if job.attempts == 1 { "" } else { "s" };
            writeln!(
                f,
                "  {} {} ({}) - {}, {} attempt{}",
                icon,
                job.name,
                format_bytes(job.size),
                job.status,
                job.attempts,
                plural
            )?;
            // 成功的任务可能带着之前重试的错误，不显示
            if job.status != JobStatus::Succeeded {
                if let Some(error) = &job.error {
                    writeln!(f, "      error: {}", error)?;
                }
            }
        }

        writeln!(f, "{}", RULE)?;
        writeln!(f, "Total:     {}", self.total)?;
        writeln!(f, "Succeeded: {}", self.succeeded)?;
        writeln!(f, "Failed:    {}", self.failed)?;
        writeln!(f, "Skipped:   {}", self.skipped)?;
        if self.cancelled {
            writeln!(f, "Cancelled: {} not started", self.pending())?;
        }
        writeln!(f, "Duration:  {}", format_duration(Duration::from_millis(self.duration_ms)))?;
        write!(f, "{}", RULE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished_job(name: &str, status: JobStatus) -> UploadJob {
        let mut job = UploadJob::new(PathBuf::from(name), 10);
        match status {
            JobStatus::Succeeded => {
                job.start_attempt().unwrap();
                job.mark_succeeded().unwrap();
            }
            JobStatus::Failed => {
                job.start_attempt().unwrap();
                job.mark_failed("broken pipe").unwrap();
            }
            JobStatus::Skipped => job.mark_skipped("file vanished").unwrap(),
            _ => {}
        }
        job
    }

    #[test]
    fn test_each_job_counted_once() {
        let mut stats = StatsAggregator::new();
        let mut counters = RunCounters { total: 2, ..Default::default() };
        let ok = finished_job("a.mp4", JobStatus::Succeeded);

        assert!(stats.on_job_terminal(&mut counters, &ok));
        assert!(!stats.on_job_terminal(&mut counters, &ok));
        assert_eq!(counters.succeeded, 1);
        assert_eq!(stats.counted(), 1);
    }

    #[test]
    fn test_pending_job_not_counted() {
        let mut stats = StatsAggregator::new();
        let mut counters = RunCounters::default();
        let pending = finished_job("a.mp4", JobStatus::Pending);

        assert!(!stats.on_job_terminal(&mut counters, &pending));
        assert_eq!(counters.finished(), 0);
    }

    #[test]
    fn test_report_is_deterministic() {
        let jobs = vec![
            finished_job("a.mp4", JobStatus::Succeeded),
            finished_job("b.mp4", JobStatus::Failed),
            finished_job("c.mp4", JobStatus::Skipped),
        ];
        let mut run = BatchRun::new("/videos", jobs);
        let mut stats = StatsAggregator::new();
        run.mark_started();
        for index in 0..run.len() {
            run.record_terminal(&mut stats, index);
        }
        run.mark_finished(false);

        let summary = report(&run);
        assert_eq!(summary, report(&run));
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.per_job[1].error.as_deref(), Some("broken pipe"));
        assert!(!summary.is_full_success());

        let text = summary.to_string();
        assert!(text.contains("✓ a.mp4"));
        assert!(text.contains("error: broken pipe"));
        assert!(text.contains("Skipped:   1"));
    }
}
