use std::time::Duration;
use crate::core::{UploadError, UploadJob, UploadPolicy};

/// 退避策略
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// 固定延迟
    Fixed(Duration),
    /// 指数退避
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
    /// 线性退避
    Linear {
        initial: Duration,
        increment: Duration,
        max_delay: Duration,
    },
}

impl BackoffStrategy {
    /// 计算第 n 次重试的延迟（n 从 0 开始）
    pub fn get_delay(&self, retry: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powf(retry as f64);
                if !delay.is_finite() || delay >= max_delay.as_secs_f64() {
                    return *max_delay;
                }
                // 负数倍率会得到负延迟
                Duration::from_secs_f64(delay.max(0.0))
            }
            BackoffStrategy::Linear { initial, increment, max_delay } => {
                let delay = *initial + increment.saturating_mul(retry);
                std::cmp::min(delay, *max_delay)
            }
        }
    }
}

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// 失败后是否重试
///
/// 调用时 `job.attempt_count` 已经包含刚刚失败的这一次。
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, job: &UploadJob, error: &UploadError, policy: &UploadPolicy) -> RetryDecision;
}

fn exhausted(job: &UploadJob, policy: &UploadPolicy) -> bool {
    job.attempt_count > policy.max_retries
}

/// 默认策略：不区分错误，固定间隔重试 `max_retries` 次
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDelayRetry;

impl RetryPolicy for FixedDelayRetry {
    fn should_retry(&self, job: &UploadJob, _error: &UploadError, policy: &UploadPolicy) -> RetryDecision {
        if exhausted(job, policy) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(policy.retry_delay)
    }
}

/// 按退避策略计算延迟，次数仍由 `max_retries` 决定
#[derive(Debug, Clone)]
pub struct BackoffRetry {
    pub strategy: BackoffStrategy,
}

impl BackoffRetry {
    pub fn new(strategy: BackoffStrategy) -> Self {
        Self { strategy }
    }
}

impl RetryPolicy for BackoffRetry {
    fn should_retry(&self, job: &UploadJob, _error: &UploadError, policy: &UploadPolicy) -> RetryDecision {
        if exhausted(job, policy) {
            return RetryDecision::GiveUp;
        }
        let retry = job.attempt_count.saturating_sub(1);
        RetryDecision::Retry(self.strategy.get_delay(retry))
    }
}

type Classifier = Box<dyn Fn(&UploadError) -> ErrorClass + Send + Sync>;

/// 先分类再交给内部策略，`Fatal` 直接放弃
pub struct ClassifyingRetry<P> {
    inner: P,
    classifier: Classifier,
}

impl<P: RetryPolicy> ClassifyingRetry<P> {
    pub fn new<F>(inner: P, classifier: F) -> Self
    where
        F: Fn(&UploadError) -> ErrorClass + Send + Sync + 'static,
    {
        Self {
            inner,
            classifier: Box::new(classifier),
        }
    }

    /// 内容校验失败不再重试
    pub fn skip_validation_errors(inner: P) -> Self {
        Self::new(inner, classify_validation_as_fatal)
    }
}

impl<P: RetryPolicy> RetryPolicy for ClassifyingRetry<P> {
    fn should_retry(&self, job: &UploadJob, error: &UploadError, policy: &UploadPolicy) -> RetryDecision {
        match (self.classifier)(error) {
            ErrorClass::Fatal => RetryDecision::GiveUp,
            ErrorClass::Retryable => self.inner.should_retry(job, error, policy),
        }
    }
}

pub fn classify_validation_as_fatal(error: &UploadError) -> ErrorClass {
    match error {
        UploadError::Validation(_) => ErrorClass::Fatal,
        _ => ErrorClass::Retryable,
    }
}
