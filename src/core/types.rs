use std::fmt;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::errors::ConfigError;

/// 上传任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 任务状态
///
/// `Pending -> InProgress -> {Succeeded | Failed | Skipped}`，重试时
/// `InProgress -> Pending`。`Skipped` 只会在派发前出现。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum JobStatus {
    /// 等待中（在队列中）
    Pending,
    /// 上传中
    InProgress,
    /// 已完成
    Succeeded,
    /// 失败
    Failed,
    /// 跳过（不满足策略）
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "uploading",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// 版权类型，序列化时保持小写
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyrightMode {
    /// 自制
    Original,
    /// 转载
    #[default]
    Repost,
}

/// 文件不满足策略的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Extension,
    TooSmall { size: u64, min: u64 },
    TooLarge { size: u64, max: u64 },
    Symlink,
    NotAFile,
    Unreadable(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Extension => f.write_str("extension not allowed"),
            RejectReason::TooSmall { size, min } => write!(f, "too small ({} < {} bytes)", size, min),
            RejectReason::TooLarge { size, max } => write!(f, "too large ({} > {} bytes)", size, max),
            RejectReason::Symlink => f.write_str("symlinks are not followed"),
            RejectReason::NotAFile => f.write_str("not a regular file"),
            RejectReason::Unreadable(err) => write!(f, "unreadable: {}", err),
        }
    }
}

/// 一次批量上传使用的策略快照，运行期间不可变
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    pub copyright: CopyrightMode,
    pub category_id: u32,
    pub tags: Vec<String>,
    pub description: String,
    pub dynamic_text: String,
    pub upload_line: String,
    /// 最大并发数
    pub concurrency: usize,
    /// 单个文件上传时的分片并发
    pub upload_parallelism: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
    /// 小写，不带前导点
    pub allowed_extensions: Vec<String>,
    pub min_size: u64,
    pub max_size: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            copyright: CopyrightMode::Repost,
            category_id: 171,
            tags: vec!["conveyor".to_string(), "batch-upload".to_string()],
            description: String::new(),
            dynamic_text: String::new(),
            upload_line: "AUTO".to_string(),
            concurrency: 1,
            upload_parallelism: 3,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(30 * 60),
            allowed_extensions: ["mp4", "avi", "mkv", "mov", "flv", "wmv", "webm"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            min_size: 1024 * 1024, // 1MB
            max_size: 8 * 1024 * 1024 * 1024, // 8GB
        }
    }
}

impl UploadPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("worker concurrency must be at least 1".to_string()));
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::Invalid("attempt timeout must be greater than zero".to_string()));
        }
        if self.upload_parallelism == 0 {
            return Err(ConfigError::Invalid("upload parallelism must be at least 1".to_string()));
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::Invalid(format!(
                "min file size {} is larger than max file size {}",
                self.min_size, self.max_size
            )));
        }
        if self.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid("no allowed extensions configured".to_string()));
        }

        Ok(())
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn allows_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(normalize_extension)
            .is_some_and(|ext| self.allowed_extensions.iter().any(|allowed| *allowed == ext))
    }

    /// 检查扩展名和大小，文件类型由调用方负责
    pub fn check(&self, path: &Path, size: u64) -> Result<(), RejectReason> {
        if !self.allows_extension(path) {
            return Err(RejectReason::Extension);
        }
        if size < self.min_size {
            return Err(RejectReason::TooSmall { size, min: self.min_size });
        }
        if size > self.max_size {
            return Err(RejectReason::TooLarge { size, max: self.max_size });
        }

        Ok(())
    }
}

/// `.MP4` / `mp4` / ` .mp4 ` 统一成 `mp4`
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// 批次事件
#[derive(Debug, Clone)]
pub enum BatchEvent {
    JobStarted {
        job_id: JobId,
        name: String,
        attempt: u32,
    },

    JobRetrying {
        job_id: JobId,
        name: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },

    JobFinished {
        job_id: JobId,
        name: String,
        status: JobStatus,
        error: Option<String>,
    },

    RunFinished {
        succeeded: usize,
        failed: usize,
        skipped: usize,
        cancelled: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_extension_is_case_insensitive() {
        let policy = UploadPolicy::default();
        assert!(policy.allows_extension(&PathBuf::from("a/clip.MP4")));
        assert!(policy.allows_extension(&PathBuf::from("clip.mkv")));
        assert!(!policy.allows_extension(&PathBuf::from("notes.txt")));
        assert!(!policy.allows_extension(&PathBuf::from("no_extension")));
    }

    #[test]
    fn test_size_bounds_are_inclusive() {
        let policy = UploadPolicy {
            min_size: 10,
            max_size: 20,
            ..Default::default()
        };
        let path = PathBuf::from("clip.mp4");
        assert_eq!(policy.check(&path, 10), Ok(()));
        assert_eq!(policy.check(&path, 20), Ok(()));
        assert_eq!(policy.check(&path, 9), Err(RejectReason::TooSmall { size: 9, min: 10 }));
        assert_eq!(policy.check(&path, 21), Err(RejectReason::TooLarge { size: 21, max: 20 }));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let policy = UploadPolicy::default().with_concurrency(0);
        assert!(matches!(policy.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let policy = UploadPolicy {
            attempt_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(policy.validate(), Err(ConfigError::Invalid(_))));
        assert!(UploadPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let policy = UploadPolicy {
            min_size: 100,
            max_size: 10,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(".MKV"), "mkv");
        assert_eq!(normalize_extension(" webm "), "webm");
    }
}
