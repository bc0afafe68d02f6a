use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use super::types::JobStatus;

/// 配置文件错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 扫描根目录错误，对整个批次是致命的
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Folder does not exist: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("Not a folder: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Folder is not accessible: {}: {source}", path.display())]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 单次上传尝试的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Submit rejected: {0}")]
    Rejected(String),

    #[error("Attempt timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Gave up after {attempts} attempts, last error: {last}")]
    ExhaustedRetries {
        attempts: u32,
        last: String,
    },
}

impl UploadError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(format!("IO error {}", err))
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// 状态机非法跳转
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// 批次级别的致命错误，出现时不会派发任何任务
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Auth error: {0}")]
    Auth(String),

    /// 登录前的网络或服务错误
    #[error("Preflight failed: {0}")]
    Preflight(UploadError),

    #[error("Batch run already finished")]
    AlreadyFinished,
}

pub type Result<T, E = BatchError> = std::result::Result<T, E>;
