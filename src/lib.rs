pub mod config;
pub mod core;
pub mod uploaders;
pub mod utils;

// 重新导出核心类型
pub use crate::core::{
    BatchError,
    BatchEvent,
    BatchRun,
    BatchSummary,
    JobId,
    JobStatus,
    Result,
    UploadClient,
    UploadCoordinator,
    UploadError,
    UploadJob,
    UploadPolicy,
    scan,
};

pub use crate::config::{Config, Credentials};

// 重新导出上传器
pub use crate::uploaders::HttpUploadClient;
