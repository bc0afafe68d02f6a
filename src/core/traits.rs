use async_trait::async_trait;
use std::path::Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::config::Credentials;
use super::errors::UploadError;
use super::types::CopyrightMode;

/// 已登录的会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > Utc::now())
    }
}

/// 上传完成的分P
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    pub filename: String,
    pub title: String,
    pub size: u64,
}

/// 提交稿件的元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitMetadata {
    pub title: String,
    pub description: String,
    pub dynamic_text: String,
    pub copyright: CopyrightMode,
    pub category_id: u32,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub ok: bool,
    #[serde(default)]
    pub message: String,
}

/// 发布服务客户端
///
/// 登录握手和传输协议都由实现方负责，调度器只依赖这三个操作。
#[async_trait]
pub trait UploadClient: Send + Sync {
    /// 登录，凭据缺失或无效时返回 `UploadError::Auth`
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, UploadError>;

    /// 上传单个文件
    async fn upload_file(
        &self,
        session: &Session,
        path: &Path,
        line: &str,
        parallelism: usize,
    ) -> Result<UploadedPart, UploadError>;

    /// 提交稿件
    async fn submit(
        &self,
        session: &Session,
        metadata: &SubmitMetadata,
        parts: &[UploadedPart],
    ) -> Result<SubmitResult, UploadError>;
}
