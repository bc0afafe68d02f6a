use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use crate::config::Credentials;
use super::errors::UploadError;
use super::job::UploadJob;
use super::traits::{Session, SubmitMetadata, UploadClient};
use super::types::UploadPolicy;

/// 所有 worker 共用一个会话，失效时重新登录
pub(crate) struct SessionCache {
    client: Arc<dyn UploadClient>,
    credentials: Credentials,
    session: Mutex<Option<Session>>,
}

impl SessionCache {
    pub(crate) fn new(client: Arc<dyn UploadClient>, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            session: Mutex::new(None),
        }
    }

    /// 登录期间持有锁，避免多个 worker 同时登录
    pub(crate) async fn get(&self) -> Result<Session, UploadError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref().filter(|session| session.is_live()) {
            return Ok(session.clone());
        }

        debug!("no live session, authenticating");
        let session = self.client.authenticate(&self.credentials).await?;
        info!("authenticated");
        *guard = Some(session.clone());
        Ok(session)
    }

    pub(crate) async fn invalidate(&self) {
        self.session.lock().await.take();
    }
}

pub(crate) fn submit_metadata(job: &UploadJob, policy: &UploadPolicy) -> SubmitMetadata {
    SubmitMetadata {
        title: job.title(),
        description: policy.description.clone(),
        dynamic_text: policy.dynamic_text.clone(),
        copyright: policy.copyright,
        category_id: policy.category_id,
        tags: policy.tags.clone(),
    }
}

/// 执行单次上传尝试：登录（如需要）、上传文件、提交稿件
pub(crate) struct UploadWorker {
    pub(crate) client: Arc<dyn UploadClient>,
    pub(crate) sessions: Arc<SessionCache>,
    pub(crate) policy: Arc<UploadPolicy>,
}

impl UploadWorker {
    pub(crate) async fn run(&self, path: &Path, metadata: &SubmitMetadata) -> Result<(), UploadError> {
        let timeout = self.policy.attempt_timeout;

        match tokio::time::timeout(timeout, self.attempt(path, metadata)).await {
            Ok(result) => result,
            Err(_) => Err(UploadError::Timeout(timeout)),
        }
    }

    async fn attempt(&self, path: &Path, metadata: &SubmitMetadata) -> Result<(), UploadError> {
        let session = self.sessions.get().await?;

        let result = self.upload_and_submit(&session, path, metadata).await;
        if let Err(UploadError::Auth(_)) = &result {
            // 会话过期，下次尝试重新登录
            self.sessions.invalidate().await;
        }

        result
    }

    async fn upload_and_submit(
        &self,
        session: &Session,
        path: &Path,
        metadata: &SubmitMetadata,
    ) -> Result<(), UploadError> {
        let part = self.client
            .upload_file(session, path, &self.policy.upload_line, self.policy.upload_parallelism)
            .await?;
        debug!(file = %path.display(), filename = %part.filename, "file uploaded, submitting");

        let result = self.client.submit(session, metadata, &[part]).await?;
        if !result.ok {
            return Err(UploadError::Rejected(result.message));
        }

        Ok(())
    }
}
