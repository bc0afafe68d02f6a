//! 通用 HTTP 上传客户端
//!
//! `POST {endpoint}/session` 登录，`PUT {endpoint}/parts/{name}` 流式上传文件，
//! `POST {endpoint}/submit` 提交稿件。

use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use pin_project_lite::pin_project;
use reqwest::{Body, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;
use crate::config::Credentials;
use crate::core::{Session, SubmitMetadata, SubmitResult, UploadClient, UploadError, UploadedPart};

pin_project! {
    /// 统计实际发送的字节数
    pub struct CountingStream<S> {
        #[pin]
        inner: S,
        sent: Arc<AtomicU64>,
    }
}

impl<S> CountingStream<S> {
    pub fn new(inner: S, sent: Arc<AtomicU64>) -> Self {
        Self { inner, sent }
    }
}

impl<S> Stream for CountingStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    cookies: &'a BTreeMap<String, String>,
    access_token: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct PartResponse {
    filename: String,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    #[serde(flatten)]
    metadata: &'a SubmitMetadata,
    parts: &'a [UploadedPart],
}

#[derive(Debug, Clone)]
pub struct HttpUploadClient {
    client: Client,
    endpoint: Url,
}

impl HttpUploadClient {
    pub fn new(endpoint: &str) -> Result<Self, UploadError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| UploadError::validation(format!("invalid endpoint {}: {}", endpoint, err)))?;
        if endpoint.cannot_be_a_base() {
            return Err(UploadError::validation(format!("invalid endpoint {}", endpoint)));
        }

        let client = Client::builder()
            .tcp_nodelay(true)
            .build()?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, segments: &[&str]) -> Result<Url, UploadError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| UploadError::validation("endpoint cannot be a base"))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }
}

/// 401/403 是登录问题，其余 4xx 是内容被拒绝，5xx 可重试
pub fn classify_status(status: StatusCode, message: impl Into<String>) -> UploadError {
    let message = format!("status code {}, message: {}", status.as_u16(), message.into());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UploadError::Auth(message),
        status if status.is_client_error() => UploadError::Validation(message),
        _ => UploadError::Transport(message),
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, body))
}

#[async_trait]
impl UploadClient for HttpUploadClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, UploadError> {
        if !credentials.is_configured() {
            return Err(UploadError::auth("no credentials configured"));
        }

        let request = AuthRequest {
            cookies: &credentials.cookies,
            access_token: &credentials.access_token,
        };
        let response = self.client
            .post(self.url(&["session"])?)
            .json(&request)
            .send()
            .await?;
        let response: AuthResponse = check(response).await?.json().await?;

        Ok(Session {
            token: response.token,
            expires_at: response.expires_at,
        })
    }

    async fn upload_file(
        &self,
        session: &Session,
        path: &Path,
        line: &str,
        parallelism: usize,
    ) -> Result<UploadedPart, UploadError> {
        let filename = path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::validation(format!("no file name in {}", path.display())))?;
        let title = path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.clone());

        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let sent = Arc::new(AtomicU64::new(0));
        let stream = CountingStream::new(ReaderStream::new(file), sent.clone());

        let mut url = self.url(&["parts", filename.as_str()])?;
        url.query_pairs_mut()
            .append_pair("line", line)
            .append_pair("parallelism", &parallelism.to_string());

        debug!(file = %path.display(), %url, size, "streaming file");
        let response = self.client
            .put(url)
            .bearer_auth(&session.token)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(Body::wrap_stream(stream))
            .send()
            .await?;
        let response: PartResponse = check(response).await?.json().await?;

        let actual = sent.load(Ordering::Relaxed);
        if actual != size {
            return Err(UploadError::transport(format!(
                "upload incomplete, expected: {}, actual: {}",
                size, actual
            )));
        }

        Ok(UploadedPart {
            filename: response.filename,
            title,
            size,
        })
    }

    async fn submit(
        &self,
        session: &Session,
        metadata: &SubmitMetadata,
        parts: &[UploadedPart],
    ) -> Result<SubmitResult, UploadError> {
        let response = self.client
            .post(self.url(&["submit"])?)
            .bearer_auth(&session.token)
            .json(&SubmitRequest { metadata, parts })
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_url_joins_segments() {
        let client = HttpUploadClient::new("http://localhost:8080/api/").unwrap();
        let url = client.url(&["parts", "my clip.mp4"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/parts/my%20clip.mp4");

        let client = HttpUploadClient::new("http://localhost:8080/api").unwrap();
        assert_eq!(client.url(&["session"]).unwrap().as_str(), "http://localhost:8080/api/session");
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(HttpUploadClient::new("not a url"), Err(UploadError::Validation(_))));
        assert!(HttpUploadClient::new("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, ""), UploadError::Auth(_)));
        assert!(matches!(classify_status(StatusCode::UNPROCESSABLE_ENTITY, "codec"), UploadError::Validation(_)));
        assert!(matches!(classify_status(StatusCode::BAD_GATEWAY, ""), UploadError::Transport(_)));
    }

    #[tokio::test]
    async fn test_counting_stream() {
        let chunks = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let sent = Arc::new(AtomicU64::new(0));
        let stream = CountingStream::new(futures::stream::iter(chunks), sent.clone());

        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 2);
        assert_eq!(sent.load(Ordering::Relaxed), 11);
    }

    #[tokio::test]
    async fn test_authenticate_without_credentials() {
        let client = HttpUploadClient::new("http://127.0.0.1:9/api").unwrap();
        let result = client.authenticate(&Credentials::default()).await;
        assert!(matches!(result, Err(UploadError::Auth(_))));
    }
}
