//! The opaque HTTP collaborator: one `HEAD` to discover size and range
//! support, one ranged `GET` per attempt. This is the seam the teacher
//! exposes as `CondowClient` — implemented once per backend, generic over
//! everything downstream of it.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use url::Url;

use crate::errors::{DownloadError, Result};

/// What a `HEAD` request reveals about the remote resource.
#[derive(Debug, Clone, Copy)]
pub struct ResourceInfo {
    pub total_size: u64,
    pub accepts_byte_ranges: bool,
}

/// A streamed HTTP response body. Each item is one read of the underlying
/// connection; the downloader never buffers the whole body.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// The opaque HTTP client the downloader talks to. Implement this to target
/// something other than [`ReqwestTransport`] — a mock for tests, or a client
/// with its own connection pooling/auth.
pub trait HttpTransport: Send + Sync {
    /// Issues a `HEAD` request and reports `Content-Length` and whether
    /// `Accept-Ranges` contains `bytes`. Fails with
    /// [`DownloadError::HeaderUnavailable`] on a non-success status or a
    /// missing/unparseable `Content-Length`.
    fn head(&self, url: &Url) -> BoxFuture<'_, Result<ResourceInfo>>;

    /// Issues a `GET`, with `Range: bytes={from}-{to}` when `use_range` is
    /// `true`, and returns the body as a stream of chunks. A response status
    /// other than 200 (only valid when `!use_range`) or 206 fails the
    /// attempt with [`DownloadError::TransferFailed`].
    fn get_range(&self, url: &Url, from: u64, to: u64, use_range: bool) -> BoxFuture<'_, Result<ByteStream>>;
}

/// Default [`HttpTransport`] backed by [`reqwest`], with explicit
/// connect/request timeouts rather than an unbounded client — the teacher's
/// habit of never handing a network collaborator an open-ended deadline.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: std::time::Duration, request_timeout: Option<std::time::Duration>) -> Self {
        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if let Some(request_timeout) = request_timeout {
            builder = builder.timeout(request_timeout);
        }
        let client = builder
            .build()
            .expect("reqwest client configuration is always valid here");
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn head(&self, url: &Url) -> BoxFuture<'_, Result<ResourceInfo>> {
        let url = url.clone();
        Box::pin(async move {
            let response = self
                .client
                .head(url)
                .send()
                .await
                .map_err(|e| DownloadError::HeaderUnavailable(e.to_string()))?;

            if !response.status().is_success() {
                return Err(DownloadError::HeaderUnavailable(format!(
                    "HEAD returned status {}",
                    response.status()
                )));
            }

            let total_size = response
                .content_length()
                .ok_or_else(|| DownloadError::HeaderUnavailable("missing Content-Length".into()))?;

            let accepts_byte_ranges = response
                .headers()
                .get(reqwest::header::ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.contains("bytes"))
                .unwrap_or(false);

            Ok(ResourceInfo {
                total_size,
                accepts_byte_ranges,
            })
        })
    }

    fn get_range(
        &self,
        url: &Url,
        from: u64,
        to: u64,
        use_range: bool,
    ) -> BoxFuture<'_, Result<ByteStream>> {
        let url = url.clone();
        Box::pin(async move {
            let mut request = self.client.get(url);
            if use_range {
                request = request.header(reqwest::header::RANGE, format!("bytes={from}-{to}"));
            }

            let response = request.send().await?;
            let status = response.status();
            let acceptable = if use_range {
                status.as_u16() == 206
            } else {
                status.as_u16() == 200
            };
            if !acceptable {
                return Err(DownloadError::transfer(format!(
                    "GET returned unexpected status {status}"
                )));
            }

            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(DownloadError::from));
            Ok(Box::pin(stream) as ByteStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reqwest_transport_builds_with_an_unbounded_request_timeout() {
        let _transport = ReqwestTransport::new(std::time::Duration::from_secs(5), None);
    }
}
