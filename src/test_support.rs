//! In-crate fakes for unit tests, in the teacher's `test_utils` tradition
//! (`FailingClientSimulatorBuilder`, `TestCondowClient`): a scriptable fake
//! transport that can truncate bodies, fail on demand, and record the ranges
//! it was asked for.

use std::sync::Mutex;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{stream, StreamExt};
use url::Url;

use crate::errors::{DownloadError, Result};
use crate::transport::{ByteStream, HttpTransport, ResourceInfo};

const CHUNK_SIZE: usize = 4096;

/// A fake [`HttpTransport`] backed by an in-memory byte buffer, scriptable
/// to simulate a non-range server, a truncated first attempt, or permanent
/// failure.
pub struct FakeTransport {
    body: Vec<u8>,
    accepts_byte_ranges: bool,
    truncate_first_attempt: Option<usize>,
    always_fail: bool,
    head_fails: bool,
    head_failures_remaining: Mutex<usize>,
    attempts: Mutex<usize>,
    requested: Mutex<Vec<(u64, u64)>>,
}

impl FakeTransport {
    pub fn serving(body: Vec<u8>) -> Self {
        Self {
            body,
            accepts_byte_ranges: true,
            truncate_first_attempt: None,
            always_fail: false,
            head_fails: false,
            head_failures_remaining: Mutex::new(0),
            attempts: Mutex::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_always() -> Self {
        let mut transport = Self::serving(Vec::new());
        transport.always_fail = true;
        transport
    }

    pub fn head_unavailable() -> Self {
        let mut transport = Self::serving(Vec::new());
        transport.head_fails = true;
        transport
    }

    /// Fails the first `n` `head()` calls, then serves normally — for
    /// exercising re-`Init()` after a recorded `Error`.
    pub fn fail_head_times(mut self, n: usize) -> Self {
        self.head_failures_remaining = Mutex::new(n);
        self
    }

    pub fn without_range_support(mut self) -> Self {
        self.accepts_byte_ranges = false;
        self
    }

    /// Truncates the body to `n` bytes on the very first `get_range` call
    /// only; later attempts serve the full remaining range.
    pub fn truncate_first_attempt(mut self, n: usize) -> Self {
        self.truncate_first_attempt = Some(n);
        self
    }

    /// The `(from, to)` pairs passed to `get_range`, in call order.
    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.requested.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl HttpTransport for FakeTransport {
    fn head(&self, _url: &Url) -> BoxFuture<'_, Result<ResourceInfo>> {
        Box::pin(async move {
            if self.head_fails {
                return Err(DownloadError::HeaderUnavailable("fake HEAD failure".into()));
            }
            {
                let mut remaining = self
                    .head_failures_remaining
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DownloadError::HeaderUnavailable("fake HEAD failure".into()));
                }
            }
            Ok(ResourceInfo {
                total_size: self.body.len() as u64,
                accepts_byte_ranges: self.accepts_byte_ranges,
            })
        })
    }

    fn get_range(
        &self,
        _url: &Url,
        from: u64,
        to: u64,
        _use_range: bool,
    ) -> BoxFuture<'_, Result<ByteStream>> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((from, to));

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
            let current = *attempts;
            *attempts += 1;
            current
        };

        let always_fail = self.always_fail;
        let mut slice = if self.body.is_empty() {
            Vec::new()
        } else {
            let end = (to as usize).min(self.body.len() - 1);
            self.body[from as usize..=end].to_vec()
        };

        if attempt == 0 {
            if let Some(n) = self.truncate_first_attempt {
                slice.truncate(n);
            }
        }

        Box::pin(async move {
            if always_fail {
                return Err(DownloadError::transfer("simulated transport failure"));
            }
            let chunks: Vec<Result<Bytes>> = slice
                .chunks(CHUNK_SIZE)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Ok(Box::pin(stream::iter(chunks)) as ByteStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_the_requested_slice() {
        let transport = FakeTransport::serving(b"0123456789".to_vec());
        let url = Url::parse("https://example.invalid/f").unwrap();
        let mut stream = transport.get_range(&url, 2, 5, true).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = futures::StreamExt::next(&mut stream).await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"2345");
    }

    #[tokio::test]
    async fn truncates_only_the_first_attempt() {
        let transport = FakeTransport::serving(b"0123456789".to_vec()).truncate_first_attempt(2);
        let url = Url::parse("https://example.invalid/f").unwrap();

        let mut first = transport.get_range(&url, 0, 9, true).await.unwrap();
        let mut first_bytes = Vec::new();
        while let Some(chunk) = futures::StreamExt::next(&mut first).await {
            first_bytes.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(first_bytes, b"01");

        let mut second = transport.get_range(&url, 2, 9, true).await.unwrap();
        let mut second_bytes = Vec::new();
        while let Some(chunk) = futures::StreamExt::next(&mut second).await {
            second_bytes.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(second_bytes, b"23456789");
    }
}
