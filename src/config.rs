//! Construction-time configuration: a builder validated once at
//! `Downloader::new`, in the teacher's `Config::default().foo(..).validated()`
//! tradition.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use url::Url;

use crate::events::EventSink;
use crate::range::DownloadRange;
use crate::sink::{OpenSinkFn, Sink};
use crate::transport::HttpTransport;

const MIN_PART_SIZE: u64 = 10_000;

/// Minimum part size accepted at construction (§3): below this, per-range
/// HTTP overhead dominates actual transfer.
pub fn min_part_size() -> u64 {
    MIN_PART_SIZE
}

/// Construction-time configuration for a [`crate::controller::Downloader`].
///
/// Built with the chained setter methods below, then consumed by
/// [`DownloaderConfig::validated`], mirroring the teacher's
/// `Config::default().part_size_bytes(..).max_concurrency(..).validated()`.
pub struct DownloaderConfig {
    pub(crate) uri: Url,
    pub(crate) sink: Option<Box<dyn Sink>>,
    pub(crate) open_sink: Option<Arc<OpenSinkFn>>,
    pub(crate) part_size: u64,
    pub(crate) max_part_count: usize,
    pub(crate) max_retry_count: u32,
    pub(crate) write_buffer_size: usize,
    pub(crate) allow_resuming: bool,
    pub(crate) auto_dispose_sink: bool,
    pub(crate) downloaded_ranges: Option<Vec<DownloadRange>>,
    pub(crate) is_stopped: bool,
    pub(crate) connect_timeout: Duration,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) retry_backoff: Duration,
    pub(crate) events: Option<Arc<dyn EventSink>>,
    pub(crate) on_before_finish: Option<Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>>,
    pub(crate) transport: Option<Box<dyn HttpTransport>>,
}

impl DownloaderConfig {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            sink: None,
            open_sink: None,
            part_size: 4 * 1024 * 1024,
            max_part_count: 4,
            max_retry_count: 2,
            write_buffer_size: 64 * 1024,
            allow_resuming: true,
            auto_dispose_sink: false,
            downloaded_ranges: None,
            is_stopped: false,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            retry_backoff: Duration::ZERO,
            events: None,
            on_before_finish: None,
            transport: None,
        }
    }

    /// Overrides the HTTP collaborator instead of the default
    /// `reqwest`-backed [`crate::transport::ReqwestTransport`]. Mainly
    /// useful for tests.
    pub fn transport(mut self, transport: Box<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn open_sink<F>(mut self, open_sink: F) -> Self
    where
        F: Fn() -> Option<Box<dyn Sink>> + Send + Sync + 'static,
    {
        self.open_sink = Some(Arc::new(open_sink));
        self
    }

    pub fn part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn max_part_count(mut self, max_part_count: usize) -> Self {
        self.max_part_count = max_part_count;
        self
    }

    pub fn max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    pub fn write_buffer_size(mut self, write_buffer_size: usize) -> Self {
        self.write_buffer_size = write_buffer_size;
        self
    }

    pub fn allow_resuming(mut self, allow_resuming: bool) -> Self {
        self.allow_resuming = allow_resuming;
        self
    }

    pub fn auto_dispose_sink(mut self, auto_dispose_sink: bool) -> Self {
        self.auto_dispose_sink = auto_dispose_sink;
        self
    }

    pub fn downloaded_ranges(mut self, ranges: Vec<DownloadRange>) -> Self {
        self.downloaded_ranges = Some(ranges);
        self
    }

    pub fn is_stopped(mut self, is_stopped: bool) -> Self {
        self.is_stopped = is_stopped;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    pub fn retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn on_before_finish<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.on_before_finish = Some(Arc::new(hook));
        self
    }

    /// Validates construction-time invariants, consuming `self`. Matches the
    /// teacher's `Config::validated` boundary: failures are an opaque
    /// `anyhow::Error` here, converted to `DownloadError::InvalidConfig` at
    /// the point the downloader is actually constructed.
    pub fn validated(self) -> Result<Self> {
        if self.part_size < MIN_PART_SIZE {
            return Err(anyhow!(
                "part_size must be at least {MIN_PART_SIZE} bytes, got {}",
                self.part_size
            ));
        }
        if self.max_part_count == 0 {
            return Err(anyhow!("max_part_count must be at least 1"));
        }
        if self.write_buffer_size == 0 {
            return Err(anyhow!("write_buffer_size must be greater than 0"));
        }
        Ok(self)
    }
}
