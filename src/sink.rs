//! The shared-sink write discipline: positioned writes from concurrent
//! [`crate::fetcher::RangeFetcher`]s serialized into one seekable stream,
//! with the owning range's `current_offset` advanced in the same critical
//! section as the physical write commit.

use std::io::SeekFrom;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::errors::{DownloadError, Result};
use crate::events::EventSink;
use crate::range::DownloadRange;

/// The random-access writable byte stream the downloader materializes a
/// resource into. Callers supply an implementation (or an [`open_sink`]
/// callback); the engine itself never constructs storage.
///
/// [`open_sink`]: crate::config::DownloaderConfig::open_sink
pub trait Sink: Send {
    fn seek(&mut self, offset: u64) -> BoxFuture<'_, std::io::Result<()>>;
    fn write(&mut self, buf: &[u8]) -> BoxFuture<'_, std::io::Result<()>>;
    fn position(&self) -> u64;
    fn flush(&mut self) -> BoxFuture<'_, std::io::Result<()>>;
    /// Async teardown hook, called once when the sink is disposed. Default
    /// is a no-op; implementations backed by a remote handle can override it.
    fn dispose(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// An in-memory sink backed by a growable buffer. Used by tests and as a
/// reference implementation; real callers typically back [`Sink`] with a
/// file.
pub struct MemorySink {
    buf: Vec<u8>,
    pos: u64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for MemorySink {
    fn seek(&mut self, offset: u64) -> BoxFuture<'_, std::io::Result<()>> {
        self.pos = offset;
        Box::pin(async { Ok(()) })
    }

    fn write(&mut self, buf: &[u8]) -> BoxFuture<'_, std::io::Result<()>> {
        let end = self.pos as usize + buf.len();
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos as usize..end].copy_from_slice(buf);
        self.pos += buf.len() as u64;
        Box::pin(async { Ok(()) })
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn flush(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// A [`Sink`] backed by an owned [`tokio::fs::File`].
pub struct FileSink {
    file: tokio::fs::File,
    pos: u64,
}

impl FileSink {
    pub fn new(file: tokio::fs::File) -> Self {
        Self { file, pos: 0 }
    }
}

impl Sink for FileSink {
    fn seek(&mut self, offset: u64) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            self.file.seek(SeekFrom::Start(offset)).await?;
            self.pos = offset;
            Ok(())
        })
    }

    fn write(&mut self, buf: &[u8]) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            self.file.write_all(buf).await?;
            self.pos += buf.len() as u64;
            Ok(())
        })
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn flush(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move { self.file.flush().await })
    }
}

pub type OpenSinkFn = dyn Fn() -> Option<Box<dyn Sink>> + Send + Sync;

/// Wraps the shared sink behind one mutex so that a positioned write and the
/// advancement of the owning range's `current_offset` are observed together,
/// and so lazy opening (`get_or_open`) only ever happens once.
pub struct SinkWriter {
    inner: AsyncMutex<Option<Box<dyn Sink>>>,
    open_sink: Option<Arc<OpenSinkFn>>,
    auto_dispose: bool,
}

impl SinkWriter {
    pub fn new(
        sink: Option<Box<dyn Sink>>,
        open_sink: Option<Arc<OpenSinkFn>>,
        auto_dispose: bool,
    ) -> Self {
        Self {
            inner: AsyncMutex::new(sink),
            open_sink,
            auto_dispose,
        }
    }

    /// Lazily opens the sink via `open_sink()` if it hasn't been supplied or
    /// opened yet. Fails with [`DownloadError::SinkUnavailable`] if neither
    /// is available.
    async fn get_or_open<'a>(
        &self,
        guard: &mut tokio::sync::MutexGuard<'a, Option<Box<dyn Sink>>>,
    ) -> Result<()> {
        if guard.is_some() {
            return Ok(());
        }
        let opened = self.open_sink.as_ref().and_then(|f| f());
        match opened {
            Some(sink) => {
                **guard = Some(sink);
                Ok(())
            }
            None => Err(DownloadError::SinkUnavailable),
        }
    }

    /// Seeks to `offset`, writes all of `buf`, then — still under the same
    /// lock — advances `range.current_offset` and notifies `events`.
    ///
    /// This is the critical section that makes resume safe: the persisted
    /// offset can never outrun the bytes actually committed to the sink.
    pub async fn write_at(
        &self,
        offset: u64,
        buf: &[u8],
        range: &std::sync::Mutex<DownloadRange>,
        events: &dyn EventSink,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        self.get_or_open(&mut guard).await?;
        let sink = guard.as_mut().expect("sink populated by get_or_open");

        sink.seek(offset).await?;
        sink.write(buf).await?;
        let position = sink.position();

        {
            let mut range = range.lock().unwrap_or_else(|e| e.into_inner());
            range.current_offset = position - range.from;
        }

        events.on_data_received(buf.len() as u64);
        Ok(())
    }

    /// Flushes the sink if present. Idempotent on an absent sink.
    pub async fn flush(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if let Some(sink) = guard.as_mut() {
            sink.flush().await?;
        }
        Ok(())
    }

    /// Flushes, and — if `auto_dispose_sink` — disposes and clears the sink.
    /// Idempotent and safe to call again after [`finalize`](Self::finalize)
    /// or after the sink has already been taken.
    pub async fn finalize(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if let Some(sink) = guard.as_mut() {
            sink.flush().await?;
        }
        if self.auto_dispose {
            if let Some(mut sink) = guard.take() {
                sink.dispose().await?;
            }
        }
        Ok(())
    }
}
