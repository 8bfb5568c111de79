//! Per-range transfer: one GET (possibly repeated by retry), streamed
//! straight into the shared sink.

use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use url::Url;

use crate::errors::{DownloadError, Result};
use crate::events::EventSink;
use crate::range::DownloadRange;
use crate::scheduler::KillSwitch;
use crate::sink::SinkWriter;
use crate::speed::SpeedMeter;
use crate::transport::HttpTransport;

/// Drives a single [`DownloadRange`] to completion, retrying on failure and
/// honoring cancellation between reads and during backoff.
pub struct RangeFetcher<'a> {
    pub url: &'a Url,
    pub transport: &'a dyn HttpTransport,
    pub sink: &'a SinkWriter,
    pub speed: &'a SpeedMeter,
    pub events: &'a dyn EventSink,
    pub kill_switch: &'a KillSwitch,
    pub is_resuming_supported: bool,
    pub max_retry_count: u32,
    pub write_buffer_size: usize,
    pub retry_backoff: Duration,
}

impl<'a> RangeFetcher<'a> {
    /// Runs attempts until the range completes, retry budget is exhausted,
    /// or cancellation is observed.
    pub async fn run(&self, range_index: usize, range: &Mutex<DownloadRange>) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            tracing::debug!(
                range_index,
                attempt,
                resuming = self.is_resuming_supported,
                "starting range attempt"
            );

            match self.attempt_once(range_index, range).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    if self.kill_switch.is_pushed() {
                        return Err(DownloadError::Cancelled);
                    }
                    if attempt >= self.max_retry_count {
                        tracing::error!(range_index, attempt, error = %err, "range attempt exhausted retries");
                        return Err(err);
                    }
                    tracing::warn!(range_index, attempt, error = %err, "range attempt failed, retrying");
                    attempt += 1;
                    if !self.retry_backoff.is_zero() && !self.wait_backoff().await {
                        return Err(DownloadError::Cancelled);
                    }
                }
            }
        }
    }

    /// Waits `retry_backoff`, returning `false` if cancellation fires first.
    async fn wait_backoff(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.retry_backoff) => true,
            _ = self.kill_switch.cancelled() => false,
        }
    }

    async fn attempt_once(&self, range_index: usize, range: &Mutex<DownloadRange>) -> Result<()> {
        let (from, to, current_offset) = {
            let range = range.lock().unwrap_or_else(|e| e.into_inner());
            (range.from, range.to, range.current_offset)
        };

        if !self.is_resuming_supported && (from != 0 || current_offset != 0) {
            return Err(DownloadError::ResumeUnsupportedMidStream);
        }

        let mut offset = from + current_offset;
        let stream = self
            .transport
            .get_range(self.url, offset, to, self.is_resuming_supported)
            .await?;
        tokio::pin!(stream);

        loop {
            if self.kill_switch.is_pushed() {
                return Err(DownloadError::Cancelled);
            }

            let chunk = match stream.next().await {
                None => break,
                Some(chunk) => chunk?,
            };

            for piece in chunk.chunks(self.write_buffer_size.max(1)) {
                if self.kill_switch.is_pushed() {
                    return Err(DownloadError::Cancelled);
                }
                self.sink.write_at(offset, piece, range, self.events).await?;
                self.speed.record(piece.len() as u64);
                tracing::trace!(range_index, offset, len = piece.len(), "chunk written");
                offset += piece.len() as u64;
            }
        }

        {
            let mut range = range.lock().unwrap_or_else(|e| e.into_inner());
            if range.current_offset != range.width() {
                return Err(DownloadError::transfer(
                    "stream ended before the full range was received",
                ));
            }
            range.is_done = true;
        }
        self.events.on_range_downloaded(range_index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventSink;
    use crate::sink::MemorySink;
    use crate::test_support::FakeTransport;

    fn fetcher<'a>(
        url: &'a Url,
        transport: &'a FakeTransport,
        sink: &'a SinkWriter,
        speed: &'a SpeedMeter,
        kill_switch: &'a KillSwitch,
    ) -> RangeFetcher<'a> {
        RangeFetcher {
            url,
            transport,
            sink,
            speed,
            events: &NoopEventSink,
            kill_switch,
            is_resuming_supported: true,
            max_retry_count: 1,
            write_buffer_size: 4,
            retry_backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn fetches_a_full_range_in_one_pass() {
        let url = Url::parse("https://example.invalid/f").unwrap();
        let transport = FakeTransport::serving(b"abcdefghij".to_vec());
        let sink = SinkWriter::new(Some(Box::new(MemorySink::new())), None, false);
        let speed = SpeedMeter::new();
        let kill_switch = KillSwitch::new();
        let range = Mutex::new(DownloadRange::new(0, 9));

        let f = fetcher(&url, &transport, &sink, &speed, &kill_switch);
        f.run(0, &range).await.unwrap();

        assert!(range.lock().unwrap().is_done);
    }

    #[tokio::test]
    async fn retries_after_a_truncated_body_and_resumes_from_current_offset() {
        let url = Url::parse("https://example.invalid/f").unwrap();
        let transport = FakeTransport::serving(b"abcdefghij".to_vec()).truncate_first_attempt(4);
        let sink = SinkWriter::new(Some(Box::new(MemorySink::new())), None, false);
        let speed = SpeedMeter::new();
        let kill_switch = KillSwitch::new();
        let range = Mutex::new(DownloadRange::new(0, 9));

        let f = fetcher(&url, &transport, &sink, &speed, &kill_switch);
        f.run(0, &range).await.unwrap();

        assert!(range.lock().unwrap().is_done);
        assert_eq!(transport.requested_ranges(), vec![(0, 9), (4, 9)]);
    }

    #[tokio::test]
    async fn a_clean_but_incomplete_stream_is_a_failure_not_a_completed_range() {
        let url = Url::parse("https://example.invalid/f").unwrap();
        let transport = FakeTransport::serving(b"abcdefghij".to_vec()).truncate_first_attempt(4);
        let sink = SinkWriter::new(Some(Box::new(MemorySink::new())), None, false);
        let speed = SpeedMeter::new();
        let kill_switch = KillSwitch::new();
        let range = Mutex::new(DownloadRange::new(0, 9));

        let mut f = fetcher(&url, &transport, &sink, &speed, &kill_switch);
        f.max_retry_count = 0;
        let err = f.run(0, &range).await.unwrap_err();

        assert!(matches!(err, DownloadError::TransferFailed(_)));
        let range = range.lock().unwrap();
        assert!(!range.is_done);
        assert_eq!(range.current_offset, 4);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_the_retry_budget() {
        let url = Url::parse("https://example.invalid/f").unwrap();
        let transport = FakeTransport::failing_always();
        let sink = SinkWriter::new(Some(Box::new(MemorySink::new())), None, false);
        let speed = SpeedMeter::new();
        let kill_switch = KillSwitch::new();
        let range = Mutex::new(DownloadRange::new(0, 9));

        let f = fetcher(&url, &transport, &sink, &speed, &kill_switch);
        let err = f.run(0, &range).await.unwrap_err();
        assert!(matches!(err, DownloadError::TransferFailed(_)));
    }

    #[tokio::test]
    async fn rejects_a_mid_stream_resume_when_resuming_is_unsupported() {
        let url = Url::parse("https://example.invalid/f").unwrap();
        let transport = FakeTransport::serving(b"abcdefghij".to_vec());
        let sink = SinkWriter::new(Some(Box::new(MemorySink::new())), None, false);
        let speed = SpeedMeter::new();
        let kill_switch = KillSwitch::new();
        let range = Mutex::new(DownloadRange::with_offset(0, 9, 4));

        let mut f = fetcher(&url, &transport, &sink, &speed, &kill_switch);
        f.is_resuming_supported = false;
        let err = f.run(0, &range).await.unwrap_err();
        assert!(matches!(err, DownloadError::ResumeUnsupportedMidStream));
    }
}
