//! Error taxonomy for the downloader.
//!
//! Foreign errors (`reqwest`, `std::io`) are folded into [`DownloadError`] at
//! the transport/sink boundary rather than leaked through the public API.

use thiserror::Error;

/// Errors produced by the downloader.
#[derive(Error, Debug, Clone)]
pub enum DownloadError {
    /// Raised at construction time, e.g. `part_size < 10_000`.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The initial `HEAD` request failed or did not carry `Content-Length`.
    #[error("could not determine resource size: {0}")]
    HeaderUnavailable(String),

    /// Neither a configured sink nor `open_sink()` produced a stream.
    #[error("no sink available")]
    SinkUnavailable,

    /// A non-zero-`from` range was requested against a server that does not
    /// support byte ranges. Indicates a stale resume set.
    #[error("cannot resume mid-stream: server does not support byte ranges")]
    ResumeUnsupportedMidStream,

    /// A network/HTTP/body failure. Retryable by [`crate::fetcher::RangeFetcher`].
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// Cooperative cancellation. Never surfaced as the `Error` lifecycle
    /// state; `Controller::set_last_error` maps this to `Stopped`.
    #[error("cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn transfer(msg: impl Into<String>) -> Self {
        DownloadError::TransferFailed(msg.into())
    }

    /// True for [`DownloadError::Cancelled`] — the one kind that must never
    /// be recorded as `LastException` / drive the `Error` state.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::TransferFailed(err.to_string())
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::TransferFailed(format!("io error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
