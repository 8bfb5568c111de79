//! # fetchkit
//!
//! A resumable, multi-part HTTP download engine.
//!
//! Given a remote resource URL and a writable random-access [`Sink`],
//! [`Downloader`] fetches the resource in parallel byte ranges, persists
//! per-range progress so an interrupted download resumes without
//! re-fetching completed bytes, and exposes a controllable lifecycle
//! (`init` / `start` / `stop`) with observable state, speed, and completion
//! events.
//!
//! ## Pieces
//!
//! * [`RangePlanner`] partitions a resource into [`DownloadRange`]s.
//! * [`SpeedMeter`] reports a sliding 5-second-window transfer rate.
//! * [`sink::SinkWriter`] serializes positioned writes from concurrent
//!   workers into one seekable [`Sink`], keeping each range's
//!   `current_offset` coherent with the bytes actually committed.
//! * [`fetcher::RangeFetcher`] downloads one range, retrying on failure.
//! * [`scheduler::RangeScheduler`] runs up to `max_part_count` fetchers
//!   concurrently with first-error-wins semantics and sibling cancellation.
//! * [`Downloader`] is the lifecycle state machine tying the above together.
//!
//! ## Out of scope
//!
//! Cataloging multiple downloads, the storage backend behind [`Sink`],
//! on-disk state persistence, and any CLI/UI layer are left to callers —
//! this crate treats the sink as an opaque random-access byte stream and
//! the HTTP transport as an opaque collaborator ([`HttpTransport`]).

mod config;
mod controller;
mod errors;
mod events;
mod fetcher;
mod range;
mod scheduler;
mod sink;
mod speed;
mod transport;

#[cfg(test)]
mod test_support;

pub use config::{min_part_size, DownloaderConfig};
pub use controller::Downloader;
pub use errors::{DownloadError, Result};
pub use events::{DownloadState, EventSink, NoopEventSink};
pub use range::{DownloadRange, RangePlanner};
pub use sink::{FileSink, MemorySink, Sink};
pub use speed::SpeedMeter;
pub use transport::{HttpTransport, ReqwestTransport, ResourceInfo};
