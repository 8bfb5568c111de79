//! The lifecycle state machine: `Init`/`Start`/`Stop`/`Dispose`, owning the
//! range array, the cancellation signal, and the speed meter exclusively.
//! Everything else (sink, transport) is shared only through their own
//! collaborator-level locks.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::config::DownloaderConfig;
use crate::errors::{DownloadError, Result};
use crate::events::{DownloadState, EventSink, NoopEventSink};
use crate::fetcher::RangeFetcher;
use crate::range::{DownloadRange, RangePlanner};
use crate::scheduler::{KillSwitch, RangeScheduler};
use crate::sink::SinkWriter;
use crate::speed::SpeedMeter;
use crate::transport::{HttpTransport, ReqwestTransport};

type SharedResult = Shared<BoxFuture<'static, Result<()>>>;

struct Lifecycle {
    state: DownloadState,
    total_size: u64,
    is_resuming_supported: bool,
    ranges: Vec<Arc<StdMutex<DownloadRange>>>,
    last_error: Option<DownloadError>,
    kill_switch: Arc<KillSwitch>,
    init_future: Option<SharedResult>,
    start_future: Option<SharedResult>,
    stop_future: Option<SharedResult>,
}

struct Core {
    uri: Url,
    transport: Box<dyn HttpTransport>,
    sink: SinkWriter,
    speed: SpeedMeter,
    events: Arc<dyn EventSink>,
    on_before_finish: Option<Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>>,
    part_size: u64,
    max_part_count: usize,
    max_retry_count: u32,
    write_buffer_size: usize,
    retry_backoff: Duration,
    allow_resuming: bool,
    preset_ranges: Option<Vec<DownloadRange>>,
    lifecycle: AsyncMutex<Lifecycle>,
}

impl Core {
    fn set_state(&self, state: DownloadState) {
        self.events.on_state_changed(state);
    }

    /// Finalizes the sink; records `err` as `LastException` before
    /// transitioning to `Error`, or transitions straight to `Stopped` for a
    /// cancellation, never populating `LastException`.
    async fn set_last_error(&self, err: DownloadError) {
        let _ = self.sink.finalize().await;

        let new_state = {
            let mut lifecycle = self.lifecycle.lock().await;
            if err.is_cancelled() {
                lifecycle.state = DownloadState::Stopped;
            } else {
                lifecycle.last_error = Some(err);
                lifecycle.state = DownloadState::Error;
            }
            lifecycle.state
        };
        self.set_state(new_state);
    }

    async fn run_init(self: Arc<Self>) -> Result<()> {
        tracing::info!(url = %self.uri, "initializing download");
        let info = self.transport.head(&self.uri).await?;
        let is_resuming_supported = self.allow_resuming && info.accepts_byte_ranges;
        tracing::info!(
            total_size = info.total_size,
            is_resuming_supported,
            "resource discovered"
        );

        let mut lifecycle = self.lifecycle.lock().await;

        // A downloader re-initialized after Stop (still the same process,
        // same Arc<Core>) already carries whatever progress its ranges
        // made before cancellation; prefer that over the construction-time
        // preset so a Stop/Start cycle resumes rather than restarts. Only
        // a brand-new downloader falls back to the config-supplied set.
        let in_memory: Option<Vec<DownloadRange>> = if lifecycle.ranges.is_empty() {
            None
        } else {
            Some(
                lifecycle
                    .ranges
                    .iter()
                    .map(|r| *r.lock().unwrap_or_else(|e| e.into_inner()))
                    .collect(),
            )
        };

        let existing = in_memory.as_ref().or(self.preset_ranges.as_ref());
        let ranges = match existing {
            Some(existing) if RangePlanner::validate(existing, info.total_size) => existing.clone(),
            _ => RangePlanner::plan(info.total_size, self.part_size, is_resuming_supported),
        };

        lifecycle.total_size = info.total_size;
        lifecycle.is_resuming_supported = is_resuming_supported;
        lifecycle.ranges = ranges
            .into_iter()
            .map(|r| Arc::new(StdMutex::new(r)))
            .collect();
        Ok(())
    }

    async fn run_download(self: Arc<Self>) -> Result<()> {
        let (ranges, kill_switch, is_resuming_supported) = {
            let lifecycle = self.lifecycle.lock().await;
            (
                lifecycle.ranges.clone(),
                lifecycle.kill_switch.clone(),
                lifecycle.is_resuming_supported,
            )
        };

        let incomplete: Vec<(usize, Arc<StdMutex<DownloadRange>>)> = ranges
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.lock().unwrap_or_else(|e| e.into_inner()).is_done)
            .map(|(i, r)| (i, r.clone()))
            .collect();

        let fetches: Vec<BoxFuture<'_, Result<()>>> = incomplete
            .into_iter()
            .map(|(index, range)| {
                let fetcher = RangeFetcher {
                    url: &self.uri,
                    transport: self.transport.as_ref(),
                    sink: &self.sink,
                    speed: &self.speed,
                    events: self.events.as_ref(),
                    kill_switch: &kill_switch,
                    is_resuming_supported,
                    max_retry_count: self.max_retry_count,
                    write_buffer_size: self.write_buffer_size,
                    retry_backoff: self.retry_backoff,
                };
                Box::pin(async move { fetcher.run(index, &range).await }) as BoxFuture<'_, Result<()>>
            })
            .collect();

        let scheduler = RangeScheduler::new();
        scheduler.run(fetches, self.max_part_count, &kill_switch).await
    }
}

/// A resumable multi-part HTTP download with a controllable lifecycle.
/// Cheap to clone: every clone shares the same underlying state.
pub struct Downloader {
    shared: Arc<Core>,
}

impl Clone for Downloader {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Downloader {
    /// Validates `config` and constructs a downloader in `None` (or
    /// `Stopped`, if `config.is_stopped()` was set).
    pub fn new(config: DownloaderConfig) -> Result<Self> {
        let config = config
            .validated()
            .map_err(|e| DownloadError::InvalidConfig(e.to_string()))?;

        let transport: Box<dyn HttpTransport> = config.transport.unwrap_or_else(|| {
            Box::new(ReqwestTransport::new(
                config.connect_timeout,
                config.request_timeout,
            ))
        });
        let sink = SinkWriter::new(config.sink, config.open_sink, config.auto_dispose_sink);
        let events: Arc<dyn EventSink> = config.events.unwrap_or_else(|| Arc::new(NoopEventSink));
        let initial_state = if config.is_stopped {
            DownloadState::Stopped
        } else {
            DownloadState::None
        };

        let shared = Arc::new(Core {
            uri: config.uri,
            transport,
            sink,
            speed: SpeedMeter::new(),
            events,
            on_before_finish: config.on_before_finish,
            part_size: config.part_size,
            max_part_count: config.max_part_count,
            max_retry_count: config.max_retry_count,
            write_buffer_size: config.write_buffer_size,
            retry_backoff: config.retry_backoff,
            allow_resuming: config.allow_resuming,
            preset_ranges: config.downloaded_ranges,
            lifecycle: AsyncMutex::new(Lifecycle {
                state: initial_state,
                total_size: 0,
                is_resuming_supported: false,
                ranges: Vec::new(),
                last_error: None,
                kill_switch: Arc::new(KillSwitch::new()),
                init_future: None,
                start_future: None,
                stop_future: None,
            }),
        });

        Ok(Self { shared })
    }

    /// Discovers the resource's size and range support, then plans (or
    /// validates a caller-supplied) range set. A no-op if already
    /// initialized or further along; awaits an in-flight `Stop()` first if
    /// one is running.
    pub async fn init(&self) -> Result<()> {
        loop {
            let action = {
                let lifecycle = self.shared.lifecycle.lock().await;
                match lifecycle.state {
                    DownloadState::Stopping => Pending::AwaitStop(lifecycle.stop_future.clone()),
                    DownloadState::Initializing => Pending::AwaitExisting(lifecycle.init_future.clone()),
                    DownloadState::Initialized
                    | DownloadState::Downloading
                    | DownloadState::Finished => Pending::AlreadyDone,
                    _ => Pending::Start,
                }
            };

            match action {
                Pending::AwaitStop(fut) => {
                    if let Some(fut) = fut {
                        let _ = fut.await;
                    }
                    continue;
                }
                Pending::AwaitExisting(fut) => {
                    return match fut {
                        Some(fut) => fut.await,
                        None => Ok(()),
                    };
                }
                Pending::AlreadyDone => return Ok(()),
                Pending::Start => return self.begin_init().await,
            }
        }
    }

    async fn begin_init(&self) -> Result<()> {
        let shared = self.shared.clone();

        let task_shared = shared.clone();
        let handle = tokio::spawn(async move { task_shared.run_init().await });
        let fut: SharedResult = async move {
            match handle.await {
                Ok(result) => result,
                Err(_) => Err(DownloadError::transfer("init task panicked")),
            }
        }
        .boxed()
        .shared();

        {
            let mut lifecycle = shared.lifecycle.lock().await;
            lifecycle.state = DownloadState::Initializing;
            // A fresh idle -> Initializing transition: replace the kill
            // switch so a downloader stopped (or errored) in a previous
            // cycle can be re-driven instead of cancelling instantly, and
            // clear any stale error from that previous cycle.
            lifecycle.kill_switch = Arc::new(KillSwitch::new());
            lifecycle.last_error = None;
            // State and the in-flight future become observable together:
            // otherwise a concurrent caller could see `Initializing` with
            // `init_future` still `None` and wrongly treat init as already
            // finished.
            lifecycle.init_future = Some(fut.clone());
        }
        shared.set_state(DownloadState::Initializing);

        let result = fut.await;
        match &result {
            Ok(()) => {
                let mut lifecycle = shared.lifecycle.lock().await;
                lifecycle.state = DownloadState::Initialized;
                drop(lifecycle);
                shared.set_state(DownloadState::Initialized);
            }
            Err(err) => shared.set_last_error(err.clone()).await,
        }
        result
    }

    /// Ensures `Init()` has completed, then drives the range scheduler to
    /// completion. A no-op if already downloading or finished; awaits an
    /// in-flight `Stop()` first if one is running.
    pub async fn start(&self) -> Result<()> {
        loop {
            let action = {
                let lifecycle = self.shared.lifecycle.lock().await;
                match lifecycle.state {
                    DownloadState::Stopping => Pending::AwaitStop(lifecycle.stop_future.clone()),
                    DownloadState::Downloading => Pending::AwaitExisting(lifecycle.start_future.clone()),
                    DownloadState::Finished => Pending::AlreadyDone,
                    _ => Pending::Start,
                }
            };

            match action {
                Pending::AwaitStop(fut) => {
                    if let Some(fut) = fut {
                        let _ = fut.await;
                    }
                    continue;
                }
                Pending::AwaitExisting(fut) => {
                    return match fut {
                        Some(fut) => fut.await,
                        None => Ok(()),
                    };
                }
                Pending::AlreadyDone => return Ok(()),
                Pending::Start => return self.begin_start().await,
            }
        }
    }

    async fn begin_start(&self) -> Result<()> {
        self.init().await?;

        {
            let lifecycle = self.shared.lifecycle.lock().await;
            if lifecycle.state != DownloadState::Initialized {
                // Init already recorded an Error (or we were stopped); the
                // caller sees that outcome when they read `State`.
                return Ok(());
            }
        }

        let shared = self.shared.clone();

        let task_shared = shared.clone();
        let handle = tokio::spawn(async move { task_shared.run_download().await });
        let fut: SharedResult = async move {
            match handle.await {
                Ok(result) => result,
                Err(_) => Err(DownloadError::transfer("download task panicked")),
            }
        }
        .boxed()
        .shared();

        {
            let mut lifecycle = shared.lifecycle.lock().await;
            // Same atomicity requirement as `begin_init`: a concurrent
            // caller must never observe `Downloading` with `start_future`
            // still `None`.
            lifecycle.state = DownloadState::Downloading;
            lifecycle.start_future = Some(fut.clone());
        }
        shared.set_state(DownloadState::Downloading);

        let result = fut.await;
        match &result {
            Ok(()) => {
                let _ = shared.sink.finalize().await;
                if let Some(hook) = &shared.on_before_finish {
                    hook().await;
                }
                let mut lifecycle = shared.lifecycle.lock().await;
                lifecycle.state = DownloadState::Finished;
                drop(lifecycle);
                shared.set_state(DownloadState::Finished);
            }
            Err(err) => shared.set_last_error(err.clone()).await,
        }
        result
    }

    /// No-op if already idle at a terminal state. Otherwise snapshots the
    /// in-flight init/start futures, transitions to `Stopping`, fires
    /// cancellation, and awaits both before settling at `Stopped`.
    pub async fn stop(&self) -> Result<()> {
        let existing = {
            let lifecycle = self.shared.lifecycle.lock().await;
            if matches!(
                lifecycle.state,
                DownloadState::Finished | DownloadState::Stopped | DownloadState::Error
            ) {
                return Ok(());
            }
            lifecycle.stop_future.clone()
        };

        if let Some(fut) = existing {
            return fut.await;
        }

        self.begin_stop().await
    }

    async fn begin_stop(&self) -> Result<()> {
        let shared = self.shared.clone();
        // Snapshot the futures/kill switch to hand to the stop task, without
        // yet mutating `state` — that happens below, together with storing
        // `stop_future`, under one lock acquisition.
        let (init_fut, start_fut, kill_switch) = {
            let lifecycle = shared.lifecycle.lock().await;
            (
                lifecycle.init_future.clone(),
                lifecycle.start_future.clone(),
                lifecycle.kill_switch.clone(),
            )
        };

        tracing::info!(url = %shared.uri, "stopping download");
        kill_switch.push_the_button();

        let task_shared = shared.clone();
        let handle = tokio::spawn(async move {
            if let Some(fut) = init_fut {
                let _ = fut.await;
            }
            if let Some(fut) = start_fut {
                let _ = fut.await;
            }
            let _ = task_shared.sink.finalize().await;
            Ok::<(), DownloadError>(())
        });

        let fut: SharedResult = async move {
            match handle.await {
                Ok(result) => result,
                Err(_) => Err(DownloadError::transfer("stop task panicked")),
            }
        }
        .boxed()
        .shared();

        {
            let mut lifecycle = shared.lifecycle.lock().await;
            // State and the in-flight future become observable together:
            // otherwise a concurrent caller's `stop()` could see `Stopping`
            // with `stop_future` still `None` and start a second, redundant
            // stop task.
            lifecycle.state = DownloadState::Stopping;
            lifecycle.stop_future = Some(fut.clone());
        }
        shared.set_state(DownloadState::Stopping);

        let _ = fut.await;

        let mut lifecycle = shared.lifecycle.lock().await;
        lifecycle.state = DownloadState::Stopped;
        drop(lifecycle);
        shared.set_state(DownloadState::Stopped);
        Ok(())
    }

    /// Flushes the sink synchronously with respect to the caller (but does
    /// not stop in-flight transfers).
    pub async fn flush(&self) -> Result<()> {
        self.shared.sink.flush().await
    }

    /// Cancels in-flight work and finalizes (optionally disposing) the sink.
    pub async fn dispose(&self) -> Result<()> {
        self.stop().await?;
        self.shared.sink.finalize().await
    }

    pub async fn state(&self) -> DownloadState {
        self.shared.lifecycle.lock().await.state
    }

    pub async fn total_size(&self) -> u64 {
        self.shared.lifecycle.lock().await.total_size
    }

    pub async fn current_size(&self) -> u64 {
        let lifecycle = self.shared.lifecycle.lock().await;
        lifecycle
            .ranges
            .iter()
            .map(|r| r.lock().unwrap_or_else(|e| e.into_inner()).current_offset)
            .sum()
    }

    pub async fn bytes_per_second(&self) -> f64 {
        self.shared.speed.bytes_per_second()
    }

    pub async fn is_resuming_supported(&self) -> bool {
        self.shared.lifecycle.lock().await.is_resuming_supported
    }

    pub async fn last_error(&self) -> Option<DownloadError> {
        self.shared.lifecycle.lock().await.last_error.clone()
    }

    pub async fn downloaded_ranges(&self) -> Vec<DownloadRange> {
        let lifecycle = self.shared.lifecycle.lock().await;
        lifecycle
            .ranges
            .iter()
            .map(|r| *r.lock().unwrap_or_else(|e| e.into_inner()))
            .collect()
    }
}

enum Pending {
    AwaitStop(Option<SharedResult>),
    AwaitExisting(Option<SharedResult>),
    AlreadyDone,
    Start,
}
