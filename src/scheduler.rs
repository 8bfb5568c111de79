//! Bounded-parallelism fan-out over a resource's incomplete ranges, with
//! first-error-wins semantics and prompt sibling cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{Notify, Semaphore};

use crate::errors::{DownloadError, Result};

/// A single-producer, many-consumer cancellation signal. Any worker or the
/// controller can push the button; every holder sees it immediately via
/// [`KillSwitch::is_pushed`], and anyone awaiting [`KillSwitch::cancelled`]
/// wakes as soon as it is pushed.
#[derive(Default)]
pub struct KillSwitch {
    pushed: AtomicBool,
    notify: Notify,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_the_button(&self) {
        if !self.pushed.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_pushed(&self) -> bool {
        self.pushed.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already pushed; otherwise waits for the push.
    pub async fn cancelled(&self) {
        if self.is_pushed() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Runs up to `max_concurrency` range-fetch futures concurrently, recording
/// only the first non-cancellation failure and triggering `kill_switch` as
/// soon as it occurs. Later failures (typically cancellation, as siblings
/// unwind) never overwrite the recorded error.
pub struct RangeScheduler {
    root_error: Mutex<Option<DownloadError>>,
}

impl RangeScheduler {
    pub fn new() -> Self {
        Self {
            root_error: Mutex::new(None),
        }
    }

    pub async fn run<'a>(
        &self,
        fetches: Vec<BoxFuture<'a, Result<()>>>,
        max_concurrency: usize,
        kill_switch: &KillSwitch,
    ) -> Result<()> {
        let semaphore = Semaphore::new(max_concurrency.max(1));
        let mut in_flight = FuturesUnordered::new();

        for fetch in fetches {
            in_flight.push(async {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed during a scheduler run");
                fetch.await
            });
        }

        while let Some(outcome) = in_flight.next().await {
            if let Err(err) = outcome {
                if !err.is_cancelled() {
                    tracing::error!(error = %err, "range worker failed, cancelling siblings");
                    let mut root_error = self.root_error.lock().unwrap_or_else(|e| e.into_inner());
                    if root_error.is_none() {
                        *root_error = Some(err);
                    }
                    drop(root_error);
                    kill_switch.push_the_button();
                }
            }
        }

        match self.root_error.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for RangeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ok() -> BoxFuture<'static, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn failing(msg: &'static str) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { Err(DownloadError::transfer(msg)) })
    }

    #[tokio::test]
    async fn succeeds_when_every_worker_succeeds() {
        let scheduler = RangeScheduler::new();
        let kill_switch = KillSwitch::new();
        let result = scheduler
            .run(vec![ok(), ok(), ok()], 2, &kill_switch)
            .await;
        assert!(result.is_ok());
        assert!(!kill_switch.is_pushed());
    }

    #[tokio::test]
    async fn first_failure_triggers_the_kill_switch_and_is_surfaced() {
        let scheduler = RangeScheduler::new();
        let kill_switch = KillSwitch::new();
        let result = scheduler
            .run(vec![ok(), failing("boom")], 2, &kill_switch)
            .await;
        assert!(matches!(result, Err(DownloadError::TransferFailed(msg)) if msg == "boom"));
        assert!(kill_switch.is_pushed());
    }

    #[tokio::test]
    async fn a_later_cancellation_never_overwrites_the_first_error() {
        let scheduler = RangeScheduler::new();
        let kill_switch = KillSwitch::new();
        let cancelled_after_signal: BoxFuture<'static, Result<()>> = Box::pin(async {
            Err(DownloadError::Cancelled)
        });
        let result = scheduler
            .run(
                vec![failing("root cause"), cancelled_after_signal],
                2,
                &kill_switch,
            )
            .await;
        assert!(matches!(result, Err(DownloadError::TransferFailed(msg)) if msg == "root cause"));
    }

    #[tokio::test]
    async fn kill_switch_wakes_pending_waiters() {
        let kill_switch = KillSwitch::new();
        let waiter = async {
            kill_switch.cancelled().await;
        };
        let pusher = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            kill_switch.push_the_button();
        };
        tokio::join!(waiter, pusher);
        assert!(kill_switch.is_pushed());
    }
}
