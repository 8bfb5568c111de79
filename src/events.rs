//! Lifecycle states and the observer hook fired for each of the three
//! observable signals: state change, data received, range completed.

/// The downloader's lifecycle state, owned exclusively by
/// [`crate::controller::Downloader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    None,
    Initializing,
    Initialized,
    Downloading,
    Finished,
    Stopping,
    Stopped,
    Error,
}

impl DownloadState {
    /// `true` for the five states in which no asynchronous work is in flight
    /// and the downloader may safely be re-driven by a collaborating manager.
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            DownloadState::None
                | DownloadState::Initialized
                | DownloadState::Stopped
                | DownloadState::Error
                | DownloadState::Finished
        )
    }
}

/// Receives the three observable signals a downloader emits. All methods are
/// fire-and-forget: the controller calls them outside its lifecycle mutex,
/// so implementations must not block or re-enter the downloader.
pub trait EventSink: Send + Sync {
    /// Called whenever `state` changes value. Reading `State` at this point
    /// is guaranteed to observe the value that triggered the call.
    fn on_state_changed(&self, _state: DownloadState) {}

    /// Called after each write is committed to the sink.
    fn on_data_received(&self, _bytes: u64) {}

    /// Called exactly once per range, on that range's successful completion.
    fn on_range_downloaded(&self, _range_index: usize) {}
}

/// An [`EventSink`] that discards every signal — the default when a caller
/// supplies none.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_states_match_the_idle_state_predicate() {
        assert!(DownloadState::None.is_idle());
        assert!(DownloadState::Initialized.is_idle());
        assert!(DownloadState::Stopped.is_idle());
        assert!(DownloadState::Error.is_idle());
        assert!(DownloadState::Finished.is_idle());
        assert!(!DownloadState::Initializing.is_idle());
        assert!(!DownloadState::Downloading.is_idle());
        assert!(!DownloadState::Stopping.is_idle());
    }
}
