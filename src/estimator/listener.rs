use std::fmt;

use crate::quality::ConnectionQuality;

/// Observer of published [`ConnectionQuality`] changes.
///
/// Callbacks run on whichever thread published the change, after the estimator released its
/// state lock, so they may call back into the estimator, including registering or removing
/// listeners.
pub trait ConnectionClassStateChangeListener: Send + Sync {
    fn on_bandwidth_state_change(&self, quality: ConnectionQuality);
}

impl<F> ConnectionClassStateChangeListener for F
where
    F: Fn(ConnectionQuality) + Send + Sync,
{
    fn on_bandwidth_state_change(&self, quality: ConnectionQuality) {
        self(quality)
    }
}

/// Handle returned by [`register`](super::ConnectionClassManager::register), used to remove the
/// listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(super) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}
