use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;

use crate::quality::ConnectionQuality;

use super::average::ExponentialGeometricAverage;
use super::config::{ConfigError, EstimatorConfig};
use super::listener::{ConnectionClassStateChangeListener, ListenerId};

const BYTES_TO_BITS: f64 = 8.0;
const MILLIS_PER_SECOND: f64 = 1000.0;

/// Moving average plus hysteresis bookkeeping, guarded as one unit.
#[derive(Debug)]
struct State {
    average: ExponentialGeometricAverage,
    accepted_samples: u64,
    published: ConnectionQuality,
    pending: Option<ConnectionQuality>,
    confirmations: u32,
}

impl State {
    fn new(config: &EstimatorConfig) -> Self {
        Self {
            average: ExponentialGeometricAverage::new(config.decay_constant),
            accepted_samples: 0,
            published: ConnectionQuality::Unknown,
            pending: None,
            confirmations: 0,
        }
    }

    /// Folds in one accepted sample and returns the newly published tier, if any.
    fn add_measurement(
        &mut self,
        bits_per_second: f64,
        config: &EstimatorConfig,
    ) -> Option<ConnectionQuality> {
        self.average.add_measurement(bits_per_second);
        self.accepted_samples += 1;
        let average = self.average.average()?;
        let candidate = config.classify(average);

        if candidate == self.published {
            self.pending = None;
            self.confirmations = 0;
            return None;
        }

        match self.pending {
            Some(target) if target == candidate => {
                self.confirmations = self.confirmations.saturating_add(1)
            }
            _ => {
                self.pending = Some(candidate);
                self.confirmations = 0;
            }
        }

        if self.confirmations < config.samples_to_quality_change
            || !config.is_outside_band(self.published, average)
        {
            return None;
        }

        // At most one tier per sample; a pending target further away stays confirmed.
        let next = self.published.step_toward(candidate);
        self.published = next;
        if next == candidate {
            self.pending = None;
            self.confirmations = 0;
        }
        Some(next)
    }
}

/// Turns (bytes, elapsed time) samples into a stable [`ConnectionQuality`].
///
/// One instance is meant to be shared (via [`Arc`]) by everything in a process that produces
/// or consumes bandwidth information. All methods take `&self` and may be called from any
/// thread.
pub struct ConnectionClassManager {
    config: EstimatorConfig,
    state: Mutex<State>,
    listeners: DashMap<ListenerId, Arc<dyn ConnectionClassStateChangeListener>>,
    next_listener_id: AtomicU64,
}

impl Default for ConnectionClassManager {
    fn default() -> Self {
        Self::with_valid_config(EstimatorConfig::default())
    }
}

impl fmt::Debug for ConnectionClassManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionClassManager")
            .field("config", &self.config)
            .field("state", &*self.lock_state())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ConnectionClassManager {
    /// Creates a manager with the given thresholds.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `config` fails [`EstimatorConfig::validate`].
    pub fn new(config: EstimatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: EstimatorConfig) -> Self {
        Self {
            state: Mutex::new(State::new(&config)),
            config,
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Adds a sample of `bytes` transferred over `elapsed_ms` milliseconds.
    ///
    /// Samples with no elapsed time, or whose bandwidth is at or below
    /// [`EstimatorConfig::min_sample_bandwidth_bps`], are dropped. Listeners are notified before
    /// this returns if the sample causes a published change.
    pub fn add_bandwidth(&self, bytes: u64, elapsed_ms: u64) {
        if elapsed_ms == 0 {
            log::trace!("dropping sample of {bytes} bytes without elapsed time");
            return;
        }
        let bits_per_second = bytes as f64 * BYTES_TO_BITS * MILLIS_PER_SECOND / elapsed_ms as f64;
        if bits_per_second <= self.config.min_sample_bandwidth_bps {
            log::trace!("dropping sample below bandwidth floor: {bits_per_second:.0} bit/s");
            return;
        }

        let published = self
            .lock_state()
            .add_measurement(bits_per_second, &self.config);
        log::trace!("accepted sample: {bits_per_second:.0} bit/s");

        if let Some(quality) = published {
            log::debug!("connection quality changed to {quality}");
            self.notify_listeners(quality);
        }
    }

    /// Returns the published quality.
    ///
    /// Stays [`ConnectionQuality::Unknown`] until more than
    /// [`EstimatorConfig::samples_to_quality_change`] samples have been accepted.
    pub fn current_bandwidth_quality(&self) -> ConnectionQuality {
        let state = self.lock_state();
        if state.accepted_samples <= u64::from(self.config.samples_to_quality_change) {
            return ConnectionQuality::Unknown;
        }
        state.published
    }

    /// The moving average in bits per second, `None` before the first accepted sample.
    pub fn download_bits_per_second(&self) -> Option<f64> {
        self.lock_state().average.average()
    }

    /// Returns the estimator to its freshly constructed state. Listeners stay registered.
    pub fn reset(&self) {
        *self.lock_state() = State::new(&self.config);
    }

    /// Registers a listener for published quality changes.
    pub fn register<L>(&self, listener: Arc<L>) -> ListenerId
    where
        L: ConnectionClassStateChangeListener + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        log::trace!("registered {id}");
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify_listeners(&self, quality: ConnectionQuality) {
        // Snapshot first so callbacks can mutate the registry without deadlocking on a shard.
        let listeners: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for listener in listeners {
            listener.on_bandwidth_state_change(quality);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        // State is updated field by field without panicking paths, so a poisoned lock still
        // holds consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
