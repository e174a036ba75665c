//! Periodic sampling of received bytes into a [`ConnectionClassManager`].
//!
//! [`DeviceBandwidthSampler`] owns a single tokio task, the worker, that schedules every read of
//! the byte source. Callers only flip a reference count; the 0→1 and 1→0 edges are forwarded to
//! the worker over an ordered channel:
//!
//! - on start the worker takes a priming reading, which establishes the byte baseline, and then
//!   samples once per interval;
//! - on stop it takes one last sample covering the time since the previous reading and drops the
//!   baseline, so traffic between two sessions is never attributed to either.
//!
//! Each reading, together with the [`ConnectionClassManager::add_bandwidth`] call and the
//! listener callbacks it may trigger, runs on tokio's blocking pool. The worker waits for it
//! before handling the next command or tick.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::estimator::ConnectionClassManager;
use crate::qtaguid::{QTagUidSource, ReadError};

/// Time between two samples while sampling is active.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Something that can report how many bytes were received since it was last asked.
pub trait ByteCountSource: Send + 'static {
    type Error: std::error::Error + Send + 'static;

    /// Bytes received since the previous successful call.
    ///
    /// `Ok(None)` means a new baseline was just established. On error the baseline must be
    /// left untouched, so the next successful call covers the failed interval as well.
    fn sample_byte_delta(&mut self) -> std::result::Result<Option<u64>, Self::Error>;

    /// Forgets the baseline so the next call starts a new one.
    fn reset_baseline(&mut self);
}

impl ByteCountSource for QTagUidSource {
    type Error = ReadError;

    fn sample_byte_delta(&mut self) -> std::result::Result<Option<u64>, ReadError> {
        QTagUidSource::sample_byte_delta(self)
    }

    fn reset_baseline(&mut self) {
        QTagUidSource::reset_baseline(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stop_sampling called without a matching start_sampling")]
    NotSampling,
    #[error("sampling worker is no longer running")]
    WorkerStopped,
    #[error("sampling worker panicked: {0}")]
    WorkerPanicked(#[source] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
}

/// Reference-counted sampling sessions driving a [`ConnectionClassManager`].
#[derive(Debug)]
pub struct DeviceBandwidthSampler {
    sampling_counter: AtomicUsize,
    // Keeps counter edges and their commands in the same order.
    transitions: Mutex<()>,
    commands: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
}

impl DeviceBandwidthSampler {
    /// Spawns the sampling worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn<S: ByteCountSource>(
        manager: Arc<ConnectionClassManager>,
        source: S,
        interval: Duration,
    ) -> Self {
        Self::spawn_on(&tokio::runtime::Handle::current(), manager, source, interval)
    }

    /// Spawns the sampling worker on the runtime behind `handle`.
    pub fn spawn_on<S: ByteCountSource>(
        handle: &tokio::runtime::Handle,
        manager: Arc<ConnectionClassManager>,
        source: S,
        interval: Duration,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = handle.spawn(sampling_worker(source, manager, rx, interval));
        Self {
            sampling_counter: AtomicUsize::new(0),
            transitions: Mutex::new(()),
            commands,
            worker,
        }
    }

    /// Begins a sampling session, or joins the one already running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerStopped`] if the worker has exited.
    pub fn start_sampling(&self) -> Result<()> {
        let _guard = self
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.sampling_counter.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Err(err) = self.send(Command::Start) {
                self.sampling_counter.fetch_sub(1, Ordering::SeqCst);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Leaves a sampling session. The last caller to leave ends it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSampling`] if there is no session to leave, and
    /// [`Error::WorkerStopped`] if the worker has exited.
    pub fn stop_sampling(&self) -> Result<()> {
        let _guard = self
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = self
            .sampling_counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_err(|_| Error::NotSampling)?;
        if previous == 1 {
            self.send(Command::Stop)?;
        }
        Ok(())
    }

    /// Whether at least one caller is inside a sampling session.
    pub fn is_sampling(&self) -> bool {
        self.sampling_counter.load(Ordering::SeqCst) != 0
    }

    /// Closes the command channel and waits for the worker to finish.
    ///
    /// A session that is still running gets its final sample before the worker exits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerPanicked`] if the worker task panicked.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.commands);
        self.worker.await.map_err(Error::WorkerPanicked)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::WorkerStopped)
    }
}

async fn sampling_worker<S: ByteCountSource>(
    source: S,
    manager: Arc<ConnectionClassManager>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    period: Duration,
) {
    let mut ticker: Option<Interval> = None;
    let mut sampling = Sampling {
        source,
        manager,
        last_reading: Instant::now(),
    };

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Start) => {
                    log::debug!("sampling started");
                    sampling.last_reading = Instant::now();
                    // The first tick completes immediately and primes the baseline.
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker = Some(interval);
                }
                Some(Command::Stop) => {
                    ticker = None;
                    let Some(next) = run_blocking(sampling, Sampling::finish_session).await else {
                        return;
                    };
                    sampling = next;
                }
                None => {
                    if ticker.is_some() {
                        run_blocking(sampling, Sampling::finish_session).await;
                    }
                    break;
                }
            },
            _ = next_tick(ticker.as_mut()) => {
                let Some(next) = run_blocking(sampling, Sampling::add_sample).await else {
                    return;
                };
                sampling = next;
            }
        }
    }
    log::trace!("sampling worker exited");
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Moves `sampling` onto the blocking pool for one step and hands it back.
///
/// A panic in the step (e.g. from a listener) is resumed on the worker, so it surfaces as
/// [`Error::WorkerPanicked`]. `None` means the runtime is shutting down.
async fn run_blocking<S, F>(mut sampling: Sampling<S>, step: F) -> Option<Sampling<S>>
where
    S: ByteCountSource,
    F: FnOnce(&mut Sampling<S>, Instant) + Send + 'static,
{
    let now = Instant::now();
    let result = tokio::task::spawn_blocking(move || {
        step(&mut sampling, now);
        sampling
    })
    .await;
    match result {
        Ok(sampling) => Some(sampling),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => {
            log::debug!("sampling step cancelled: {err}");
            None
        }
    }
}

struct Sampling<S> {
    source: S,
    manager: Arc<ConnectionClassManager>,
    last_reading: Instant,
}

impl<S: ByteCountSource> Sampling<S> {
    fn add_sample(&mut self, now: Instant) {
        match self.source.sample_byte_delta() {
            Ok(Some(bytes)) => {
                let elapsed_ms = u64::try_from(now.duration_since(self.last_reading).as_millis())
                    .unwrap_or(u64::MAX);
                log::trace!("sampled {bytes} bytes over {elapsed_ms} ms");
                self.manager.add_bandwidth(bytes, elapsed_ms);
            }
            Ok(None) => log::trace!("byte baseline established"),
            Err(err) => {
                // The source kept its baseline, so the next delta spans from the last reading.
                log::error!("failed to sample received bytes: {err}");
                return;
            }
        }
        self.last_reading = now;
    }

    fn finish_session(&mut self, now: Instant) {
        self.add_sample(now);
        self.source.reset_baseline();
        log::debug!("sampling stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicU64};

    use super::*;
    use crate::quality::ConnectionQuality;

    /// Shared view of a fake cumulative byte counter.
    #[derive(Debug, Clone, Default)]
    struct Traffic {
        total: Arc<AtomicU64>,
        deltas: Arc<Mutex<Vec<Option<u64>>>>,
        resets: Arc<AtomicUsize>,
        fail_next: Arc<AtomicBool>,
        failures: Arc<AtomicUsize>,
    }

    impl Traffic {
        fn receive(&self, bytes: u64) {
            self.total.fetch_add(bytes, Ordering::SeqCst);
        }

        fn fail_next_read(&self) {
            self.fail_next.store(true, Ordering::SeqCst);
        }

        fn deltas(&self) -> Vec<Option<u64>> {
            self.deltas.lock().unwrap().clone()
        }

        fn source(&self) -> FakeSource {
            FakeSource {
                traffic: self.clone(),
                baseline: None,
            }
        }
    }

    struct FakeSource {
        traffic: Traffic,
        baseline: Option<u64>,
    }

    impl ByteCountSource for FakeSource {
        type Error = io::Error;

        fn sample_byte_delta(&mut self) -> io::Result<Option<u64>> {
            if self.traffic.fail_next.swap(false, Ordering::SeqCst) {
                self.traffic.failures.fetch_add(1, Ordering::SeqCst);
                return Err(io::Error::other("counter unavailable"));
            }
            let total = self.traffic.total.load(Ordering::SeqCst);
            let delta = self.baseline.replace(total).map(|prev| total - prev);
            self.traffic.deltas.lock().unwrap().push(delta);
            Ok(delta)
        }

        fn reset_baseline(&mut self) {
            self.baseline = None;
            self.traffic.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sampler(traffic: &Traffic) -> (DeviceBandwidthSampler, Arc<ConnectionClassManager>) {
        let manager = Arc::new(ConnectionClassManager::default());
        let sampler = DeviceBandwidthSampler::spawn(
            Arc::clone(&manager),
            traffic.source(),
            DEFAULT_SAMPLE_INTERVAL,
        );
        (sampler, manager)
    }

    async fn let_worker_run() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_counting() {
        let traffic = Traffic::default();
        let (sampler, _) = sampler(&traffic);
        assert!(!sampler.is_sampling());

        sampler.start_sampling().unwrap();
        sampler.start_sampling().unwrap();
        assert!(sampler.is_sampling());

        sampler.stop_sampling().unwrap();
        assert!(sampler.is_sampling());
        sampler.stop_sampling().unwrap();
        assert!(!sampler.is_sampling());

        assert!(matches!(sampler.stop_sampling(), Err(Error::NotSampling)));
        assert!(!sampler.is_sampling());

        sampler.shutdown().await.unwrap();
        // Overlapping starts were coalesced into one session.
        assert_eq!(traffic.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_feed_the_estimator() {
        let traffic = Traffic::default();
        let (sampler, manager) = sampler(&traffic);

        sampler.start_sampling().unwrap();
        for _ in 0..20 {
            traffic.receive(625_000); // 5 Mbit over one second
            tokio::time::sleep(DEFAULT_SAMPLE_INTERVAL).await;
        }
        sampler.stop_sampling().unwrap();
        sampler.shutdown().await.unwrap();

        let deltas = traffic.deltas();
        assert_eq!(deltas.first(), Some(&None));
        assert!(deltas.iter().flatten().filter(|d| **d == 625_000).count() >= 15);
        assert_eq!(
            manager.current_bandwidth_quality(),
            ConnectionQuality::Excellent
        );
        let bps = manager.download_bits_per_second().unwrap();
        assert!((bps - 5_000_000.0).abs() < 1.0, "unexpected average {bps}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_takes_final_sample() {
        let traffic = Traffic::default();
        let (sampler, manager) = sampler(&traffic);

        sampler.start_sampling().unwrap();
        let_worker_run().await;
        assert_eq!(traffic.deltas(), vec![None]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        traffic.receive(50_000);
        sampler.stop_sampling().unwrap();
        let_worker_run().await;

        assert_eq!(traffic.deltas(), vec![None, Some(50_000)]);
        assert_eq!(traffic.resets.load(Ordering::SeqCst), 1);
        // 50 kB over ~0.5 s is well above the noise floor.
        assert!(manager.download_bits_per_second().unwrap() > 700_000.0);

        sampler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_between_sessions_is_not_counted() {
        let traffic = Traffic::default();
        let (sampler, _) = sampler(&traffic);

        sampler.start_sampling().unwrap();
        let_worker_run().await;
        traffic.receive(1_000);
        tokio::time::sleep(DEFAULT_SAMPLE_INTERVAL).await;
        sampler.stop_sampling().unwrap();
        let_worker_run().await;

        traffic.receive(10_000_000);
        tokio::time::sleep(Duration::from_secs(30)).await;

        sampler.start_sampling().unwrap();
        let_worker_run().await;
        traffic.receive(10);
        tokio::time::sleep(DEFAULT_SAMPLE_INTERVAL).await;
        sampler.stop_sampling().unwrap();
        sampler.shutdown().await.unwrap();

        let deltas = traffic.deltas();
        assert!(deltas.iter().flatten().all(|d| *d < 10_000_000), "{deltas:?}");
        assert_eq!(deltas.iter().filter(|d| d.is_none()).count(), 2);
        assert_eq!(deltas.iter().flatten().sum::<u64>(), 1_010);
        assert_eq!(traffic.resets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sampler_does_not_read() {
        let traffic = Traffic::default();
        let (sampler, _) = sampler(&traffic);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(traffic.deltas().is_empty());
        sampler.shutdown().await.unwrap();
        assert!(traffic.deltas().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_finishes_running_session() {
        let traffic = Traffic::default();
        let (sampler, _) = sampler(&traffic);
        sampler.start_sampling().unwrap();
        let_worker_run().await;
        traffic.receive(42);
        sampler.shutdown().await.unwrap();
        assert_eq!(traffic.deltas(), vec![None, Some(42)]);
        assert_eq!(traffic.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_extends_next_sample() {
        let traffic = Traffic::default();
        let (sampler, manager) = sampler(&traffic);

        sampler.start_sampling().unwrap();
        let_worker_run().await;
        for tick in 1..=8 {
            traffic.receive(125_000); // 1 Mbit over one second
            if tick == 3 {
                traffic.fail_next_read();
            }
            tokio::time::sleep(DEFAULT_SAMPLE_INTERVAL).await;
        }
        sampler.stop_sampling().unwrap();
        sampler.shutdown().await.unwrap();

        assert_eq!(traffic.failures.load(Ordering::SeqCst), 1);
        // The read after the failure covers two seconds of traffic over two seconds.
        assert!(traffic.deltas().contains(&Some(250_000)));
        let bps = manager.download_bits_per_second().unwrap();
        assert!((bps - 1_000_000.0).abs() < 1.0, "unexpected average {bps}");
    }

    /// Source whose first read blocks until the test releases it.
    struct GatedSource {
        entered: mpsc::UnboundedSender<()>,
        gate: Option<std::sync::mpsc::Receiver<()>>,
        timed_out: Arc<AtomicBool>,
    }

    impl ByteCountSource for GatedSource {
        type Error = io::Error;

        fn sample_byte_delta(&mut self) -> io::Result<Option<u64>> {
            if let Some(gate) = self.gate.take() {
                let _ = self.entered.send(());
                if gate.recv_timeout(Duration::from_secs(5)).is_err() {
                    self.timed_out.store(true, Ordering::SeqCst);
                }
            }
            Ok(None)
        }

        fn reset_baseline(&mut self) {}
    }

    #[tokio::test]
    async fn test_slow_read_does_not_block_the_runtime() {
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let timed_out = Arc::new(AtomicBool::new(false));
        let source = GatedSource {
            entered: entered_tx,
            gate: Some(release_rx),
            timed_out: Arc::clone(&timed_out),
        };
        let sampler = DeviceBandwidthSampler::spawn(
            Arc::new(ConnectionClassManager::default()),
            source,
            DEFAULT_SAMPLE_INTERVAL,
        );

        sampler.start_sampling().unwrap();
        // Only reachable while the read is parked off the runtime thread.
        entered_rx.recv().await.unwrap();
        assert!(sampler.is_sampling());
        release_tx.send(()).unwrap();

        sampler.stop_sampling().unwrap();
        sampler.shutdown().await.unwrap();
        assert!(!timed_out.load(Ordering::SeqCst));
    }

    #[test]
    fn test_spawn_on_runtime_handle() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap();
        let traffic = Traffic::default();
        let manager = Arc::new(ConnectionClassManager::default());
        let sampler = DeviceBandwidthSampler::spawn_on(
            runtime.handle(),
            manager,
            traffic.source(),
            Duration::from_millis(10),
        );
        sampler.start_sampling().unwrap();
        sampler.stop_sampling().unwrap();
        runtime.block_on(sampler.shutdown()).unwrap();
        assert_eq!(traffic.resets.load(Ordering::SeqCst), 1);
        assert_eq!(traffic.deltas().first(), Some(&None));
    }
}
