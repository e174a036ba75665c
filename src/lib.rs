//! Connection class: estimates the quality of the device's downstream connection.
//!
//! Received byte counts are sampled from the kernel's per-uid traffic accounting
//! (`/proc/net/xt_qtaguid/stats`), turned into a smoothed bits-per-second estimate and
//! classified into a [`ConnectionQuality`] tier. Observers are notified whenever the published
//! tier changes.

use std::sync::Arc;

use estimator::ConnectionClassManager;
use qtaguid::{QTagParser, QTagUidSource};
use quality::ConnectionQuality;
use sampler::DeviceBandwidthSampler;

pub mod config;
pub mod error;
pub mod estimator;
pub mod fsutil;
pub mod qtaguid;
pub mod quality;
pub mod sampler;

/// Runs the connection class service until Ctrl-C.
///
/// Samples the traffic of the configured uid and logs every published quality change.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the sampler worker dies, or the shutdown
/// signal cannot be awaited.
pub async fn run() -> error::Result<()> {
    let config = config::Config::from_env()?;
    let uid = config.uid();
    log::info!(
        "sampling uid {uid} from `{}` every {} ms",
        config.stats_path.display(),
        config.sample_interval_ms
    );

    let manager = Arc::new(ConnectionClassManager::new(config.estimator)?);
    let listener = manager.register(Arc::new(|quality: ConnectionQuality| {
        log::info!("connection quality changed to {quality}");
    }));
    log::debug!("registered {listener}");

    let source = QTagUidSource::new(QTagParser::new(&config.stats_path), uid);
    let sampler =
        DeviceBandwidthSampler::spawn(Arc::clone(&manager), source, config.sample_interval());
    sampler.start_sampling()?;

    tokio::signal::ctrl_c().await.map_err(error::Error::Signal)?;
    log::debug!("received shutdown signal");

    sampler.stop_sampling()?;
    sampler.shutdown().await?;
    manager.remove(listener);

    match manager.download_bits_per_second() {
        Some(bps) => log::info!(
            "final estimate: {:.0} bit/s ({})",
            bps,
            manager.current_bandwidth_quality()
        ),
        None => log::info!("no bandwidth samples were collected"),
    }
    Ok(())
}
