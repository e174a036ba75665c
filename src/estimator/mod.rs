//! Bandwidth estimation and connection quality classification.
//!
//! [`ConnectionClassManager`] ingests `(bytes, elapsed_ms)` samples, keeps an
//! [`ExponentialGeometricAverage`] of the bandwidth in bits per second and publishes a
//! [`ConnectionQuality`](crate::quality::ConnectionQuality) derived from it.
//!
//! Publishing is deliberately sluggish:
//!
//! - a new tier must be confirmed by [`EstimatorConfig::samples_to_quality_change`] further
//!   samples,
//! - the average must leave the current tier's band by half of
//!   [`EstimatorConfig::hysteresis_percent`],
//! - published moves between known tiers are limited to one step per sample.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use connclass::estimator::ConnectionClassManager;
//! use connclass::quality::ConnectionQuality;
//!
//! let manager = ConnectionClassManager::default();
//! manager.register(Arc::new(|quality: ConnectionQuality| println!("now {quality}")));
//!
//! for bytes in [620000, 630000, 670000, 500000, 550000, 590000] {
//!     manager.add_bandwidth(bytes, 1000);
//! }
//! assert_eq!(manager.current_bandwidth_quality(), ConnectionQuality::Excellent);
//! ```
mod average;
mod config;
mod listener;
mod manager;

pub use average::ExponentialGeometricAverage;
pub use config::{ConfigError, EstimatorConfig};
pub use listener::{ConnectionClassStateChangeListener, ListenerId};
pub use manager::ConnectionClassManager;
