use crate::quality::ConnectionQuality;

/// Tunables of the bandwidth classifier. All bandwidths are in bits per second.
///
/// Deserializes from partial documents: missing fields keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Confirming samples required before a candidate tier is published.
    pub samples_to_quality_change: u32,
    /// Upper boundary of [`ConnectionQuality::Poor`].
    pub poor_bandwidth_bps: f64,
    /// Upper boundary of [`ConnectionQuality::Moderate`].
    pub moderate_bandwidth_bps: f64,
    /// Upper boundary of [`ConnectionQuality::Good`].
    pub good_bandwidth_bps: f64,
    /// Width of the hysteresis gate. Half of it applies on each side of a band.
    pub hysteresis_percent: f64,
    /// Samples at or below this bandwidth are discarded as noise.
    pub min_sample_bandwidth_bps: f64,
    /// Weight of a new sample in the moving average.
    pub decay_constant: f64,
}

impl EstimatorConfig {
    pub const DEFAULT_SAMPLES_TO_QUALITY_CHANGE: u32 = 5;
    pub const DEFAULT_POOR_BANDWIDTH_BPS: f64 = 150_000.0;
    pub const DEFAULT_MODERATE_BANDWIDTH_BPS: f64 = 550_000.0;
    pub const DEFAULT_GOOD_BANDWIDTH_BPS: f64 = 2_000_000.0;
    pub const DEFAULT_HYSTERESIS_PERCENT: f64 = 20.0;
    pub const DEFAULT_MIN_SAMPLE_BANDWIDTH_BPS: f64 = 10_000.0;
    pub const DEFAULT_DECAY_CONSTANT: f64 = 0.05;
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            samples_to_quality_change: Self::DEFAULT_SAMPLES_TO_QUALITY_CHANGE,
            poor_bandwidth_bps: Self::DEFAULT_POOR_BANDWIDTH_BPS,
            moderate_bandwidth_bps: Self::DEFAULT_MODERATE_BANDWIDTH_BPS,
            good_bandwidth_bps: Self::DEFAULT_GOOD_BANDWIDTH_BPS,
            hysteresis_percent: Self::DEFAULT_HYSTERESIS_PERCENT,
            min_sample_bandwidth_bps: Self::DEFAULT_MIN_SAMPLE_BANDWIDTH_BPS,
            decay_constant: Self::DEFAULT_DECAY_CONSTANT,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error(
        "bandwidth boundaries must be positive and ascending: poor={poor}, moderate={moderate}, good={good}"
    )]
    UnorderedBoundaries { poor: f64, moderate: f64, good: f64 },
    #[error("hysteresis percent must be within [0, 100), got {0}")]
    InvalidHysteresis(f64),
    #[error("minimum sample bandwidth must be a non-negative number, got {0}")]
    InvalidSampleFloor(f64),
    #[error("decay constant must be within (0, 1], got {0}")]
    InvalidDecay(f64),
}

impl EstimatorConfig {
    /// Checks that the configuration describes a usable classifier.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (poor, moderate, good) = (
            self.poor_bandwidth_bps,
            self.moderate_bandwidth_bps,
            self.good_bandwidth_bps,
        );
        if !(poor > 0.0 && poor < moderate && moderate < good && good.is_finite()) {
            return Err(ConfigError::UnorderedBoundaries {
                poor,
                moderate,
                good,
            });
        }
        if !(0.0..100.0).contains(&self.hysteresis_percent) {
            return Err(ConfigError::InvalidHysteresis(self.hysteresis_percent));
        }
        if !(self.min_sample_bandwidth_bps >= 0.0 && self.min_sample_bandwidth_bps.is_finite()) {
            return Err(ConfigError::InvalidSampleFloor(
                self.min_sample_bandwidth_bps,
            ));
        }
        if !(self.decay_constant > 0.0 && self.decay_constant <= 1.0) {
            return Err(ConfigError::InvalidDecay(self.decay_constant));
        }
        Ok(())
    }

    /// Maps an average bandwidth to its tier, ignoring hysteresis.
    pub fn classify(&self, bits_per_second: f64) -> ConnectionQuality {
        if bits_per_second < 0.0 || bits_per_second.is_nan() {
            ConnectionQuality::Unknown
        } else if bits_per_second < self.poor_bandwidth_bps {
            ConnectionQuality::Poor
        } else if bits_per_second < self.moderate_bandwidth_bps {
            ConnectionQuality::Moderate
        } else if bits_per_second < self.good_bandwidth_bps {
            ConnectionQuality::Good
        } else {
            ConnectionQuality::Excellent
        }
    }

    /// Lower and upper boundary of a tier's band. `Unknown` has no band.
    fn band(&self, quality: ConnectionQuality) -> Option<(f64, f64)> {
        match quality {
            ConnectionQuality::Unknown => None,
            ConnectionQuality::Poor => Some((0.0, self.poor_bandwidth_bps)),
            ConnectionQuality::Moderate => {
                Some((self.poor_bandwidth_bps, self.moderate_bandwidth_bps))
            }
            ConnectionQuality::Good => Some((self.moderate_bandwidth_bps, self.good_bandwidth_bps)),
            ConnectionQuality::Excellent => Some((self.good_bandwidth_bps, f64::INFINITY)),
        }
    }

    /// Whether `average` lies far enough outside the band of `published` to leave it.
    ///
    /// With `h = hysteresis_percent / 2`, leaving upwards requires exceeding
    /// `top * 100 / (100 - h)` and leaving downwards requires falling below
    /// `bottom * (100 - h) / 100`. The two factors are reciprocal, so the upward gate is slightly
    /// wider than the downward one in absolute terms.
    pub fn is_outside_band(&self, published: ConnectionQuality, average: f64) -> bool {
        let Some((bottom, top)) = self.band(published) else {
            return true;
        };
        let keep = (100.0 - self.hysteresis_percent / 2.0) / 100.0;
        if average > top {
            average > top / keep
        } else {
            average < bottom * keep
        }
    }
}
