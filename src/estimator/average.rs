/// Exponentially weighted moving average computed in log space.
///
/// Bandwidth samples are roughly log-normal, so averaging their logarithms keeps a single
/// outlier from dominating the estimate. For the first `ceil(1 / decay)` samples the weights
/// ramp up so that the very first measurement does not linger as a bias.
#[derive(Debug, Clone)]
pub struct ExponentialGeometricAverage {
    decay_constant: f64,
    cutover: u64,
    value: Option<f64>,
    count: u64,
}

impl ExponentialGeometricAverage {
    pub fn new(decay_constant: f64) -> Self {
        let cutover = if decay_constant > 0.0 {
            (1.0 / decay_constant).ceil() as u64
        } else {
            u64::MAX
        };
        Self {
            decay_constant,
            cutover,
            value: None,
            count: 0,
        }
    }

    /// Folds a strictly positive measurement into the average. Other values are ignored.
    pub fn add_measurement(&mut self, measurement: f64) {
        if !(measurement > 0.0 && measurement.is_finite()) {
            return;
        }
        let keep_constant = 1.0 - self.decay_constant;
        let next = match self.value {
            Some(value) if self.count > self.cutover => {
                (keep_constant * value.ln() + self.decay_constant * measurement.ln()).exp()
            }
            Some(value) => {
                let retained = keep_constant * self.count as f64 / (self.count as f64 + 1.0);
                let newcomer = 1.0 - retained;
                (retained * value.ln() + newcomer * measurement.ln()).exp()
            }
            None => measurement,
        };
        self.value = Some(next);
        self.count += 1;
    }

    /// Current average, `None` before the first measurement.
    pub fn average(&self) -> Option<f64> {
        self.value
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.value = None;
        self.count = 0;
    }
}
