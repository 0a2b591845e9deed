//! Scalar Kalman filter over delay measurements.

/// One-dimensional filter tracking the delay estimate for a slave zone.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    process_variance: f64,
    measurement_variance: f64,
    estimated_delay: f64,
    estimated_variance: f64,
    initialized: bool,
}

impl KalmanFilter {
    pub fn new(process_variance: f64, measurement_variance: f64) -> Self {
        Self {
            process_variance,
            measurement_variance,
            estimated_delay: 0.0,
            estimated_variance: 1.0,
            initialized: false,
        }
    }

    /// Fold in a measurement and return the updated estimate.
    pub fn update(&mut self, measurement: f64) -> f64 {
        if !self.initialized {
            self.estimated_delay = measurement;
            self.estimated_variance = self.measurement_variance;
            self.initialized = true;
            return measurement;
        }

        let predicted_variance = self.estimated_variance + self.process_variance;
        let gain = predicted_variance / (predicted_variance + self.measurement_variance);
        self.estimated_delay += gain * (measurement - self.estimated_delay);
        self.estimated_variance = (1.0 - gain) * predicted_variance;
        self.estimated_delay
    }

    pub fn estimate(&self) -> f64 {
        self.estimated_delay
    }
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new(1e-5, 1e-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_measurement_seeds_the_estimate() {
        let mut filter = KalmanFilter::default();
        assert_eq!(filter.update(0.25), 0.25);
    }

    #[test]
    fn converges_toward_a_constant_signal() {
        let mut filter = KalmanFilter::default();
        filter.update(0.0);
        let mut estimate = 0.0;
        for _ in 0..200 {
            estimate = filter.update(0.1);
        }
        assert!((estimate - 0.1).abs() < 1e-3, "estimate was {estimate}");
    }

    #[test]
    fn smooths_out_a_single_outlier() {
        let mut filter = KalmanFilter::default();
        for _ in 0..50 {
            filter.update(0.1);
        }
        let estimate = filter.update(5.0);
        assert!(estimate < 0.5, "outlier dominated: {estimate}");
    }
}
