//! Smoothed one-way latency estimate.

/// Exponential moving average over half the age of the local player's
/// last server update.
#[derive(Debug, Clone)]
pub struct LatencyEstimator {
    smoothing: f32,
    average_ms: f32,
    samples: u64,
}

impl LatencyEstimator {
    pub fn new(smoothing: f32) -> Self {
        Self::with_initial(smoothing, 0.0)
    }

    pub fn with_initial(smoothing: f32, average_ms: f32) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 1.0),
            average_ms,
            samples: 0,
        }
    }

    /// Folds in the sample derived from a reported server stamp. A stamp
    /// from the future counts as zero.
    pub fn record(&mut self, local_now: u64, reported_last_update: u64) -> f32 {
        let sample = local_now.saturating_sub(reported_last_update) as f32 / 2.0;
        self.record_sample(sample);
        sample
    }

    pub fn record_sample(&mut self, sample_ms: f32) {
        self.average_ms = self.average_ms * (1.0 - self.smoothing) + sample_ms * self.smoothing;
        self.samples += 1;
    }

    pub fn average_ms(&self) -> f32 {
        self.average_ms
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}
