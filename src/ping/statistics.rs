use crate::ping::constants::*;
use crate::ping::error::{PingError, Result};
use hdrhistogram::Histogram;
use tracing::debug;

/// Round-trip statistics over the collected samples, in milliseconds.
///
/// min/avg/max/mdev are exact; percentiles come from an HDR histogram at
/// microsecond resolution.
pub struct Statistics {
    hist: Histogram<u64>,
    count: usize,
    min: f64,
    mean: f64,
    max: f64,
    mdev: f64,
}

impl Statistics {
    pub fn new(latencies_ms: &[f64]) -> Result<Self> {
        debug!(
            sample_count = latencies_ms.len(),
            "Creating statistics from round-trip samples"
        );
        let mut hist = Histogram::<u64>::new_with_bounds(
            HISTOGRAM_LOW_BOUND_US,
            HISTOGRAM_HIGH_BOUND_US,
            HISTOGRAM_SIGNIFICANT_DIGITS,
        )
        .map_err(|e| PingError::Statistics(format!("Failed to create histogram: {}", e)))?;

        let count = latencies_ms.len();
        if count == 0 {
            return Ok(Self {
                hist,
                count,
                min: 0.0,
                mean: 0.0,
                max: 0.0,
                mdev: 0.0,
            });
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &ms in latencies_ms {
            min = min.min(ms);
            max = max.max(ms);
            sum += ms;

            let us = ((ms * 1000.0).round().max(0.0) as u64)
                .clamp(HISTOGRAM_LOW_BOUND_US, HISTOGRAM_HIGH_BOUND_US);
            hist.record(us)
                .map_err(|e| PingError::Statistics(format!("Failed to record latency: {}", e)))?;
        }
        let mean = sum / count as f64;

        // Sample standard deviation; undefined below two samples, where the
        // maximum stands in.
        let mdev = if count >= 2 {
            let squares: f64 = latencies_ms.iter().map(|ms| (ms - mean).powi(2)).sum();
            (squares / (count - 1) as f64).sqrt()
        } else {
            max
        };

        debug!(min, mean, max, mdev, "Statistics calculated successfully");

        Ok(Self {
            hist,
            count,
            min,
            mean,
            max,
            mdev,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn mdev(&self) -> f64 {
        self.mdev
    }

    /// Percentile in milliseconds, e.g. `percentile(0.99)`.
    pub fn percentile(&self, quantile: f64) -> f64 {
        self.hist.value_at_quantile(quantile) as f64 / 1000.0
    }
}
