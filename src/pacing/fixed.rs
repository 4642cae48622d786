//! Fixed-form pacing: a stimulus interpolated from a precomputed
//! `(t_i, y_i)` time series (spec.md §4.3). Never generates discontinuity
//! events; sampled afresh at every RHS evaluation.

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Default)]
pub struct FixedPacing {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl FixedPacing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates strict monotonicity in time and stores the series.
    pub fn populate(&mut self, series: &[(f64, f64)]) -> EngineResult<()> {
        if series.len() < 2 {
            return Err(EngineError::InvalidPacing(
                "fixed pacing series must have at least two points".to_string(),
            ));
        }
        for window in series.windows(2) {
            if window[1].0 <= window[0].0 {
                return Err(EngineError::InvalidPacing(format!(
                    "fixed pacing series is not strictly increasing in time at t={}",
                    window[1].0
                )));
            }
        }
        self.times = series.iter().map(|(t, _)| *t).collect();
        self.values = series.iter().map(|(_, y)| *y).collect();
        Ok(())
    }

    /// Linear interpolation between adjacent samples; clamped to the
    /// nearest endpoint outside the series' time range.
    pub fn get_level(&self, t: f64) -> f64 {
        let n = self.times.len();
        if t <= self.times[0] {
            return self.values[0];
        }
        if t >= self.times[n - 1] {
            return self.values[n - 1];
        }
        // Linear scan is adequate for the small protocol sizes this engine
        // targets; a binary search would be the natural upgrade for large
        // series.
        let i = self
            .times
            .windows(2)
            .position(|w| t >= w[0] && t <= w[1])
            .unwrap_or(n - 2);
        let (t0, t1) = (self.times[i], self.times[i + 1]);
        let (y0, y1) = (self.values[i], self.values[i + 1]);
        y0 + (y1 - y0) * (t - t0) / (t1 - t0)
    }
}
