//! Incremental, windowed CVD statistics.
//!
//! A `VecDeque` of timestamped points, evicted by age, recomputing mean and
//! variance over the window on each push rather than a Welford-style
//! incremental accumulator: Welford has no removal step, so it can't shrink
//! a sliding window as points age out. Cheap at this pipeline's
//! per-aggregator batch sizes.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct WindowPoint {
    timestamp: i64,
    cvd_value: f64,
    delta: f64,
}

/// Rolling window of `(timestamp, cvdValue, delta)` for one aggregator.
pub struct CvdWindow {
    window_ms: i64,
    points: VecDeque<WindowPoint>,
}

#[derive(Debug, Clone, Copy)]
pub struct WindowStats {
    pub cvd_value: f64,
    pub delta: f64,
    pub z_score: f64,
    pub delta_z_score: f64,
}

impl CvdWindow {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            points: VecDeque::new(),
        }
    }

    fn evict_stale(&mut self, now: i64) {
        let cutoff = now - self.window_ms;
        while let Some(front) = self.points.front() {
            if front.timestamp < cutoff {
                self.points.pop_front();
            } else {
                break;
            }
        }
    }

    /// Push a new `(cvdValue, delta)` observation at `timestamp`, evict
    /// anything older than the window, and return the resulting z-scores.
    pub fn push(&mut self, timestamp: i64, cvd_value: f64, delta: f64) -> WindowStats {
        self.evict_stale(timestamp);
        self.points.push_back(WindowPoint {
            timestamp,
            cvd_value,
            delta,
        });

        let (mean_cum, std_cum) = mean_and_std(self.points.iter().map(|p| p.cvd_value));
        let (mean_delta, std_delta) = mean_and_std(self.points.iter().map(|p| p.delta));

        let z_score = z_score_or_zero(cvd_value, mean_cum, std_cum);
        let delta_z_score = z_score_or_zero(delta, mean_delta, std_delta);

        WindowStats {
            cvd_value,
            delta,
            z_score,
            delta_z_score,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Sample mean and population standard deviation over `values`.
fn mean_and_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let count = values.clone().count();
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = values.clone().sum::<f64>() / count as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    (mean, variance.sqrt())
}

/// `0` when the window has too few points or zero variance.9.
fn z_score_or_zero(value: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev <= f64::EPSILON {
        0.0
    } else {
        (value - mean) / std_dev
    }
}

/// `sign(v)·ln(|v|)` for `|v| ≥ 1`, else `0`.
pub fn signed_log(v: f64) -> f64 {
    if v.abs() < 1.0 {
        0.0
    } else {
        v.signum() * v.abs().ln()
    }
}

use crate::models::TriggerSource;

/// Pick whichever of `z_score`/`delta_z_score` has the larger magnitude.
pub fn select_trigger(z_score: f64, delta_z_score: f64) -> (TriggerSource, f64) {
    if z_score.abs() >= delta_z_score.abs() {
        (TriggerSource::Cumulative, z_score)
    } else {
        (TriggerSource::Delta, delta_z_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_few_points_yields_zero_zscore() {
        let mut window = CvdWindow::new(72 * 3600 * 1000);
        let stats = window.push(0, 10.0, 10.0);
        assert_eq!(stats.z_score, 0.0);
        assert_eq!(stats.delta_z_score, 0.0);
    }

    #[test]
    fn constant_series_has_zero_variance_and_zero_zscore() {
        let mut window = CvdWindow::new(72 * 3600 * 1000);
        for i in 0..5 {
            window.push(i * 1000, 5.0, 0.0);
        }
        let stats = window.push(5000, 5.0, 0.0);
        assert_eq!(stats.z_score, 0.0);
    }

    #[test]
    fn eviction_drops_points_older_than_window() {
        let mut window = CvdWindow::new(1000);
        window.push(0, 1.0, 1.0);
        window.push(500, 2.0, 1.0);
        assert_eq!(window.len(), 2);
        window.push(2000, 3.0, 1.0);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn signed_log_is_zero_below_unit_magnitude() {
        assert_eq!(signed_log(0.5), 0.0);
        assert_eq!(signed_log(-0.9), 0.0);
        assert!(signed_log(std::f64::consts::E) > 0.0);
        assert!(signed_log(-std::f64::consts::E) < 0.0);
    }

    #[test]
    fn trigger_source_picks_larger_magnitude() {
        assert_eq!(select_trigger(3.0, 1.0).0, TriggerSource::Cumulative);
        assert_eq!(select_trigger(1.0, -3.5).0, TriggerSource::Delta);
    }
}
