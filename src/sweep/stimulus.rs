//! Stimulus sequence generation.

use crate::config::MeasurementConfig;

/// Builds the ordered stimulus voltages for a sweep: `points` evenly spaced
/// values from start to stop inclusive. A bidirectional sweep appends the
/// same values reversed, minus the turnaround apex, so the return leg
/// re-visits every forward point without double-sampling the endpoint.
pub fn stimulus_points(config: &MeasurementConfig) -> Vec<f64> {
    let n = config.points;
    // Degenerate counts are rejected by configuration validation before a
    // sweep starts; answer them here anyway rather than underflow.
    if n < 2 {
        return vec![config.start_voltage; n];
    }
    let step = (config.stop_voltage - config.start_voltage) / (n - 1) as f64;
    let mut points: Vec<f64> = (0..n)
        .map(|i| {
            if i == n - 1 {
                // Land exactly on the endpoint despite rounding.
                config.stop_voltage
            } else {
                config.start_voltage + i as f64 * step
            }
        })
        .collect();
    if config.bidirectional {
        let forward = points.clone();
        points.extend(forward.iter().rev().skip(1));
    }
    points
}
