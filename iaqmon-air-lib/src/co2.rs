//! CO₂ scoring, rate of change, and pressure compensation.

use crate::ring::{least_squares_slope, median3_filter, TimedSample};

/// Score anchors: (ppm, score). Linear between adjacent anchors, clamped at
/// the ends. 500 ppm interpolates to 92.5.
const SCORE_ANCHORS: [(f32, f32); 6] = [
    (400.0, 100.0),
    (600.0, 85.0),
    (800.0, 70.0),
    (1000.0, 50.0),
    (1500.0, 25.0),
    (2000.0, 0.0),
];

/// Reference sea-level pressure in Pa.
pub const PRESSURE_REF_PA: f32 = 101_325.0;

/// Plausible ambient pressure band for compensation, in Pa.
pub const PRESSURE_PLAUSIBLE_PA: (f32, f32) = (95_000.0, 106_000.0);

/// Rate slope is clamped to this magnitude (ppm/hr).
pub const MAX_RATE_PPM_HR: f32 = 2500.0;

/// Minimum sample span before a rate is reported (stabilizing below this).
const MIN_RATE_SPAN_MS: u64 = 5 * 60 * 1000;

/// Map a CO₂ concentration onto a 0..=100 score.
///
/// Monotonic non-increasing piecewise-linear over [`SCORE_ANCHORS`]; values
/// below 400 ppm score 100, above 2000 ppm score 0. `None` for NaN or
/// non-positive input.
#[must_use]
pub fn co2_score(co2_ppm: f32) -> Option<f32> {
    if co2_ppm.is_nan() || co2_ppm <= 0.0 {
        return None;
    }
    let (first_ppm, first_score) = SCORE_ANCHORS[0];
    if co2_ppm <= first_ppm {
        return Some(first_score);
    }
    for pair in SCORE_ANCHORS.windows(2) {
        let (lo_ppm, lo_score) = pair[0];
        let (hi_ppm, hi_score) = pair[1];
        if co2_ppm <= hi_ppm {
            let t = (co2_ppm - lo_ppm) / (hi_ppm - lo_ppm);
            return Some((lo_score + t * (hi_score - lo_score)).clamp(0.0, 100.0));
        }
    }
    Some(0.0)
}

/// Pressure-compensate a CO₂ reading: `co2 · P_ref / P_meas`.
///
/// The caller gates on the pressure being valid and plausible.
#[must_use]
pub fn pressure_compensated_co2(co2_ppm: f32, pressure_pa: f32, p_ref_pa: f32) -> f32 {
    co2_ppm * (p_ref_pa / pressure_pa)
}

/// CO₂ rate of change in ppm/hr from a window of timestamped samples.
///
/// Selects samples within `window_ms` of `now_ms`, requires at least 5
/// minutes of span (else the sensor is still stabilizing and `None` is
/// returned), applies a 3-point median filter, then fits a least-squares
/// slope against time in hours. The result is clamped to ±2500 ppm/hr.
/// EMA smoothing of successive reported rates is the caller's job.
#[must_use]
pub fn co2_rate_ppm_hr(samples: &[TimedSample], now_ms: u64, window_ms: u64) -> Option<f32> {
    let cutoff = now_ms.saturating_sub(window_ms);
    let window: Vec<TimedSample> = samples.iter().filter(|s| s.at_ms >= cutoff).copied().collect();
    let (first, last) = match (window.first(), window.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return None,
    };
    if last.at_ms - first.at_ms < MIN_RATE_SPAN_MS {
        return None;
    }

    let values: Vec<f32> = window.iter().map(|s| s.value).collect();
    let filtered = median3_filter(&values);

    let points: Vec<(f64, f64)> = window
        .iter()
        .zip(filtered.iter())
        .map(|(s, &v)| {
            #[allow(clippy::cast_precision_loss)]
            let hours = (s.at_ms - first.at_ms) as f64 / 3_600_000.0;
            (hours, f64::from(v))
        })
        .collect();

    least_squares_slope(&points).map(|slope| {
        #[allow(clippy::cast_possible_truncation)]
        let slope = slope as f32;
        slope.clamp(-MAX_RATE_PPM_HR, MAX_RATE_PPM_HR)
    })
}
