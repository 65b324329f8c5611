//! Particulate corrections and spike detection.

use crate::ring::{median, sample_stddev, TimedSample};

/// Default humidity-growth coefficients `(a, b)` for the κ-Köhler style
/// correction `pm_dry = pm / (1 + a·(rh/100)^b)`.
pub const DEFAULT_RH_COEFFICIENTS: (f32, f32) = (0.3, 3.0);

/// RH above this is too close to fog for the correction to be trusted.
pub const RH_CORRECTION_LIMIT_PCT: f32 = 90.0;

/// Spike window over the 30 s ring.
const SPIKE_WINDOW_MS: u64 = 10 * 60 * 1000;
/// Minimum samples for a meaningful baseline and deviation.
const SPIKE_MIN_SAMPLES: usize = 5;
/// Absolute floor a spike must clear above the baseline, in µg/m³.
const SPIKE_ABS_FLOOR: f32 = 15.0;
/// Deviation multiple a spike must clear above the baseline.
const SPIKE_SIGMA_FACTOR: f32 = 2.5;

/// Hygroscopic growth divisor for particulate readings at a given RH.
///
/// Optical particle counters over-read in humid air because droplets grow;
/// dividing by this factor estimates the dry mass.
#[must_use]
pub fn humidity_growth_factor(rh_pct: f32, a: f32, b: f32) -> f32 {
    1.0 + a * (rh_pct / 100.0).powf(b)
}

/// Confidence in the PM₂.₅ reading, 0..=100.
///
/// Degrades as RH climbs toward the correction limit, as the humidity input
/// ages past its 60 s freshness budget, and when the owning sensor is
/// unhealthy.
#[must_use]
pub fn pm25_quality(rh_pct: f32, rh_age_s: u32, sensor_healthy: bool) -> u8 {
    let mut quality = 100.0f32;

    if rh_pct.is_nan() {
        quality -= 40.0;
    } else if rh_pct > 60.0 {
        // Linear 0..40 penalty between 60 and 90 %RH
        quality -= ((rh_pct - 60.0) / 30.0).clamp(0.0, 1.0) * 40.0;
    }

    if rh_age_s > 60 {
        // Linear 0..40 penalty as the RH input ages from 60 s to 5 min
        #[allow(clippy::cast_precision_loss)]
        let staleness = ((rh_age_s - 60) as f32 / 240.0).clamp(0.0, 1.0);
        quality -= staleness * 40.0;
    }

    if !sensor_healthy {
        quality -= 20.0;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let q = quality.clamp(0.0, 100.0).round() as u8;
    q
}

/// Decide whether the latest PM₂.₅ sample is a spike.
///
/// Over the most recent 10 minutes the median is the baseline and the sample
/// standard deviation the noise estimate. A spike must clear BOTH
/// `baseline + 2.5σ` and `baseline + 15 µg/m³`; either alone is not enough
/// (a quiet room has tiny σ, a smoky one a high floor).
#[must_use]
pub fn pm25_spike(samples: &[TimedSample], now_ms: u64) -> bool {
    let cutoff = now_ms.saturating_sub(SPIKE_WINDOW_MS);
    let mut window: Vec<f32> = samples
        .iter()
        .filter(|s| s.at_ms >= cutoff)
        .map(|s| s.value)
        .collect();
    if window.len() < SPIKE_MIN_SAMPLES {
        return false;
    }
    let latest = window[window.len() - 1];
    let Some(stddev) = sample_stddev(&window) else {
        return false;
    };
    let Some(baseline) = median(&mut window) else {
        return false;
    };
    latest > baseline + SPIKE_SIGMA_FACTOR * stddev && latest > baseline + SPIKE_ABS_FLOOR
}
