//! Barometric pressure trend.

use serde::{Deserialize, Serialize};

use crate::ring::TimedSample;

/// Trend window: compare the oldest sample within the last 3 hours.
const TREND_WINDOW_MS: u64 = 3 * 60 * 60 * 1000;
/// Minimum history before a trend is reported.
const MIN_HISTORY_MS: u64 = 60 * 60 * 1000;
/// Change threshold, in hPa, for calling a trend.
const TREND_THRESHOLD_HPA: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureTrend {
    Rising,
    Stable,
    Falling,
    Unknown,
}

/// Classify the pressure trend from timestamped samples in Pa.
///
/// Returns the direction and the 3-hour delta in hPa. With less than one
/// hour of samples in the window the trend is `Unknown` and the delta 0.
#[must_use]
pub fn pressure_trend(samples: &[TimedSample], now_ms: u64) -> (PressureTrend, f32) {
    let cutoff = now_ms.saturating_sub(TREND_WINDOW_MS);
    let window: Vec<TimedSample> = samples.iter().filter(|s| s.at_ms >= cutoff).copied().collect();
    let (oldest, latest) = match (window.first(), window.last()) {
        (Some(o), Some(l)) => (*o, *l),
        _ => return (PressureTrend::Unknown, 0.0),
    };
    if latest.at_ms - oldest.at_ms < MIN_HISTORY_MS {
        return (PressureTrend::Unknown, 0.0);
    }

    let delta_hpa = (latest.value - oldest.value) / 100.0;
    let trend = if delta_hpa < -TREND_THRESHOLD_HPA {
        PressureTrend::Falling
    } else if delta_hpa > TREND_THRESHOLD_HPA {
        PressureTrend::Rising
    } else {
        PressureTrend::Stable
    };
    (trend, delta_hpa)
}
