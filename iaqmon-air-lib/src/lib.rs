//! Air-quality math for the IAQ monitor
//!
//! This library holds the numeric core of the monitor: EPA AQI interpolation,
//! thermal comfort, CO₂ scoring, mold risk, Sensirion gas-index categories,
//! bounded time-series rings with their statistics, and the cross-sensor
//! compensation formulas used by the fusion engine. It is hardware-agnostic
//! and can be tested without a device.
//!
//! Functions take plain numbers and return `Option` where an input may be
//! missing; callers map `None` onto their own sentinel representation.

pub mod abc;
pub mod aqi;
pub mod co2;
pub mod comfort;
pub mod gas;
pub mod pm;
pub mod pressure;
pub mod ring;

pub use abc::BaselineTracker;
pub use aqi::{compute_aqi, AqiCategory, AqiReading, Pollutant};
pub use co2::{co2_rate_ppm_hr, co2_score, pressure_compensated_co2};
pub use comfort::{
    abs_humidity_gm3, compute_comfort, dew_point_c, heat_index_c, mold_risk, rh_at_temperature,
    ComfortCategory, ComfortReading, MoldCategory, MoldRisk,
};
pub use gas::{gas_category, voc_score, GasCategory};
pub use pm::{humidity_growth_factor, pm25_quality, pm25_spike};
pub use pressure::{pressure_trend, PressureTrend};
pub use ring::{Ema, TimedRing, TimedSample};

/// Weights for the overall IAQ score, in order: CO₂, AQI, VOC, comfort.
const IAQ_WEIGHTS: [f32; 4] = [0.35, 0.35, 0.20, 0.10];

/// Combine the component scores into the overall IAQ score (0..=100).
///
/// The AQI contribution is `100 - aqi/5` (AQI 0 → 100, AQI 500 → 0) and the
/// VOC contribution is linear in the gas index (index 0 → 100, 500 → 0).
/// Returns `None` when any component is missing, since a partial blend would
/// silently overweight the remaining inputs.
#[must_use]
pub fn overall_iaq_score(
    co2_score: Option<f32>,
    aqi_value: Option<u16>,
    voc_index: Option<u16>,
    comfort_score: Option<u8>,
) -> Option<u8> {
    let co2 = co2_score?;
    let aqi = f32::from(aqi_value?);
    let voc = voc_score(voc_index?);
    let comfort = f32::from(comfort_score?);

    let aqi_component = (100.0 - aqi / 5.0).clamp(0.0, 100.0);
    let blended = IAQ_WEIGHTS[0] * co2
        + IAQ_WEIGHTS[1] * aqi_component
        + IAQ_WEIGHTS[2] * voc
        + IAQ_WEIGHTS[3] * comfort;

    // Components are all in [0, 100] so the blend is too; the cast is safe.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = blended.clamp(0.0, 100.0).round() as u8;
    Some(score)
}
