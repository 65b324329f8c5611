//! Metrics engine: derived air-quality metrics at 0.2 Hz.
//!
//! Owns three bounded rings, allocated once and never resized. Each tick
//! takes the shared-state lock, decides which rings get a new sample, then
//! recomputes every metric from the latest fused values plus the rings.
//! Missing inputs produce sentinels, never stale leftovers.

use log::info;

use iaqmon_air_lib::aqi::compute_aqi;
use iaqmon_air_lib::co2::{co2_rate_ppm_hr, co2_score};
use iaqmon_air_lib::comfort::{compute_comfort, mold_risk};
use iaqmon_air_lib::gas::gas_category;
use iaqmon_air_lib::pm::pm25_spike;
use iaqmon_air_lib::pressure::pressure_trend;
use iaqmon_air_lib::ring::{Ema, TimedRing, TimedSample};
use iaqmon_air_lib::overall_iaq_score;

use crate::clock::boot_millis;
use crate::state::{
    AqiState, ComfortState, DeviceState, MoldState, PressureTrendState, StateHandle, INDEX_SENTINEL,
};
use crate::watchdog::WatchdogHandle;

/// Metrics cadence.
pub const METRICS_PERIOD_MS: u64 = 5_000;

/// Ring geometry: samples × period = horizon.
const PRESSURE_SAMPLES: usize = 144; // 150 s apart -> 6 h
const PRESSURE_PUSH_MS: u64 = 150_000;
const CO2_SAMPLES: usize = 64; // 60 s apart -> ~1 h
const CO2_PUSH_MS: u64 = 60_000;
const PM25_SAMPLES: usize = 120; // 30 s apart -> 1 h
const PM25_PUSH_MS: u64 = 30_000;

/// CO₂ rate window and smoothing.
const RATE_WINDOW_MS: u64 = 15 * 60 * 1000;
const RATE_EMA_ALPHA: f32 = 0.25;

pub struct MetricsEngine {
    state: StateHandle,
    pressure_ring: TimedRing,
    co2_ring: TimedRing,
    pm25_ring: TimedRing,
    last_pressure_push_ms: Option<u64>,
    last_co2_push_ms: Option<u64>,
    last_pm25_push_ms: Option<u64>,
    rate_ema: Ema,
}

fn push_due(last: Option<u64>, now_ms: u64, period_ms: u64) -> bool {
    match last {
        Some(at) => now_ms.saturating_sub(at) >= period_ms,
        None => true,
    }
}

impl MetricsEngine {
    /// Allocates the rings. This is the only allocation the engine makes.
    #[must_use]
    pub fn new(state: StateHandle) -> Self {
        Self {
            state,
            pressure_ring: TimedRing::new(PRESSURE_SAMPLES),
            co2_ring: TimedRing::new(CO2_SAMPLES),
            pm25_ring: TimedRing::new(PM25_SAMPLES),
            last_pressure_push_ms: None,
            last_co2_push_ms: None,
            last_pm25_push_ms: None,
            rate_ema: Ema::new(RATE_EMA_ALPHA),
        }
    }

    /// Dedicated 0.2 Hz task. Loops until process exit.
    pub fn run(mut self) {
        let watchdog = WatchdogHandle::register("metrics");
        info!("Metrics engine started");
        loop {
            watchdog.feed();
            self.tick(boot_millis());
            std::thread::sleep(std::time::Duration::from_millis(METRICS_PERIOD_MS));
        }
    }

    /// One metrics pass under a single lock hold.
    pub fn tick(&mut self, now_ms: u64) {
        let state = self.state.clone();
        state.with(|s| self.compute(s, now_ms));
    }

    fn compute(&mut self, s: &mut DeviceState, now_ms: u64) {
        // Ring pushes, gated on elapsed time and a usable fused value
        if !s.fused.pressure_pa.is_nan()
            && push_due(self.last_pressure_push_ms, now_ms, PRESSURE_PUSH_MS)
        {
            self.pressure_ring.push(now_ms, s.fused.pressure_pa);
            self.last_pressure_push_ms = Some(now_ms);
        }
        if !s.fused.co2_ppm.is_nan() && push_due(self.last_co2_push_ms, now_ms, CO2_PUSH_MS) {
            self.co2_ring.push(now_ms, s.fused.co2_ppm);
            self.last_co2_push_ms = Some(now_ms);
        }
        if !s.fused.pm25.is_nan() && push_due(self.last_pm25_push_ms, now_ms, PM25_PUSH_MS) {
            self.pm25_ring.push(now_ms, s.fused.pm25);
            self.last_pm25_push_ms = Some(now_ms);
        }

        // EPA AQI from instantaneous fused particulates
        s.metrics.aqi = match compute_aqi(s.fused.pm25, s.fused.pm10) {
            Some(reading) => AqiState {
                value: reading.value,
                category: reading.category,
                dominant_pollutant: Some(reading.dominant_pollutant),
                pm25_subindex: reading.pm25_subindex,
                pm10_subindex: reading.pm10_subindex,
            },
            None => AqiState::default(),
        };

        // Thermal comfort and mold risk from fused temperature/humidity
        s.metrics.comfort = match compute_comfort(s.fused.temp_c, s.fused.rh_pct) {
            Some(comfort) => {
                s.metrics.mold = match mold_risk(comfort.dew_point_c) {
                    Some(risk) => MoldState {
                        score: Some(risk.score),
                        category: Some(risk.category),
                    },
                    None => MoldState::default(),
                };
                ComfortState {
                    dew_point_c: comfort.dew_point_c,
                    abs_humidity_gm3: comfort.abs_humidity_gm3,
                    heat_index_c: comfort.heat_index_c,
                    score: Some(comfort.score),
                    category: Some(comfort.category),
                }
            }
            None => {
                s.metrics.mold = MoldState::default();
                ComfortState::default()
            }
        };

        // CO₂ score
        let score = co2_score(s.fused.co2_ppm);
        s.metrics.co2_score = score.map(|v| {
            // Scores are clamped to [0, 100] by the anchor table
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rounded = v.round() as u8;
            rounded
        });

        // CO₂ rate of change, EMA-smoothed across reported values
        let co2_samples: Vec<TimedSample> = self.co2_ring.iter().collect();
        s.metrics.co2_rate_ppm_hr = match co2_rate_ppm_hr(&co2_samples, now_ms, RATE_WINDOW_MS) {
            Some(rate) => self.rate_ema.update(rate),
            None => {
                self.rate_ema.reset();
                f32::NAN
            }
        };

        // PM₂.₅ spike detection over the 30 s ring
        let pm25_samples: Vec<TimedSample> = self.pm25_ring.iter().collect();
        s.metrics.pm25_spike_detected =
            !s.fused.pm25.is_nan() && pm25_spike(&pm25_samples, now_ms);

        // Pressure trend over the 150 s ring
        let pressure_samples: Vec<TimedSample> = self.pressure_ring.iter().collect();
        let (direction, delta_hpa) = pressure_trend(&pressure_samples, now_ms);
        s.metrics.pressure_trend = PressureTrendState {
            direction,
            delta_3hr_hpa: delta_hpa,
        };

        // Gas categories (sentinel index maps to Unknown)
        s.metrics.voc_category = gas_category(s.fused.voc_index);
        s.metrics.nox_category = gas_category(s.fused.nox_index);

        // Overall IAQ blend
        let aqi_value = (s.metrics.aqi.value != INDEX_SENTINEL).then_some(s.metrics.aqi.value);
        let voc_index = (s.fused.voc_index != INDEX_SENTINEL).then_some(s.fused.voc_index);
        s.metrics.overall_iaq_score =
            overall_iaq_score(score, aqi_value, voc_index, s.metrics.comfort.score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iaqmon_air_lib::aqi::{AqiCategory, Pollutant};
    use iaqmon_air_lib::comfort::ComfortCategory;
    use iaqmon_air_lib::gas::GasCategory;
    use iaqmon_air_lib::pressure::PressureTrend;

    fn engine() -> (MetricsEngine, StateHandle) {
        let state = StateHandle::new();
        (MetricsEngine::new(state.clone()), state)
    }

    /// S1: clean room, PM₂.₅ dominant, category Good.
    #[test]
    fn test_aqi_good_scenario() {
        let (mut engine, state) = engine();
        state.with(|s| {
            s.fused.pm25 = 8.0;
            s.fused.pm10 = 20.0;
            s.fused.rh_pct = 45.0;
            s.fused.pressure_pa = 101_325.0;
        });
        engine.tick(1_000);
        state.with(|s| {
            assert!((s.metrics.aqi.pm25_subindex - 33.33).abs() < 0.05);
            assert!((s.metrics.aqi.pm10_subindex - 18.52).abs() < 0.05);
            assert_eq!(s.metrics.aqi.value, 33);
            assert_eq!(s.metrics.aqi.dominant_pollutant, Some(Pollutant::Pm25));
            assert_eq!(s.metrics.aqi.category, AqiCategory::Good);
        });
    }

    /// S2: dusty air, PM₁₀ dominant, category Moderate.
    #[test]
    fn test_aqi_moderate_pm10_dominant() {
        let (mut engine, state) = engine();
        state.with(|s| {
            s.fused.pm25 = 10.0;
            s.fused.pm10 = 100.0;
        });
        engine.tick(1_000);
        state.with(|s| {
            assert!((s.metrics.aqi.pm25_subindex - 41.67).abs() < 0.05);
            assert!((s.metrics.aqi.pm10_subindex - 73.27).abs() < 0.05);
            assert_eq!(s.metrics.aqi.value, 73);
            assert_eq!(s.metrics.aqi.dominant_pollutant, Some(Pollutant::Pm10));
            assert_eq!(s.metrics.aqi.category, AqiCategory::Moderate);
        });
    }

    /// S3: optimal comfort.
    #[test]
    fn test_comfort_optimal_scenario() {
        let (mut engine, state) = engine();
        state.with(|s| {
            s.fused.temp_c = 22.0;
            s.fused.rh_pct = 50.0;
        });
        engine.tick(1_000);
        state.with(|s| {
            assert!((s.metrics.comfort.dew_point_c - 11.1).abs() < 0.1);
            assert!((s.metrics.comfort.abs_humidity_gm3 - 9.7).abs() < 0.1);
            assert_eq!(s.metrics.comfort.heat_index_c, 22.0);
            assert_eq!(s.metrics.comfort.score, Some(100));
            assert_eq!(s.metrics.comfort.category, Some(ComfortCategory::Comfortable));
            // Dew point ~11 °C: moderate mold band
            let mold = s.metrics.mold.score.unwrap();
            assert!((25..=50).contains(&mold), "mold score {mold}");
        });
    }

    /// S4: CO₂ score at and between the anchors.
    #[test]
    fn test_co2_score_scenarios() {
        let (mut engine, state) = engine();
        let cases = [
            (400.0, 100u8),
            (1000.0, 50),
            (2000.0, 0),
            // Interpolated halfway between 400 (100) and 600 (85): 92.5 -> 93
            (500.0, 93),
        ];
        for (ppm, expected) in cases {
            state.with(|s| s.fused.co2_ppm = ppm);
            engine.tick(1_000);
            state.with(|s| assert_eq!(s.metrics.co2_score, Some(expected), "at {ppm} ppm"));
        }
    }

    #[test]
    fn test_all_sentinels_without_input() {
        let (mut engine, state) = engine();
        engine.tick(1_000);
        state.with(|s| {
            assert_eq!(s.metrics.aqi.value, INDEX_SENTINEL);
            assert_eq!(s.metrics.aqi.category, AqiCategory::Unknown);
            assert_eq!(s.metrics.comfort.score, None);
            assert!(s.metrics.co2_rate_ppm_hr.is_nan());
            assert_eq!(s.metrics.co2_score, None);
            assert_eq!(s.metrics.voc_category, GasCategory::Unknown);
            assert_eq!(s.metrics.pressure_trend.direction, PressureTrend::Unknown);
            assert!(!s.metrics.pm25_spike_detected);
            assert_eq!(s.metrics.mold.score, None);
            assert_eq!(s.metrics.overall_iaq_score, None);
        });
    }

    /// Property: the rate stays null until 5 minutes of CO₂ history exist.
    #[test]
    fn test_co2_rate_null_while_stabilizing() {
        let (mut engine, state) = engine();
        state.with(|s| s.fused.co2_ppm = 600.0);

        // Pushes at 0, 60 s, ..., 240 s: span 4 min, still stabilizing
        for minute in 0..5u64 {
            state.with(|s| s.fused.co2_ppm = 600.0 + minute as f32 * 10.0);
            engine.tick(minute * 60_000);
            state.with(|s| assert!(s.metrics.co2_rate_ppm_hr.is_nan(), "at {minute} min"));
        }

        // Sixth sample: span reaches 5 min and a rate appears (+600 ppm/hr)
        state.with(|s| s.fused.co2_ppm = 650.0);
        engine.tick(5 * 60_000);
        state.with(|s| {
            let rate = s.metrics.co2_rate_ppm_hr;
            assert!((rate - 600.0).abs() < 5.0, "rate {rate}");
        });
    }

    #[test]
    fn test_co2_rate_is_ema_smoothed() {
        let (mut engine, state) = engine();
        // Rising 10 ppm/min for 10 minutes
        for minute in 0..=10u64 {
            state.with(|s| s.fused.co2_ppm = 600.0 + minute as f32 * 10.0);
            engine.tick(minute * 60_000);
        }
        let first = state.with(|s| s.metrics.co2_rate_ppm_hr);
        assert!((first - 600.0).abs() < 10.0);

        // Level off: the raw slope drops, the EMA follows gradually
        for minute in 11..=13u64 {
            state.with(|s| s.fused.co2_ppm = 700.0);
            engine.tick(minute * 60_000);
        }
        let smoothed = state.with(|s| s.metrics.co2_rate_ppm_hr);
        assert!(smoothed < first, "EMA should move down: {smoothed} vs {first}");
        assert!(smoothed > 0.0, "EMA should not jump straight to the new slope");
    }

    #[test]
    fn test_pm25_spike_end_to_end() {
        let (mut engine, state) = engine();
        // 9 quiet samples 30 s apart
        for i in 0..9u64 {
            state.with(|s| s.fused.pm25 = 5.0);
            engine.tick(i * 30_000);
        }
        state.with(|s| assert!(!s.metrics.pm25_spike_detected));

        // Cooking event: the next sample jumps far past both thresholds
        state.with(|s| s.fused.pm25 = 60.0);
        engine.tick(9 * 30_000);
        state.with(|s| assert!(s.metrics.pm25_spike_detected));
    }

    #[test]
    fn test_pressure_trend_needs_an_hour() {
        let (mut engine, state) = engine();
        // 30 minutes of falling pressure: still Unknown
        for i in 0..12u64 {
            state.with(|s| s.fused.pressure_pa = 101_325.0 - i as f32 * 20.0);
            engine.tick(i * 150_000);
        }
        state.with(|s| {
            assert_eq!(s.metrics.pressure_trend.direction, PressureTrend::Unknown);
        });

        // Keep falling past the hour mark: Falling with a real delta
        for i in 12..30u64 {
            state.with(|s| s.fused.pressure_pa = 101_325.0 - i as f32 * 20.0);
            engine.tick(i * 150_000);
        }
        state.with(|s| {
            assert_eq!(s.metrics.pressure_trend.direction, PressureTrend::Falling);
            assert!(s.metrics.pressure_trend.delta_3hr_hpa < -1.5);
        });
    }

    #[test]
    fn test_gas_categories_and_overall_score() {
        let (mut engine, state) = engine();
        state.with(|s| {
            s.fused.pm25 = 8.0;
            s.fused.pm10 = 20.0;
            s.fused.temp_c = 22.0;
            s.fused.rh_pct = 50.0;
            s.fused.co2_ppm = 400.0;
            s.fused.voc_index = 80;
            s.fused.nox_index = 1;
        });
        engine.tick(1_000);
        state.with(|s| {
            assert_eq!(s.metrics.voc_category, GasCategory::Excellent);
            assert_eq!(s.metrics.nox_category, GasCategory::Excellent);
            // co2 100 * .35 + (100 - 33/5) * .35 + voc 84 * .2 + comfort 100 * .1
            // = 35 + 32.69 + 16.8 + 10 = 94.49 -> 94
            assert_eq!(s.metrics.overall_iaq_score, Some(94));
        });
    }

    #[test]
    fn test_rings_do_not_push_invalid_values() {
        let (mut engine, state) = engine();
        // NaN fused values: nothing lands in the rings
        for i in 0..5u64 {
            engine.tick(i * 60_000);
        }
        assert!(engine.co2_ring.is_empty());
        assert!(engine.pressure_ring.is_empty());
        assert!(engine.pm25_ring.is_empty());
    }
}
