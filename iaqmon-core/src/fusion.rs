//! Fusion engine: cross-sensor compensation at 1 Hz.
//!
//! Each tick takes the shared-state lock once, reads `raw.*`, and rewrites
//! `fused.*` and `fusion_diag.*` from scratch; fusion is a pure function of
//! the latest raw readings plus the ABC tracker, so re-running it with the
//! same inputs yields the same outputs. Never calls a driver. An invalid or
//! NaN input leaves the corresponding fused field at its sentinel.
//!
//! Compensation order: temperature self-heat offset, RH re-evaluated at the
//! corrected temperature, particulate humidity correction, CO₂ pressure
//! compensation, CO₂ automatic baseline correction.

use log::info;

use iaqmon_air_lib::abc::{BaselineTracker, DEFAULT_OUTDOOR_PPM};
use iaqmon_air_lib::co2::{pressure_compensated_co2, PRESSURE_PLAUSIBLE_PA, PRESSURE_REF_PA};
use iaqmon_air_lib::comfort::rh_at_temperature;
use iaqmon_air_lib::pm::{humidity_growth_factor, pm25_quality, RH_CORRECTION_LIMIT_PCT};

use crate::clock::{boot_millis, WallClock};
use crate::sensors::{Field, SensorId, SensorState};
use crate::settings::SettingsHandle;
use crate::state::{DeviceState, StateHandle, INDEX_SENTINEL};
use crate::watchdog::WatchdogHandle;

/// Fusion cadence.
pub const FUSION_PERIOD_MS: u64 = 1_000;

/// RH older than this no longer gates the particulate correction.
const RH_FRESHNESS_MS: u64 = 60_000;

pub struct FusionEngine {
    state: StateHandle,
    settings: SettingsHandle,
    pm_rh_a: f32,
    pm_rh_b: f32,
    temp_offset_c: f32,
    pressure_ref_pa: f32,
    abc: BaselineTracker,
    wall_clock: Option<Box<dyn WallClock>>,
    persisted_baseline: Option<u16>,
}

impl FusionEngine {
    /// Load coefficients and the persisted ABC baseline. Without a wall
    /// clock the ABC tracker stays dormant (no synchronized local time means
    /// no trustworthy "night").
    #[must_use]
    pub fn new(
        state: StateHandle,
        settings: SettingsHandle,
        wall_clock: Option<Box<dyn WallClock>>,
    ) -> Self {
        let cfg = settings.load_fusion();
        let mut abc = BaselineTracker::new(DEFAULT_OUTDOOR_PPM);
        if let Some(baseline) = cfg.abc_baseline_ppm {
            info!("Restoring ABC baseline {baseline} ppm");
            abc.restore(f32::from(baseline));
        }
        Self {
            state,
            settings,
            pm_rh_a: cfg.pm_rh_a,
            pm_rh_b: cfg.pm_rh_b,
            temp_offset_c: cfg.temp_self_heat_offset_c,
            pressure_ref_pa: PRESSURE_REF_PA,
            abc,
            wall_clock,
            persisted_baseline: cfg.abc_baseline_ppm,
        }
    }

    /// Dedicated 1 Hz task. Loops until process exit.
    pub fn run(mut self) {
        let watchdog = WatchdogHandle::register("fusion");
        info!("Fusion engine started");
        loop {
            watchdog.feed();
            self.tick(boot_millis());
            std::thread::sleep(std::time::Duration::from_millis(FUSION_PERIOD_MS));
        }
    }

    /// One fusion pass. Persistence happens after the state lock is
    /// released; no other lock is ever taken while holding it.
    pub fn tick(&mut self, now_ms: u64) {
        let state = self.state.clone();
        let baseline_to_persist = state.with(|s| self.fuse(s, now_ms));
        if let Some(baseline) = baseline_to_persist {
            self.settings.store_abc_baseline(baseline);
            self.persisted_baseline = Some(baseline);
        }
    }

    /// The actual compensation pipeline. Returns a baseline to persist when
    /// the ABC tracker learned a new one.
    fn fuse(&mut self, s: &mut DeviceState, now_ms: u64) -> Option<u16> {
        // 1. Temperature self-heating offset
        let temp_valid = s.field_usable(Field::TempC);
        s.fused.temp_c = if temp_valid {
            s.raw.temp_c - self.temp_offset_c
        } else {
            f32::NAN
        };
        s.fusion_diag.temp_self_heat_offset_c = self.temp_offset_c;

        // 2. RH re-evaluated at the corrected temperature
        let rh_valid = s.field_usable(Field::RhPct);
        s.fused.rh_pct = if rh_valid {
            if temp_valid {
                rh_at_temperature(s.raw.rh_pct, s.raw.temp_c, s.fused.temp_c)
            } else {
                s.raw.rh_pct
            }
        } else {
            f32::NAN
        };

        // 3. Particulate humidity correction. PM₁.₀ stays raw for
        // diagnostics; PM₂.₅/PM₁₀ are dried when the RH input is valid,
        // fresh, and below the fog limit.
        s.fused.pm1 = if s.field_usable(Field::Pm1) {
            s.raw.pm1
        } else {
            f32::NAN
        };

        let rh_updated_ms = s.updated_at_ms[SensorId::Sht45.index()];
        let rh_age_ms = now_ms.saturating_sub(rh_updated_ms);
        let rh_fresh = rh_updated_ms > 0 && rh_age_ms <= RH_FRESHNESS_MS;
        let correct_pm = rh_valid
            && rh_fresh
            && !s.fused.rh_pct.is_nan()
            && s.fused.rh_pct < RH_CORRECTION_LIMIT_PCT;
        let factor = if correct_pm {
            humidity_growth_factor(s.fused.rh_pct, self.pm_rh_a, self.pm_rh_b)
        } else {
            1.0
        };

        let pm25_valid = s.field_usable(Field::Pm25);
        s.fused.pm25 = if pm25_valid { s.raw.pm25 / factor } else { f32::NAN };
        s.fused.pm10 = if s.field_usable(Field::Pm10) {
            s.raw.pm10 / factor
        } else {
            f32::NAN
        };
        s.fusion_diag.pm_rh_factor = if pm25_valid { factor } else { f32::NAN };

        if pm25_valid {
            let pms = &s.sensors[SensorId::Pms5003.index()];
            let healthy = pms.state == SensorState::Ready && pms.error_count == 0;
            #[allow(clippy::cast_possible_truncation)]
            let rh_age_s = (rh_age_ms / 1000).min(u64::from(u32::MAX)) as u32;
            s.fusion_diag.pm25_quality = Some(pm25_quality(s.fused.rh_pct, rh_age_s, healthy));
            s.fusion_diag.pm1_pm25_ratio = if s.field_usable(Field::Pm1) && s.raw.pm25 > 0.0 {
                s.raw.pm1 / s.raw.pm25
            } else {
                f32::NAN
            };
        } else {
            s.fusion_diag.pm25_quality = None;
            s.fusion_diag.pm1_pm25_ratio = f32::NAN;
        }

        // 4 & 5. CO₂: pressure compensation, then baseline correction
        s.fused.pressure_pa = if s.field_usable(Field::PressurePa) {
            s.raw.pressure_pa
        } else {
            f32::NAN
        };

        let mut baseline_to_persist = None;
        if s.field_usable(Field::Co2Ppm) {
            let mut co2 = s.raw.co2_ppm;
            let pressure = s.raw.pressure_pa;
            if s.field_usable(Field::PressurePa)
                && (PRESSURE_PLAUSIBLE_PA.0..=PRESSURE_PLAUSIBLE_PA.1).contains(&pressure)
            {
                let compensated = pressure_compensated_co2(co2, pressure, self.pressure_ref_pa);
                s.fusion_diag.co2_pressure_offset_ppm = compensated - co2;
                co2 = compensated;
            } else {
                s.fusion_diag.co2_pressure_offset_ppm = 0.0;
            }

            let local_minutes = self.wall_clock.as_ref().and_then(|c| c.local_minutes());
            self.abc.update(now_ms, local_minutes, co2);
            s.fused.co2_ppm = co2 + self.abc.offset_ppm();

            let baseline = self.abc.baseline_ppm();
            s.fusion_diag.abc_baseline_ppm = baseline.unwrap_or(f32::NAN);
            s.fusion_diag.abc_confidence_pct = self.abc.confidence_pct();

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rounded = baseline.map(|b| b.round().clamp(0.0, f32::from(u16::MAX)) as u16);
            if rounded.is_some() && rounded != self.persisted_baseline {
                baseline_to_persist = rounded;
            }
        } else {
            s.fused.co2_ppm = f32::NAN;
            s.fusion_diag.co2_pressure_offset_ppm = f32::NAN;
        }

        // Gas indices pass through untouched
        s.fused.voc_index = if s.field_usable(Field::VocIndex) {
            s.raw.voc_index
        } else {
            INDEX_SENTINEL
        };
        s.fused.nox_index = if s.field_usable(Field::NoxIndex) {
            s.raw.nox_index
        } else {
            INDEX_SENTINEL
        };

        baseline_to_persist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Measurement;
    use crate::settings::{KvStore, MemoryStore, KEY_ABC_BASELINE, KEY_TEMP_OFFSET, NS_FUSION};
    use serde_json::Value;

    fn engine_with(settings: SettingsHandle) -> (FusionEngine, StateHandle) {
        let state = StateHandle::new();
        let engine = FusionEngine::new(state.clone(), settings, None);
        (engine, state)
    }

    fn seed(state: &StateHandle, sensor: SensorId, measurement: Measurement, now_ms: u64) {
        state.with(|s| {
            s.apply_measurement(sensor, &measurement, now_ms);
            s.sensors[sensor.index()].state = SensorState::Ready;
        });
    }

    fn settings_with_offset(offset_c: f32) -> SettingsHandle {
        let mut store = MemoryStore::default();
        store
            .set(NS_FUSION, KEY_TEMP_OFFSET, Value::from(f64::from(offset_c)))
            .unwrap();
        SettingsHandle::new(Box::new(store))
    }

    #[test]
    fn test_self_heat_offset_and_rh_reevaluation() {
        let (mut engine, state) = engine_with(settings_with_offset(2.0));
        seed(&state, SensorId::Sht45, Measurement::TempHumidity { temp_c: 24.0, rh_pct: 50.0 }, 1_000);

        engine.tick(1_000);

        state.with(|s| {
            assert!((s.fused.temp_c - 22.0).abs() < 1e-5);
            // Cooler corrected temperature means higher RH
            assert!(s.fused.rh_pct > 50.0 && s.fused.rh_pct < 60.0);
            assert_eq!(s.fusion_diag.temp_self_heat_offset_c, 2.0);
        });
    }

    #[test]
    fn test_pm_humidity_correction_applied() {
        let (mut engine, state) = engine_with(SettingsHandle::in_memory());
        seed(&state, SensorId::Sht45, Measurement::TempHumidity { temp_c: 22.0, rh_pct: 70.0 }, 1_000);
        seed(
            &state,
            SensorId::Pms5003,
            Measurement::Particulates { pm1: 8.0, pm25: 10.0, pm10: 20.0 },
            1_000,
        );

        engine.tick(2_000);

        state.with(|s| {
            let factor = s.fusion_diag.pm_rh_factor;
            assert!(factor > 1.0, "expected correction, factor {factor}");
            assert!((s.fused.pm25 - 10.0 / factor).abs() < 1e-5);
            assert!((s.fused.pm10 - 20.0 / factor).abs() < 1e-5);
            // PM1 is carried raw
            assert_eq!(s.fused.pm1, 8.0);
            assert!((s.fusion_diag.pm1_pm25_ratio - 0.8).abs() < 1e-5);
            assert!(s.fusion_diag.pm25_quality.is_some());
        });
    }

    #[test]
    fn test_pm_correction_skipped_at_high_rh() {
        let (mut engine, state) = engine_with(SettingsHandle::in_memory());
        seed(&state, SensorId::Sht45, Measurement::TempHumidity { temp_c: 22.0, rh_pct: 95.0 }, 1_000);
        seed(
            &state,
            SensorId::Pms5003,
            Measurement::Particulates { pm1: 8.0, pm25: 10.0, pm10: 20.0 },
            1_000,
        );

        engine.tick(2_000);

        state.with(|s| {
            assert_eq!(s.fusion_diag.pm_rh_factor, 1.0);
            assert_eq!(s.fused.pm25, 10.0);
        });
    }

    #[test]
    fn test_pm_correction_skipped_when_rh_stale() {
        let (mut engine, state) = engine_with(SettingsHandle::in_memory());
        seed(&state, SensorId::Sht45, Measurement::TempHumidity { temp_c: 22.0, rh_pct: 70.0 }, 1_000);
        seed(
            &state,
            SensorId::Pms5003,
            Measurement::Particulates { pm1: 8.0, pm25: 10.0, pm10: 20.0 },
            1_000,
        );

        // RH reading is 2 minutes old by fusion time
        engine.tick(121_000);

        state.with(|s| {
            assert_eq!(s.fusion_diag.pm_rh_factor, 1.0);
            assert_eq!(s.fused.pm25, 10.0);
            // Quality reflects the stale humidity input
            let q = s.fusion_diag.pm25_quality.unwrap();
            assert!(q < 100, "quality {q}");
        });
    }

    #[test]
    fn test_co2_pressure_compensation_gated_on_plausible_pressure() {
        let (mut engine, state) = engine_with(SettingsHandle::in_memory());
        seed(&state, SensorId::S8, Measurement::Co2 { co2_ppm: 800.0 }, 1_000);
        seed(&state, SensorId::Bmp280, Measurement::Pressure { pressure_pa: 98_000.0 }, 1_000);

        engine.tick(2_000);
        state.with(|s| {
            let expected = 800.0 * PRESSURE_REF_PA / 98_000.0;
            assert!((s.fused.co2_ppm - expected).abs() < 0.01);
            assert!(s.fusion_diag.co2_pressure_offset_ppm > 0.0);
        });

        // Implausible pressure: no compensation
        seed(&state, SensorId::Bmp280, Measurement::Pressure { pressure_pa: 80_000.0 }, 3_000);
        engine.tick(3_000);
        state.with(|s| {
            assert_eq!(s.fused.co2_ppm, 800.0);
            assert_eq!(s.fusion_diag.co2_pressure_offset_ppm, 0.0);
        });
    }

    #[test]
    fn test_invalid_inputs_stay_nan() {
        let (mut engine, state) = engine_with(SettingsHandle::in_memory());
        engine.tick(1_000);
        state.with(|s| {
            assert!(s.fused.temp_c.is_nan());
            assert!(s.fused.rh_pct.is_nan());
            assert!(s.fused.pm25.is_nan());
            assert!(s.fused.co2_ppm.is_nan());
            assert_eq!(s.fused.voc_index, INDEX_SENTINEL);
            assert!(s.fusion_diag.pm_rh_factor.is_nan());
            assert_eq!(s.fusion_diag.pm25_quality, None);
        });
    }

    #[test]
    fn test_fusion_is_idempotent() {
        let (mut engine, state) = engine_with(settings_with_offset(1.5));
        seed(&state, SensorId::Sht45, Measurement::TempHumidity { temp_c: 23.0, rh_pct: 55.0 }, 1_000);
        seed(&state, SensorId::Bmp280, Measurement::Pressure { pressure_pa: 100_500.0 }, 1_000);
        seed(&state, SensorId::S8, Measurement::Co2 { co2_ppm: 750.0 }, 1_000);
        seed(
            &state,
            SensorId::Pms5003,
            Measurement::Particulates { pm1: 4.0, pm25: 6.0, pm10: 9.0 },
            1_000,
        );

        engine.tick(2_000);
        let first = state.copy();
        engine.tick(2_000);
        let second = state.copy();

        assert_eq!(first.fused.temp_c, second.fused.temp_c);
        assert_eq!(first.fused.rh_pct, second.fused.rh_pct);
        assert_eq!(first.fused.pm25, second.fused.pm25);
        assert_eq!(first.fused.pm10, second.fused.pm10);
        assert_eq!(first.fused.co2_ppm, second.fused.co2_ppm);
        assert_eq!(first.fusion_diag.pm_rh_factor, second.fusion_diag.pm_rh_factor);
    }

    #[test]
    fn test_restored_baseline_applies_offset() {
        let mut store = MemoryStore::default();
        store.set(NS_FUSION, KEY_ABC_BASELINE, Value::from(465u16)).unwrap();
        let settings = SettingsHandle::new(Box::new(store));
        let (mut engine, state) = engine_with(settings);

        seed(&state, SensorId::S8, Measurement::Co2 { co2_ppm: 700.0 }, 1_000);
        engine.tick(1_000);

        state.with(|s| {
            // Offset = outdoor 415 - baseline 465 = -50
            assert!((s.fused.co2_ppm - 650.0).abs() < 0.01);
            assert_eq!(s.fusion_diag.abc_confidence_pct, 100);
            assert!((s.fusion_diag.abc_baseline_ppm - 465.0).abs() < 0.01);
        });
    }

    #[test]
    fn test_abc_learns_over_seven_nights() {
        use std::sync::{Arc, Mutex};

        struct SharedClock(Arc<Mutex<Option<u16>>>);
        impl crate::clock::WallClock for SharedClock {
            fn local_minutes(&self) -> Option<u16> {
                *self.0.lock().unwrap()
            }
        }

        let minutes = Arc::new(Mutex::new(Some(90u16)));
        let state = StateHandle::new();
        let settings = SettingsHandle::in_memory();
        let mut engine = FusionEngine::new(
            state.clone(),
            settings.clone(),
            Some(Box::new(SharedClock(minutes.clone()))),
        );

        // Room sits flat at 480 ppm every night
        let mut now = 0u64;
        for _ in 0..7 {
            // Warm the slope window before the window opens
            *minutes.lock().unwrap() = Some(90);
            for _ in 0..20 {
                seed(&state, SensorId::S8, Measurement::Co2 { co2_ppm: 480.0 }, now);
                engine.tick(now);
                now += 60_000;
            }
            // In the 02:00-06:00 window, still flat
            *minutes.lock().unwrap() = Some(180);
            for _ in 0..40 {
                seed(&state, SensorId::S8, Measurement::Co2 { co2_ppm: 480.0 }, now);
                engine.tick(now);
                now += 60_000;
            }
            // Morning: the night commits
            *minutes.lock().unwrap() = Some(390);
            seed(&state, SensorId::S8, Measurement::Co2 { co2_ppm: 480.0 }, now);
            engine.tick(now);
            now += 20 * 3_600_000;
        }

        state.with(|s| {
            assert_eq!(s.fusion_diag.abc_confidence_pct, 100);
            assert!((s.fusion_diag.abc_baseline_ppm - 480.0).abs() < 0.01);
            // Correction pulls 480 toward the 415 outdoor baseline
            assert!((s.fused.co2_ppm - 415.0).abs() < 0.01);
        });
        // The learned baseline was persisted
        assert_eq!(settings.load_fusion().abc_baseline_ppm, Some(480));
    }

    #[test]
    fn test_rh_passthrough_without_temperature() {
        let (mut engine, state) = engine_with(settings_with_offset(2.0));
        // Only humidity valid: the RhPct field alone
        state.with(|s| {
            s.raw.rh_pct = 48.0;
            s.valid.set(Field::RhPct, true);
        });
        engine.tick(1_000);
        state.with(|s| {
            assert!(s.fused.temp_c.is_nan());
            assert_eq!(s.fused.rh_pct, 48.0);
        });
    }
}
