//! The snapshot contract: what consumers (publishers, web, display) read.
//!
//! A snapshot is one owned copy of the shared record plus a per-sensor
//! runtime view, taken in a single lock acquisition. Timestamps are seconds
//! since boot; every numeric sentinel serializes as `null`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::sensors::{SensorId, SensorState};
use crate::state::{FusedReadings, FusionDiag, LastKnown, MetricsState, RawReadings, StateHandle, ValidFlags};

/// One sensor's runtime as exposed to consumers.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SensorStatus {
    pub state: SensorState,
    pub warmup_remaining_s: u64,
    /// `None` until the first successful read.
    pub last_read_age_s: Option<u64>,
    pub error_count: u32,
}

/// A consistent copy of everything a consumer may want.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Seconds since boot at capture time.
    pub uptime_s: u64,
    pub raw: RawReadings,
    pub fused: FusedReadings,
    pub metrics: MetricsState,
    pub fusion_diag: FusionDiag,
    pub valid: ValidFlags,
    /// Per-sensor timestamp of the last successful read, seconds since
    /// boot; `None` = never.
    pub updated_at_s: BTreeMap<&'static str, Option<u64>>,
    pub last_known: LastKnown,
    pub sensors: BTreeMap<&'static str, SensorStatus>,
}

impl Snapshot {
    /// Capture a snapshot. One lock acquisition, then pure assembly.
    #[must_use]
    pub fn capture(state: &StateHandle, now_ms: u64) -> Self {
        let device = state.copy();

        let mut updated_at_s = BTreeMap::new();
        let mut sensors = BTreeMap::new();
        for sensor in SensorId::ALL {
            let i = sensor.index();
            let at = device.updated_at_ms[i];
            updated_at_s.insert(sensor.name(), (at > 0).then_some(at / 1000));

            let view = device.sensors[i];
            let warmup_remaining_s = if view.state == SensorState::Warming {
                view.warmup_deadline_ms.saturating_sub(now_ms) / 1000
            } else {
                0
            };
            let last_read_age_s = (view.last_read_ms > 0)
                .then(|| now_ms.saturating_sub(view.last_read_ms) / 1000);
            sensors.insert(
                sensor.name(),
                SensorStatus {
                    state: view.state,
                    warmup_remaining_s,
                    last_read_age_s,
                    error_count: view.error_count,
                },
            );
        }

        Self {
            uptime_s: now_ms / 1000,
            raw: device.raw,
            fused: device.fused,
            metrics: device.metrics,
            fusion_diag: device.fusion_diag,
            valid: device.valid,
            updated_at_s,
            last_known: device.last,
            sensors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Measurement;
    use crate::sensors::Field;

    #[test]
    fn test_capture_reflects_state() {
        let state = StateHandle::new();
        state.with(|s| {
            s.apply_measurement(SensorId::S8, &Measurement::Co2 { co2_ppm: 640.0 }, 30_000);
            s.sensors[SensorId::S8.index()].state = SensorState::Ready;
            s.sensors[SensorId::S8.index()].last_read_ms = 30_000;
            s.sensors[SensorId::Sgp41.index()].state = SensorState::Warming;
            s.sensors[SensorId::Sgp41.index()].warmup_deadline_ms = 50_000;
        });

        let snapshot = Snapshot::capture(&state, 42_000);
        assert_eq!(snapshot.uptime_s, 42);
        assert_eq!(snapshot.raw.co2_ppm, 640.0);
        assert_eq!(snapshot.updated_at_s["s8"], Some(30));
        assert_eq!(snapshot.updated_at_s["mcu"], None);

        let s8 = &snapshot.sensors["s8"];
        assert_eq!(s8.state, SensorState::Ready);
        assert_eq!(s8.last_read_age_s, Some(12));
        let sgp = &snapshot.sensors["sgp41"];
        assert_eq!(sgp.state, SensorState::Warming);
        assert_eq!(sgp.warmup_remaining_s, 8);
        assert_eq!(sgp.last_read_age_s, None);
    }

    #[test]
    fn test_snapshot_json_maps_sentinels_to_null() {
        let state = StateHandle::new();
        state.with(|s| {
            s.apply_measurement(
                SensorId::Sht45,
                &Measurement::TempHumidity { temp_c: 21.0, rh_pct: 44.0 },
                1_000,
            );
        });

        let snapshot = Snapshot::capture(&state, 2_000);
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["raw"]["temp_c"], 21.0);
        assert!(json["raw"]["co2_ppm"].is_null());
        assert!(json["raw"]["voc_index"].is_null());
        assert!(json["fused"]["temp_c"].is_null()); // fusion has not run
        assert!(json["metrics"]["aqi"]["value"].is_null());
        assert!(json["metrics"]["co2_score"].is_null());
        assert!(json["updated_at_s"]["mcu"].is_null());
        assert_eq!(json["valid"]["temp_c"], true);
        assert_eq!(json["valid"]["co2_ppm"], false);
    }

    #[test]
    fn test_snapshot_carries_last_known_after_disable() {
        let state = StateHandle::new();
        state.with(|s| {
            s.apply_measurement(SensorId::S8, &Measurement::Co2 { co2_ppm: 700.0 }, 1_000);
            s.invalidate_sensor(SensorId::S8);
            s.sensors[SensorId::S8.index()].state = SensorState::Disabled;
        });

        let snapshot = Snapshot::capture(&state, 2_000);
        assert!(!snapshot.valid.get(Field::Co2Ppm));
        assert_eq!(snapshot.last_known.get(Field::Co2Ppm), Some(700.0));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["last_known"]["co2_ppm"], 700.0);
        assert_eq!(json["sensors"]["s8"]["state"], "disabled");
    }
}
