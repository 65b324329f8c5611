//! Shared device state: the single source of truth.
//!
//! One mutex guards the whole record. Raw readings are written only by the
//! coordinator, fused readings only by the fusion engine, metrics only by the
//! metrics engine; snapshot consumers lock, copy, release. No other lock may
//! be taken while the state lock is held, and the lock is never held across
//! a driver call.
//!
//! All 64-bit timestamps live behind this mutex, which doubles as the
//! critical section required for tear-free reads on 32-bit cores.
//!
//! No-data sentinels: real-valued fields are NaN until the first valid
//! reading; gas indices and the AQI use the all-ones value of their width.
//! Serialization maps every sentinel to `null`, so snapshot consumers never
//! see one.

use std::sync::{Arc, Mutex};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use iaqmon_air_lib::aqi::{AqiCategory, Pollutant};
use iaqmon_air_lib::comfort::{ComfortCategory, MoldCategory};
use iaqmon_air_lib::gas::GasCategory;
use iaqmon_air_lib::pressure::PressureTrend;

use crate::driver::Measurement;
use crate::sensors::{Field, SensorId, SensorState, FIELD_COUNT, SENSOR_COUNT};

/// No-data sentinel for gas indices and the AQI value.
pub const INDEX_SENTINEL: u16 = u16::MAX;

fn ser_nan_null<S: Serializer>(v: &f32, s: S) -> Result<S::Ok, S::Error> {
    if v.is_nan() {
        s.serialize_none()
    } else {
        s.serialize_some(v)
    }
}

fn ser_index_null<S: Serializer>(v: &u16, s: S) -> Result<S::Ok, S::Error> {
    if *v == INDEX_SENTINEL {
        s.serialize_none()
    } else {
        s.serialize_some(v)
    }
}

/// Latest uncompensated readings.
#[derive(Debug, Clone, Serialize)]
pub struct RawReadings {
    #[serde(serialize_with = "ser_nan_null")]
    pub mcu_temp_c: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub temp_c: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub rh_pct: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub pressure_pa: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub pm1: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub pm25: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub pm10: f32,
    #[serde(serialize_with = "ser_index_null")]
    pub voc_index: u16,
    #[serde(serialize_with = "ser_index_null")]
    pub nox_index: u16,
    #[serde(serialize_with = "ser_nan_null")]
    pub co2_ppm: f32,
}

impl Default for RawReadings {
    fn default() -> Self {
        Self {
            mcu_temp_c: f32::NAN,
            temp_c: f32::NAN,
            rh_pct: f32::NAN,
            pressure_pa: f32::NAN,
            pm1: f32::NAN,
            pm25: f32::NAN,
            pm10: f32::NAN,
            voc_index: INDEX_SENTINEL,
            nox_index: INDEX_SENTINEL,
            co2_ppm: f32::NAN,
        }
    }
}

impl RawReadings {
    /// Field value as f32 (gas indices convert; their sentinel maps to NaN).
    #[must_use]
    pub fn field(&self, field: Field) -> f32 {
        match field {
            Field::McuTempC => self.mcu_temp_c,
            Field::TempC => self.temp_c,
            Field::RhPct => self.rh_pct,
            Field::PressurePa => self.pressure_pa,
            Field::Pm1 => self.pm1,
            Field::Pm25 => self.pm25,
            Field::Pm10 => self.pm10,
            Field::VocIndex | Field::NoxIndex => {
                let v = if field == Field::VocIndex {
                    self.voc_index
                } else {
                    self.nox_index
                };
                if v == INDEX_SENTINEL {
                    f32::NAN
                } else {
                    f32::from(v)
                }
            }
            Field::Co2Ppm => self.co2_ppm,
        }
    }
}

/// Compensated readings. Same fields as raw except the MCU die temperature,
/// which has no compensated counterpart. PM₁.₀ is carried through raw for
/// diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct FusedReadings {
    #[serde(serialize_with = "ser_nan_null")]
    pub temp_c: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub rh_pct: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub pressure_pa: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub pm1: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub pm25: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub pm10: f32,
    #[serde(serialize_with = "ser_index_null")]
    pub voc_index: u16,
    #[serde(serialize_with = "ser_index_null")]
    pub nox_index: u16,
    #[serde(serialize_with = "ser_nan_null")]
    pub co2_ppm: f32,
}

impl Default for FusedReadings {
    fn default() -> Self {
        Self {
            temp_c: f32::NAN,
            rh_pct: f32::NAN,
            pressure_pa: f32::NAN,
            pm1: f32::NAN,
            pm25: f32::NAN,
            pm10: f32::NAN,
            voc_index: INDEX_SENTINEL,
            nox_index: INDEX_SENTINEL,
            co2_ppm: f32::NAN,
        }
    }
}

/// Derived AQI block.
#[derive(Debug, Clone, Serialize)]
pub struct AqiState {
    #[serde(serialize_with = "ser_index_null")]
    pub value: u16,
    pub category: AqiCategory,
    pub dominant_pollutant: Option<Pollutant>,
    #[serde(serialize_with = "ser_nan_null")]
    pub pm25_subindex: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub pm10_subindex: f32,
}

impl Default for AqiState {
    fn default() -> Self {
        Self {
            value: INDEX_SENTINEL,
            category: AqiCategory::Unknown,
            dominant_pollutant: None,
            pm25_subindex: f32::NAN,
            pm10_subindex: f32::NAN,
        }
    }
}

/// Derived thermal comfort block.
#[derive(Debug, Clone, Serialize)]
pub struct ComfortState {
    #[serde(serialize_with = "ser_nan_null")]
    pub dew_point_c: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub abs_humidity_gm3: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub heat_index_c: f32,
    pub score: Option<u8>,
    pub category: Option<ComfortCategory>,
}

impl Default for ComfortState {
    fn default() -> Self {
        Self {
            dew_point_c: f32::NAN,
            abs_humidity_gm3: f32::NAN,
            heat_index_c: f32::NAN,
            score: None,
            category: None,
        }
    }
}

/// Derived pressure trend block.
#[derive(Debug, Clone, Serialize)]
pub struct PressureTrendState {
    pub direction: PressureTrend,
    #[serde(serialize_with = "ser_nan_null")]
    pub delta_3hr_hpa: f32,
}

impl Default for PressureTrendState {
    fn default() -> Self {
        Self {
            direction: PressureTrend::Unknown,
            delta_3hr_hpa: f32::NAN,
        }
    }
}

/// Derived mold risk block.
#[derive(Debug, Clone, Serialize)]
pub struct MoldState {
    pub score: Option<u8>,
    pub category: Option<MoldCategory>,
}

impl Default for MoldState {
    fn default() -> Self {
        Self {
            score: None,
            category: None,
        }
    }
}

/// All derived metrics, written only by the metrics engine.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsState {
    pub aqi: AqiState,
    pub comfort: ComfortState,
    pub pressure_trend: PressureTrendState,
    /// NaN until enough CO₂ history exists.
    #[serde(serialize_with = "ser_nan_null")]
    pub co2_rate_ppm_hr: f32,
    pub co2_score: Option<u8>,
    pub voc_category: GasCategory,
    pub nox_category: GasCategory,
    pub pm25_spike_detected: bool,
    pub mold: MoldState,
    pub overall_iaq_score: Option<u8>,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self {
            aqi: AqiState::default(),
            comfort: ComfortState::default(),
            pressure_trend: PressureTrendState::default(),
            co2_rate_ppm_hr: f32::NAN,
            co2_score: None,
            voc_category: GasCategory::Unknown,
            nox_category: GasCategory::Unknown,
            pm25_spike_detected: false,
            mold: MoldState::default(),
            overall_iaq_score: None,
        }
    }
}

/// Fusion diagnostics, written only by the fusion engine.
#[derive(Debug, Clone, Serialize)]
pub struct FusionDiag {
    /// Hygroscopic growth divisor last applied to PM₂.₅/PM₁₀ (1.0 = none).
    #[serde(serialize_with = "ser_nan_null")]
    pub pm_rh_factor: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub co2_pressure_offset_ppm: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub temp_self_heat_offset_c: f32,
    #[serde(serialize_with = "ser_nan_null")]
    pub abc_baseline_ppm: f32,
    pub abc_confidence_pct: u8,
    pub pm25_quality: Option<u8>,
    /// Integrity check; healthy optical counters sit around 0.6–0.9.
    #[serde(serialize_with = "ser_nan_null")]
    pub pm1_pm25_ratio: f32,
}

impl Default for FusionDiag {
    fn default() -> Self {
        Self {
            pm_rh_factor: f32::NAN,
            co2_pressure_offset_ppm: f32::NAN,
            temp_self_heat_offset_c: f32::NAN,
            abc_baseline_ppm: f32::NAN,
            abc_confidence_pct: 0,
            pm25_quality: None,
            pm1_pm25_ratio: f32::NAN,
        }
    }
}

/// Per-field validity flags, keyed by [`Field`].
#[derive(Debug, Clone, Default)]
pub struct ValidFlags {
    flags: [bool; FIELD_COUNT],
}

impl ValidFlags {
    #[must_use]
    pub fn get(&self, field: Field) -> bool {
        self.flags[field.index()]
    }

    pub fn set(&mut self, field: Field, valid: bool) {
        self.flags[field.index()] = valid;
    }
}

impl Serialize for ValidFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FIELD_COUNT))?;
        for field in Field::ALL {
            map.serialize_entry(field.name(), &self.get(field))?;
        }
        map.end()
    }
}

/// Archive of the most recent valid value of each field, populated when a
/// field's validity drops (sensor disabled). Consumers show these as stale
/// values.
#[derive(Debug, Clone, Default)]
pub struct LastKnown {
    values: [Option<f32>; FIELD_COUNT],
}

impl LastKnown {
    #[must_use]
    pub fn get(&self, field: Field) -> Option<f32> {
        self.values[field.index()]
    }

    pub fn set(&mut self, field: Field, value: f32) {
        self.values[field.index()] = Some(value);
    }
}

impl Serialize for LastKnown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FIELD_COUNT))?;
        for field in Field::ALL {
            map.serialize_entry(field.name(), &self.get(field))?;
        }
        map.end()
    }
}

/// Coordinator-maintained mirror of one sensor's runtime, kept here so
/// snapshot consumers get it in the same lock acquisition as the data.
#[derive(Debug, Clone, Copy)]
pub struct SensorRuntimeView {
    pub state: SensorState,
    pub warmup_deadline_ms: u64,
    /// 0 = never read successfully.
    pub last_read_ms: u64,
    pub error_count: u32,
}

impl Default for SensorRuntimeView {
    fn default() -> Self {
        Self {
            state: SensorState::Uninit,
            warmup_deadline_ms: 0,
            last_read_ms: 0,
            error_count: 0,
        }
    }
}

/// The whole shared record.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub raw: RawReadings,
    pub fused: FusedReadings,
    pub metrics: MetricsState,
    pub fusion_diag: FusionDiag,
    pub valid: ValidFlags,
    /// Per-sensor monotonic timestamp of the last successful read, ms.
    pub updated_at_ms: [u64; SENSOR_COUNT],
    pub last: LastKnown,
    pub sensors: [SensorRuntimeView; SENSOR_COUNT],
}

impl DeviceState {
    /// Apply a successful measurement: write the raw fields, mark them valid,
    /// and bump the sensor's update timestamp (monotonically).
    pub fn apply_measurement(&mut self, sensor: SensorId, measurement: &Measurement, now_ms: u64) {
        match *measurement {
            Measurement::McuTemp { temp_c } => {
                self.raw.mcu_temp_c = temp_c;
            }
            Measurement::TempHumidity { temp_c, rh_pct } => {
                self.raw.temp_c = temp_c;
                self.raw.rh_pct = rh_pct;
            }
            Measurement::Pressure { pressure_pa } => {
                self.raw.pressure_pa = pressure_pa;
            }
            Measurement::GasIndices { voc_index, nox_index } => {
                self.raw.voc_index = voc_index;
                self.raw.nox_index = nox_index;
            }
            Measurement::Particulates { pm1, pm25, pm10 } => {
                self.raw.pm1 = pm1;
                self.raw.pm25 = pm25;
                self.raw.pm10 = pm10;
            }
            Measurement::Co2 { co2_ppm } => {
                self.raw.co2_ppm = co2_ppm;
            }
        }
        for &field in sensor.owned_fields() {
            self.valid.set(field, true);
        }
        let slot = &mut self.updated_at_ms[sensor.index()];
        *slot = (*slot).max(now_ms);
    }

    /// Clear validity for everything the sensor owns, archiving the current
    /// values into `last` first.
    pub fn invalidate_sensor(&mut self, sensor: SensorId) {
        for &field in sensor.owned_fields() {
            if self.valid.get(field) {
                let value = self.raw.field(field);
                if !value.is_nan() {
                    self.last.set(field, value);
                }
                self.valid.set(field, false);
            }
        }
    }

    /// Whether a field is both flagged valid and carrying a non-sentinel
    /// value.
    #[must_use]
    pub fn field_usable(&self, field: Field) -> bool {
        self.valid.get(field) && !self.raw.field(field).is_nan()
    }
}

/// Handle to the shared state. Cloning is cheap; all clones see the same
/// record.
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    inner: Arc<Mutex<DeviceState>>,
}

impl StateHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with the state locked. The lock is released on every exit
    /// path, including panic unwind. Not reentrant: calling `with` from
    /// inside `f` deadlocks.
    pub fn with<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        let mut guard = self.inner.lock().unwrap();
        f(&mut guard)
    }

    /// Owned copy of the whole record; snapshot consumers use this to keep
    /// lock hold times minimal.
    #[must_use]
    pub fn copy(&self) -> DeviceState {
        self.inner.lock().unwrap().clone()
    }
}
