//! Sensor identity, ownership, and per-sensor policy constants.

use serde::{Deserialize, Serialize};

/// Number of sensors in the fixed set.
pub const SENSOR_COUNT: usize = 6;

/// The fixed sensor set. Ordinals are stable and used for array indexing
/// throughout the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorId {
    /// Internal MCU temperature (die sensor).
    Mcu,
    /// SHT45 temperature/humidity.
    Sht45,
    /// BMP280 barometric pressure.
    Bmp280,
    /// SGP41 VOC/NOx gas indices.
    Sgp41,
    /// PMS5003 particulate counter.
    Pms5003,
    /// SenseAir S8 CO₂.
    S8,
}

impl SensorId {
    pub const ALL: [SensorId; SENSOR_COUNT] = [
        SensorId::Mcu,
        SensorId::Sht45,
        SensorId::Bmp280,
        SensorId::Sgp41,
        SensorId::Pms5003,
        SensorId::S8,
    ];

    /// Stable ordinal for array indexing.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn from_index(index: usize) -> Option<SensorId> {
        SensorId::ALL.get(index).copied()
    }

    /// Short lowercase name, also used as the settings key suffix.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SensorId::Mcu => "mcu",
            SensorId::Sht45 => "sht45",
            SensorId::Bmp280 => "bmp280",
            SensorId::Sgp41 => "sgp41",
            SensorId::Pms5003 => "pms5003",
            SensorId::S8 => "s8",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<SensorId> {
        SensorId::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Post-enable interval before readings are trusted.
    #[must_use]
    pub const fn warmup_ms(self) -> u64 {
        match self {
            SensorId::Mcu | SensorId::Sht45 | SensorId::Bmp280 => 0,
            // SGP41 conditions its hotplate for 10 s before reporting
            SensorId::Sgp41 => 10_000,
            // PMS5003 fan needs to stabilize airflow
            SensorId::Pms5003 => 30_000,
            SensorId::S8 => 20_000,
        }
    }

    /// Default periodic read cadence in ms.
    #[must_use]
    pub const fn default_cadence_ms(self) -> u32 {
        match self {
            SensorId::Mcu => 10_000,
            SensorId::Sht45 => 5_000,
            SensorId::Bmp280 => 10_000,
            SensorId::Sgp41 => 5_000,
            SensorId::Pms5003 => 30_000,
            SensorId::S8 => 15_000,
        }
    }

    /// The raw fields this sensor owns (written by its reads, invalidated by
    /// its disable).
    #[must_use]
    pub const fn owned_fields(self) -> &'static [Field] {
        match self {
            SensorId::Mcu => &[Field::McuTempC],
            SensorId::Sht45 => &[Field::TempC, Field::RhPct],
            SensorId::Bmp280 => &[Field::PressurePa],
            SensorId::Sgp41 => &[Field::VocIndex, Field::NoxIndex],
            SensorId::Pms5003 => &[Field::Pm1, Field::Pm25, Field::Pm10],
            SensorId::S8 => &[Field::Co2Ppm],
        }
    }
}

/// Number of raw fields.
pub const FIELD_COUNT: usize = 10;

/// One raw field of the shared record. Each field is owned by exactly one
/// sensor (see [`SensorId::owned_fields`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    McuTempC,
    TempC,
    RhPct,
    PressurePa,
    Pm1,
    Pm25,
    Pm10,
    VocIndex,
    NoxIndex,
    Co2Ppm,
}

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::McuTempC,
        Field::TempC,
        Field::RhPct,
        Field::PressurePa,
        Field::Pm1,
        Field::Pm25,
        Field::Pm10,
        Field::VocIndex,
        Field::NoxIndex,
        Field::Co2Ppm,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Field::McuTempC => "mcu_temp_c",
            Field::TempC => "temp_c",
            Field::RhPct => "rh_pct",
            Field::PressurePa => "pressure_pa",
            Field::Pm1 => "pm1",
            Field::Pm25 => "pm25",
            Field::Pm10 => "pm10",
            Field::VocIndex => "voc_index",
            Field::NoxIndex => "nox_index",
            Field::Co2Ppm => "co2_ppm",
        }
    }

    /// The sensor that owns this field.
    #[must_use]
    pub fn owner(self) -> SensorId {
        for sensor in SensorId::ALL {
            if sensor.owned_fields().contains(&self) {
                return sensor;
            }
        }
        unreachable!("every field has an owner")
    }
}

/// Per-sensor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorState {
    Uninit,
    Init,
    Warming,
    Ready,
    Error,
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_stable() {
        for (i, sensor) in SensorId::ALL.iter().enumerate() {
            assert_eq!(sensor.index(), i);
            assert_eq!(SensorId::from_index(i), Some(*sensor));
        }
        assert_eq!(SensorId::from_index(SENSOR_COUNT), None);
    }

    #[test]
    fn test_name_round_trip() {
        for sensor in SensorId::ALL {
            assert_eq!(SensorId::from_name(sensor.name()), Some(sensor));
        }
        assert_eq!(SensorId::from_name("nope"), None);
    }

    #[test]
    fn test_every_field_has_exactly_one_owner() {
        for field in Field::ALL {
            let owners: Vec<SensorId> = SensorId::ALL
                .iter()
                .copied()
                .filter(|s| s.owned_fields().contains(&field))
                .collect();
            assert_eq!(owners.len(), 1, "{field:?} owned by {owners:?}");
        }
    }

    #[test]
    fn test_owned_fields_cover_all_fields() {
        let total: usize = SensorId::ALL.iter().map(|s| s.owned_fields().len()).sum();
        assert_eq!(total, FIELD_COUNT);
    }
}
