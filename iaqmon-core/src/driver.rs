//! Sensor driver layer.
//!
//! Physical transports (I²C, UART framing, Modbus/Sensirion CRC) live behind
//! the [`SensorPort`] capability trait; everything above it is per-sensor
//! policy: warm-up, calibration validation, conditioning, smoothing. The
//! coordinator is the only caller and serializes all operations per sensor.
//!
//! Drivers never touch the shared-state mutex.

use smallvec::SmallVec;

use crate::error::Error;
use crate::sensors::SensorId;

/// Current ambient conditions handed to drivers that compensate internally
/// (the SGP41 wants temperature and humidity with every measurement
/// command). NaN means unknown; ports substitute their own defaults.
#[derive(Debug, Clone, Copy)]
pub struct AmbientConditions {
    pub temp_c: f32,
    pub rh_pct: f32,
}

impl Default for AmbientConditions {
    fn default() -> Self {
        Self {
            temp_c: f32::NAN,
            rh_pct: f32::NAN,
        }
    }
}

/// One successful read, in the owning sensor's shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    McuTemp { temp_c: f32 },
    TempHumidity { temp_c: f32, rh_pct: f32 },
    Pressure { pressure_pa: f32 },
    GasIndices { voc_index: u16, nox_index: u16 },
    Particulates { pm1: f32, pm25: f32, pm10: f32 },
    Co2 { co2_ppm: f32 },
}

/// The opaque "read raw sensor" capability. Implementations own the bus
/// access for exactly one sensor; per-call timeouts are theirs to enforce.
pub trait SensorPort: Send {
    /// One-time bring-up. Called before the first `set_power(true)`.
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Power the sensor up or down. After `set_power(false)` reads fail.
    fn set_power(&mut self, on: bool) -> Result<(), Error> {
        let _ = on;
        Ok(())
    }

    /// Take one measurement. On failure nothing is reported.
    fn sample(&mut self, env: &AmbientConditions) -> Result<Measurement, Error>;

    /// Attempt a soft reset.
    fn soft_reset(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Send a calibration command. Only meaningful for sensors that support
    /// one; the argument has already been range-checked by the driver.
    fn calibrate(&mut self, reference: u16) -> Result<(), Error> {
        let _ = reference;
        Err(Error::Unsupported)
    }

    /// One conditioning pulse (SGP41 hotplate warm-up protocol).
    fn conditioning(&mut self, env: &AmbientConditions) -> Result<(), Error> {
        let _ = env;
        Ok(())
    }

    /// Whether the sensor reports trustworthy values yet.
    fn reporting_ready(&mut self) -> bool {
        true
    }
}

/// MCU die temperature. No power management, nothing to calibrate.
pub struct McuDriver {
    port: Box<dyn SensorPort>,
}

/// SHT45 temperature/humidity.
pub struct Sht45Driver {
    port: Box<dyn SensorPort>,
}

/// BMP280 barometric pressure.
pub struct Bmp280Driver {
    port: Box<dyn SensorPort>,
}

/// SGP41 gas indices. Needs 10 s of conditioning pulses after power-up and
/// gates readiness on its index engine having settled.
pub struct Sgp41Driver {
    port: Box<dyn SensorPort>,
}

/// How many recent PMS5003 frames feed the smoothed snapshot.
const PMS_SMOOTH_FRAMES: usize = 4;

/// PMS5003 particulates. The transport streams frames from a background RX
/// task; the driver keeps a short window and reports the average so one
/// noisy frame doesn't land in the shared state.
pub struct Pms5003Driver {
    port: Box<dyn SensorPort>,
    recent: SmallVec<[(f32, f32, f32); PMS_SMOOTH_FRAMES]>,
}

/// SenseAir S8 CO₂. Supports forced calibration against a reference
/// concentration, accepted only in the plausible fresh-air band.
pub struct S8Driver {
    port: Box<dyn SensorPort>,
}

/// Valid S8 calibration reference range, ppm.
pub const S8_CALIBRATION_RANGE: (u16, u16) = (370, 430);

impl Pms5003Driver {
    fn smooth(&mut self, pm1: f32, pm25: f32, pm10: f32) -> Measurement {
        if self.recent.len() == PMS_SMOOTH_FRAMES {
            self.recent.remove(0);
        }
        self.recent.push((pm1, pm25, pm10));
        #[allow(clippy::cast_precision_loss)]
        let n = self.recent.len() as f32;
        let sum = self
            .recent
            .iter()
            .fold((0.0, 0.0, 0.0), |acc, f| (acc.0 + f.0, acc.1 + f.1, acc.2 + f.2));
        Measurement::Particulates {
            pm1: sum.0 / n,
            pm25: sum.1 / n,
            pm10: sum.2 / n,
        }
    }
}

/// Uniform dispatch over the fixed sensor set. The enum's cardinality is
/// known at compile time, so every match below is exhaustive by
/// construction.
pub enum SensorDriver {
    Mcu(McuDriver),
    Sht45(Sht45Driver),
    Bmp280(Bmp280Driver),
    Sgp41(Sgp41Driver),
    Pms5003(Pms5003Driver),
    S8(S8Driver),
}

impl SensorDriver {
    /// Wrap a port in the driver matching `sensor`.
    #[must_use]
    pub fn new(sensor: SensorId, port: Box<dyn SensorPort>) -> Self {
        match sensor {
            SensorId::Mcu => Self::Mcu(McuDriver { port }),
            SensorId::Sht45 => Self::Sht45(Sht45Driver { port }),
            SensorId::Bmp280 => Self::Bmp280(Bmp280Driver { port }),
            SensorId::Sgp41 => Self::Sgp41(Sgp41Driver { port }),
            SensorId::Pms5003 => Self::Pms5003(Pms5003Driver {
                port,
                recent: SmallVec::new(),
            }),
            SensorId::S8 => Self::S8(S8Driver { port }),
        }
    }

    #[must_use]
    pub fn id(&self) -> SensorId {
        match self {
            Self::Mcu(_) => SensorId::Mcu,
            Self::Sht45(_) => SensorId::Sht45,
            Self::Bmp280(_) => SensorId::Bmp280,
            Self::Sgp41(_) => SensorId::Sgp41,
            Self::Pms5003(_) => SensorId::Pms5003,
            Self::S8(_) => SensorId::S8,
        }
    }

    fn port(&mut self) -> &mut dyn SensorPort {
        match self {
            Self::Mcu(d) => d.port.as_mut(),
            Self::Sht45(d) => d.port.as_mut(),
            Self::Bmp280(d) => d.port.as_mut(),
            Self::Sgp41(d) => d.port.as_mut(),
            Self::Pms5003(d) => d.port.as_mut(),
            Self::S8(d) => d.port.as_mut(),
        }
    }

    pub fn init(&mut self) -> Result<(), Error> {
        self.port().init()
    }

    pub fn enable(&mut self) -> Result<(), Error> {
        self.port().set_power(true)
    }

    pub fn disable(&mut self) -> Result<(), Error> {
        self.port().set_power(false)
    }

    pub fn reset(&mut self) -> Result<(), Error> {
        self.port().soft_reset()
    }

    /// Take one measurement. The returned shape is checked against the
    /// sensor identity; a mismatch means the transport delivered a foreign
    /// frame and is reported as a bus error.
    pub fn read(&mut self, env: &AmbientConditions) -> Result<Measurement, Error> {
        let id = self.id();
        let measurement = match self {
            Self::Pms5003(d) => {
                let m = d.port.sample(env)?;
                match m {
                    Measurement::Particulates { pm1, pm25, pm10 } => d.smooth(pm1, pm25, pm10),
                    other => other,
                }
            }
            _ => self.port().sample(env)?,
        };
        if !measurement_matches(id, &measurement) {
            return Err(Error::Bus(format!("unexpected frame for {}", id.name())));
        }
        Ok(measurement)
    }

    /// Sensor-specific calibration. Only the S8 supports one; its reference
    /// concentration must be plausible fresh air (370–430 ppm).
    pub fn calibrate(&mut self, value: u16) -> Result<(), Error> {
        match self {
            Self::S8(d) => {
                if !(S8_CALIBRATION_RANGE.0..=S8_CALIBRATION_RANGE.1).contains(&value) {
                    return Err(Error::InvalidArg);
                }
                d.port.calibrate(value)
            }
            _ => Err(Error::Unsupported),
        }
    }

    /// One SGP41 conditioning pulse. Unsupported elsewhere.
    pub fn conditioning_tick(&mut self, env: &AmbientConditions) -> Result<(), Error> {
        match self {
            Self::Sgp41(d) => d.port.conditioning(env),
            _ => Err(Error::Unsupported),
        }
    }

    /// Warm-up gate. Sensors without a readiness query are ready as soon as
    /// their warm-up time elapses.
    pub fn is_reporting_ready(&mut self) -> bool {
        match self {
            Self::Sgp41(d) => d.port.reporting_ready(),
            _ => true,
        }
    }

    /// Whether this driver wants 1 Hz conditioning pulses during warm-up.
    #[must_use]
    pub fn wants_conditioning(&self) -> bool {
        matches!(self, Self::Sgp41(_))
    }
}

fn measurement_matches(sensor: SensorId, measurement: &Measurement) -> bool {
    matches!(
        (sensor, measurement),
        (SensorId::Mcu, Measurement::McuTemp { .. })
            | (SensorId::Sht45, Measurement::TempHumidity { .. })
            | (SensorId::Bmp280, Measurement::Pressure { .. })
            | (SensorId::Sgp41, Measurement::GasIndices { .. })
            | (SensorId::Pms5003, Measurement::Particulates { .. })
            | (SensorId::S8, Measurement::Co2 { .. })
    )
}
