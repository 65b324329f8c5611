//! Thermal comfort and mold risk.
//!
//! Dew point uses the Magnus approximation, absolute humidity the standard
//! g/m³ form, and the heat index a simplified NOAA regression that only
//! engages in hot, humid conditions. The comfort score is 100 minus fixed
//! band penalties for temperature and relative humidity.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComfortCategory {
    Comfortable,
    Acceptable,
    SlightlyUncomfortable,
    Uncomfortable,
    VeryUncomfortable,
}

impl ComfortCategory {
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => Self::Comfortable,
            60..=79 => Self::Acceptable,
            40..=59 => Self::SlightlyUncomfortable,
            20..=39 => Self::Uncomfortable,
            _ => Self::VeryUncomfortable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComfortReading {
    pub dew_point_c: f32,
    pub abs_humidity_gm3: f32,
    pub heat_index_c: f32,
    pub score: u8,
    pub category: ComfortCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoldCategory {
    Low,
    Moderate,
    High,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoldRisk {
    pub score: u8,
    pub category: MoldCategory,
}

/// Dew point in °C via the Magnus formula.
#[must_use]
pub fn dew_point_c(temp_c: f32, rh_pct: f32) -> f32 {
    let alpha = 17.27 * temp_c / (237.7 + temp_c) + (rh_pct / 100.0).ln();
    237.7 * alpha / (17.27 - alpha)
}

/// Absolute humidity in g/m³.
#[must_use]
pub fn abs_humidity_gm3(temp_c: f32, rh_pct: f32) -> f32 {
    6.112 * (17.67 * temp_c / (temp_c + 243.5)).exp() * rh_pct * 2.1674 / (273.15 + temp_c)
}

/// Apparent temperature in °C. Below 27 °C or 40 %RH the regression has no
/// meaning and the measured temperature is returned unchanged.
#[must_use]
pub fn heat_index_c(temp_c: f32, rh_pct: f32) -> f32 {
    if temp_c >= 27.0 && rh_pct >= 40.0 {
        -8.78 + 1.61 * temp_c + 2.34 * rh_pct - 0.146 * temp_c * rh_pct
    } else {
        temp_c
    }
}

/// Temperature penalty band: 20–24 °C is ideal.
fn temp_penalty(temp_c: f32) -> u8 {
    if (20.0..=24.0).contains(&temp_c) {
        0
    } else if (18.0..20.0).contains(&temp_c) {
        10
    } else if temp_c > 24.0 && temp_c <= 26.0 {
        15
    } else {
        30
    }
}

/// Humidity penalty band: 40–60 %RH is ideal.
fn rh_penalty(rh_pct: f32) -> u8 {
    if (40.0..=60.0).contains(&rh_pct) {
        0
    } else if (30.0..40.0).contains(&rh_pct) {
        10
    } else if rh_pct > 60.0 && rh_pct <= 70.0 {
        15
    } else if rh_pct < 30.0 {
        25
    } else {
        30
    }
}

/// Full comfort evaluation. `None` when either input is NaN.
#[must_use]
pub fn compute_comfort(temp_c: f32, rh_pct: f32) -> Option<ComfortReading> {
    if temp_c.is_nan() || rh_pct.is_nan() {
        return None;
    }
    let score = 100u8
        .saturating_sub(temp_penalty(temp_c))
        .saturating_sub(rh_penalty(rh_pct));
    Some(ComfortReading {
        dew_point_c: dew_point_c(temp_c, rh_pct),
        abs_humidity_gm3: abs_humidity_gm3(temp_c, rh_pct),
        heat_index_c: heat_index_c(temp_c, rh_pct),
        score,
        category: ComfortCategory::from_score(score),
    })
}

/// Mold risk from dew point, piecewise over the condensation-prone bands.
#[must_use]
pub fn mold_risk(dew_point_c: f32) -> Option<MoldRisk> {
    if dew_point_c.is_nan() {
        return None;
    }
    let td = dew_point_c;
    let score = if td < 10.0 {
        td.max(0.0) / 10.0 * 25.0
    } else if td < 15.0 {
        25.0 + (td - 10.0) / 5.0 * 25.0
    } else if td < 18.0 {
        50.0 + (td - 15.0) / 3.0 * 25.0
    } else {
        (75.0 + (td - 18.0) / 7.0 * 25.0).min(100.0)
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = score.round() as u8;
    let category = match score {
        0..=25 => MoldCategory::Low,
        26..=50 => MoldCategory::Moderate,
        51..=75 => MoldCategory::High,
        _ => MoldCategory::Severe,
    };
    Some(MoldRisk { score, category })
}

/// Re-evaluate relative humidity at a corrected temperature.
///
/// The water vapour content is what the sensor measured; when the fusion
/// engine shifts the temperature (self-heating offset) the RH has to move
/// with the saturation vapour pressure at the corrected temperature.
/// Clamped to [0, 100].
#[must_use]
pub fn rh_at_temperature(rh_pct: f32, measured_temp_c: f32, corrected_temp_c: f32) -> f32 {
    fn svp(t: f32) -> f32 {
        6.112 * (17.62 * t / (243.12 + t)).exp()
    }
    (rh_pct * svp(measured_temp_c) / svp(corrected_temp_c)).clamp(0.0, 100.0)
}
