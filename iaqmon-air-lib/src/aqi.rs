//! EPA AQI from particulate concentrations.
//!
//! Piecewise linear interpolation over the EPA breakpoint tables for PM₂.₅
//! and PM₁₀. The overall AQI is the maximum of the two sub-indices and the
//! dominant pollutant is whichever produced it.

use serde::{Deserialize, Serialize};

/// AQI category, one row of the EPA table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
    Unknown,
}

impl AqiCategory {
    /// Category enclosing an AQI value.
    #[must_use]
    pub fn from_value(aqi: u16) -> Self {
        match aqi {
            0..=50 => Self::Good,
            51..=100 => Self::Moderate,
            101..=150 => Self::UnhealthySensitive,
            151..=200 => Self::Unhealthy,
            201..=300 => Self::VeryUnhealthy,
            301..=500 => Self::Hazardous,
            _ => Self::Unknown,
        }
    }
}

/// Which pollutant produced the overall AQI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pollutant {
    Pm25,
    Pm10,
}

/// A computed AQI with its sub-indices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AqiReading {
    pub value: u16,
    pub category: AqiCategory,
    pub dominant_pollutant: Pollutant,
    pub pm25_subindex: f32,
    pub pm10_subindex: f32,
}

struct Breakpoint {
    c_lo: f32,
    c_hi: f32,
    i_lo: f32,
    i_hi: f32,
}

/// EPA PM₂.₅ breakpoints (µg/m³, 2012 standard).
const PM25_BREAKPOINTS: [Breakpoint; 6] = [
    Breakpoint { c_lo: 0.0, c_hi: 12.0, i_lo: 0.0, i_hi: 50.0 },
    Breakpoint { c_lo: 12.1, c_hi: 35.4, i_lo: 51.0, i_hi: 100.0 },
    Breakpoint { c_lo: 35.5, c_hi: 55.4, i_lo: 101.0, i_hi: 150.0 },
    Breakpoint { c_lo: 55.5, c_hi: 150.4, i_lo: 151.0, i_hi: 200.0 },
    Breakpoint { c_lo: 150.5, c_hi: 250.4, i_lo: 201.0, i_hi: 300.0 },
    Breakpoint { c_lo: 250.5, c_hi: 500.0, i_lo: 301.0, i_hi: 500.0 },
];

/// EPA PM₁₀ breakpoints (µg/m³).
const PM10_BREAKPOINTS: [Breakpoint; 6] = [
    Breakpoint { c_lo: 0.0, c_hi: 54.0, i_lo: 0.0, i_hi: 50.0 },
    Breakpoint { c_lo: 55.0, c_hi: 154.0, i_lo: 51.0, i_hi: 100.0 },
    Breakpoint { c_lo: 155.0, c_hi: 254.0, i_lo: 101.0, i_hi: 150.0 },
    Breakpoint { c_lo: 255.0, c_hi: 354.0, i_lo: 151.0, i_hi: 200.0 },
    Breakpoint { c_lo: 355.0, c_hi: 424.0, i_lo: 201.0, i_hi: 300.0 },
    Breakpoint { c_lo: 425.0, c_hi: 604.0, i_lo: 301.0, i_hi: 500.0 },
];

/// Interpolate one pollutant's sub-index from its breakpoint table.
///
/// Concentrations between two rows (e.g. PM₂.₅ 12.05) snap to the row whose
/// `c_lo` is closest below; concentrations above the top row cap at 500.
fn subindex(concentration: f32, table: &[Breakpoint]) -> f32 {
    let top = table.last().unwrap_or(&table[0]);
    if concentration > top.c_hi {
        return top.i_hi;
    }
    let mut row = &table[0];
    for bp in table {
        if concentration >= bp.c_lo {
            row = bp;
        }
    }
    let c = concentration.min(row.c_hi);
    row.i_lo + (row.i_hi - row.i_lo) / (row.c_hi - row.c_lo) * (c - row.c_lo)
}

/// Compute the EPA AQI from instantaneous PM₂.₅ and PM₁₀ concentrations.
///
/// Returns `None` when either input is NaN or negative; the caller writes its
/// no-data sentinel in that case.
#[must_use]
pub fn compute_aqi(pm25: f32, pm10: f32) -> Option<AqiReading> {
    if pm25.is_nan() || pm10.is_nan() || pm25 < 0.0 || pm10 < 0.0 {
        return None;
    }

    let pm25_subindex = subindex(pm25, &PM25_BREAKPOINTS);
    let pm10_subindex = subindex(pm10, &PM10_BREAKPOINTS);

    let (overall, dominant_pollutant) = if pm25_subindex >= pm10_subindex {
        (pm25_subindex, Pollutant::Pm25)
    } else {
        (pm10_subindex, Pollutant::Pm10)
    };

    // Sub-indices are bounded by the tables at 500, so the cast is safe.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let value = overall.round() as u16;

    Some(AqiReading {
        value,
        category: AqiCategory::from_value(value),
        dominant_pollutant,
        pm25_subindex,
        pm10_subindex,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 0.05, "{a} != {b}");
    }

    #[test]
    fn test_aqi_good_pm25_dominant() {
        // pm25 8.0 -> 50/12*8 = 33.33; pm10 20.0 -> 50/54*20 = 18.52
        let aqi = compute_aqi(8.0, 20.0).unwrap();
        assert_close(aqi.pm25_subindex, 33.33);
        assert_close(aqi.pm10_subindex, 18.52);
        assert_eq!(aqi.value, 33);
        assert_eq!(aqi.dominant_pollutant, Pollutant::Pm25);
        assert_eq!(aqi.category, AqiCategory::Good);
    }

    #[test]
    fn test_aqi_moderate_pm10_dominant() {
        // pm25 10.0 -> 41.67; pm10 100.0 -> 51 + 49/99*45 = 73.27
        let aqi = compute_aqi(10.0, 100.0).unwrap();
        assert_close(aqi.pm25_subindex, 41.67);
        assert_close(aqi.pm10_subindex, 73.27);
        assert_eq!(aqi.value, 73);
        assert_eq!(aqi.dominant_pollutant, Pollutant::Pm10);
        assert_eq!(aqi.category, AqiCategory::Moderate);
    }

    #[test]
    fn test_aqi_pm25_exact_breakpoints() {
        // Table endpoints must map exactly
        let cases = [
            (12.0, 50.0),
            (12.1, 51.0),
            (35.4, 100.0),
            (35.5, 101.0),
            (55.4, 150.0),
            (55.5, 151.0),
        ];
        for (c, expected) in cases {
            let aqi = compute_aqi(c, 0.0).unwrap();
            assert_close(aqi.pm25_subindex, expected);
        }
    }

    #[test]
    fn test_aqi_pm10_exact_breakpoints() {
        let cases = [(54.0, 50.0), (55.0, 51.0), (154.0, 100.0), (155.0, 101.0)];
        for (c, expected) in cases {
            let aqi = compute_aqi(0.0, c).unwrap();
            assert_close(aqi.pm10_subindex, expected);
        }
    }

    #[test]
    fn test_aqi_concentration_above_table_caps() {
        let aqi = compute_aqi(700.0, 0.0).unwrap();
        assert_eq!(aqi.value, 500);
        assert_eq!(aqi.category, AqiCategory::Hazardous);
    }

    #[test]
    fn test_aqi_invalid_inputs() {
        assert!(compute_aqi(f32::NAN, 10.0).is_none());
        assert!(compute_aqi(10.0, f32::NAN).is_none());
        assert!(compute_aqi(-1.0, 10.0).is_none());
    }

    #[test]
    fn test_aqi_tie_prefers_pm25() {
        // Equal sub-indices: pm25 wins the argmax
        let aqi = compute_aqi(0.0, 0.0).unwrap();
        assert_eq!(aqi.dominant_pollutant, Pollutant::Pm25);
        assert_eq!(aqi.value, 0);
    }

    #[test]
    fn test_category_boundaries() {
        assert_eq!(AqiCategory::from_value(50), AqiCategory::Good);
        assert_eq!(AqiCategory::from_value(51), AqiCategory::Moderate);
        assert_eq!(AqiCategory::from_value(150), AqiCategory::UnhealthySensitive);
        assert_eq!(AqiCategory::from_value(301), AqiCategory::Hazardous);
        assert_eq!(AqiCategory::from_value(501), AqiCategory::Unknown);
    }
}
