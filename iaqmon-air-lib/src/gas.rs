//! Sensirion gas-index categories (VOC and NOx).
//!
//! The gas index is a 0..=500 relative scale with 100 as the typical indoor
//! baseline. Anything above 500 (including the all-ones no-data sentinel)
//! is Unknown.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasCategory {
    Excellent,
    Good,
    Moderate,
    Poor,
    VeryPoor,
    Severe,
    Unknown,
}

/// Categorize a Sensirion gas index.
#[must_use]
pub fn gas_category(index: u16) -> GasCategory {
    match index {
        0..=100 => GasCategory::Excellent,
        101..=150 => GasCategory::Good,
        151..=200 => GasCategory::Moderate,
        201..=250 => GasCategory::Poor,
        251..=350 => GasCategory::VeryPoor,
        351..=500 => GasCategory::Severe,
        _ => GasCategory::Unknown,
    }
}

/// Linear VOC contribution to the overall IAQ score: index 0 → 100, 500 → 0.
#[must_use]
pub fn voc_score(index: u16) -> f32 {
    (100.0 - f32::from(index.min(500)) / 5.0).clamp(0.0, 100.0)
}
