//! AQI category thresholds.
//!
//! Maps an AQI value onto the six EPA health categories shown on the
//! dashboard and attached to every prediction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// AQI health categories, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    /// Upper AQI bound of each category, inclusive. Hazardous is open-ended.
    pub const UPPER_BOUNDS: [(AqiCategory, f64); 5] = [
        (AqiCategory::Good, 50.0),
        (AqiCategory::Moderate, 100.0),
        (AqiCategory::UnhealthyForSensitive, 150.0),
        (AqiCategory::Unhealthy, 200.0),
        (AqiCategory::VeryUnhealthy, 300.0),
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitive => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    /// Short public-health advice for the dashboard.
    pub fn advice(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Air quality is satisfactory.",
            AqiCategory::Moderate => "Unusually sensitive people should limit prolonged exertion outdoors.",
            AqiCategory::UnhealthyForSensitive => {
                "Children, older adults, and people with lung disease should reduce outdoor exertion."
            }
            AqiCategory::Unhealthy => "Everyone should reduce prolonged outdoor exertion.",
            AqiCategory::VeryUnhealthy => "Avoid prolonged outdoor exertion; keep windows closed.",
            AqiCategory::Hazardous => "Stay indoors.",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Category for an AQI value. Negative or NaN input is treated as Good.
pub fn categorize(aqi: f64) -> AqiCategory {
    AqiCategory::UPPER_BOUNDS
        .iter()
        .find(|(_, upper)| aqi <= *upper || aqi.is_nan())
        .map(|(category, _)| *category)
        .unwrap_or(AqiCategory::Hazardous)
}
