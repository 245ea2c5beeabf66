/// Data transformation for the air quality service.
///
/// Everything here is pure: no I/O, no clock reads.
///
/// Submodules:
/// - `aqi`: EPA AQI sub-indices from particulate concentrations.
/// - `features`: observation validation and feature engineering.
/// - `outlook`: multi-day projection from stored history.
/// - `stats`: summary statistics and weather insights for the dashboard.

pub mod aqi;
pub mod features;
pub mod outlook;
pub mod stats;
