//! Health categories and freshness checks consumed by the dashboard and
//! prediction output.

pub mod staleness;
pub mod thresholds;
