//! US EPA Air Quality Index computation.
//!
//! The index is piecewise-linear in pollutant concentration. Each pollutant
//! has its own breakpoint table; the reported AQI is the maximum of the
//! pollutant sub-indices. Only particulate matter is used here because the
//! ozone and gas breakpoints are defined on 8-hour averages in ppb/ppm,
//! which the hourly µg/m³ feed does not provide directly.
//!
//! Reference: EPA-454/B-18-007, Technical Assistance Document for the
//! Reporting of Daily Air Quality.

/// One row of a breakpoint table.
#[derive(Debug, Clone, Copy)]
struct Breakpoint {
    c_low: f64,
    c_high: f64,
    i_low: f64,
    i_high: f64,
}

const fn bp(c_low: f64, c_high: f64, i_low: f64, i_high: f64) -> Breakpoint {
    Breakpoint { c_low, c_high, i_low, i_high }
}

/// PM2.5 24-hour breakpoints, µg/m³ truncated to 0.1.
const PM2_5_BREAKPOINTS: [Breakpoint; 7] = [
    bp(0.0, 12.0, 0.0, 50.0),
    bp(12.1, 35.4, 51.0, 100.0),
    bp(35.5, 55.4, 101.0, 150.0),
    bp(55.5, 150.4, 151.0, 200.0),
    bp(150.5, 250.4, 201.0, 300.0),
    bp(250.5, 350.4, 301.0, 400.0),
    bp(350.5, 500.4, 401.0, 500.0),
];

/// PM10 24-hour breakpoints, µg/m³ truncated to integer.
const PM10_BREAKPOINTS: [Breakpoint; 7] = [
    bp(0.0, 54.0, 0.0, 50.0),
    bp(55.0, 154.0, 51.0, 100.0),
    bp(155.0, 254.0, 101.0, 150.0),
    bp(255.0, 354.0, 151.0, 200.0),
    bp(355.0, 424.0, 201.0, 300.0),
    bp(425.0, 504.0, 301.0, 400.0),
    bp(505.0, 604.0, 401.0, 500.0),
];

/// Highest value on the scale; concentrations above the last breakpoint
/// are reported here ("beyond the AQI").
pub const AQI_MAX: f64 = 500.0;

fn sub_index(concentration: f64, table: &[Breakpoint]) -> f64 {
    if concentration <= 0.0 {
        return 0.0;
    }
    for b in table {
        if concentration <= b.c_high {
            let c = concentration.max(b.c_low);
            let index = (b.i_high - b.i_low) / (b.c_high - b.c_low) * (c - b.c_low) + b.i_low;
            return index.round();
        }
    }
    AQI_MAX
}

/// PM2.5 sub-index for a concentration in µg/m³.
pub fn pm2_5_index(concentration: f64) -> f64 {
    let truncated = (concentration * 10.0).floor() / 10.0;
    sub_index(truncated, &PM2_5_BREAKPOINTS)
}

/// PM10 sub-index for a concentration in µg/m³.
pub fn pm10_index(concentration: f64) -> f64 {
    sub_index(concentration.floor(), &PM10_BREAKPOINTS)
}

/// Overall AQI: the worse of the two particulate sub-indices.
pub fn compute_aqi(pm2_5: f64, pm10: f64) -> f64 {
    pm2_5_index(pm2_5).max(pm10_index(pm10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_air_is_zero() {
        assert_eq!(compute_aqi(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_pm2_5_breakpoint_edges() {
        assert_eq!(pm2_5_index(12.0), 50.0);
        assert_eq!(pm2_5_index(12.1), 51.0);
        assert_eq!(pm2_5_index(35.4), 100.0);
        assert_eq!(pm2_5_index(35.5), 101.0);
        assert_eq!(pm2_5_index(500.4), 500.0);
    }

    #[test]
    fn test_pm2_5_truncates_before_lookup() {
        // 12.09 truncates to 12.0, not 12.1
        assert_eq!(pm2_5_index(12.09), 50.0);
    }

    #[test]
    fn test_pm2_5_midpoint_interpolation() {
        // 23.75 → (100-51)/(35.4-12.1) * (23.7-12.1) + 51 = 75.39…
        assert_eq!(pm2_5_index(23.75), 75.0);
    }

    #[test]
    fn test_pm10_edges() {
        assert_eq!(pm10_index(54.9), 50.0);
        assert_eq!(pm10_index(55.0), 51.0);
        assert_eq!(pm10_index(604.0), 500.0);
    }

    #[test]
    fn test_beyond_scale_is_capped() {
        assert_eq!(pm2_5_index(900.0), AQI_MAX);
        assert_eq!(pm10_index(1200.0), AQI_MAX);
    }

    #[test]
    fn test_overall_aqi_takes_worse_pollutant() {
        // PM2.5 35.5 → 101, PM10 20 → 19
        assert_eq!(compute_aqi(35.5, 20.0), 101.0);
        // PM2.5 5 → 21, PM10 200 → 123
        assert_eq!(compute_aqi(5.0, 200.0), 123.0);
    }
}
