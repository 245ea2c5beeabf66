/// Location registry for the air quality monitoring service.
///
/// Defines the canonical list of locations this service knows how to fetch
/// and forecast for. Configuration refers to a location by id; explicit
/// coordinates in the config file take precedence over the registry entry.
/// All other modules should resolve locations through here rather than
/// hardcoding coordinates.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Location metadata
// ---------------------------------------------------------------------------

/// A monitored location, resolved from the registry or from config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Short lowercase id used as the feature-store key.
    pub id: String,
    pub name: String,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
}

/// Static registry entry.
pub struct KnownLocation {
    pub id: &'static str,
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

impl KnownLocation {
    pub fn to_location(&self) -> Location {
        Location {
            id: self.id.to_string(),
            name: self.name.to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// The registry entry used when configuration names no location.
pub const DEFAULT_LOCATION_ID: &str = "karachi";

/// All locations with built-in coordinates.
///
/// Coordinates are city-centre points as used by the Open-Meteo geocoder;
/// the air-quality model grid is ~11 km so finer precision is pointless.
pub static LOCATION_REGISTRY: &[KnownLocation] = &[
    KnownLocation {
        id: "karachi",
        name: "Karachi, PK",
        latitude: 24.8607,
        longitude: 67.0011,
    },
    KnownLocation {
        id: "lahore",
        name: "Lahore, PK",
        latitude: 31.5204,
        longitude: 74.3587,
    },
    KnownLocation {
        id: "islamabad",
        name: "Islamabad, PK",
        latitude: 33.6844,
        longitude: 73.0479,
    },
    KnownLocation {
        id: "delhi",
        name: "New Delhi, IN",
        latitude: 28.6139,
        longitude: 77.2090,
    },
    KnownLocation {
        id: "peoria",
        name: "Peoria, IL, US",
        latitude: 40.6936,
        longitude: -89.5890,
    },
];

/// Looks up a location by id. Returns `None` if not found.
pub fn find_location(id: &str) -> Option<&'static KnownLocation> {
    LOCATION_REGISTRY.iter().find(|l| l.id == id)
}

/// Returns the ids of all registered locations.
pub fn all_location_ids() -> Vec<&'static str> {
    LOCATION_REGISTRY.iter().map(|l| l.id).collect()
}

/// Checks that coordinates are on the globe.
pub fn coordinates_are_valid(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_registry_coordinates_are_valid() {
        for location in LOCATION_REGISTRY {
            assert!(
                coordinates_are_valid(location.latitude, location.longitude),
                "coordinates for '{}' are off the globe",
                location.name
            );
        }
    }

    #[test]
    fn test_no_duplicate_location_ids() {
        let mut seen = std::collections::HashSet::new();
        for location in LOCATION_REGISTRY {
            assert!(
                seen.insert(location.id),
                "duplicate location id '{}' found in LOCATION_REGISTRY",
                location.id
            );
        }
    }

    #[test]
    fn test_ids_are_lowercase_keys() {
        for id in all_location_ids() {
            assert!(
                id.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "location id '{}' should be a lowercase key",
                id
            );
        }
    }

    #[test]
    fn test_default_location_is_registered() {
        let location = find_location(DEFAULT_LOCATION_ID).expect("default location must exist");
        assert!(location.name.contains("Karachi"));
    }

    #[test]
    fn test_find_location_returns_none_for_unknown_id() {
        assert!(find_location("atlantis").is_none());
    }

    #[test]
    fn test_coordinates_validation_rejects_out_of_range() {
        assert!(!coordinates_are_valid(91.0, 0.0));
        assert!(!coordinates_are_valid(0.0, -181.0));
        assert!(!coordinates_are_valid(f64::NAN, 0.0));
        assert!(coordinates_are_valid(-90.0, 180.0));
    }
}
