//! Static table of known locations
//!
//! Locations are addressed by `country:region:city` keys. Popular locations
//! are the ones pre-warmed at startup.

use super::Location;

/// Static array of all known locations
pub static LOCATIONS: [Location; 12] = [
    Location {
        key: "us:ny:nyc",
        name: "New York City",
        latitude: 40.7128,
        longitude: -74.0060,
        popular: true,
    },
    Location {
        key: "us:ca:la",
        name: "Los Angeles",
        latitude: 34.0522,
        longitude: -118.2437,
        popular: true,
    },
    Location {
        key: "us:il:chicago",
        name: "Chicago",
        latitude: 41.8781,
        longitude: -87.6298,
        popular: false,
    },
    Location {
        key: "ca:bc:vancouver",
        name: "Vancouver",
        latitude: 49.2827,
        longitude: -123.1207,
        popular: false,
    },
    Location {
        key: "gb:eng:london",
        name: "London",
        latitude: 51.5074,
        longitude: -0.1278,
        popular: true,
    },
    Location {
        key: "fr:idf:paris",
        name: "Paris",
        latitude: 48.8566,
        longitude: 2.3522,
        popular: true,
    },
    Location {
        key: "de:be:berlin",
        name: "Berlin",
        latitude: 52.5200,
        longitude: 13.4050,
        popular: true,
    },
    Location {
        key: "es:md:madrid",
        name: "Madrid",
        latitude: 40.4168,
        longitude: -3.7038,
        popular: false,
    },
    Location {
        key: "it:lz:rome",
        name: "Rome",
        latitude: 41.9028,
        longitude: 12.4964,
        popular: false,
    },
    Location {
        key: "in:mh:mumbai",
        name: "Mumbai",
        latitude: 19.0760,
        longitude: 72.8777,
        popular: true,
    },
    Location {
        key: "in:dl:delhi",
        name: "Delhi",
        latitude: 28.7041,
        longitude: 77.1025,
        popular: false,
    },
    Location {
        key: "au:nsw:sydney",
        name: "Sydney",
        latitude: -33.8688,
        longitude: 151.2093,
        popular: false,
    },
];

/// Get a location by its key
///
/// # Example
///
/// ```
/// use pollencast::data::locations::get_location_by_key;
///
/// if let Some(location) = get_location_by_key("gb:eng:london") {
///     println!("Found: {}", location.name);
/// }
/// ```
pub fn get_location_by_key(key: &str) -> Option<&'static Location> {
    let key = key.trim().to_lowercase();
    LOCATIONS.iter().find(|location| location.key == key)
}

/// Get all known locations
pub fn all_locations() -> &'static [Location] {
    &LOCATIONS
}

/// Keys of the locations pre-warmed at startup
pub fn popular_keys() -> impl Iterator<Item = &'static str> {
    LOCATIONS
        .iter()
        .filter(|location| location.popular)
        .map(|location| location.key)
}
