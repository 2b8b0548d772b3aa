//! Spherical-earth geodesy helpers

use crate::domain::types::Position;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two lat/lon pairs (degrees)
#[inline]
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1 for antipodal points
    let c = 2.0 * a.min(1.0).sqrt().atan2((1.0 - a).max(0.0).sqrt());

    EARTH_RADIUS_M * c
}

/// Distance in meters from a position to a point
#[inline]
pub fn distance_to(position: &Position, latitude: f64, longitude: f64) -> f64 {
    haversine_m(position.latitude, position.longitude, latitude, longitude)
}

/// Latitude is finite and within [-90, 90]
#[inline]
pub fn valid_latitude(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

/// Longitude is finite and within [-180, 180]
#[inline]
pub fn valid_longitude(lon: f64) -> bool {
    lon.is_finite() && (-180.0..=180.0).contains(&lon)
}

/// Point `fraction` of the way along the great circle from `a` to `b`
pub fn interpolate(a: (f64, f64), b: (f64, f64), fraction: f64) -> (f64, f64) {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let d = haversine_m(a.0, a.1, b.0, b.1) / EARTH_RADIUS_M;
    if d == 0.0 {
        return a;
    }

    let sin_d = d.sin();
    let wa = ((1.0 - fraction) * d).sin() / sin_d;
    let wb = (fraction * d).sin() / sin_d;

    let x = wa * lat1.cos() * lon1.cos() + wb * lat2.cos() * lon2.cos();
    let y = wa * lat1.cos() * lon1.sin() + wb * lat2.cos() * lon2.sin();
    let z = wa * lat1.sin() + wb * lat2.sin();

    let lat = z.atan2((x * x + y * y).sqrt());
    let lon = y.atan2(x);
    (lat.to_degrees(), lon.to_degrees())
}
