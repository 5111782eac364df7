use crate::models::{BoundingBox, Position};

/// Earth's radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Calculate the Haversine distance between two points in kilometers
///
/// # Arguments
/// * `lat1` - Latitude of first point in degrees
/// * `lon1` - Longitude of first point in degrees
/// * `lat2` - Latitude of second point in degrees
/// * `lon2` - Longitude of second point in degrees
///
/// # Returns
/// Distance in kilometers. Inputs are not validated.
#[inline]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1.0 for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Haversine distance between two positions in kilometers
#[inline]
pub fn distance_between(a: &Position, b: &Position) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Calculate a bounding box around a center point
///
/// Cheaper than Haversine, used as a pre-filter. Degrees are taken as 111km,
/// slightly short of a true degree, so the box never undercuts the circle.
/// The longitude half-width is the spherical reach of the circle,
/// `asin(sin(d) / cos(lat))`, which grows faster than `d / cos(lat)` near
/// the poles.
///
/// A box that reaches a pole, or whose circle wraps around it, spans every
/// longitude. A box that crosses the antimeridian is returned with
/// `min_lon > max_lon`.
pub fn calculate_bounding_box(lat: f64, lon: f64, radius_km: f64) -> BoundingBox {
    let lat_delta = radius_km / 111.0;
    let min_lat = (lat - lat_delta).max(-90.0);
    let max_lat = (lat + lat_delta).min(90.0);

    let angular = lat_delta.to_radians();
    let reach = angular.sin() / lat.to_radians().cos().abs();

    if min_lat <= -90.0 || max_lat >= 90.0 || !reach.is_finite() || reach >= 1.0 {
        return BoundingBox {
            min_lat,
            max_lat,
            min_lon: -180.0,
            max_lon: 180.0,
        };
    }

    let lon_delta = reach.asin().to_degrees();

    BoundingBox {
        min_lat,
        max_lat,
        min_lon: wrap_longitude(lon - lon_delta),
        max_lon: wrap_longitude(lon + lon_delta),
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    if lon < -180.0 {
        lon + 360.0
    } else if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// Check if a point is within a bounding box
#[inline]
pub fn is_within_bounding_box(lat: f64, lon: f64, bbox: &BoundingBox) -> bool {
    if lat < bbox.min_lat || lat > bbox.max_lat {
        return false;
    }

    if bbox.min_lon <= bbox.max_lon {
        lon >= bbox.min_lon && lon <= bbox.max_lon
    } else {
        // Box wraps across the antimeridian
        lon >= bbox.min_lon || lon <= bbox.max_lon
    }
}

/// Encode a position as a base32 geohash of the given precision
pub fn geohash_encode(lat: f64, lon: f64, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut bits = 0u8;
    let mut bit_count = 0;
    let mut even = true;

    while hash.len() < precision {
        let (range, value) = if even {
            (&mut lon_range, lon)
        } else {
            (&mut lat_range, lat)
        };
        let mid = (range.0 + range.1) / 2.0;
        bits <<= 1;
        if value >= mid {
            bits |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
        even = !even;
        bit_count += 1;

        if bit_count == 5 {
            hash.push(GEOHASH_ALPHABET[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    hash
}
