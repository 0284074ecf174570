//! Spherical-earth geometry helpers (distances in km, angles in degrees)

/// Mean earth radius (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance (km) by the haversine formula.
pub fn epicentral_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = phi2 - phi1;
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Initial bearing from point 1 to point 2, clockwise from north (radians).
pub fn azimuth(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dlambda = (lon2 - lon1).to_radians();
    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    y.atan2(x)
}

/// Hypocentral distance (km) from a source at `depth_km` to a surface point.
pub fn hypocentral_distance_km(src_lat: f64, src_lon: f64, depth_km: f64, lat: f64, lon: f64) -> f64 {
    epicentral_distance_km(src_lat, src_lon, lat, lon).hypot(depth_km)
}

/// Local (east, north) offset in km of a point relative to an origin.
pub fn local_offset_km(origin_lat: f64, origin_lon: f64, lat: f64, lon: f64) -> (f64, f64) {
    let d = epicentral_distance_km(origin_lat, origin_lon, lat, lon);
    if d == 0.0 {
        return (0.0, 0.0);
    }
    let az = azimuth(origin_lat, origin_lon, lat, lon);
    (d * az.sin(), d * az.cos())
}

/// Point reached from an origin by a local (east, north) offset in km.
pub fn offset_to_latlon(origin_lat: f64, origin_lon: f64, east_km: f64, north_km: f64) -> (f64, f64) {
    let d = east_km.hypot(north_km);
    if d == 0.0 {
        return (origin_lat, origin_lon);
    }
    let az = east_km.atan2(north_km);
    let delta = d / EARTH_RADIUS_KM;
    let phi1 = origin_lat.to_radians();
    let lambda1 = origin_lon.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * az.cos()).asin();
    let lambda2 = lambda1
        + (az.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());
    (phi2.to_degrees(), normalize_longitude(lambda2.to_degrees()))
}

/// Wrap a longitude into [-180, 180).
pub fn normalize_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}
