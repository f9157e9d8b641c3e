//! WGS84 ⇄ WebMercator (EPSG:3857) projection. No full projection library
//! is pulled in for two closed-form formulas.

/// Earth radius used by the WebMercator projection, meters.
pub const R_EARTH: f64 = 6_378_137.0;

/// Projects WGS84 `(lon, lat)` degrees to WebMercator `(x, y)` meters.
///
/// Latitude is clamped to `±89.9°` before projecting, since the Mercator
/// projection is singular at the poles.
#[must_use]
pub fn lonlat_to_webmercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon.to_radians() * R_EARTH;
    let lat = lat.clamp(-89.9, 89.9);
    let y = (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln() * R_EARTH;
    (x, y)
}

/// Inverse-projects WebMercator `(x, y)` meters back to WGS84 `(lon, lat)`
/// degrees.
#[must_use]
pub fn webmercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / R_EARTH).to_degrees();
    let lat = (2.0 * (y / R_EARTH).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_within_submillimeter_precision() {
        let (lon, lat) = (-73.5673, 45.5017);
        let (x, y) = lonlat_to_webmercator(lon, lat);
        let (lon2, lat2) = webmercator_to_lonlat(x, y);
        assert!((lon - lon2).abs() < 1e-9);
        assert!((lat - lat2).abs() < 1e-9);
    }

    #[test]
    fn clamps_latitude_near_poles() {
        let (_, y_north) = lonlat_to_webmercator(0.0, 89.99);
        let (_, y_clamped) = lonlat_to_webmercator(0.0, 89.9);
        assert!((y_north - y_clamped).abs() < 1e-6);
    }

    #[test]
    fn equator_projects_to_zero() {
        let (_, y) = lonlat_to_webmercator(0.0, 0.0);
        assert!(y.abs() < 1e-9);
    }
}
