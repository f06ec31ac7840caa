use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
pub const METERS_PER_MILE: f64 = 1609.344;

// ~111 km per degree of latitude on the mean sphere.
const METERS_PER_DEGREE: f64 = 111_000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("coordinate is not a finite number")]
    NotFinite,
    #[error("latitude {0} out of range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} out of range [-180, 180]")]
    LongitudeOutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Downtown Austin, used when no device fix is available.
    pub const AUSTIN: GeoPoint = GeoPoint {
        lat: 30.2672,
        lng: -97.7431,
    };

    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        if !lat.is_finite() || !lng.is_finite() {
            return Err(GeoError::NotFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(GeoError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(GeoError::LongitudeOutOfRange(lng));
        }
        Ok(Self { lat, lng })
    }

    /// Forces an arbitrary pair into range: latitude is clamped, longitude
    /// wrapped. Non-finite components collapse to 0.
    pub fn clamped(lat: f64, lng: f64) -> Self {
        let lat = if lat.is_finite() {
            lat.clamp(-90.0, 90.0)
        } else {
            0.0
        };
        let lng = if (-180.0..=180.0).contains(&lng) {
            lng
        } else if lng.is_finite() {
            (lng + 180.0).rem_euclid(360.0) - 180.0
        } else {
            0.0
        };
        Self { lat, lng }
    }

    pub fn antipode(&self) -> Self {
        let lng = if self.lng > 0.0 {
            self.lng - 180.0
        } else {
            self.lng + 180.0
        };
        Self {
            lat: -self.lat,
            lng,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, p: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&p.lat)
            && (self.min_lng..=self.max_lng).contains(&p.lng)
    }
}

pub fn haversine_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(b.lat - a.lat);
    let dlng = to_rad(b.lng - a.lng);
    let h = (dlat / 2.0).sin().powi(2)
        + to_rad(a.lat).cos() * to_rad(b.lat).cos() * (dlng / 2.0).sin().powi(2);
    // h can drift just above 1.0 near antipodes
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();
    EARTH_RADIUS_METERS * c
}

/// Degree box around `center` that contains every point within `radius_m`.
///
/// Returns `None` when the box would cross a pole or the antimeridian; the
/// caller should then scan without a box.
pub fn bounding_box(center: &GeoPoint, radius_m: f64) -> Option<BoundingBox> {
    if !radius_m.is_finite() || radius_m < 0.0 {
        return None;
    }
    let lat_change = radius_m / METERS_PER_DEGREE;
    let min_lat = center.lat - lat_change;
    let max_lat = center.lat + lat_change;
    if min_lat <= -90.0 || max_lat >= 90.0 {
        return None;
    }

    // Widest longitude span sits at the latitude closest to a pole.
    let widest_lat = min_lat.abs().max(max_lat.abs()).to_radians();
    let lng_change = lat_change / widest_lat.cos();
    let min_lng = center.lng - lng_change;
    let max_lng = center.lng + lng_change;
    if min_lng < -180.0 || max_lng > 180.0 {
        return None;
    }

    Some(BoundingBox {
        min_lat,
        max_lat,
        min_lng,
        max_lng,
    })
}

pub fn miles_to_meters(miles: f64) -> f64 {
    miles * METERS_PER_MILE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero_meters() {
        let p = GeoPoint::AUSTIN;
        assert_eq!(haversine_meters(&p, &p), 0.0);
    }

    #[test]
    fn one_tenth_degree_north_is_about_eleven_km() {
        let a = GeoPoint::new(30.2672, -97.7431).unwrap();
        let b = GeoPoint::new(30.3672, -97.7431).unwrap();
        let d = haversine_meters(&a, &b);
        assert!((d - 11_119.5).abs() < 5.0, "got {d}");
    }

    #[test]
    fn antipodal_distance_is_half_circumference() {
        let a = GeoPoint::AUSTIN;
        let d = haversine_meters(&a, &a.antipode());
        let half = std::f64::consts::PI * EARTH_RADIUS_METERS;
        assert!(d.is_finite());
        assert!((d - half).abs() < 1.0, "got {d}");
    }

    #[test]
    fn poles_are_finite() {
        let north = GeoPoint::new(90.0, 0.0).unwrap();
        let south = GeoPoint::new(-90.0, 45.0).unwrap();
        assert!(haversine_meters(&north, &south).is_finite());
    }

    #[test]
    fn new_rejects_out_of_range_and_nan() {
        assert_eq!(GeoPoint::new(f64::NAN, 0.0), Err(GeoError::NotFinite));
        assert_eq!(
            GeoPoint::new(91.0, 0.0),
            Err(GeoError::LatitudeOutOfRange(91.0))
        );
        assert_eq!(
            GeoPoint::new(0.0, -181.0),
            Err(GeoError::LongitudeOutOfRange(-181.0))
        );
    }

    #[test]
    fn clamped_wraps_longitude_and_clamps_latitude() {
        let p = GeoPoint::clamped(100.0, 190.0);
        assert_eq!(p.lat, 90.0);
        assert!((p.lng - -170.0).abs() < 1e-9);

        assert_eq!(GeoPoint::clamped(0.0, 180.0).lng, 180.0);
        assert_eq!(GeoPoint::clamped(0.0, -180.0).lng, -180.0);
        assert_eq!(GeoPoint::clamped(f64::INFINITY, f64::NAN), GeoPoint { lat: 0.0, lng: 0.0 });
    }

    #[test]
    fn bounding_box_contains_points_inside_radius() {
        let center = GeoPoint::AUSTIN;
        let bbox = bounding_box(&center, 5_000.0).unwrap();
        let north = GeoPoint::new(center.lat + 0.04, center.lng).unwrap();
        let east = GeoPoint::new(center.lat, center.lng + 0.05).unwrap();
        assert!(haversine_meters(&center, &north) < 5_000.0);
        assert!(haversine_meters(&center, &east) < 5_000.0);
        assert!(bbox.contains(&north));
        assert!(bbox.contains(&east));
    }

    #[test]
    fn bounding_box_gives_up_near_poles_and_antimeridian() {
        assert!(bounding_box(&GeoPoint::new(89.9, 0.0).unwrap(), 50_000.0).is_none());
        assert!(bounding_box(&GeoPoint::new(0.0, 179.9).unwrap(), 50_000.0).is_none());
        assert!(bounding_box(&GeoPoint::AUSTIN, f64::NAN).is_none());
    }

    #[test]
    fn fifty_miles_in_meters() {
        assert!((miles_to_meters(50.0) - 80_467.2).abs() < 1e-6);
    }
}
