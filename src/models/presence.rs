use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::geo::GeoPoint;

// Storage row for the `presence` table. One row per user, last write wins.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PresenceRow {
    pub uid: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub location_updated_at: Option<String>,
    pub visibility_enabled: i64,
    pub radius_meters: Option<f64>,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VisibilityError {
    #[error("radiusMeters must be a positive number of meters, got {0}")]
    InvalidRadius(f64),
}

/// Broadcast permission a user grants to everyone else.
///
/// `radius_meters == None` means visible worldwide. When `enabled` is false
/// the user never shows up on anyone's map, whatever the radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    pub enabled: bool,
    pub radius_meters: Option<f64>,
}

impl Visibility {
    pub fn new(enabled: bool, radius_meters: Option<f64>) -> Result<Self, VisibilityError> {
        if let Some(r) = radius_meters {
            if !r.is_finite() || r <= 0.0 {
                return Err(VisibilityError::InvalidRadius(r));
            }
        }
        Ok(Self {
            enabled,
            radius_meters,
        })
    }

    pub fn hidden() -> Self {
        Self {
            enabled: false,
            radius_meters: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceLocation {
    pub lat: f64,
    pub lng: f64,
    pub updated_at: String,
}

impl PresenceLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub uid: String,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub location: Option<PresenceLocation>,
    pub visibility: Visibility,
}

impl TryFrom<PresenceRow> for UserPresence {
    type Error = VisibilityError;

    fn try_from(row: PresenceRow) -> Result<Self, Self::Error> {
        let visibility = Visibility::new(row.visibility_enabled != 0, row.radius_meters)?;

        // A half-written or non-numeric location counts as no location.
        let location = match (row.lat, row.lng) {
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => {
                Some(PresenceLocation {
                    lat,
                    lng,
                    updated_at: row.location_updated_at.unwrap_or(row.updated_at),
                })
            }
            _ => None,
        };

        Ok(Self {
            uid: row.uid,
            display_name: row.display_name,
            photo_url: row.photo_url,
            location,
            visibility,
        })
    }
}

/// Partial update applied by an upsert-merge. `None` leaves the stored
/// field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresencePatch {
    pub location: Option<GeoPoint>,
    pub visibility: Option<Visibility>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl PresencePatch {
    pub fn location(point: GeoPoint) -> Self {
        Self {
            location: Some(point),
            ..Default::default()
        }
    }

    pub fn visibility(visibility: Visibility) -> Self {
        Self {
            visibility: Some(visibility),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.visibility.is_none()
            && self.display_name.is_none()
            && self.photo_url.is_none()
    }
}

// Map marker view-model: a peer that passed the visibility filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisiblePeer {
    pub uid: String,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub distance_meters: f64,
    pub relationship: Option<super::RelState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> PresenceRow {
        PresenceRow {
            uid: "u1".to_string(),
            display_name: Some("Aria".to_string()),
            photo_url: None,
            lat: Some(30.0),
            lng: Some(-97.0),
            location_updated_at: Some("2026-01-01T00:00:00.000Z".to_string()),
            visibility_enabled: 1,
            radius_meters: Some(1000.0),
            updated_at: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn visibility_rejects_non_positive_radius() {
        assert!(Visibility::new(true, Some(0.0)).is_err());
        assert!(Visibility::new(true, Some(-5.0)).is_err());
        assert!(Visibility::new(true, Some(f64::NAN)).is_err());
        assert!(Visibility::new(true, None).is_ok());
        assert!(Visibility::new(false, Some(1.0)).is_ok());
    }

    #[test]
    fn half_written_location_becomes_absent() {
        let mut r = row();
        r.lng = None;
        let presence = UserPresence::try_from(r).unwrap();
        assert!(presence.location.is_none());

        let mut r = row();
        r.lat = Some(f64::NAN);
        assert!(UserPresence::try_from(r).unwrap().location.is_none());
    }

    #[test]
    fn invalid_stored_radius_is_malformed() {
        let mut r = row();
        r.radius_meters = Some(-1.0);
        assert_eq!(
            UserPresence::try_from(r),
            Err(VisibilityError::InvalidRadius(-1.0))
        );
    }

    #[test]
    fn serializes_in_camel_case() {
        let presence = UserPresence::try_from(row()).unwrap();
        let json = serde_json::to_value(&presence).unwrap();
        assert_eq!(json["displayName"], "Aria");
        assert!(json.get("photoURL").is_some());
        assert_eq!(json["visibility"]["radiusMeters"], 1000.0);
        assert_eq!(json["location"]["updatedAt"], "2026-01-01T00:00:00.000Z");
    }
}
