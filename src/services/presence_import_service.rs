use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{PresencePatch, Visibility};
use crate::services::geo::GeoPoint;
use crate::services::presence_store::PresenceStore;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub candidates: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("expected a JSON array of documents or an object keyed by uid")]
    NotACollection,
}

#[derive(Debug, Error, PartialEq)]
pub enum SkipReason {
    #[error("document has no uid")]
    NoUid,
    #[error("document is not a presence record: {0}")]
    Shape(String),
    #[error("radiusMeters {0} is not a positive number")]
    BadRadius(f64),
    #[error("document carries nothing to import")]
    Empty,
}

/// Distinguishes an explicit `null` (worldwide) from an absent field.
fn explicit_null<'de, D>(d: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(d).map(Some)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyVisibility {
    enabled: Option<bool>,
    visible: Option<bool>,
    #[serde(default, deserialize_with = "explicit_null")]
    radius_meters: Option<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyLocation {
    lat: Option<f64>,
    lng: Option<f64>,
}

// Union of every shape presence documents were ever written in.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyPresence {
    #[serde(alias = "id")]
    uid: Option<String>,
    display_name: Option<String>,
    #[serde(rename = "photoURL", alias = "photoUrl")]
    photo_url: Option<String>,
    location: Option<LegacyLocation>,
    lat: Option<f64>,
    lng: Option<f64>,
    visible: Option<bool>,
    #[serde(default, deserialize_with = "explicit_null")]
    radius_meters: Option<Option<f64>>,
    visibility: Option<LegacyVisibility>,
}

/// Maps one historical document onto the canonical patch.
pub fn normalize(
    uid_hint: Option<&str>,
    doc: &Value,
    default_radius_meters: f64,
) -> Result<(String, PresencePatch), SkipReason> {
    let legacy: LegacyPresence =
        serde_json::from_value(doc.clone()).map_err(|e| SkipReason::Shape(e.to_string()))?;

    let uid = legacy
        .uid
        .as_deref()
        .or(uid_hint)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SkipReason::NoUid)?
        .to_string();

    let nested = legacy.visibility.unwrap_or_default();
    let enabled = nested.enabled.or(nested.visible).or(legacy.visible);
    let radius = nested.radius_meters.or(legacy.radius_meters);

    let visibility = if enabled.is_some() || radius.is_some() {
        let radius = radius.unwrap_or(Some(default_radius_meters));
        let visibility = Visibility::new(enabled.unwrap_or(true), radius)
            .map_err(|_| SkipReason::BadRadius(radius.unwrap_or_default()))?;
        Some(visibility)
    } else {
        None
    };

    let (lat, lng) = match legacy.location {
        Some(loc) => (loc.lat, loc.lng),
        None => (legacy.lat, legacy.lng),
    };
    let location = match (lat, lng) {
        (Some(lat), Some(lng)) => GeoPoint::new(lat, lng).ok(),
        _ => None,
    };

    let patch = PresencePatch {
        location,
        visibility,
        display_name: legacy.display_name.filter(|s| !s.trim().is_empty()),
        photo_url: legacy.photo_url.filter(|s| !s.trim().is_empty()),
    };
    if patch.is_empty() {
        return Err(SkipReason::Empty);
    }
    Ok((uid, patch))
}

/// Upserts every document in `input`, which is either an array of
/// documents carrying their own uid or an object keyed by uid.
pub async fn import_presence(
    store: &PresenceStore,
    input: &Value,
) -> Result<ImportReport, ImportError> {
    let docs: Vec<(Option<&str>, &Value)> = match input {
        Value::Array(items) => items.iter().map(|d| (None, d)).collect(),
        Value::Object(map) => map.iter().map(|(k, d)| (Some(k.as_str()), d)).collect(),
        _ => return Err(ImportError::NotACollection),
    };

    let mut report = ImportReport {
        candidates: docs.len(),
        ..Default::default()
    };

    for (hint, doc) in docs {
        let (uid, patch) = match normalize(hint, doc, store.default_radius_meters()) {
            Ok(normalized) => normalized,
            Err(reason) => {
                warn!(uid = hint.unwrap_or("?"), "📍 Skipping presence document: {}", reason);
                report.skipped += 1;
                continue;
            }
        };

        match store.upsert_merge(&uid, patch).await {
            Ok(_) => report.imported += 1,
            Err(e) => {
                warn!(uid, "📍 Presence import failed: {}", e);
                report.failed += 1;
            }
        }
    }

    info!(
        "📍 Presence import done: candidates={}, imported={}, skipped={}, failed={}",
        report.candidates, report.imported, report.skipped, report.failed
    );
    Ok(report)
}
