use std::time::Duration;

use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::database::presence_repo;
use crate::models::{PresencePatch, PresenceRow, UserPresence, VisibilityError};
use crate::services::geo::{bounding_box, GeoPoint};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("presence storage failed: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("presence write timed out after {0:?}")]
    Timeout(Duration),
    #[error("presence record {uid} is malformed: {source}")]
    Malformed {
        uid: String,
        #[source]
        source: VisibilityError,
    },
}

impl PresenceError {
    /// Failures worth one more attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            PresenceError::Timeout(_) => true,
            PresenceError::Storage(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed
            ),
            PresenceError::Malformed { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    Upserted(UserPresence),
    /// The subscriber missed changes; reload the snapshot.
    Resync,
}

/// Shared presence records plus a realtime change feed.
///
/// Each user writes only their own record; every committed write is pushed
/// to all live subscriptions.
#[derive(Clone)]
pub struct PresenceStore {
    pool: SqlitePool,
    changes: broadcast::Sender<PresenceChange>,
    default_radius_meters: f64,
}

impl PresenceStore {
    pub fn new(pool: SqlitePool, default_radius_meters: f64) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            pool,
            changes,
            default_radius_meters,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn default_radius_meters(&self) -> f64 {
        self.default_radius_meters
    }

    pub async fn get(&self, uid: &str) -> Result<Option<UserPresence>, PresenceError> {
        presence_repo::get_presence(&self.pool, uid)
            .await?
            .map(to_presence)
            .transpose()
    }

    /// Every record, skipping malformed ones.
    pub async fn list_all(&self) -> Result<Vec<UserPresence>, PresenceError> {
        let rows = presence_repo::list_presence(&self.pool).await?;
        Ok(keep_well_formed(rows))
    }

    /// Records that may be visible to a viewer at `center`.
    ///
    /// Prefilters by the largest radius any enabled user publishes, so the
    /// result is a superset of what the visibility filter accepts. Falls back
    /// to every enabled, located record when no box applies.
    pub async fn list_candidates(
        &self,
        center: &GeoPoint,
    ) -> Result<Vec<UserPresence>, PresenceError> {
        let bbox = presence_repo::max_enabled_radius(&self.pool)
            .await?
            .and_then(|r| bounding_box(center, r));
        let rows = presence_repo::list_presence_candidates(&self.pool, bbox).await?;
        Ok(keep_well_formed(rows))
    }

    /// Creates the record with defaults if missing, then overwrites only the
    /// fields present in `patch`.
    pub async fn upsert_merge(
        &self,
        uid: &str,
        patch: PresencePatch,
    ) -> Result<UserPresence, PresenceError> {
        let mut tx = self.pool.begin().await?;

        let created =
            presence_repo::insert_default_presence(&mut tx, uid, self.default_radius_meters)
                .await?;

        if let Some(point) = patch.location {
            presence_repo::update_location(&mut tx, uid, point.lat, point.lng).await?;
        }
        if let Some(visibility) = patch.visibility {
            presence_repo::update_visibility(
                &mut tx,
                uid,
                visibility.enabled,
                visibility.radius_meters,
            )
            .await?;
        }
        if patch.display_name.is_some() || patch.photo_url.is_some() {
            presence_repo::update_profile(
                &mut tx,
                uid,
                patch.display_name.as_deref(),
                patch.photo_url.as_deref(),
            )
            .await?;
        }

        let row = presence_repo::get_presence_conn(&mut tx, uid)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        // Dropping the transaction rolls back a row that cannot be read back.
        let presence = to_presence(row)?;
        tx.commit().await?;

        debug!(uid, created, "presence upserted");

        // No receivers is fine: nobody is watching yet.
        let _ = self.changes.send(PresenceChange::Upserted(presence.clone()));
        Ok(presence)
    }

    pub fn subscribe_all(&self) -> PresenceSubscription {
        PresenceSubscription {
            rx: self.changes.subscribe(),
            only: None,
        }
    }

    pub fn subscribe_one(&self, uid: &str) -> PresenceSubscription {
        PresenceSubscription {
            rx: self.changes.subscribe(),
            only: Some(uid.to_string()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }
}

fn to_presence(row: PresenceRow) -> Result<UserPresence, PresenceError> {
    let uid = row.uid.clone();
    UserPresence::try_from(row).map_err(|source| PresenceError::Malformed { uid, source })
}

fn keep_well_formed(rows: Vec<PresenceRow>) -> Vec<UserPresence> {
    rows.into_iter()
        .filter_map(|row| match to_presence(row) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("📍 Skipping presence record: {}", e);
                None
            }
        })
        .collect()
}

/// A live change feed. Dropping it (or calling [`unsubscribe`]) releases
/// the underlying channel slot immediately.
///
/// [`unsubscribe`]: PresenceSubscription::unsubscribe
pub struct PresenceSubscription {
    rx: broadcast::Receiver<PresenceChange>,
    only: Option<String>,
}

impl PresenceSubscription {
    /// Next change, or `None` once the store is gone.
    pub async fn next(&mut self) -> Option<PresenceChange> {
        loop {
            match self.rx.recv().await {
                Ok(PresenceChange::Upserted(p)) => {
                    if self.only.as_deref().is_some_and(|uid| uid != p.uid) {
                        continue;
                    }
                    return Some(PresenceChange::Upserted(p));
                }
                Ok(PresenceChange::Resync) => return Some(PresenceChange::Resync),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "presence subscriber lagged, asking for resync");
                    return Some(PresenceChange::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_pool;
    use crate::models::Visibility;

    async fn store() -> PresenceStore {
        PresenceStore::new(memory_pool().await.unwrap(), 80_467.2)
    }

    #[tokio::test]
    async fn upsert_creates_with_defaults() {
        let store = store().await;
        let p = store.upsert_merge("u1", PresencePatch::default()).await.unwrap();
        assert_eq!(p.uid, "u1");
        assert!(p.location.is_none());
        assert!(p.visibility.enabled);
        assert_eq!(p.visibility.radius_meters, Some(80_467.2));
    }

    #[tokio::test]
    async fn location_round_trips_within_tolerance() {
        let store = store().await;
        store
            .upsert_merge("u1", PresencePatch::location(GeoPoint::new(40.0, -74.0).unwrap()))
            .await
            .unwrap();

        let loc = store.get("u1").await.unwrap().unwrap().location.unwrap();
        assert!((loc.lat - 40.0).abs() < 1e-9);
        assert!((loc.lng - -74.0).abs() < 1e-9);
        assert!(loc.updated_at.ends_with('Z'));
    }

    #[tokio::test]
    async fn merge_keeps_unrelated_fields() {
        let store = store().await;
        store
            .upsert_merge(
                "u1",
                PresencePatch {
                    display_name: Some("Aria".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .upsert_merge(
                "u1",
                PresencePatch::visibility(Visibility::new(true, None).unwrap()),
            )
            .await
            .unwrap();
        let p = store
            .upsert_merge("u1", PresencePatch::location(GeoPoint::AUSTIN))
            .await
            .unwrap();

        assert_eq!(p.display_name.as_deref(), Some("Aria"));
        assert_eq!(p.visibility.radius_meters, None);
        assert!(p.location.is_some());
    }

    #[tokio::test]
    async fn subscribe_one_only_sees_its_uid() {
        let store = store().await;
        let mut all = store.subscribe_all();
        let mut only_b = store.subscribe_one("b");

        store.upsert_merge("a", PresencePatch::default()).await.unwrap();
        store.upsert_merge("b", PresencePatch::default()).await.unwrap();

        match all.next().await {
            Some(PresenceChange::Upserted(p)) => assert_eq!(p.uid, "a"),
            other => panic!("unexpected {other:?}"),
        }
        match only_b.next().await {
            Some(PresenceChange::Upserted(p)) => assert_eq!(p.uid, "b"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_receiver() {
        let store = store().await;
        let sub = store.subscribe_all();
        assert_eq!(store.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_not_fatal() {
        let store = store().await;
        store
            .upsert_merge("good", PresencePatch::location(GeoPoint::AUSTIN))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO presence (uid, lat, lng, visibility_enabled, radius_meters, updated_at) VALUES ('bad', 1.0, 1.0, 1, -3.0, 'x')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].uid, "good");
        assert!(matches!(
            store.get("bad").await,
            Err(PresenceError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn unreadable_merge_is_rolled_back() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO presence (uid, visibility_enabled, radius_meters, updated_at) VALUES ('bad', 1, -3.0, 'x')",
        )
        .execute(store.pool())
        .await
        .unwrap();
        let mut changes = store.subscribe_one("bad");

        assert!(matches!(
            store.upsert_merge("bad", PresencePatch::location(GeoPoint::AUSTIN)).await,
            Err(PresenceError::Malformed { .. })
        ));
        let lat: Option<f64> = sqlx::query_scalar("SELECT lat FROM presence WHERE uid = 'bad'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(lat, None);

        // Fixing the radius in the same merge is accepted and announced.
        let fixed = store
            .upsert_merge(
                "bad",
                PresencePatch {
                    location: Some(GeoPoint::AUSTIN),
                    visibility: Some(Visibility::new(true, None).unwrap()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(fixed.location.is_some());
        match changes.next().await {
            Some(PresenceChange::Upserted(p)) => assert_eq!(p.uid, "bad"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn candidates_keep_worldwide_and_nearby_only() {
        let store = store().await;
        let near = GeoPoint::new(30.27, -97.74).unwrap();
        let far = GeoPoint::new(51.5, -0.12).unwrap();

        for (uid, point, radius) in [
            ("near", near, Some(2_000.0)),
            ("far", far, Some(2_000.0)),
            ("world", far, None),
        ] {
            store
                .upsert_merge(
                    uid,
                    PresencePatch {
                        location: Some(point),
                        visibility: Some(Visibility::new(true, radius).unwrap()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        store
            .upsert_merge(
                "hidden",
                PresencePatch {
                    location: Some(near),
                    visibility: Some(Visibility::hidden()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let uids: Vec<String> = store
            .list_candidates(&GeoPoint::AUSTIN)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.uid)
            .collect();
        assert_eq!(uids, vec!["near".to_string(), "world".to_string()]);
    }

    #[test]
    fn timeouts_are_transient_malformed_is_not() {
        assert!(PresenceError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(PresenceError::Storage(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!PresenceError::Storage(sqlx::Error::RowNotFound).is_transient());
        assert!(!PresenceError::Malformed {
            uid: "x".to_string(),
            source: VisibilityError::InvalidRadius(0.0),
        }
        .is_transient());
    }
}
