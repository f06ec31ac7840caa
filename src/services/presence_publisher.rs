use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::PresenceConfig;
use crate::models::{PresencePatch, UserPresence};
use crate::services::geo::GeoPoint;
use crate::services::location_service::{acquire_fix, FixSource, LocationProvider};
use crate::services::presence_store::{PresenceError, PresenceStore};

#[derive(Debug, Clone)]
pub struct PublishPolicy {
    pub interval: Duration,
    pub fix_timeout: Duration,
    pub write_timeout: Duration,
    pub retry_delay: Duration,
    pub fallback: GeoPoint,
    pub min_distance_meters: f64,
}

impl From<&PresenceConfig> for PublishPolicy {
    fn from(config: &PresenceConfig) -> Self {
        Self {
            interval: config.publish_interval,
            fix_timeout: config.location_fix_timeout,
            write_timeout: config.store_write_timeout,
            retry_delay: config.store_retry_delay,
            fallback: config.fallback_center,
            min_distance_meters: config.watch_min_distance_meters,
        }
    }
}

/// Pushes a user's own coordinates into the presence store.
#[derive(Clone)]
pub struct PresencePublisher {
    store: PresenceStore,
    policy: PublishPolicy,
}

impl PresencePublisher {
    pub fn new(store: PresenceStore, policy: PublishPolicy) -> Self {
        Self { store, policy }
    }

    /// Writes `point` as the user's location. Returns whether it landed;
    /// failures are logged and dropped.
    pub async fn publish(&self, uid: &str, point: GeoPoint) -> bool {
        match self.publish_checked(uid, point).await {
            Ok(_) => true,
            Err(e) => {
                warn!(uid, "📍 Presence write dropped: {}", e);
                false
            }
        }
    }

    /// Like [`publish`](Self::publish) but hands the error back. A transient
    /// failure gets exactly one more attempt after `retry_delay`.
    pub async fn publish_checked(
        &self,
        uid: &str,
        point: GeoPoint,
    ) -> Result<UserPresence, PresenceError> {
        match self.try_write(uid, point).await {
            Err(e) if e.is_transient() => {
                warn!(uid, "📍 Presence write failed ({}), retrying once", e);
                tokio::time::sleep(self.policy.retry_delay).await;
                self.try_write(uid, point).await
            }
            other => other,
        }
    }

    async fn try_write(&self, uid: &str, point: GeoPoint) -> Result<UserPresence, PresenceError> {
        let timeout = self.policy.write_timeout;
        tokio::time::timeout(
            timeout,
            self.store.upsert_merge(uid, PresencePatch::location(point)),
        )
        .await
        .map_err(|_| PresenceError::Timeout(timeout))?
    }

    /// Hidden users keep their last stored location but stop refreshing it.
    async fn publish_if_visible(&self, uid: &str, point: GeoPoint) {
        match self.store.get(uid).await {
            Ok(Some(p)) if !p.visibility.enabled => {
                debug!(uid, "visibility disabled, skipping presence write");
            }
            Ok(_) => {
                self.publish(uid, point).await;
            }
            Err(e) => warn!(uid, "📍 Could not read presence before write: {}", e),
        }
    }

    /// Starts the publish loop for one signed-in user: first fix written
    /// immediately, then the latest sample every `interval` until the
    /// handle is stopped or dropped.
    pub fn spawn(&self, uid: &str, provider: Arc<dyn LocationProvider>) -> PublisherHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (positions_tx, positions_rx) = watch::channel(None);
        let publisher = self.clone();
        let uid = uid.to_string();

        let task = tokio::spawn(async move {
            let policy = publisher.policy.clone();

            let fix = tokio::select! {
                fix = acquire_fix(provider.as_ref(), policy.fix_timeout, policy.fallback) => fix,
                _ = stop_rx.changed() => return,
            };
            if *stop_rx.borrow() {
                debug!(uid, "publisher stopped while waiting for a fix");
                return;
            }

            positions_tx.send_replace(Some(fix.point));
            // The fallback center is a map default, not where the user is.
            let mut latest = match fix.source {
                FixSource::Device => Some(fix.point),
                FixSource::Fallback => None,
            };
            if let Some(point) = latest {
                publisher.publish_if_visible(&uid, point).await;
            }
            info!(uid, source = ?fix.source, "📍 Presence publisher running");

            let mut samples = provider.watch_position(policy.interval, policy.min_distance_meters);
            let mut watching = true;
            let mut ticker = tokio::time::interval(policy.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    sample = samples.next(), if watching => match sample {
                        Some(point) => {
                            latest = Some(point);
                            positions_tx.send_replace(Some(point));
                        }
                        None => {
                            debug!(uid, "position watch ended");
                            watching = false;
                        }
                    },
                    _ = ticker.tick() => {
                        if let Some(point) = latest {
                            publisher.publish_if_visible(&uid, point).await;
                        }
                    }
                }
            }
            debug!(uid, "presence publisher stopped");
        });

        PublisherHandle {
            stop: stop_tx,
            positions: positions_rx,
            task,
        }
    }
}

/// Owns a running publish loop. Dropping it stops the loop.
pub struct PublisherHandle {
    stop: watch::Sender<bool>,
    positions: watch::Receiver<Option<GeoPoint>>,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// The user's own position as the publisher sees it, fallback included.
    /// Feeds the viewer center of a presence session.
    pub fn positions(&self) -> watch::Receiver<Option<GeoPoint>> {
        self.positions.clone()
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_pool;
    use crate::models::Visibility;
    use crate::services::location_service::{location_channel, FixedLocationProvider};
    use crate::services::presence_store::PresenceChange;

    fn policy() -> PublishPolicy {
        PublishPolicy {
            interval: Duration::from_millis(50),
            fix_timeout: Duration::from_millis(500),
            write_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_millis(10),
            fallback: GeoPoint::AUSTIN,
            min_distance_meters: 5.0,
        }
    }

    async fn publisher() -> (PresenceStore, PresencePublisher) {
        let store = PresenceStore::new(memory_pool().await.unwrap(), 80_467.2);
        let publisher = PresencePublisher::new(store.clone(), policy());
        (store, publisher)
    }

    async fn wait_for_location(store: &PresenceStore, uid: &str, want: GeoPoint) {
        for _ in 0..200 {
            if let Ok(Some(p)) = store.get(uid).await {
                if p.location.map(|l| l.point()) == Some(want) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{uid} never reached {want:?}");
    }

    #[tokio::test]
    async fn published_location_reads_back() {
        let (store, publisher) = publisher().await;
        assert!(publisher.publish("u1", GeoPoint::new(40.0, -74.0).unwrap()).await);

        let loc = store.get("u1").await.unwrap().unwrap().location.unwrap();
        assert!((loc.lat - 40.0).abs() < 1e-9);
        assert!((loc.lng - -74.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn publish_does_not_clobber_profile() {
        let (store, publisher) = publisher().await;
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
        assert!(publisher.publish("u1", GeoPoint::AUSTIN).await);

        let p = store.get("u1").await.unwrap().unwrap();
        assert_eq!(p.display_name.as_deref(), Some("Aria"));
    }

    #[tokio::test]
    async fn failed_write_is_swallowed() {
        let (store, publisher) = publisher().await;
        store.pool().close().await;
        assert!(!publisher.publish("u1", GeoPoint::AUSTIN).await);
        assert!(matches!(
            publisher.publish_checked("u1", GeoPoint::AUSTIN).await,
            Err(PresenceError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn timed_out_write_is_retried_once() {
        let store = PresenceStore::new(memory_pool().await.unwrap(), 80_467.2);
        let publisher = PresencePublisher::new(
            store.clone(),
            PublishPolicy {
                write_timeout: Duration::from_millis(100),
                retry_delay: Duration::from_millis(200),
                ..policy()
            },
        );
        let mut changes = store.subscribe_one("u1");

        // Hold the only connection past the first attempt's deadline.
        let held = store.pool().begin().await.unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            drop(held);
        });

        let written = publisher.publish_checked("u1", GeoPoint::AUSTIN).await.unwrap();
        release.await.unwrap();
        assert_eq!(written.location.map(|l| l.point()), Some(GeoPoint::AUSTIN));

        assert!(matches!(changes.next().await, Some(PresenceChange::Upserted(_))));
        let extra = tokio::time::timeout(Duration::from_millis(100), changes.next()).await;
        assert!(extra.is_err(), "write landed more than once");
    }

    #[tokio::test]
    async fn second_timeout_is_reported() {
        let store = PresenceStore::new(memory_pool().await.unwrap(), 80_467.2);
        let publisher = PresencePublisher::new(
            store.clone(),
            PublishPolicy {
                write_timeout: Duration::from_millis(50),
                retry_delay: Duration::from_millis(10),
                ..policy()
            },
        );
        let _held = store.pool().begin().await.unwrap();

        assert!(matches!(
            publisher.publish_checked("u1", GeoPoint::AUSTIN).await,
            Err(PresenceError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn first_fix_is_written_immediately() {
        let (store, publisher) = publisher().await;
        let here = GeoPoint::new(40.0, -74.0).unwrap();
        let handle = publisher.spawn("u1", Arc::new(FixedLocationProvider::new(here)));

        wait_for_location(&store, "u1", here).await;
        assert_eq!(*handle.positions().borrow(), Some(here));
    }

    #[tokio::test]
    async fn fallback_center_is_never_published() {
        let (store, publisher) = publisher().await;
        let handle = publisher.spawn("u1", Arc::new(FixedLocationProvider::denied()));

        let mut positions = handle.positions();
        positions.wait_for(|p| p.is_some()).await.unwrap();
        assert_eq!(*positions.borrow(), Some(GeoPoint::AUSTIN));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hidden_user_is_not_refreshed() {
        let (store, publisher) = publisher().await;
        store
            .upsert_merge("u1", PresencePatch::visibility(Visibility::hidden()))
            .await
            .unwrap();

        let _handle = publisher.spawn("u1", Arc::new(FixedLocationProvider::new(GeoPoint::AUSTIN)));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(store.get("u1").await.unwrap().unwrap().location.is_none());
    }

    #[tokio::test]
    async fn moves_are_written_on_the_interval() {
        let (store, publisher) = publisher().await;
        let (feed, provider) = location_channel();
        let start = GeoPoint::AUSTIN;
        feed.push_position(start);

        let _handle = publisher.spawn("u1", Arc::new(provider));
        wait_for_location(&store, "u1", start).await;

        let moved = GeoPoint::new(30.30, -97.70).unwrap();
        feed.push_position(moved);
        wait_for_location(&store, "u1", moved).await;
    }

    #[tokio::test]
    async fn fix_arriving_after_stop_is_discarded() {
        let (store, publisher) = publisher().await;
        let (feed, provider) = location_channel();

        let handle = publisher.spawn("u1", Arc::new(provider));
        handle.stop();
        feed.push_position(GeoPoint::AUSTIN);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get("u1").await.unwrap().is_none());
        assert!(handle.is_finished());
    }
}
