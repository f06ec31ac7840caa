use std::collections::HashMap;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::{UserPresence, VisiblePeer};
use crate::services::geo::GeoPoint;
use crate::services::presence_store::{PresenceChange, PresenceStore};
use crate::services::relationship_service;
use crate::services::visibility_service::visible_peers;

enum Next {
    Reload,
    Stop,
}

/// Live map markers for one viewer.
///
/// Keeps a snapshot of peer presence current from the store's change feed
/// and republishes the filtered peers whenever the snapshot or the viewer
/// center changes.
pub struct PresenceSession {
    peers: watch::Receiver<Vec<VisiblePeer>>,
    task: Option<JoinHandle<()>>,
}

impl PresenceSession {
    pub fn spawn(
        store: PresenceStore,
        viewer_uid: &str,
        mut center_rx: watch::Receiver<Option<GeoPoint>>,
    ) -> Self {
        let (peers_tx, peers_rx) = watch::channel(Vec::new());
        let viewer_uid = viewer_uid.to_string();

        let task = tokio::spawn(async move {
            let mut center = *center_rx.borrow_and_update();
            loop {
                match run_view(&store, &viewer_uid, &mut center, &mut center_rx, &peers_tx).await {
                    Next::Reload => continue,
                    Next::Stop => break,
                }
            }
            debug!(viewer_uid, "presence session ended");
        });

        Self {
            peers: peers_rx,
            task: Some(task),
        }
    }

    pub fn peers(&self) -> watch::Receiver<Vec<VisiblePeer>> {
        self.peers.clone()
    }

    /// Cancels the session and waits until its subscription is released.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for PresenceSession {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// One subscription lifetime. Returning drops the subscription, so a
/// reload always tears the old one down before the next is opened.
async fn run_view(
    store: &PresenceStore,
    viewer_uid: &str,
    center: &mut Option<GeoPoint>,
    center_rx: &mut watch::Receiver<Option<GeoPoint>>,
    peers_tx: &watch::Sender<Vec<VisiblePeer>>,
) -> Next {
    // Subscribe before reading the snapshot so nothing slips in between.
    let mut subscription = store.subscribe_all();
    let mut view = load_view(store, center.as_ref()).await;
    emit(store, viewer_uid, *center, &view, peers_tx).await;

    loop {
        tokio::select! {
            changed = center_rx.changed() => {
                if changed.is_err() {
                    return Next::Stop;
                }
                let next = *center_rx.borrow_and_update();
                if next != *center {
                    *center = next;
                    return Next::Reload;
                }
            }
            change = subscription.next() => match change {
                Some(PresenceChange::Upserted(presence)) => {
                    view.insert(presence.uid.clone(), presence);
                    emit(store, viewer_uid, *center, &view, peers_tx).await;
                }
                Some(PresenceChange::Resync) => return Next::Reload,
                None => return Next::Stop,
            },
            _ = peers_tx.closed() => return Next::Stop,
        }
    }
}

async fn load_view(store: &PresenceStore, center: Option<&GeoPoint>) -> HashMap<String, UserPresence> {
    let Some(center) = center else {
        return HashMap::new();
    };
    match store.list_candidates(center).await {
        Ok(peers) => peers.into_iter().map(|p| (p.uid.clone(), p)).collect(),
        Err(e) => {
            warn!("📍 Failed to load presence snapshot: {}", e);
            HashMap::new()
        }
    }
}

async fn emit(
    store: &PresenceStore,
    viewer_uid: &str,
    center: Option<GeoPoint>,
    view: &HashMap<String, UserPresence>,
    peers_tx: &watch::Sender<Vec<VisiblePeer>>,
) {
    let peers = match center {
        Some(center) => {
            let relationships =
                match relationship_service::relationship_states(store.pool(), viewer_uid).await {
                    Ok(map) => map,
                    Err(e) => {
                        warn!(viewer_uid, "Relationship lookup failed, markers unlabeled: {}", e);
                        HashMap::new()
                    }
                };
            visible_peers(&center, view.values(), viewer_uid, &relationships)
        }
        None => Vec::new(),
    };

    peers_tx.send_if_modified(|current| {
        if *current == peers {
            false
        } else {
            *current = peers;
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::database::memory_pool;
    use crate::database::relationship_repo::{self, EdgeWrite};
    use crate::models::{PresencePatch, RelState, Visibility};

    async fn store() -> PresenceStore {
        PresenceStore::new(memory_pool().await.unwrap(), 80_467.2)
    }

    async fn place(store: &PresenceStore, uid: &str, point: GeoPoint, radius: Option<f64>) {
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

    async fn wait_for_uids(peers: &mut watch::Receiver<Vec<VisiblePeer>>, want: &[&str]) {
        let want: Vec<String> = want.iter().map(|s| s.to_string()).collect();
        tokio::time::timeout(
            Duration::from_secs(2),
            peers.wait_for(|p| p.iter().map(|v| v.uid.clone()).collect::<Vec<_>>() == want),
        )
        .await
        .expect("peers never matched")
        .unwrap();
    }

    #[tokio::test]
    async fn snapshot_is_filtered_for_the_viewer() {
        let store = store().await;
        place(&store, "viewer", GeoPoint::AUSTIN, None).await;
        place(&store, "near", GeoPoint::new(30.27, -97.74).unwrap(), Some(2_000.0)).await;
        place(&store, "far", GeoPoint::new(30.3672, -97.7431).unwrap(), Some(1_000.0)).await;

        let (_center_tx, center_rx) = watch::channel(Some(GeoPoint::AUSTIN));
        let session = PresenceSession::spawn(store.clone(), "viewer", center_rx);
        wait_for_uids(&mut session.peers(), &["near"]).await;
    }

    #[tokio::test]
    async fn live_changes_update_the_markers() {
        let store = store().await;
        let (_center_tx, center_rx) = watch::channel(Some(GeoPoint::AUSTIN));
        let session = PresenceSession::spawn(store.clone(), "viewer", center_rx);
        let mut peers = session.peers();

        place(&store, "a", GeoPoint::AUSTIN, None).await;
        wait_for_uids(&mut peers, &["a"]).await;

        store
            .upsert_merge("a", PresencePatch::visibility(Visibility::hidden()))
            .await
            .unwrap();
        wait_for_uids(&mut peers, &[]).await;
    }

    #[tokio::test]
    async fn moving_the_center_resubscribes() {
        let store = store().await;
        let london = GeoPoint::new(51.5, -0.12).unwrap();
        place(&store, "brit", london, Some(2_000.0)).await;

        let (center_tx, center_rx) = watch::channel(Some(GeoPoint::AUSTIN));
        let session = PresenceSession::spawn(store.clone(), "viewer", center_rx);
        let mut peers = session.peers();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peers.borrow().is_empty());
        assert_eq!(store.subscriber_count(), 1);

        center_tx.send_replace(Some(london));
        wait_for_uids(&mut peers, &["brit"]).await;
        assert_eq!(store.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn no_center_means_no_markers() {
        let store = store().await;
        place(&store, "a", GeoPoint::AUSTIN, None).await;

        let (center_tx, center_rx) = watch::channel(None);
        let session = PresenceSession::spawn(store.clone(), "viewer", center_rx);
        let mut peers = session.peers();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peers.borrow().is_empty());

        center_tx.send_replace(Some(GeoPoint::AUSTIN));
        wait_for_uids(&mut peers, &["a"]).await;
    }

    #[tokio::test]
    async fn markers_are_labeled_with_relationships() {
        let store = store().await;
        place(&store, "friend", GeoPoint::AUSTIN, None).await;
        relationship_repo::upsert_edge(
            &mut *store.pool().acquire().await.unwrap(),
            EdgeWrite {
                x: "viewer",
                y: "friend",
                status: "accepted",
                requested_by: Some("viewer"),
                blocked_by: None,
            },
        )
        .await
        .unwrap();

        let (_center_tx, center_rx) = watch::channel(Some(GeoPoint::AUSTIN));
        let session = PresenceSession::spawn(store.clone(), "viewer", center_rx);
        let mut peers = session.peers();
        wait_for_uids(&mut peers, &["friend"]).await;
        assert_eq!(peers.borrow()[0].relationship, Some(RelState::Accepted));
    }

    #[tokio::test]
    async fn stop_releases_the_subscription() {
        let store = store().await;
        let (_center_tx, center_rx) = watch::channel(Some(GeoPoint::AUSTIN));
        let session = PresenceSession::spawn(store.clone(), "viewer", center_rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.subscriber_count(), 1);
        session.stop().await;
        assert_eq!(store.subscriber_count(), 0);
    }
}
