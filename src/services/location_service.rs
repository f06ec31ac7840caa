use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::services::geo::{haversine_meters, GeoPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Balanced,
    High,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location source is gone")]
    Unavailable,
}

/// Device location service as seen by the presence pipeline.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> PermissionStatus;

    async fn current_position(&self, accuracy: Accuracy) -> Result<GeoPoint, LocationError>;

    /// Continuous position updates, at most one per `interval` and only
    /// after moving `min_distance_m`. Dropping the watch cancels it.
    fn watch_position(&self, interval: Duration, min_distance_m: f64) -> PositionWatch;
}

pub struct PositionWatch {
    rx: mpsc::Receiver<GeoPoint>,
    task: JoinHandle<()>,
}

impl PositionWatch {
    pub async fn next(&mut self) -> Option<GeoPoint> {
        self.rx.recv().await
    }

    pub fn cancel(self) {}
}

impl Drop for PositionWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FixSource {
    Device,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub point: GeoPoint,
    pub source: FixSource,
}

/// First position for a session. Denied permission, a provider error or a
/// timeout all resolve to `fallback`.
pub async fn acquire_fix(
    provider: &dyn LocationProvider,
    timeout: Duration,
    fallback: GeoPoint,
) -> Fix {
    let attempt = async {
        if provider.request_permission().await == PermissionStatus::Denied {
            return Err(LocationError::PermissionDenied);
        }
        provider.current_position(Accuracy::Balanced).await
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(point)) => Fix {
            point,
            source: FixSource::Device,
        },
        Ok(Err(e)) => {
            warn!("📍 No device fix ({}), using fallback center", e);
            Fix {
                point: fallback,
                source: FixSource::Fallback,
            }
        }
        Err(_) => {
            warn!(?timeout, "📍 Location fix timed out, using fallback center");
            Fix {
                point: fallback,
                source: FixSource::Fallback,
            }
        }
    }
}

/// Write side of a [`ChannelLocationProvider`], held by whoever receives
/// positions from the real device (e.g. a WebSocket client).
#[derive(Clone)]
pub struct LocationFeed {
    permission: watch::Sender<Option<PermissionStatus>>,
    position: watch::Sender<Option<GeoPoint>>,
}

impl LocationFeed {
    pub fn set_permission(&self, status: PermissionStatus) {
        self.permission.send_replace(Some(status));
    }

    /// A position implies permission was granted.
    pub fn push_position(&self, point: GeoPoint) {
        self.permission.send_if_modified(|p| {
            if p.is_none() {
                *p = Some(PermissionStatus::Granted);
                true
            } else {
                false
            }
        });
        self.position.send_replace(Some(point));
    }
}

#[derive(Clone)]
pub struct ChannelLocationProvider {
    permission: watch::Receiver<Option<PermissionStatus>>,
    position: watch::Receiver<Option<GeoPoint>>,
}

pub fn location_channel() -> (LocationFeed, ChannelLocationProvider) {
    let (permission_tx, permission_rx) = watch::channel(None);
    let (position_tx, position_rx) = watch::channel(None);
    (
        LocationFeed {
            permission: permission_tx,
            position: position_tx,
        },
        ChannelLocationProvider {
            permission: permission_rx,
            position: position_rx,
        },
    )
}

#[async_trait]
impl LocationProvider for ChannelLocationProvider {
    async fn request_permission(&self) -> PermissionStatus {
        let mut rx = self.permission.clone();
        let status = match rx.wait_for(|p| p.is_some()).await {
            Ok(status) => (*status).unwrap_or(PermissionStatus::Denied),
            // Feed dropped before answering.
            Err(_) => PermissionStatus::Denied,
        };
        status
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<GeoPoint, LocationError> {
        let mut rx = self.position.clone();
        let point = *rx
            .wait_for(|p| p.is_some())
            .await
            .map_err(|_| LocationError::Unavailable)?;
        point.ok_or(LocationError::Unavailable)
    }

    fn watch_position(&self, interval: Duration, min_distance_m: f64) -> PositionWatch {
        let mut source = self.position.clone();
        let (tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(async move {
            let mut last_sent: Option<GeoPoint> = None;
            while source.changed().await.is_ok() {
                let Some(point) = *source.borrow_and_update() else {
                    continue;
                };
                let moved = last_sent
                    .map(|prev| haversine_meters(&prev, &point) >= min_distance_m)
                    .unwrap_or(true);
                if !moved {
                    debug!("position update below min distance, dropped");
                    continue;
                }
                if tx.send(point).await.is_err() {
                    break;
                }
                last_sent = Some(point);
                tokio::time::sleep(interval).await;
            }
        });

        PositionWatch { rx, task }
    }
}

/// A device that never moves.
#[derive(Debug, Clone)]
pub struct FixedLocationProvider {
    pub point: GeoPoint,
    pub permission: PermissionStatus,
}

impl FixedLocationProvider {
    pub fn new(point: GeoPoint) -> Self {
        Self {
            point,
            permission: PermissionStatus::Granted,
        }
    }

    pub fn denied() -> Self {
        Self {
            point: GeoPoint::AUSTIN,
            permission: PermissionStatus::Denied,
        }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<GeoPoint, LocationError> {
        match self.permission {
            PermissionStatus::Granted => Ok(self.point),
            PermissionStatus::Denied => Err(LocationError::PermissionDenied),
        }
    }

    fn watch_position(&self, _interval: Duration, _min_distance_m: f64) -> PositionWatch {
        let (tx, rx) = mpsc::channel(1);
        let point = self.point;
        let granted = self.permission == PermissionStatus::Granted;
        let task = tokio::spawn(async move {
            if granted && tx.send(point).await.is_err() {
                return;
            }
            // Keep the channel open until cancelled.
            std::future::pending::<()>().await;
        });
        PositionWatch { rx, task }
    }
}
