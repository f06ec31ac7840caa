use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    Extension, Json,
};
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{PresencePatch, UserPresence, Visibility, VisiblePeer};
use crate::services::geo::GeoPoint;
use crate::services::location_service::{location_channel, LocationFeed, PermissionStatus};
use crate::services::presence_session::PresenceSession;
use crate::services::relationship_service;
use crate::services::visibility_service::visible_peers;
use crate::web::middleware::auth::AuthenticatedUser;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LocationBody {
    lat: f64,
    lng: f64,
}

/// `radiusMeters` absent or null means visible worldwide.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityBody {
    enabled: bool,
    radius_meters: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBody {
    display_name: Option<String>,
    #[serde(rename = "photoURL", alias = "photoUrl")]
    photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VisibleQuery {
    lat: Option<f64>,
    lng: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct VisibleResponse {
    center: GeoPoint,
    peers: Vec<VisiblePeer>,
}

pub async fn me_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
) -> AppResult<Json<UserPresence>> {
    state
        .store
        .get(&auth_user.id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no presence record yet".to_string()))
}

pub async fn update_location_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
    Json(body): Json<LocationBody>,
) -> AppResult<Json<UserPresence>> {
    let point =
        GeoPoint::new(body.lat, body.lng).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let presence = state.publisher.publish_checked(&auth_user.id, point).await?;
    Ok(Json(presence))
}

pub async fn update_visibility_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
    Json(body): Json<VisibilityBody>,
) -> AppResult<Json<UserPresence>> {
    let visibility = Visibility::new(body.enabled, body.radius_meters)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let presence = state
        .store
        .upsert_merge(&auth_user.id, PresencePatch::visibility(visibility))
        .await?;
    info!(uid = %auth_user.id, enabled = visibility.enabled, radius = ?visibility.radius_meters, "👁️ Visibility updated");
    Ok(Json(presence))
}

pub async fn update_profile_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
    Json(body): Json<ProfileBody>,
) -> AppResult<Json<UserPresence>> {
    let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let patch = PresencePatch {
        display_name: clean(body.display_name),
        photo_url: clean(body.photo_url),
        ..Default::default()
    };
    if patch.is_empty() {
        return Err(AppError::BadRequest(
            "displayName or photoURL is required".to_string(),
        ));
    }
    Ok(Json(state.store.upsert_merge(&auth_user.id, patch).await?))
}

/// One-shot filter. The center is the query point, else the viewer's
/// stored location, else the fallback center.
pub async fn visible_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
    Query(q): Query<VisibleQuery>,
) -> AppResult<Json<VisibleResponse>> {
    let center = match (q.lat, q.lng) {
        (Some(lat), Some(lng)) => GeoPoint::clamped(lat, lng),
        _ => state
            .store
            .get(&auth_user.id)
            .await?
            .and_then(|p| p.location)
            .map(|l| l.point())
            .unwrap_or(state.config.presence.fallback_center),
    };

    let candidates = state.store.list_candidates(&center).await?;
    let relationships = relationship_service::relationship_states(&state.pool, &auth_user.id).await?;
    let peers = visible_peers(&center, &candidates, &auth_user.id, &relationships);
    Ok(Json(VisibleResponse { center, peers }))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Position { lat: f64, lng: f64 },
    Permission { granted: bool },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerMessage<'a> {
    Peers { peers: &'a [VisiblePeer] },
}

pub async fn presence_ws_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_socket(socket, state, auth_user.id))
}

/// Live map for one connected client: the client streams its own device
/// positions in, the server streams visible peers out.
async fn run_socket(socket: WebSocket, state: AppState, uid: String) {
    let (feed, provider) = location_channel();
    let publisher = state.publisher.spawn(&uid, Arc::new(provider));
    let session = PresenceSession::spawn(state.store.clone(), &uid, publisher.positions());
    let mut peers = session.peers();
    info!(uid, "🛰️ Presence socket connected");

    let (mut sender, receiver) = socket.split();

    let mut push_task = tokio::spawn(async move {
        loop {
            let payload = {
                let current = peers.borrow_and_update();
                serde_json::to_string(&ServerMessage::Peers { peers: &current })
            };
            let text = match payload {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode peers: {}", e);
                    break;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
            if peers.changed().await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut push_task => {},
        _ = read_client(receiver, &feed, &uid) => {},
    }

    push_task.abort();
    publisher.stop();
    session.stop().await;
    info!(uid, "🛰️ Presence socket closed");
}

async fn read_client(mut receiver: SplitStream<WebSocket>, feed: &LocationFeed, uid: &str) {
    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Position { lat, lng }) => match GeoPoint::new(lat, lng) {
                Ok(point) => feed.push_position(point),
                Err(e) => debug!(uid, "ignoring bad position: {}", e),
            },
            Ok(ClientMessage::Permission { granted }) => feed.set_permission(if granted {
                PermissionStatus::Granted
            } else {
                PermissionStatus::Denied
            }),
            Err(e) => debug!(uid, "ignoring client message: {}", e),
        }
    }
}
