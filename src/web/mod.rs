pub mod middleware;
pub mod routes;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use http::{header, HeaderValue, Method};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use self::middleware::auth as auth_middleware;
use self::routes::{announcements, chats, health, presence, relationships};
use self::state::AppState;

pub fn router(state: AppState) -> Router {
    // Everything under /api needs a bearer identity.
    let protected_routes = Router::new()
        .route("/api/presence/me", get(presence::me_handler))
        .route(
            "/api/presence/location",
            post(presence::update_location_handler),
        )
        .route(
            "/api/presence/visibility",
            put(presence::update_visibility_handler),
        )
        .route("/api/presence/profile", put(presence::update_profile_handler))
        .route("/api/presence/visible", get(presence::visible_handler))
        .route("/api/presence/ws", get(presence::presence_ws_handler))
        .route("/api/chats", get(chats::list_chats_handler))
        .route("/api/chats/ensure", post(chats::ensure_chat_handler))
        .route("/api/chats/group", post(chats::create_group_handler))
        .route(
            "/api/chats/:chat_id/messages",
            get(chats::list_messages_handler).post(chats::send_message_handler),
        )
        .route(
            "/api/relationships",
            get(relationships::list_relationships_handler),
        )
        .route(
            "/api/relationships/:user_id/:action",
            post(relationships::relationship_action_handler),
        )
        .route(
            "/api/cirkles",
            get(announcements::list_cirkles_handler).post(announcements::create_cirkle_handler),
        )
        .route(
            "/api/announcements",
            post(announcements::create_announcement_handler),
        )
        .route("/api/feed", get(announcements::feed_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::require_auth,
        ));

    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/health", get(health::health_handler))
        .merge(protected_routes)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(cors)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
