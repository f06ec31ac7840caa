use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::services::identity_service::{self, IdentityError};
use crate::web::state::AppState;

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub id: String,
}

// Browsers cannot set headers on a WebSocket handshake, so the token may
// also arrive as an `access_token` cookie or query parameter.
fn request_token(request: &Request) -> Result<String, IdentityError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|hv| hv.to_str().ok());
    if let Ok(token) = identity_service::bearer_token(header_value) {
        return Ok(token.to_string());
    }

    let from_cookie = request
        .headers()
        .get(header::COOKIE)
        .and_then(|hv| hv.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split("; ")
                .find_map(|c| c.strip_prefix("access_token="))
        });
    let from_query = request.uri().query().and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("access_token="))
    });

    from_cookie
        .or(from_query)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(IdentityError::Missing)
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request_token(&request)?;
    let uid = identity_service::verify_token(
        &state.http,
        state.config.identity_verify_url.as_deref(),
        &token,
    )
    .await
    .inspect_err(|e| tracing::debug!(error = %e, "auth_rejected"))?;

    request.extensions_mut().insert(AuthenticatedUser { id: uid });
    Ok(next.run(request).await)
}
