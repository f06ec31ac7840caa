use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("missing token")]
    Missing,
    #[error("invalid token")]
    Invalid,
    #[error("identity provider unreachable: {0}")]
    Upstream(String),
}

// Claims we accept as the user id, in order of preference.
#[derive(Deserialize)]
struct Claims {
    sub: Option<String>,
    user_id: Option<String>,
    uid: Option<String>,
}

impl Claims {
    fn into_uid(self) -> Option<String> {
        [self.sub, self.user_id, self.uid]
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
    }
}

/// Pulls the token out of an `Authorization: Bearer ...` header value.
pub fn bearer_token(header_value: Option<&str>) -> Result<&str, IdentityError> {
    let value = header_value.ok_or(IdentityError::Missing)?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or(IdentityError::Missing)?
        .trim();
    if token.is_empty() {
        return Err(IdentityError::Missing);
    }
    Ok(token)
}

/// Resolves a bearer token to a uid.
///
/// With a verify URL the identity provider decides. Without one the JWT
/// payload is read unverified, which is only fit for local development.
pub async fn verify_token(
    http: &reqwest::Client,
    verify_url: Option<&str>,
    token: &str,
) -> Result<String, IdentityError> {
    match verify_url {
        Some(url) => verify_remote(http, url, token).await,
        None => decode_unverified(token),
    }
}

async fn verify_remote(
    http: &reqwest::Client,
    url: &str,
    token: &str,
) -> Result<String, IdentityError> {
    let mut headers = HeaderMap::new();
    let auth_value =
        HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| IdentityError::Invalid)?;
    headers.insert(AUTHORIZATION, auth_value);

    let resp = http
        .post(url)
        .headers(headers)
        .send()
        .await
        .map_err(|e| IdentityError::Upstream(e.to_string()))?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        debug!(%status, "identity provider rejected token");
        return Err(IdentityError::Invalid);
    }
    if !status.is_success() {
        warn!(%status, "🔐 Identity provider returned an error");
        return Err(IdentityError::Upstream(format!("status {status}")));
    }

    let claims: Claims = resp
        .json()
        .await
        .map_err(|e| IdentityError::Upstream(e.to_string()))?;
    claims.into_uid().ok_or(IdentityError::Invalid)
}

pub fn decode_unverified(token: &str) -> Result<String, IdentityError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(IdentityError::Invalid);
    }
    let payload = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| IdentityError::Invalid)?;
    let claims: Claims = serde_json::from_slice(&payload).map_err(|_| IdentityError::Invalid)?;
    claims.into_uid().ok_or(IdentityError::Invalid)
}

#[cfg(test)]
pub(crate) fn unsigned_token(uid: &str) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = general_purpose::URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{uid}"}}"#));
    format!("{header}.{payload}.sig")
}
