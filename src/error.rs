use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::announcement_service::AnnouncementError;
use crate::services::chat_service::ChatError;
use crate::services::identity_service::IdentityError;
use crate::services::presence_store::PresenceError;
use crate::services::relationship_service::RelationshipError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Presence(#[from] PresenceError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Presence(PresenceError::Timeout(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Presence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Storage details stay in the log.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request_failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::BadOtherId | ChatError::EmptyMessage | ChatError::MessageTooLong => {
                AppError::BadRequest(err.to_string())
            }
            ChatError::NotFound => AppError::NotFound(err.to_string()),
            ChatError::Blocked => AppError::Forbidden(err.to_string()),
            ChatError::Storage(e) => AppError::Database(e),
        }
    }
}

impl From<RelationshipError> for AppError {
    fn from(err: RelationshipError) -> Self {
        match err {
            RelationshipError::SelfTarget | RelationshipError::UnknownAction(_) => {
                AppError::BadRequest(err.to_string())
            }
            RelationshipError::NoRelationship => AppError::NotFound(err.to_string()),
            RelationshipError::NotPending => AppError::Conflict(err.to_string()),
            RelationshipError::NotAllowed | RelationshipError::Blocked => {
                AppError::Forbidden(err.to_string())
            }
            RelationshipError::Storage(e) => AppError::Database(e),
            RelationshipError::Chat(e) => e.into(),
        }
    }
}

impl From<AnnouncementError> for AppError {
    fn from(err: AnnouncementError) -> Self {
        match err {
            AnnouncementError::EmptyText
            | AnnouncementError::TextTooLong
            | AnnouncementError::EmptyName => AppError::BadRequest(err.to_string()),
            AnnouncementError::UnknownCirkle => AppError::NotFound(err.to_string()),
            AnnouncementError::NotAMember => AppError::Forbidden(err.to_string()),
            AnnouncementError::Storage(e) => AppError::Database(e),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Missing | IdentityError::Invalid => {
                AppError::Unauthorized(err.to_string())
            }
            IdentityError::Upstream(_) => AppError::BadGateway(err.to_string()),
        }
    }
}
