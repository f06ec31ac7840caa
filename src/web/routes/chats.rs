use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::error::AppResult;
use crate::models::MessageRow;
use crate::services::chat_service::{self, ChatView};
use crate::web::middleware::auth::AuthenticatedUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureChatQuery {
    other_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    member_uids: Vec<String>,
}

pub async fn ensure_chat_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
    Query(q): Query<EnsureChatQuery>,
) -> AppResult<Json<Value>> {
    let other = q.other_id.unwrap_or_default();
    let chat_id = chat_service::ensure_direct_chat(&pool, &auth_user.id, &other).await?;
    Ok(Json(json!({ "chatId": chat_id })))
}

pub async fn list_chats_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<ChatView>>> {
    Ok(Json(chat_service::list_chats(&pool, &auth_user.id).await?))
}

pub async fn list_messages_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
    Path(chat_id): Path<String>,
) -> AppResult<Json<Vec<MessageRow>>> {
    Ok(Json(
        chat_service::list_messages(&pool, &auth_user.id, &chat_id).await?,
    ))
}

pub async fn send_message_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
    Path(chat_id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> AppResult<Json<MessageRow>> {
    let message = chat_service::send_message(&pool, &auth_user.id, &chat_id, &body.text).await?;
    Ok(Json(message))
}

pub async fn create_group_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
    Json(body): Json<CreateGroupBody>,
) -> AppResult<Json<ChatView>> {
    let group =
        chat_service::create_group(&pool, &auth_user.id, &body.name, &body.member_uids).await?;
    Ok(Json(group))
}
