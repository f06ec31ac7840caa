use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::database::chat_repo::{self, NewChat};
use crate::database::relationship_repo;
use crate::models::{ChatRow, MessageRow, RelState};

const MAX_MESSAGE_CHARS: usize = 4_000;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("otherId must name another user")]
    BadOtherId,
    #[error("message text is empty")]
    EmptyMessage,
    #[error("message text is longer than {MAX_MESSAGE_CHARS} characters")]
    MessageTooLong,
    #[error("chat not found")]
    NotFound,
    #[error("one of the users has blocked the other")]
    Blocked,
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    #[serde(flatten)]
    pub chat: ChatRow,
    pub member_ids: Vec<String>,
}

/// Stable key of the one-to-one chat between two users, order independent.
pub fn direct_key(x: &str, y: &str) -> String {
    if x <= y {
        format!("{x}__{y}")
    } else {
        format!("{y}__{x}")
    }
}

/// Returns the id of the direct chat between `me` and `other`, creating it
/// on first use.
pub async fn ensure_direct_chat(
    pool: &SqlitePool,
    me: &str,
    other: &str,
) -> Result<String, ChatError> {
    let other = other.trim();
    if other.is_empty() || other == me {
        return Err(ChatError::BadOtherId);
    }

    if let Some(edge) = relationship_repo::get_edge(pool, me, other).await? {
        if edge.state() == Some(RelState::Blocked) {
            return Err(ChatError::Blocked);
        }
    }

    let key = direct_key(me, other);
    if let Some(id) = chat_repo::find_direct_chat_id(pool, &key).await? {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;
    let inserted = chat_repo::insert_chat(
        &mut tx,
        NewChat {
            id: &id,
            is_group: false,
            title: None,
            direct_key: Some(&key),
            created_by: me,
        },
    )
    .await?;

    if !inserted {
        // Lost a race with the other user's ensure.
        tx.rollback().await?;
        return chat_repo::find_direct_chat_id(pool, &key)
            .await?
            .ok_or(ChatError::NotFound);
    }

    chat_repo::insert_member(&mut tx, &id, me).await?;
    chat_repo::insert_member(&mut tx, &id, other).await?;
    tx.commit().await?;

    info!(chat_id = %id, "💬 Direct chat created");
    Ok(id)
}

pub async fn list_chats(pool: &SqlitePool, uid: &str) -> Result<Vec<ChatView>, ChatError> {
    let chats = chat_repo::list_chats_for_member(pool, uid).await?;
    let mut out = Vec::with_capacity(chats.len());
    for chat in chats {
        let member_ids = chat_repo::list_member_ids(pool, &chat.id).await?;
        out.push(ChatView { chat, member_ids });
    }
    Ok(out)
}

pub async fn list_messages(
    pool: &SqlitePool,
    uid: &str,
    chat_id: &str,
) -> Result<Vec<MessageRow>, ChatError> {
    if !chat_repo::is_member(pool, chat_id, uid).await? {
        return Err(ChatError::NotFound);
    }
    Ok(chat_repo::list_messages(pool, chat_id).await?)
}

pub async fn send_message(
    pool: &SqlitePool,
    uid: &str,
    chat_id: &str,
    text: &str,
) -> Result<MessageRow, ChatError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::MessageTooLong);
    }
    if !chat_repo::is_member(pool, chat_id, uid).await? {
        return Err(ChatError::NotFound);
    }

    let id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;
    let message = chat_repo::insert_message(&mut tx, &id, chat_id, uid, text).await?;
    chat_repo::touch_chat(&mut tx, chat_id, text).await?;
    tx.commit().await?;
    Ok(message)
}

/// Creates a group chat. The creator is always a member; blank and
/// repeated uids are dropped.
pub async fn create_group(
    pool: &SqlitePool,
    uid: &str,
    name: &str,
    member_uids: &[String],
) -> Result<ChatView, ChatError> {
    let name = name.trim();
    let title = if name.is_empty() { None } else { Some(name) };

    let mut members: Vec<String> = std::iter::once(uid.to_string())
        .chain(
            member_uids
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
        )
        .collect();
    members.sort();
    members.dedup();

    let id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;
    chat_repo::insert_chat(
        &mut tx,
        NewChat {
            id: &id,
            is_group: true,
            title,
            direct_key: None,
            created_by: uid,
        },
    )
    .await?;
    for member in &members {
        chat_repo::insert_member(&mut tx, &id, member).await?;
    }
    tx.commit().await?;

    info!(chat_id = %id, members = members.len(), "💬 Group chat created");
    let chat = chat_repo::get_chat(pool, &id).await?.ok_or(ChatError::NotFound)?;
    Ok(ChatView {
        chat,
        member_ids: members,
    })
}
