use sqlx::{SqliteConnection, SqlitePool};

use crate::models::{ChatRow, MessageRow};

const SQL_CHAT_COLUMNS: &str = r#"
SELECT
  c.id,
  c.is_group,
  c.title,
  c.created_by,
  c.last_message_text,
  c.updated_at
FROM chats c
"#;

pub async fn find_direct_chat_id(
    pool: &SqlitePool,
    direct_key: &str,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar::<_, String>("SELECT id FROM chats WHERE direct_key = ?1 LIMIT 1")
        .bind(direct_key)
        .fetch_optional(pool)
        .await
}

pub async fn get_chat(pool: &SqlitePool, chat_id: &str) -> sqlx::Result<Option<ChatRow>> {
    let sql = format!("{SQL_CHAT_COLUMNS} WHERE c.id = ?1");
    sqlx::query_as::<_, ChatRow>(&sql)
        .bind(chat_id)
        .fetch_optional(pool)
        .await
}

pub async fn list_chats_for_member(pool: &SqlitePool, uid: &str) -> sqlx::Result<Vec<ChatRow>> {
    let sql = format!(
        r#"{SQL_CHAT_COLUMNS}
JOIN chat_members m ON m.chat_id = c.id
WHERE m.user_id = ?1
ORDER BY c.updated_at DESC, c.id
"#
    );
    sqlx::query_as::<_, ChatRow>(&sql)
        .bind(uid)
        .fetch_all(pool)
        .await
}

pub async fn list_member_ids(pool: &SqlitePool, chat_id: &str) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY user_id",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await
}

pub async fn is_member(pool: &SqlitePool, chat_id: &str, uid: &str) -> sqlx::Result<bool> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2 LIMIT 1",
    )
    .bind(chat_id)
    .bind(uid)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

pub struct NewChat<'a> {
    pub id: &'a str,
    pub is_group: bool,
    pub title: Option<&'a str>,
    pub direct_key: Option<&'a str>,
    pub created_by: &'a str,
}

/// Inserts the chat; returns false when a direct chat with the same key
/// already exists.
pub async fn insert_chat(conn: &mut SqliteConnection, chat: NewChat<'_>) -> sqlx::Result<bool> {
    let sql = format!(
        r#"
INSERT OR IGNORE INTO chats (id, is_group, title, direct_key, created_by, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, {now})
"#,
        now = super::SQL_NOW
    );
    let res = sqlx::query(&sql)
        .bind(chat.id)
        .bind(chat.is_group as i64)
        .bind(chat.title)
        .bind(chat.direct_key)
        .bind(chat.created_by)
        .execute(conn)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn insert_member(
    conn: &mut SqliteConnection,
    chat_id: &str,
    uid: &str,
) -> sqlx::Result<()> {
    sqlx::query("INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)")
        .bind(chat_id)
        .bind(uid)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn list_messages(pool: &SqlitePool, chat_id: &str) -> sqlx::Result<Vec<MessageRow>> {
    sqlx::query_as::<_, MessageRow>(
        r#"
SELECT id, chat_id, sender_id, text, created_at
FROM messages
WHERE chat_id = ?1
ORDER BY created_at ASC, rowid ASC
"#,
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await
}

pub async fn insert_message(
    conn: &mut SqliteConnection,
    id: &str,
    chat_id: &str,
    sender_id: &str,
    text: &str,
) -> sqlx::Result<MessageRow> {
    let sql = format!(
        r#"
INSERT INTO messages (id, chat_id, sender_id, text, created_at)
VALUES (?1, ?2, ?3, ?4, {now})
RETURNING id, chat_id, sender_id, text, created_at
"#,
        now = super::SQL_NOW
    );
    sqlx::query_as::<_, MessageRow>(&sql)
        .bind(id)
        .bind(chat_id)
        .bind(sender_id)
        .bind(text)
        .fetch_one(conn)
        .await
}

pub async fn touch_chat(
    conn: &mut SqliteConnection,
    chat_id: &str,
    last_message_text: &str,
) -> sqlx::Result<()> {
    let sql = format!(
        "UPDATE chats SET last_message_text = ?2, updated_at = {now} WHERE id = ?1",
        now = super::SQL_NOW
    );
    sqlx::query(&sql)
        .bind(chat_id)
        .bind(last_message_text)
        .execute(conn)
        .await?;
    Ok(())
}
