use sqlx::{SqliteConnection, SqlitePool};

use crate::models::{AnnouncementRow, CirkleRow, FeedItem};

const SQL_CIRKLE_COLUMNS: &str = r#"
SELECT
  k.id,
  k.name,
  k.created_by,
  k.created_at
FROM cirkles k
"#;

const SQL_LIST_FEED: &str = r#"
SELECT
  a.id,
  a.id AS announcement_id,
  a.text,
  a.author_id AS from_uid,
  a.cirkle_id,
  a.created_at
FROM announcements a
JOIN cirkle_members m ON m.cirkle_id = a.cirkle_id
WHERE m.user_id = ?1
ORDER BY a.created_at DESC, a.rowid DESC
LIMIT ?2
"#;

pub async fn get_cirkle(pool: &SqlitePool, cirkle_id: &str) -> sqlx::Result<Option<CirkleRow>> {
    let sql = format!("{SQL_CIRKLE_COLUMNS} WHERE k.id = ?1");
    sqlx::query_as::<_, CirkleRow>(&sql)
        .bind(cirkle_id)
        .fetch_optional(pool)
        .await
}

pub async fn list_cirkles_for_member(
    pool: &SqlitePool,
    uid: &str,
) -> sqlx::Result<Vec<CirkleRow>> {
    let sql = format!(
        r#"{SQL_CIRKLE_COLUMNS}
JOIN cirkle_members m ON m.cirkle_id = k.id
WHERE m.user_id = ?1
ORDER BY k.created_at DESC, k.id
"#
    );
    sqlx::query_as::<_, CirkleRow>(&sql)
        .bind(uid)
        .fetch_all(pool)
        .await
}

pub async fn list_member_ids(pool: &SqlitePool, cirkle_id: &str) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM cirkle_members WHERE cirkle_id = ?1 ORDER BY user_id",
    )
    .bind(cirkle_id)
    .fetch_all(pool)
    .await
}

pub async fn is_member(pool: &SqlitePool, cirkle_id: &str, uid: &str) -> sqlx::Result<bool> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM cirkle_members WHERE cirkle_id = ?1 AND user_id = ?2 LIMIT 1",
    )
    .bind(cirkle_id)
    .bind(uid)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

pub async fn insert_cirkle(
    conn: &mut SqliteConnection,
    id: &str,
    name: &str,
    created_by: &str,
) -> sqlx::Result<()> {
    let sql = format!(
        "INSERT INTO cirkles (id, name, created_by, created_at) VALUES (?1, ?2, ?3, {now})",
        now = super::SQL_NOW
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(name)
        .bind(created_by)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_member(
    conn: &mut SqliteConnection,
    cirkle_id: &str,
    uid: &str,
) -> sqlx::Result<()> {
    sqlx::query("INSERT OR IGNORE INTO cirkle_members (cirkle_id, user_id) VALUES (?1, ?2)")
        .bind(cirkle_id)
        .bind(uid)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_announcement(
    pool: &SqlitePool,
    id: &str,
    cirkle_id: &str,
    author_id: &str,
    text: &str,
) -> sqlx::Result<AnnouncementRow> {
    let sql = format!(
        r#"
INSERT INTO announcements (id, cirkle_id, author_id, text, created_at)
VALUES (?1, ?2, ?3, ?4, {now})
RETURNING id, cirkle_id, author_id, text, created_at
"#,
        now = super::SQL_NOW
    );
    sqlx::query_as::<_, AnnouncementRow>(&sql)
        .bind(id)
        .bind(cirkle_id)
        .bind(author_id)
        .bind(text)
        .fetch_one(pool)
        .await
}

pub async fn list_feed(pool: &SqlitePool, uid: &str, limit: i64) -> sqlx::Result<Vec<FeedItem>> {
    sqlx::query_as::<_, FeedItem>(SQL_LIST_FEED)
        .bind(uid)
        .bind(limit)
        .fetch_all(pool)
        .await
}
