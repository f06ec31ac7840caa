use sqlx::{SqliteConnection, SqlitePool};

use crate::models::relationships::edge_key;
use crate::models::RelationshipRow;

const SQL_RELATIONSHIP_COLUMNS: &str = r#"
SELECT
  user_a,
  user_b,
  status,
  requested_by,
  blocked_by,
  updated_at
FROM relationships
"#;

pub async fn get_edge(
    pool: &SqlitePool,
    x: &str,
    y: &str,
) -> sqlx::Result<Option<RelationshipRow>> {
    let (a, b) = edge_key(x, y);
    let sql = format!("{SQL_RELATIONSHIP_COLUMNS} WHERE user_a = ?1 AND user_b = ?2");
    sqlx::query_as::<_, RelationshipRow>(&sql)
        .bind(a)
        .bind(b)
        .fetch_optional(pool)
        .await
}

pub async fn get_edge_conn(
    conn: &mut SqliteConnection,
    x: &str,
    y: &str,
) -> sqlx::Result<Option<RelationshipRow>> {
    let (a, b) = edge_key(x, y);
    let sql = format!("{SQL_RELATIONSHIP_COLUMNS} WHERE user_a = ?1 AND user_b = ?2");
    sqlx::query_as::<_, RelationshipRow>(&sql)
        .bind(a)
        .bind(b)
        .fetch_optional(conn)
        .await
}

pub async fn list_edges_for(pool: &SqlitePool, uid: &str) -> sqlx::Result<Vec<RelationshipRow>> {
    let sql = format!(
        "{SQL_RELATIONSHIP_COLUMNS} WHERE user_a = ?1 OR user_b = ?1 ORDER BY updated_at DESC"
    );
    sqlx::query_as::<_, RelationshipRow>(&sql)
        .bind(uid)
        .fetch_all(pool)
        .await
}

pub struct EdgeWrite<'a> {
    pub x: &'a str,
    pub y: &'a str,
    pub status: &'a str, // pending|accepted|blocked
    pub requested_by: Option<&'a str>,
    pub blocked_by: Option<&'a str>,
}

pub async fn upsert_edge(conn: &mut SqliteConnection, edge: EdgeWrite<'_>) -> sqlx::Result<()> {
    let (a, b) = edge_key(edge.x, edge.y);
    let sql = format!(
        r#"
INSERT INTO relationships (user_a, user_b, status, requested_by, blocked_by, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, {now})
ON CONFLICT (user_a, user_b) DO UPDATE SET
  status = excluded.status,
  requested_by = excluded.requested_by,
  blocked_by = excluded.blocked_by,
  updated_at = excluded.updated_at
"#,
        now = super::SQL_NOW
    );
    sqlx::query(&sql)
        .bind(a)
        .bind(b)
        .bind(edge.status)
        .bind(edge.requested_by)
        .bind(edge.blocked_by)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_edge(conn: &mut SqliteConnection, x: &str, y: &str) -> sqlx::Result<u64> {
    let (a, b) = edge_key(x, y);
    let res = sqlx::query("DELETE FROM relationships WHERE user_a = ?1 AND user_b = ?2")
        .bind(a)
        .bind(b)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}
