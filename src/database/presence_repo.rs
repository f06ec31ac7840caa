use sqlx::{SqliteConnection, SqlitePool};

use crate::models::PresenceRow;
use crate::services::geo::BoundingBox;

const SQL_PRESENCE_COLUMNS: &str = r#"
SELECT
  uid,
  display_name,
  photo_url,
  lat,
  lng,
  location_updated_at,
  visibility_enabled,
  radius_meters,
  updated_at
FROM presence
"#;

pub async fn get_presence(pool: &SqlitePool, uid: &str) -> sqlx::Result<Option<PresenceRow>> {
    let sql = format!("{SQL_PRESENCE_COLUMNS} WHERE uid = ?1");
    sqlx::query_as::<_, PresenceRow>(&sql)
        .bind(uid)
        .fetch_optional(pool)
        .await
}

pub async fn get_presence_conn(
    conn: &mut SqliteConnection,
    uid: &str,
) -> sqlx::Result<Option<PresenceRow>> {
    let sql = format!("{SQL_PRESENCE_COLUMNS} WHERE uid = ?1");
    sqlx::query_as::<_, PresenceRow>(&sql)
        .bind(uid)
        .fetch_optional(conn)
        .await
}

pub async fn list_presence(pool: &SqlitePool) -> sqlx::Result<Vec<PresenceRow>> {
    let sql = format!("{SQL_PRESENCE_COLUMNS} ORDER BY uid");
    sqlx::query_as::<_, PresenceRow>(&sql).fetch_all(pool).await
}

/// Rows that could possibly be visible to someone inside `bbox`: enabled,
/// located, and either worldwide or located inside the box.
pub async fn list_presence_candidates(
    pool: &SqlitePool,
    bbox: Option<BoundingBox>,
) -> sqlx::Result<Vec<PresenceRow>> {
    let mut sql = format!(
        "{SQL_PRESENCE_COLUMNS} WHERE visibility_enabled = 1 AND lat IS NOT NULL AND lng IS NOT NULL"
    );

    let Some(bbox) = bbox else {
        sql.push_str(" ORDER BY uid");
        return sqlx::query_as::<_, PresenceRow>(&sql).fetch_all(pool).await;
    };

    sql.push_str(
        " AND (radius_meters IS NULL OR (lat BETWEEN ?1 AND ?2 AND lng BETWEEN ?3 AND ?4)) ORDER BY uid",
    );
    sqlx::query_as::<_, PresenceRow>(&sql)
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lng)
        .bind(bbox.max_lng)
        .fetch_all(pool)
        .await
}

pub const SQL_MAX_ENABLED_RADIUS: &str = r#"
SELECT MAX(radius_meters)
FROM presence
WHERE visibility_enabled = 1
  AND radius_meters IS NOT NULL
"#;

pub async fn max_enabled_radius(pool: &SqlitePool) -> sqlx::Result<Option<f64>> {
    sqlx::query_scalar::<_, Option<f64>>(SQL_MAX_ENABLED_RADIUS)
        .fetch_one(pool)
        .await
}

pub async fn insert_default_presence(
    conn: &mut SqliteConnection,
    uid: &str,
    default_radius_meters: f64,
) -> sqlx::Result<bool> {
    let sql = format!(
        r#"
INSERT OR IGNORE INTO presence (uid, visibility_enabled, radius_meters, updated_at)
VALUES (?1, 1, ?2, {now})
"#,
        now = super::SQL_NOW
    );
    let res = sqlx::query(&sql)
        .bind(uid)
        .bind(default_radius_meters)
        .execute(conn)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn update_location(
    conn: &mut SqliteConnection,
    uid: &str,
    lat: f64,
    lng: f64,
) -> sqlx::Result<u64> {
    let sql = format!(
        r#"
UPDATE presence
SET lat = ?2,
    lng = ?3,
    location_updated_at = {now},
    updated_at = {now}
WHERE uid = ?1
"#,
        now = super::SQL_NOW
    );
    let res = sqlx::query(&sql)
        .bind(uid)
        .bind(lat)
        .bind(lng)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

pub async fn update_visibility(
    conn: &mut SqliteConnection,
    uid: &str,
    enabled: bool,
    radius_meters: Option<f64>,
) -> sqlx::Result<u64> {
    let sql = format!(
        r#"
UPDATE presence
SET visibility_enabled = ?2,
    radius_meters = ?3,
    updated_at = {now}
WHERE uid = ?1
"#,
        now = super::SQL_NOW
    );
    let res = sqlx::query(&sql)
        .bind(uid)
        .bind(enabled as i64)
        .bind(radius_meters)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

pub async fn update_profile(
    conn: &mut SqliteConnection,
    uid: &str,
    display_name: Option<&str>,
    photo_url: Option<&str>,
) -> sqlx::Result<u64> {
    let sql = format!(
        r#"
UPDATE presence
SET display_name = COALESCE(?2, display_name),
    photo_url = COALESCE(?3, photo_url),
    updated_at = {now}
WHERE uid = ?1
"#,
        now = super::SQL_NOW
    );
    let res = sqlx::query(&sql)
        .bind(uid)
        .bind(display_name)
        .bind(photo_url)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}
