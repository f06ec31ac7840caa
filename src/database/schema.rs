use sqlx::SqlitePool;
use tracing::info;

// Each entry is one schema version; statements run in a single transaction.
// Append only: never edit a version that has shipped.
const MIGRATIONS: &[&[&str]] = &[
    &[
        r#"
CREATE TABLE presence (
  uid TEXT PRIMARY KEY NOT NULL,
  display_name TEXT,
  photo_url TEXT,
  lat REAL,
  lng REAL,
  location_updated_at TEXT,
  visibility_enabled INTEGER NOT NULL DEFAULT 1,
  radius_meters REAL,
  updated_at TEXT NOT NULL
)
"#,
        "CREATE INDEX idx_presence_lat_lng ON presence (lat, lng)",
        r#"
CREATE TABLE relationships (
  user_a TEXT NOT NULL,
  user_b TEXT NOT NULL,
  status TEXT NOT NULL,
  requested_by TEXT,
  blocked_by TEXT,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (user_a, user_b),
  CHECK (user_a < user_b)
)
"#,
        "CREATE INDEX idx_relationships_user_b ON relationships (user_b)",
    ],
    &[
        r#"
CREATE TABLE chats (
  id TEXT PRIMARY KEY NOT NULL,
  is_group INTEGER NOT NULL DEFAULT 0,
  title TEXT,
  direct_key TEXT UNIQUE,
  created_by TEXT NOT NULL,
  last_message_text TEXT,
  updated_at TEXT NOT NULL
)
"#,
        r#"
CREATE TABLE chat_members (
  chat_id TEXT NOT NULL REFERENCES chats (id) ON DELETE CASCADE,
  user_id TEXT NOT NULL,
  PRIMARY KEY (chat_id, user_id)
)
"#,
        "CREATE INDEX idx_chat_members_user ON chat_members (user_id)",
        r#"
CREATE TABLE messages (
  id TEXT PRIMARY KEY NOT NULL,
  chat_id TEXT NOT NULL REFERENCES chats (id) ON DELETE CASCADE,
  sender_id TEXT NOT NULL,
  text TEXT NOT NULL,
  created_at TEXT NOT NULL
)
"#,
        "CREATE INDEX idx_messages_chat_created ON messages (chat_id, created_at)",
    ],
    &[
        r#"
CREATE TABLE cirkles (
  id TEXT PRIMARY KEY NOT NULL,
  name TEXT NOT NULL,
  created_by TEXT NOT NULL,
  created_at TEXT NOT NULL
)
"#,
        r#"
CREATE TABLE cirkle_members (
  cirkle_id TEXT NOT NULL REFERENCES cirkles (id) ON DELETE CASCADE,
  user_id TEXT NOT NULL,
  PRIMARY KEY (cirkle_id, user_id)
)
"#,
        "CREATE INDEX idx_cirkle_members_user ON cirkle_members (user_id)",
        r#"
CREATE TABLE announcements (
  id TEXT PRIMARY KEY NOT NULL,
  cirkle_id TEXT NOT NULL REFERENCES cirkles (id) ON DELETE CASCADE,
  author_id TEXT NOT NULL,
  text TEXT NOT NULL,
  created_at TEXT NOT NULL
)
"#,
        "CREATE INDEX idx_announcements_cirkle_created ON announcements (cirkle_id, created_at)",
    ],
];

pub fn latest_version() -> i64 {
    MIGRATIONS.len() as i64
}

pub async fn current_version(pool: &SqlitePool) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>("PRAGMA user_version")
        .fetch_one(pool)
        .await
}

pub async fn migrate(pool: &SqlitePool) -> sqlx::Result<()> {
    let current = current_version(pool).await?;

    for (idx, statements) in MIGRATIONS.iter().enumerate() {
        let version = idx as i64 + 1;
        if version <= current {
            continue;
        }

        let mut tx = pool.begin().await?;
        for sql in statements.iter() {
            sqlx::query(sql).execute(&mut *tx).await?;
        }
        // PRAGMA does not take bind parameters.
        sqlx::query(&format!("PRAGMA user_version = {version}"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version, "🗄️  Applied schema migration");
    }

    Ok(())
}
