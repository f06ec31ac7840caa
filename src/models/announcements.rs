use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CirkleRow {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnnouncementRow {
    pub id: String,
    pub cirkle_id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: String,
}

/// Who an announcement is addressed to. Only cirkles exist today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Audience {
    Cirkle {
        #[serde(rename = "cirkleId")]
        cirkle_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    pub text: String,
    pub from_uid: String,
    pub audience: Audience,
    pub created_at: String,
}

impl From<AnnouncementRow> for Announcement {
    fn from(row: AnnouncementRow) -> Self {
        Self {
            id: row.id,
            text: row.text,
            from_uid: row.author_id,
            audience: Audience::Cirkle {
                cirkle_id: row.cirkle_id,
            },
            created_at: row.created_at,
        }
    }
}

// One entry of a user's feed, read through cirkle membership.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: String,
    pub announcement_id: String,
    pub text: String,
    pub from_uid: String,
    pub cirkle_id: String,
    pub created_at: String,
}
