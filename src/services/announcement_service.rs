use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::database::announcement_repo;
use crate::models::{Announcement, Audience, CirkleRow, FeedItem};

pub const FEED_LIMIT: i64 = 50;
const MAX_ANNOUNCEMENT_CHARS: usize = 2_000;

#[derive(Debug, Error)]
pub enum AnnouncementError {
    #[error("announcement text is empty")]
    EmptyText,
    #[error("announcement text is longer than {MAX_ANNOUNCEMENT_CHARS} characters")]
    TextTooLong,
    #[error("cirkle name is empty")]
    EmptyName,
    #[error("cirkle not found")]
    UnknownCirkle,
    #[error("only cirkle members can announce to it")]
    NotAMember,
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CirkleView {
    #[serde(flatten)]
    pub cirkle: CirkleRow,
    pub member_ids: Vec<String>,
}

/// Creates a cirkle owned by `uid`. The creator is always a member; blank
/// and repeated uids are dropped.
pub async fn create_cirkle(
    pool: &SqlitePool,
    uid: &str,
    name: &str,
    member_uids: &[String],
) -> Result<CirkleView, AnnouncementError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AnnouncementError::EmptyName);
    }

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
    announcement_repo::insert_cirkle(&mut tx, &id, name, uid).await?;
    for member in &members {
        announcement_repo::insert_member(&mut tx, &id, member).await?;
    }
    tx.commit().await?;

    info!(cirkle_id = %id, members = members.len(), "⭕ Cirkle created");
    let cirkle = announcement_repo::get_cirkle(pool, &id)
        .await?
        .ok_or(AnnouncementError::UnknownCirkle)?;
    Ok(CirkleView {
        cirkle,
        member_ids: members,
    })
}

pub async fn list_cirkles(
    pool: &SqlitePool,
    uid: &str,
) -> Result<Vec<CirkleView>, AnnouncementError> {
    let cirkles = announcement_repo::list_cirkles_for_member(pool, uid).await?;
    let mut out = Vec::with_capacity(cirkles.len());
    for cirkle in cirkles {
        let member_ids = announcement_repo::list_member_ids(pool, &cirkle.id).await?;
        out.push(CirkleView { cirkle, member_ids });
    }
    Ok(out)
}

/// Stores an announcement for its audience. Members see it in their feed
/// from the next read on; nothing is copied per recipient.
pub async fn create_announcement(
    pool: &SqlitePool,
    uid: &str,
    text: &str,
    audience: &Audience,
) -> Result<Announcement, AnnouncementError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AnnouncementError::EmptyText);
    }
    if text.chars().count() > MAX_ANNOUNCEMENT_CHARS {
        return Err(AnnouncementError::TextTooLong);
    }

    let Audience::Cirkle { cirkle_id } = audience;
    let cirkle_id = cirkle_id.trim();
    if announcement_repo::get_cirkle(pool, cirkle_id).await?.is_none() {
        return Err(AnnouncementError::UnknownCirkle);
    }
    if !announcement_repo::is_member(pool, cirkle_id, uid).await? {
        return Err(AnnouncementError::NotAMember);
    }

    let id = Uuid::new_v4().to_string();
    let row = announcement_repo::insert_announcement(pool, &id, cirkle_id, uid, text).await?;
    info!(announcement_id = %id, cirkle_id, "📣 Announcement posted");
    Ok(row.into())
}

/// Newest announcements across every cirkle the user belongs to.
pub async fn list_feed(pool: &SqlitePool, uid: &str) -> Result<Vec<FeedItem>, AnnouncementError> {
    Ok(announcement_repo::list_feed(pool, uid, FEED_LIMIT).await?)
}
