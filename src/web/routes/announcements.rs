use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::error::AppResult;
use crate::models::{Announcement, Audience, FeedItem};
use crate::services::announcement_service::{self, CirkleView};
use crate::web::middleware::auth::AuthenticatedUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCirkleBody {
    name: String,
    #[serde(default)]
    member_uids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAnnouncementBody {
    text: String,
    audience: Audience,
}

pub async fn list_cirkles_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<CirkleView>>> {
    Ok(Json(
        announcement_service::list_cirkles(&pool, &auth_user.id).await?,
    ))
}

pub async fn create_cirkle_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
    Json(body): Json<CreateCirkleBody>,
) -> AppResult<Json<CirkleView>> {
    let cirkle =
        announcement_service::create_cirkle(&pool, &auth_user.id, &body.name, &body.member_uids)
            .await?;
    Ok(Json(cirkle))
}

pub async fn create_announcement_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
    Json(body): Json<CreateAnnouncementBody>,
) -> AppResult<Json<Announcement>> {
    let announcement = announcement_service::create_announcement(
        &pool,
        &auth_user.id,
        &body.text,
        &body.audience,
    )
    .await?;
    Ok(Json(announcement))
}

pub async fn feed_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<FeedItem>>> {
    Ok(Json(
        announcement_service::list_feed(&pool, &auth_user.id).await?,
    ))
}
