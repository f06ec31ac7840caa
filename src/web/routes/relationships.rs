use axum::{
    extract::{Path, State},
    Extension, Json,
};
use sqlx::SqlitePool;

use crate::error::AppResult;
use crate::services::relationship_service::{
    self, RelationshipAction, RelationshipOutcome, RelationshipView,
};
use crate::web::middleware::auth::AuthenticatedUser;

pub async fn list_relationships_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Vec<RelationshipView>>> {
    Ok(Json(
        relationship_service::list_relationships(&pool, &auth_user.id).await?,
    ))
}

pub async fn relationship_action_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(pool): State<SqlitePool>,
    Path((target_user_id, action)): Path<(String, String)>,
) -> AppResult<Json<RelationshipOutcome>> {
    let action: RelationshipAction = action.parse()?;
    let outcome =
        relationship_service::apply_action(&pool, &auth_user.id, &target_user_id, action).await?;
    Ok(Json(outcome))
}
