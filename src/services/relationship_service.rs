use std::collections::HashMap;
use std::str::FromStr;

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::info;

use crate::database::relationship_repo::{self, EdgeWrite};
use crate::models::{RelState, RelationshipRow};
use crate::services::chat_service::{self, ChatError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipAction {
    Request,
    Accept,
    Decline,
    Block,
    Unblock,
}

impl FromStr for RelationshipAction {
    type Err = RelationshipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "request" => Ok(Self::Request),
            "accept" => Ok(Self::Accept),
            "decline" => Ok(Self::Decline),
            "block" => Ok(Self::Block),
            "unblock" => Ok(Self::Unblock),
            other => Err(RelationshipError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum RelationshipError {
    #[error("cannot target yourself")]
    SelfTarget,
    #[error("invalid action {0:?}")]
    UnknownAction(String),
    #[error("no relationship with this user")]
    NoRelationship,
    #[error("relationship is not pending")]
    NotPending,
    #[error("action not allowed for this user")]
    NotAllowed,
    #[error("relationship is blocked")]
    Blocked,
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipOutcome {
    /// State after the action, `None` once the edge is gone.
    pub state: Option<RelState>,
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipView {
    pub other_uid: String,
    pub status: RelState,
    pub requested_by_me: bool,
    pub blocked_by_me: bool,
    pub updated_at: String,
}

pub async fn apply_action(
    pool: &SqlitePool,
    actor: &str,
    target: &str,
    action: RelationshipAction,
) -> Result<RelationshipOutcome, RelationshipError> {
    let target = target.trim();
    if target.is_empty() || target == actor {
        return Err(RelationshipError::SelfTarget);
    }

    // Read and write under one transaction so crossing requests serialize.
    let mut tx = pool.begin().await?;
    let edge = relationship_repo::get_edge_conn(&mut tx, actor, target).await?;
    let state = edge.as_ref().and_then(RelationshipRow::state);
    let requested_by_actor = edge
        .as_ref()
        .is_some_and(|e| e.requested_by.as_deref() == Some(actor));

    let (next, open_chat) = match action {
        RelationshipAction::Request => match state {
            None => {
                write_edge(&mut tx, actor, target, RelState::Pending, Some(actor), None).await?;
                (Some(RelState::Pending), false)
            }
            Some(RelState::Pending) if requested_by_actor => (state, false),
            // They asked first: requesting back is agreeing.
            Some(RelState::Pending) => {
                accept_edge(&mut tx, actor, target, edge.as_ref()).await?;
                (Some(RelState::Accepted), true)
            }
            Some(RelState::Accepted) => (state, false),
            Some(RelState::Blocked) => return Err(RelationshipError::Blocked),
        },
        RelationshipAction::Accept => match state {
            None => return Err(RelationshipError::NoRelationship),
            Some(RelState::Pending) if requested_by_actor => {
                return Err(RelationshipError::NotAllowed)
            }
            Some(RelState::Pending) => {
                accept_edge(&mut tx, actor, target, edge.as_ref()).await?;
                (Some(RelState::Accepted), true)
            }
            Some(RelState::Blocked) => return Err(RelationshipError::Blocked),
            Some(RelState::Accepted) => return Err(RelationshipError::NotPending),
        },
        RelationshipAction::Decline => match state {
            None => return Err(RelationshipError::NoRelationship),
            Some(RelState::Pending) if requested_by_actor => {
                return Err(RelationshipError::NotAllowed)
            }
            Some(RelState::Pending) => {
                relationship_repo::delete_edge(&mut tx, actor, target).await?;
                (None, false)
            }
            Some(_) => return Err(RelationshipError::NotPending),
        },
        RelationshipAction::Block => match state {
            // An existing block stays owned by whoever placed it.
            Some(RelState::Blocked) => (state, false),
            _ => {
                write_edge(&mut tx, actor, target, RelState::Blocked, None, Some(actor)).await?;
                (Some(RelState::Blocked), false)
            }
        },
        RelationshipAction::Unblock => match edge.as_ref() {
            None => return Err(RelationshipError::NoRelationship),
            Some(e) if e.state() == Some(RelState::Blocked) => {
                if e.blocked_by.as_deref() != Some(actor) {
                    return Err(RelationshipError::NotAllowed);
                }
                relationship_repo::delete_edge(&mut tx, actor, target).await?;
                (None, false)
            }
            Some(_) => return Err(RelationshipError::NotAllowed),
        },
    };
    tx.commit().await?;

    let chat_id = if open_chat {
        Some(chat_service::ensure_direct_chat(pool, actor, target).await?)
    } else {
        None
    };

    info!(actor, target, ?action, state = ?next, "🤝 Relationship updated");
    Ok(RelationshipOutcome {
        state: next,
        chat_id,
    })
}

async fn accept_edge(
    conn: &mut SqliteConnection,
    actor: &str,
    target: &str,
    edge: Option<&RelationshipRow>,
) -> sqlx::Result<()> {
    let requested_by = edge.and_then(|e| e.requested_by.as_deref());
    write_edge(conn, actor, target, RelState::Accepted, requested_by, None).await
}

async fn write_edge(
    conn: &mut SqliteConnection,
    x: &str,
    y: &str,
    status: RelState,
    requested_by: Option<&str>,
    blocked_by: Option<&str>,
) -> sqlx::Result<()> {
    relationship_repo::upsert_edge(
        conn,
        EdgeWrite {
            x,
            y,
            status: status.as_str(),
            requested_by,
            blocked_by,
        },
    )
    .await
}

pub async fn get_relationship_state(
    pool: &SqlitePool,
    viewer: &str,
    peer: &str,
) -> sqlx::Result<Option<RelState>> {
    Ok(relationship_repo::get_edge(pool, viewer, peer)
        .await?
        .and_then(|e| e.state()))
}

/// Every peer the viewer has an edge with, keyed by peer uid.
pub async fn relationship_states(
    pool: &SqlitePool,
    viewer: &str,
) -> sqlx::Result<HashMap<String, RelState>> {
    let edges = relationship_repo::list_edges_for(pool, viewer).await?;
    Ok(edges
        .iter()
        .filter_map(|e| Some((e.other(viewer).to_string(), e.state()?)))
        .collect())
}

pub async fn list_relationships(
    pool: &SqlitePool,
    viewer: &str,
) -> sqlx::Result<Vec<RelationshipView>> {
    let edges = relationship_repo::list_edges_for(pool, viewer).await?;
    Ok(edges
        .iter()
        .filter_map(|e| {
            Some(RelationshipView {
                other_uid: e.other(viewer).to_string(),
                status: e.state()?,
                requested_by_me: e.requested_by.as_deref() == Some(viewer),
                blocked_by_me: e.blocked_by.as_deref() == Some(viewer),
                updated_at: e.updated_at.clone(),
            })
        })
        .collect())
}
