use serde::{Deserialize, Serialize};

// Edge between two users; `user_a < user_b` always holds in storage.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RelationshipRow {
    pub user_a: String,
    pub user_b: String,
    pub status: String,
    pub requested_by: Option<String>,
    pub blocked_by: Option<String>,
    pub updated_at: String,
}

impl RelationshipRow {
    pub fn other(&self, me: &str) -> &str {
        if self.user_a == me {
            &self.user_b
        } else {
            &self.user_a
        }
    }

    pub fn state(&self) -> Option<RelState> {
        RelState::parse(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelState {
    Pending,
    Accepted,
    Blocked,
}

impl RelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelState::Pending => "pending",
            RelState::Accepted => "accepted",
            RelState::Blocked => "blocked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pending" => Some(RelState::Pending),
            "accepted" => Some(RelState::Accepted),
            "blocked" => Some(RelState::Blocked),
            _ => None,
        }
    }
}

/// Stored pair order for an unordered edge.
pub fn edge_key<'a>(x: &'a str, y: &'a str) -> (&'a str, &'a str) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}
