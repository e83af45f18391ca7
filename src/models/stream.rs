use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stream {
    pub id: String,
    pub scope: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Stream {
    pub fn new(
        id: impl Into<String>,
        scope: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            scope: scope.into(),
            created_by: created_by.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamRole {
    Owner,
    Participant,
}

impl StreamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamRole::Owner => "owner",
            StreamRole::Participant => "participant",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "owner" => Some(StreamRole::Owner),
            "participant" => Some(StreamRole::Participant),
            _ => None,
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamCollab {
    pub stream_id: String,
    pub actor_id: String,
    pub role: StreamRole,
    pub joined_at: DateTime<Utc>,
}
