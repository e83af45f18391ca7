use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    User,
    Business,
    Staff,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Business => "business",
            ActorType::Staff => "staff",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(ActorType::User),
            "business" => Some(ActorType::Business),
            "staff" => Some(ActorType::Staff),
            _ => None,
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub id: String,
    pub parent_id: Option<String>,
    pub actor_type: ActorType,
    pub global_code: String,
    pub name: String,
    pub metadata: Option<Value>,
    pub vector: Option<Vec<u8>>,
}

impl Actor {
    pub fn new(
        id: impl Into<String>,
        actor_type: ActorType,
        global_code: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            actor_type,
            global_code: global_code.into(),
            name: name.into(),
            metadata: None,
            vector: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_vector(mut self, vector: Vec<u8>) -> Self {
        self.vector = Some(vector);
        self
    }
}
