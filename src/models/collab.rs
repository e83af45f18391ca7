use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Cross-actor sharing grant: `actor_id` gets `role` on the target entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collab {
    pub id: String,
    pub actor_id: String,
    pub target_type: String,
    pub target_id: String,
    pub role: String,
    pub permissions: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Collab {
    pub fn new(
        actor_id: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            actor_id: actor_id.into(),
            target_type: target_type.into(),
            target_id: target_id.into(),
            role: role.into(),
            permissions: None,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_permissions(mut self, permissions: Value) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_collab_new() {
        let grant = Collab::new("u2", "node", "n1", "editor");
        assert_eq!(grant.actor_id, "u2");
        assert_eq!(grant.target_type, "node");
        assert!(grant.expires_at.is_none());
        assert!(!grant.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_collab_expiry() {
        let now = Utc::now();
        let grant = Collab::new("u2", "stream", "order-1", "viewer")
            .with_expiry(now - Duration::minutes(1));
        assert!(grant.is_expired_at(now));

        let open = Collab::new("u2", "stream", "order-1", "viewer")
            .with_expiry(now + Duration::minutes(1));
        assert!(!open.is_expired_at(now));
    }
}
