use sqlx::SqlitePool;
use tracing::warn;

use super::error::{StoreError, StoreResult};
use super::{ensure_row_exists, parse_json_column};
use crate::models::{Node, NodeType};

pub struct NodeRepository {
    pool: SqlitePool,
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    parentid: Option<String>,
    nodetype: String,
    universalcode: Option<String>,
    title: String,
    payload: Option<String>,
    embedding: Option<Vec<u8>>,
}

/// Partial update: only supplied fields are written. Reparenting goes
/// through `move_under` so the pre-check always runs.
#[derive(Debug, Default, Clone)]
pub struct NodeUpdate {
    pub title: Option<String>,
    pub universal_code: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub embedding: Option<Vec<u8>>,
}

impl NodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, node: &Node) -> StoreResult<Node> {
        if let Some(parent) = &node.parent_id {
            ensure_row_exists(&self.pool, "nodes", parent).await?;
        }

        let payload = node
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO nodes (id, parentid, nodetype, universalcode, title, payload, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&node.id)
        .bind(&node.parent_id)
        .bind(node.node_type.as_str())
        .bind(&node.universal_code)
        .bind(&node.title)
        .bind(&payload)
        .bind(&node.embedding)
        .execute(&self.pool)
        .await?;

        self.require(&node.id).await
    }

    pub async fn get_by_id(&self, id: &str) -> StoreResult<Option<Node>> {
        let row: Option<NodeRow> = sqlx::query_as("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(hydrate_node))
    }

    pub async fn list_children(&self, parent_id: &str) -> StoreResult<Vec<Node>> {
        let rows: Vec<NodeRow> =
            sqlx::query_as("SELECT * FROM nodes WHERE parentid = ? ORDER BY title")
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(hydrate_node).collect())
    }

    pub async fn list_by_type(&self, node_type: NodeType) -> StoreResult<Vec<Node>> {
        let rows: Vec<NodeRow> =
            sqlx::query_as("SELECT * FROM nodes WHERE nodetype = ? ORDER BY title")
                .bind(node_type.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(hydrate_node).collect())
    }

    pub async fn update(&self, id: &str, update: &NodeUpdate) -> StoreResult<Node> {
        let payload = update
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE nodes
            SET title = COALESCE(?, title),
                universalcode = COALESCE(?, universalcode),
                payload = COALESCE(?, payload),
                embedding = COALESCE(?, embedding)
            WHERE id = ?
            "#,
        )
        .bind(&update.title)
        .bind(&update.universal_code)
        .bind(&payload)
        .bind(&update.embedding)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                table: "nodes".to_string(),
                id: id.to_string(),
            });
        }

        self.require(id).await
    }

    pub async fn move_under(&self, id: &str, new_parent_id: &str) -> StoreResult<Node> {
        ensure_row_exists(&self.pool, "nodes", new_parent_id).await?;

        let result = sqlx::query("UPDATE nodes SET parentid = ? WHERE id = ?")
            .bind(new_parent_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                table: "nodes".to_string(),
                id: id.to_string(),
            });
        }

        self.require(id).await
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn require(&self, id: &str) -> StoreResult<Node> {
        self.get_by_id(id).await?.ok_or_else(|| StoreError::RowNotFound {
            table: "nodes".to_string(),
            id: id.to_string(),
        })
    }
}

fn hydrate_node(row: NodeRow) -> Node {
    let node_type = NodeType::from_str_loose(&row.nodetype).unwrap_or_else(|| {
        warn!(id = %row.id, nodetype = %row.nodetype, "unknown node type, treating as product");
        NodeType::Product
    });

    Node {
        payload: parse_json_column("nodes", &row.id, "payload", row.payload),
        id: row.id,
        parent_id: row.parentid,
        node_type,
        universal_code: row.universalcode,
        title: row.title,
        embedding: row.embedding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_store;
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        repo: NodeRepository,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    async fn setup_repo() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = open_store(&temp_dir.path().join("test.db")).await.unwrap();
        TestContext {
            repo: NodeRepository::new(pool),
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_node() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        let node = Node::new(NodeType::Product, "Silver Bangle")
            .with_universal_code("890123456")
            .with_payload(json!({"image": "https://cdn.example.com/bangle.jpg"}));
        let created = repo.create(&node).await.unwrap();
        assert_eq!(created.title, "Silver Bangle");

        let fetched = repo.get_by_id(&node.id).await.unwrap().unwrap();
        assert_eq!(fetched.universal_code.as_deref(), Some("890123456"));
        assert_eq!(fetched.payload.unwrap()["image"], "https://cdn.example.com/bangle.jpg");
    }

    #[tokio::test]
    async fn test_create_with_missing_parent_fails_then_succeeds() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        let child = Node::new(NodeType::Product, "Ruby Ring")
            .with_id("n-ring")
            .with_parent("cat-rings");

        let err = repo.create(&child).await.unwrap_err();
        match err {
            StoreError::MissingReference { table, id } => {
                assert_eq!(table, "nodes");
                assert_eq!(id, "cat-rings");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The failed insert left nothing behind
        assert!(repo.get_by_id("n-ring").await.unwrap().is_none());

        let parent = Node::new(NodeType::Category, "Rings").with_id("cat-rings");
        repo.create(&parent).await.unwrap();

        let created = repo.create(&child).await.unwrap();
        assert_eq!(created.parent_id.as_deref(), Some("cat-rings"));
    }

    #[tokio::test]
    async fn test_list_children_and_by_type() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        let parent = Node::new(NodeType::Category, "Bangles").with_id("cat-bangles");
        repo.create(&parent).await.unwrap();
        repo.create(&Node::new(NodeType::Product, "Gold Bangle").with_parent("cat-bangles"))
            .await
            .unwrap();
        repo.create(&Node::new(NodeType::Product, "Silver Bangle").with_parent("cat-bangles"))
            .await
            .unwrap();

        let children = repo.list_children("cat-bangles").await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].title, "Gold Bangle");

        let products = repo.list_by_type(NodeType::Product).await.unwrap();
        assert_eq!(products.len(), 2);
        let categories = repo.list_by_type(NodeType::Category).await.unwrap();
        assert_eq!(categories.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_update_leaves_other_fields() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        let node = Node::new(NodeType::Product, "Plain Ring")
            .with_id("n1")
            .with_payload(json!({"karat": 22}));
        repo.create(&node).await.unwrap();

        let update = NodeUpdate {
            title: Some("Engraved Ring".to_string()),
            ..Default::default()
        };
        let updated = repo.update("n1", &update).await.unwrap();
        assert_eq!(updated.title, "Engraved Ring");
        assert_eq!(updated.payload.unwrap()["karat"], 22);
    }

    #[tokio::test]
    async fn test_move_under_checks_new_parent() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        repo.create(&Node::new(NodeType::Product, "Ring").with_id("n1"))
            .await
            .unwrap();

        let err = repo.move_under("n1", "cat-ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::MissingReference { .. }));

        repo.create(&Node::new(NodeType::Category, "Rings").with_id("cat-rings"))
            .await
            .unwrap();
        let moved = repo.move_under("n1", "cat-rings").await.unwrap();
        assert_eq!(moved.parent_id.as_deref(), Some("cat-rings"));
    }

    #[tokio::test]
    async fn test_delete_node() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        repo.create(&Node::new(NodeType::Product, "Ring").with_id("n1"))
            .await
            .unwrap();
        repo.delete("n1").await.unwrap();
        assert!(repo.get_by_id("n1").await.unwrap().is_none());
    }
}
