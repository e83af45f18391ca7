use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Product,
    Category,
    Collection,
    OptionSet,
    #[serde(rename = "option")]
    OptionValue,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Product => "product",
            NodeType::Category => "category",
            NodeType::Collection => "collection",
            NodeType::OptionSet => "optionset",
            NodeType::OptionValue => "option",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "product" => Some(NodeType::Product),
            "category" => Some(NodeType::Category),
            "collection" => Some(NodeType::Collection),
            "optionset" => Some(NodeType::OptionSet),
            "option" => Some(NodeType::OptionValue),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Catalog entity: products, categories, and option structures share one
/// tree-shaped table and differ only by `node_type` and payload shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    pub parent_id: Option<String>,
    pub node_type: NodeType,
    pub universal_code: Option<String>,
    pub title: String,
    pub payload: Option<Value>,
    pub embedding: Option<Vec<u8>>,
}

impl Node {
    pub fn new(node_type: NodeType, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            node_type,
            universal_code: None,
            title: title.into(),
            payload: None,
            embedding: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_universal_code(mut self, code: impl Into<String>) -> Self {
        self.universal_code = Some(code.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<u8>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}
