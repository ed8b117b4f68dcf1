use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of a data slot in the store.
pub type Key = String;

/// Handle assigned to a node when it is spawned.
///
/// Ids come from a counter owned by one executor, so ordering by id is
/// ordering by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque unit of payload data passed between nodes.
///
/// The engine moves records around but never looks inside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier of this record.
    pub id: String,
    /// Who produced the record (a node name, "user", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Arbitrary payload.
    pub content: serde_json::Value,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
}

impl Record {
    /// Create a record carrying `content`.
    pub fn new(content: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author: None,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a record whose payload is a plain string.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(serde_json::Value::String(text.into()))
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// The payload as a string, if it is one.
    pub fn as_text(&self) -> Option<&str> {
        self.content.as_str()
    }

    /// Whether two records carry the same payload, ignoring identity and
    /// creation time.
    pub fn same_payload(&self, other: &Record) -> bool {
        self.author == other.author && self.content == other.content
    }
}

/// Compare two record sequences by payload, element by element.
pub fn same_payloads(a: &[Record], b: &[Record]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_payload(y))
}
