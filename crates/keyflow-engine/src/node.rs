use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use keyflow_core::error::Result;
use keyflow_core::traits::{from_fn, from_sync_fn, Processor};
use keyflow_core::types::{NodeId, Record};

/// A unit of computation in the graph.
///
/// Nodes are wired implicitly: a node consumes the keys listed in `inputs`
/// and becomes runnable once every one of them has been written. Its result
/// is stored under `output`, which may in turn unblock other nodes.
#[derive(Clone)]
pub struct Node {
    /// Optional human-readable name.
    pub name: Option<String>,
    /// Keys whose records are concatenated, in this order, as input.
    pub inputs: Vec<String>,
    /// Key the processing result is written to.
    pub output: String,
    /// Per-node timeout override in milliseconds (0 = unlimited).
    pub timeout_ms: Option<u64>,
    pub(crate) processor: Arc<dyn Processor>,
}

impl Node {
    /// Create a node from any [`Processor`].
    pub fn new<P: Processor>(inputs: Vec<String>, output: impl Into<String>, processor: P) -> Self {
        Self {
            name: None,
            inputs,
            output: output.into(),
            timeout_ms: None,
            processor: Arc::new(processor),
        }
    }

    /// Create a node from an async closure.
    pub fn from_fn<F, Fut>(inputs: Vec<String>, output: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Record>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Record>>> + Send + 'static,
    {
        Self::new(inputs, output, from_fn(f))
    }

    /// Create a node from a synchronous closure.
    pub fn from_sync_fn<F>(inputs: Vec<String>, output: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Record>) -> Result<Vec<Record>> + Send + Sync + 'static,
    {
        Self::new(inputs, output, from_sync_fn(f))
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Override the executor-wide timeout for this node.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// The processing function.
    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    /// Describe this node as registered under `id`.
    pub fn descriptor(&self, id: NodeId) -> NodeDescriptor {
        NodeDescriptor {
            id,
            name: self.name.clone(),
            inputs: self.inputs.clone(),
            output: self.output.clone(),
        }
    }

    /// Name if set, otherwise the output key.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.output)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

/// What the run log remembers about a node: its wiring, not its code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub inputs: Vec<String>,
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder() {
        let node = Node::from_sync_fn(vec!["topic".into()], "findings", |inputs| Ok(inputs))
            .with_name("research")
            .with_timeout_ms(500);

        assert_eq!(node.name.as_deref(), Some("research"));
        assert_eq!(node.inputs, vec!["topic"]);
        assert_eq!(node.output, "findings");
        assert_eq!(node.timeout_ms, Some(500));
        assert_eq!(node.label(), "research");
    }

    #[test]
    fn test_label_falls_back_to_output() {
        let node = Node::from_sync_fn(vec![], "summary", |_| Ok(vec![]));
        assert_eq!(node.label(), "summary");
    }

    #[test]
    fn test_descriptor_drops_processor() {
        let node = Node::from_sync_fn(vec!["a".into(), "b".into()], "c", |_| Ok(vec![]));
        let desc = node.descriptor(NodeId(9));
        assert_eq!(desc.id, NodeId(9));
        assert_eq!(desc.inputs, vec!["a", "b"]);
        assert_eq!(desc.output, "c");

        let json = serde_json::to_string(&desc).unwrap();
        assert!(!json.contains("name"));
    }

    #[tokio::test]
    async fn test_async_node_runs_processor() {
        let node = Node::from_fn(vec!["x".into()], "y", |inputs: Vec<Record>| async move {
            Ok(inputs.into_iter().rev().collect())
        });
        let out = node
            .processor()
            .process(vec![Record::text("1"), Record::text("2")])
            .await
            .unwrap();
        assert_eq!(out[0].as_text(), Some("2"));
    }

    #[test]
    fn test_debug_omits_processor() {
        let node = Node::from_sync_fn(vec![], "out", |_| Ok(vec![]));
        let dbg = format!("{:?}", node);
        assert!(dbg.contains("out"));
        assert!(!dbg.contains("processor"));
    }
}
