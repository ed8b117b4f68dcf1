use serde::Serialize;

use crate::types::NodeId;

/// Progress notifications published while a graph runs.
///
/// Purely observational: nothing a subscriber does feeds back into
/// scheduling.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    RunStarted,
    NodeStarted {
        node: NodeId,
        output: String,
    },
    NodeCompleted {
        node: NodeId,
        output: String,
        records: usize,
        elapsed_ms: u64,
    },
    DataWritten {
        key: String,
        records: usize,
    },
    RunCompleted,
    RunFailed {
        error: String,
    },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: FlowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
