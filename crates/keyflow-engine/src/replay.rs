use std::collections::HashMap;

use tracing::{debug, info, warn};

use keyflow_core::config::{ExecutorConfig, ReplayConfig, ReplayMode};
use keyflow_core::error::{FlowError, Result};
use keyflow_core::types::{same_payloads, Record};

use crate::executor::{call_guarded, Executor};
use crate::node::{Node, NodeDescriptor};
use crate::run_log::{RunLog, RunLogEntry};
use crate::store::DataStore;

/// Why a re-executed node disagrees with the recorded run.
#[derive(Debug, Clone, PartialEq)]
pub enum DivergenceKind {
    /// The node produced different records than were recorded.
    Output {
        expected: Vec<Record>,
        actual: Vec<Record>,
    },
    /// The node failed, panicked or timed out where the recorded run
    /// succeeded.
    Failed(FlowError),
    /// An input the node declares had not been restored yet.
    MissingInput(String),
    /// The log holds no write of the node's output right after its run.
    MissingWrite,
}

/// A node whose current logic no longer matches the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    pub node: NodeDescriptor,
    pub kind: DivergenceKind,
}

/// What a replay did.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Data-write entries restored.
    pub writes_restored: usize,
    /// Node-run entries seen, in log order.
    pub node_runs: Vec<NodeDescriptor>,
    /// Verify mode: nodes whose re-execution disagreed.
    pub divergences: Vec<Divergence>,
    /// Verify mode: recorded nodes with no registered processor.
    pub unverified: Vec<NodeDescriptor>,
}

impl ReplayReport {
    /// True when nothing diverged.
    pub fn is_consistent(&self) -> bool {
        self.divergences.is_empty()
    }
}

/// Rebuilds the data state of a finished run from its [`RunLog`].
///
/// In [`ReplayMode::Restore`] only data-write entries matter: each is
/// re-applied in order, so every key ends with the value it held at the end
/// of the original run. Node-run entries are reported but nothing is
/// recomputed.
///
/// In [`ReplayMode::Verify`] the writes are restored the same way, and in
/// addition every recorded node whose output key has a
/// [`registered`](Self::register) processor is re-invoked on the restored
/// inputs and its result compared with the recorded write.
pub struct ReplayExecutor {
    log: RunLog,
    config: ReplayConfig,
    executor: Executor,
    processors: HashMap<String, Node>,
    started: bool,
}

impl ReplayExecutor {
    pub fn new(log: RunLog) -> Self {
        Self::with_config(log, ReplayConfig::default())
    }

    pub fn with_config(log: RunLog, config: ReplayConfig) -> Self {
        Self {
            log,
            config,
            executor: Executor::new(ExecutorConfig::default()),
            processors: HashMap::new(),
            started: false,
        }
    }

    /// Set the replay mode.
    pub fn with_mode(mut self, mode: ReplayMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Whether the replaying executor records its own run log.
    pub fn with_record_log(mut self, record: bool) -> Self {
        self.config.record_log = record;
        self
    }

    /// Provide the current logic for nodes writing `node.output`, used in
    /// verify mode.
    pub fn register(&mut self, node: Node) {
        self.processors.insert(node.output.clone(), node);
    }

    /// Walk the log and rebuild the store.
    pub async fn start(&mut self) -> Result<ReplayReport> {
        if self.started {
            return Err(FlowError::AlreadyStarted);
        }
        self.started = true;
        info!(entries = self.log.len(), mode = ?self.config.mode, "Replaying run log");

        let mut report = ReplayReport::default();
        let entries = self.log.entries();
        for (idx, entry) in entries.iter().enumerate() {
            match entry {
                RunLogEntry::NodeRun { node } => {
                    debug!(
                        node_id = %node.id,
                        inputs = ?node.inputs,
                        output = %node.output,
                        "Previously ran node"
                    );
                    report.node_runs.push(node.clone());
                    if self.config.mode == ReplayMode::Verify {
                        self.verify(node, entries.get(idx + 1), &mut report).await;
                    }
                }
                RunLogEntry::DataWrite { key, records } => {
                    debug!(key = %key, records = records.len(), "Restoring key");
                    self.restore(key, records.clone())?;
                    report.writes_restored += 1;
                }
            }
        }

        for d in &report.divergences {
            warn!(node_id = %d.node.id, output = %d.node.output, kind = ?d.kind, "Replay divergence");
        }
        info!(
            writes = report.writes_restored,
            node_runs = report.node_runs.len(),
            divergences = report.divergences.len(),
            "Replay finished"
        );
        Ok(report)
    }

    /// Current records under `key` in the rebuilt store.
    pub fn read(&self, key: &str) -> Option<Vec<Record>> {
        self.executor.read(key)
    }

    /// Snapshot of the rebuilt store.
    pub fn store(&self) -> DataStore {
        self.executor.store()
    }

    /// The replay's own run log (empty when recording is suppressed).
    pub fn event_log(&self) -> RunLog {
        self.executor.event_log()
    }

    fn restore(&self, key: &str, records: Vec<Record>) -> Result<()> {
        if self.config.record_log {
            self.executor.put(key, records)
        } else {
            self.executor.restore_unlogged(key, records);
            Ok(())
        }
    }

    async fn verify(
        &self,
        node: &NodeDescriptor,
        next: Option<&RunLogEntry>,
        report: &mut ReplayReport,
    ) {
        let Some(current) = self.processors.get(&node.output) else {
            report.unverified.push(node.clone());
            return;
        };
        let diverged = |kind| Divergence {
            node: node.clone(),
            kind,
        };

        let expected = match next {
            Some(RunLogEntry::DataWrite { key, records }) if *key == node.output => records,
            _ => {
                report.divergences.push(diverged(DivergenceKind::MissingWrite));
                return;
            }
        };

        let store = self.executor.store();
        if let Some(missing) = node.inputs.iter().find(|k| !store.contains_key(k)) {
            report
                .divergences
                .push(diverged(DivergenceKind::MissingInput(missing.clone())));
            return;
        }
        let inputs = store.gather(&node.inputs).unwrap_or_default();
        let timeout_ms = current.timeout_ms.unwrap_or(self.config.verify_timeout_ms);

        let outcome = call_guarded(
            current.processor().as_ref(),
            inputs,
            node.id,
            &node.output,
            timeout_ms,
        )
        .await;
        match outcome {
            Ok(actual) if same_payloads(expected, &actual) => {
                debug!(node_id = %node.id, "Node output verified");
            }
            Ok(actual) => report.divergences.push(diverged(DivergenceKind::Output {
                expected: expected.clone(),
                actual,
            })),
            Err(e) => report.divergences.push(diverged(DivergenceKind::Failed(e))),
        }
    }
}
