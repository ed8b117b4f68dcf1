use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use keyflow_core::config::ExecutorConfig;
use keyflow_core::error::{FlowError, Result};
use keyflow_core::event::{EventBus, FlowEvent};
use keyflow_core::traits::Processor;
use keyflow_core::types::{NodeId, Record};

use crate::node::Node;
use crate::run_log::RunLog;
use crate::store::DataStore;

/// Lifecycle of an executor. Exactly one terminal state is ever reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed(FlowError),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Runs a key-wired node graph.
///
/// Callers [`spawn`](Self::spawn) nodes, seed data with [`put`](Self::put),
/// call [`start`](Self::start) and then [`wait`](Self::wait). A background
/// task repeatedly picks ready nodes (earliest registered first), runs them
/// and stores their output, until no pending node is left or one fails.
///
/// Every write and every successful execution is appended to a [`RunLog`]
/// under the same lock that guards the store, so the log is a faithful
/// linearization of what the graph observed.
///
/// The handle is cheap to clone; all clones drive the same run.
#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

struct Shared {
    config: ExecutorConfig,
    state: Mutex<State>,
    /// Raised on every write, spawn and cancel so the loop rescans.
    wake: Notify,
    status_tx: watch::Sender<RunStatus>,
    cancel: CancellationToken,
    events: EventBus,
}

struct State {
    status: RunStatus,
    next_id: u64,
    /// Registration order is id order, which makes the pick deterministic.
    pending: BTreeMap<NodeId, Pending>,
    store: DataStore,
    log: RunLog,
}

struct Pending {
    node: Node,
    in_flight: bool,
}

/// Everything a spawned invocation needs, captured without holding the lock.
struct Job {
    id: NodeId,
    output: String,
    processor: Arc<dyn Processor>,
    inputs: Vec<Record>,
    timeout_ms: u64,
}

struct Finished {
    id: NodeId,
    result: Result<Vec<Record>>,
    elapsed_ms: u64,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        let (status_tx, _) = watch::channel(RunStatus::Idle);
        let events = EventBus::new(config.event_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State {
                    status: RunStatus::Idle,
                    next_id: 0,
                    pending: BTreeMap::new(),
                    store: DataStore::new(),
                    log: RunLog::new(),
                }),
                wake: Notify::new(),
                status_tx,
                cancel: CancellationToken::new(),
                events,
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    /// Register a node and return its freshly assigned id.
    ///
    /// Rejected once the run has finished, and when another pending node
    /// already writes the same output key.
    pub fn spawn(&self, node: Node) -> Result<NodeId> {
        let mut state = self.shared.lock();
        if state.status.is_terminal() {
            return Err(FlowError::Finished("spawn"));
        }
        if let Some((owner, _)) = state
            .pending
            .iter()
            .find(|(_, p)| p.node.output == node.output)
        {
            return Err(FlowError::DuplicateOutput {
                key: node.output.clone(),
                owner: *owner,
            });
        }

        let id = NodeId(state.next_id);
        state.next_id += 1;
        debug!(node_id = %id, inputs = ?node.inputs, output = %node.output, "Spawned node");
        state.pending.insert(
            id,
            Pending {
                node,
                in_flight: false,
            },
        );
        drop(state);

        self.shared.wake.notify_one();
        Ok(id)
    }

    /// Store `records` under `key`, replacing any previous value, and log the
    /// write.
    pub fn put(&self, key: impl Into<String>, records: Vec<Record>) -> Result<()> {
        let key = key.into();
        let mut state = self.shared.lock();
        if state.status.is_terminal() {
            return Err(FlowError::Finished("put"));
        }
        self.shared.write(&mut state, key, records);
        drop(state);

        self.shared.wake.notify_one();
        Ok(())
    }

    /// Write straight into the store without a log entry. Only replays with
    /// log recording turned off use this.
    pub(crate) fn restore_unlogged(&self, key: &str, records: Vec<Record>) {
        self.shared.lock().store.insert(key, records);
    }

    /// Current records under `key`, or `None` if it was never written.
    pub fn read(&self, key: &str) -> Option<Vec<Record>> {
        self.shared.lock().store.get(key).map(<[Record]>::to_vec)
    }

    /// Snapshot of the whole store.
    pub fn store(&self) -> DataStore {
        self.shared.lock().store.clone()
    }

    /// Snapshot of the run log so far.
    pub fn event_log(&self) -> RunLog {
        self.shared.lock().log.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.shared.lock().status.clone()
    }

    /// Nodes registered but not yet successfully executed.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Input keys that keep pending nodes from ever becoming ready.
    ///
    /// Reports the root keys: never written and not produced by any pending
    /// node. When the blockage is a dependency cycle, the keys of the cycle.
    pub fn unsatisfied_inputs(&self) -> Vec<String> {
        self.shared.lock().unsatisfied_inputs()
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.shared.events.subscribe()
    }

    /// Begin scheduling on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| FlowError::NoRuntime)?;
        {
            let mut state = self.shared.lock();
            if state.status != RunStatus::Idle {
                return Err(FlowError::AlreadyStarted);
            }
            state.status = RunStatus::Running;
            info!(
                pending = state.pending.len(),
                max_concurrent = self.shared.config.max_concurrent_nodes,
                "Executor started"
            );
        }
        self.shared.status_tx.send_replace(RunStatus::Running);
        self.shared.events.publish(FlowEvent::RunStarted);

        let shared = Arc::clone(&self.shared);
        runtime.spawn(async move {
            let status = shared.run_loop().await;
            shared.finish(status);
        });
        Ok(())
    }

    /// Ask the loop to stop. Takes effect between node completions; results
    /// of nodes still running are discarded, never logged.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
        self.shared.wake.notify_one();
    }

    /// Block until the run completes or fails. Any number of callers may
    /// wait; all observe the same outcome.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.shared.status_tx.subscribe();
        let status = rx
            .wait_for(RunStatus::is_terminal)
            .await
            .map_err(|_| FlowError::Cancelled)?;
        match &*status {
            RunStatus::Failed(e) => Err(e.clone()),
            _ => Ok(()),
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, state: &mut State, key: String, records: Vec<Record>) {
        debug!(key = %key, records = records.len(), "Data written");
        self.events.publish(FlowEvent::DataWritten {
            key: key.clone(),
            records: records.len(),
        });
        state.store.insert(key.clone(), records.clone());
        state.log.append_write(key, records);
    }

    /// Drive the graph until it reaches a terminal state. The returned
    /// status has already been committed to `State` under the lock.
    async fn run_loop(&self) -> RunStatus {
        let limit = self.config.max_concurrent_nodes.max(1);
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut last_progress = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                tasks.abort_all();
                return self.fail(FlowError::Cancelled);
            }

            for job in self.take_ready(limit - tasks.len()) {
                self.events.publish(FlowEvent::NodeStarted {
                    node: job.id,
                    output: job.output.clone(),
                });
                let span = tracing::info_span!("node", node_id = %job.id, output = %job.output);
                tasks.spawn(invoke(job).instrument(span));
            }

            if tasks.is_empty() {
                if self.lock().pending.is_empty() {
                    // Give late spawns a chance before declaring completion.
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        _ = self.wake.notified() => last_progress = Instant::now(),
                        _ = tokio::time::sleep(Duration::from_millis(self.config.settle_ms)) => {
                            if let Some(status) = self.try_complete() {
                                return status;
                            }
                        }
                    }
                    continue;
                }

                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = self.wake.notified() => last_progress = Instant::now(),
                    _ = self.stall_deadline(last_progress) => {
                        let missing = self.lock().unsatisfied_inputs();
                        warn!(missing = ?missing, "No node can make progress");
                        return self.fail(FlowError::Stalled {
                            missing,
                            idle_ms: self.config.stall_timeout_ms,
                        });
                    }
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {}
                joined = tasks.join_next() => {
                    last_progress = Instant::now();
                    let finished = match joined {
                        Some(Ok(finished)) => finished,
                        Some(Err(e)) => {
                            tasks.abort_all();
                            return self.fail(FlowError::processing(format!("node task aborted: {}", e)));
                        }
                        None => continue,
                    };
                    if let Err(status) = self.complete(finished) {
                        tasks.abort_all();
                        return status;
                    }
                }
                _ = self.wake.notified(), if tasks.len() < limit => {
                    last_progress = Instant::now();
                }
            }
        }
    }

    /// Claim up to `slots` ready nodes in registration order.
    fn take_ready(&self, slots: usize) -> Vec<Job> {
        let mut jobs = Vec::new();
        if slots == 0 {
            return jobs;
        }
        let mut guard = self.lock();
        let State { pending, store, .. } = &mut *guard;
        for (id, entry) in pending.iter_mut() {
            if jobs.len() == slots {
                break;
            }
            if entry.in_flight {
                continue;
            }
            let Some(inputs) = store.gather(&entry.node.inputs) else {
                continue;
            };
            entry.in_flight = true;
            info!(
                node_id = %id,
                node = %entry.node.label(),
                inputs = ?entry.node.inputs,
                output = %entry.node.output,
                "Running node"
            );
            jobs.push(Job {
                id: *id,
                output: entry.node.output.clone(),
                processor: Arc::clone(&entry.node.processor),
                inputs,
                timeout_ms: entry.node.timeout_ms.unwrap_or(self.config.node_timeout_ms),
            });
        }
        jobs
    }

    /// Record a finished invocation: run entry, removal from the pending
    /// set, then the output write. A failure is committed in the same
    /// critical section and ends the run.
    fn complete(&self, finished: Finished) -> std::result::Result<(), RunStatus> {
        let Finished {
            id,
            result,
            elapsed_ms,
        } = finished;
        let mut state = self.lock();
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                error!(node_id = %id, error = %e, "Node failed");
                state.status = RunStatus::Failed(e);
                return Err(state.status.clone());
            }
        };

        let Some(entry) = state.pending.remove(&id) else {
            warn!(node_id = %id, "Finished node is no longer pending, dropping output");
            return Ok(());
        };
        let node = entry.node;
        state.log.append_run(node.descriptor(id));
        self.events.publish(FlowEvent::NodeCompleted {
            node: id,
            output: node.output.clone(),
            records: records.len(),
            elapsed_ms,
        });
        debug!(node_id = %id, elapsed_ms, records = records.len(), "Node execution complete");
        self.write(&mut state, node.output, records);
        Ok(())
    }

    async fn stall_deadline(&self, since: Instant) {
        match self.config.stall_timeout_ms {
            0 => futures::future::pending().await,
            ms => tokio::time::sleep_until(since + Duration::from_millis(ms)).await,
        }
    }

    /// Mark the run complete if nothing is pending. The check and the
    /// transition share one lock, so no spawn can slip in between.
    fn try_complete(&self) -> Option<RunStatus> {
        let mut state = self.lock();
        if !state.pending.is_empty() {
            return None;
        }
        state.status = RunStatus::Completed;
        Some(RunStatus::Completed)
    }

    fn fail(&self, error: FlowError) -> RunStatus {
        let status = RunStatus::Failed(error);
        self.lock().status = status.clone();
        status
    }

    /// Announce a terminal status that `run_loop` already committed.
    fn finish(&self, status: RunStatus) {
        match &status {
            RunStatus::Failed(e) => {
                error!(error = %e, "Run failed");
                self.events.publish(FlowEvent::RunFailed {
                    error: e.to_string(),
                });
            }
            _ => {
                info!("Run completed");
                self.events.publish(FlowEvent::RunCompleted);
            }
        }
        self.status_tx.send_replace(status);
    }
}

impl State {
    fn unsatisfied_inputs(&self) -> Vec<String> {
        let mut available: HashSet<&str> = self.store.keys().into_iter().collect();
        let mut blocked: Vec<&Node> = self.pending.values().map(|p| &p.node).collect();

        // Grow the set of producible keys until it stops changing.
        loop {
            let before = blocked.len();
            blocked.retain(|node| {
                let ready = node.inputs.iter().all(|k| available.contains(k.as_str()));
                if ready {
                    available.insert(node.output.as_str());
                }
                !ready
            });
            if blocked.len() == before {
                break;
            }
        }

        let produced: HashSet<&str> = blocked.iter().map(|n| n.output.as_str()).collect();
        let missing: BTreeSet<&str> = blocked
            .iter()
            .flat_map(|node| node.inputs.iter())
            .map(String::as_str)
            .filter(|k| !available.contains(k))
            .collect();

        // Prefer root causes; inside a pure cycle every key is produced by a
        // blocked node, so report the cycle itself.
        let roots: Vec<String> = missing
            .iter()
            .filter(|k| !produced.contains(*k))
            .map(|k| k.to_string())
            .collect();
        if roots.is_empty() {
            missing.into_iter().map(str::to_string).collect()
        } else {
            roots
        }
    }
}

async fn invoke(job: Job) -> Finished {
    let start = Instant::now();
    let result = call_guarded(
        job.processor.as_ref(),
        job.inputs,
        job.id,
        &job.output,
        job.timeout_ms,
    )
    .await;
    Finished {
        id: job.id,
        result,
        elapsed_ms: start.elapsed().as_millis() as u64,
    }
}

/// Run one processor invocation with the executor's safety net: a timeout
/// when `timeout_ms > 0`, panics turned into `NodePanicked`, and processing
/// errors wrapped with the node's identity.
pub(crate) async fn call_guarded(
    processor: &dyn Processor,
    inputs: Vec<Record>,
    node: NodeId,
    output: &str,
    timeout_ms: u64,
) -> Result<Vec<Record>> {
    let call = AssertUnwindSafe(async move { processor.process(inputs).await }).catch_unwind();
    let outcome = if timeout_ms > 0 {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(FlowError::NodeTimeout {
                    node,
                    output: output.to_string(),
                    timeout_ms,
                })
            }
        }
    } else {
        call.await
    };

    match outcome {
        Ok(Ok(records)) => Ok(records),
        Ok(Err(e)) => Err(FlowError::NodeFailed {
            node,
            output: output.to_string(),
            source: Box::new(e),
        }),
        Err(_) => Err(FlowError::NodePanicked {
            node,
            output: output.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyflow_test_utils::{payloads, texts, Concat, Echo, Failing, Gauge, Journal, Panicking, Slow};

    fn fast() -> ExecutorConfig {
        ExecutorConfig::default()
            .with_settle_ms(10)
            .with_stall_timeout_ms(2_000)
    }

    #[test]
    fn test_spawn_assigns_increasing_ids() {
        let ex = Executor::new(fast());
        let a = ex.spawn(Node::new(vec!["x".into()], "y", Concat::new("a"))).unwrap();
        let b = ex.spawn(Node::new(vec!["y".into()], "z", Concat::new("b"))).unwrap();
        assert!(a < b);
        assert_eq!(ex.pending_count(), 2);
    }

    #[test]
    fn test_spawn_rejects_duplicate_pending_output() {
        let ex = Executor::new(fast());
        let owner = ex.spawn(Node::new(vec![], "y", Concat::new("a"))).unwrap();
        let err = ex.spawn(Node::new(vec![], "y", Concat::new("b"))).unwrap_err();
        assert_eq!(
            err,
            FlowError::DuplicateOutput {
                key: "y".into(),
                owner
            }
        );
    }

    #[test]
    fn test_put_and_read() {
        let ex = Executor::new(fast());
        ex.put("x", texts(&["r1"])).unwrap();
        assert_eq!(payloads(&ex.read("x").unwrap()), vec!["r1"]);
        assert!(ex.read("never").is_none());
        assert_eq!(ex.event_log().labels(), vec!["write(x)"]);
    }

    #[test]
    fn test_unsatisfied_inputs_follows_producers() {
        let ex = Executor::new(fast());
        ex.spawn(Node::new(vec!["x".into()], "y", Concat::new("a"))).unwrap();
        ex.spawn(Node::new(vec!["y".into(), "ghost".into()], "z", Concat::new("b")))
            .unwrap();
        assert_eq!(ex.unsatisfied_inputs(), vec!["ghost", "x"]);

        ex.put("x", vec![]).unwrap();
        assert_eq!(ex.unsatisfied_inputs(), vec!["ghost"]);
    }

    #[test]
    fn test_unsatisfied_inputs_reports_cycles() {
        let ex = Executor::new(fast());
        ex.spawn(Node::new(vec!["b".into()], "a", Concat::new("x"))).unwrap();
        ex.spawn(Node::new(vec!["a".into()], "b", Concat::new("y"))).unwrap();
        assert_eq!(ex.unsatisfied_inputs(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_chain_logs_run_then_write() {
        let ex = Executor::new(fast());
        ex.spawn(Node::new(vec!["x".into()], "y", Concat::new("A"))).unwrap();
        ex.spawn(Node::new(vec!["y".into()], "z", Concat::new("B"))).unwrap();
        ex.put("x", texts(&["r1"])).unwrap();
        ex.start().unwrap();
        ex.wait().await.unwrap();

        assert_eq!(payloads(&ex.read("z").unwrap()), vec!["B(A(r1))"]);
        assert_eq!(
            ex.event_log().labels(),
            vec!["write(x)", "run(#0)", "write(y)", "run(#1)", "write(z)"]
        );
        assert_eq!(ex.status(), RunStatus::Completed);
        assert_eq!(ex.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ready_ties_break_by_registration() {
        let journal = Journal::new();
        let ex = Executor::new(fast());
        ex.spawn(Node::new(vec!["seed".into()], "third", journal.tracked("c")))
            .unwrap();
        ex.spawn(Node::new(vec!["seed".into()], "first", journal.tracked("a")))
            .unwrap();
        ex.spawn(Node::new(vec!["seed".into()], "second", journal.tracked("b")))
            .unwrap();
        ex.put("seed", texts(&["s"])).unwrap();
        ex.start().unwrap();
        ex.wait().await.unwrap();

        assert_eq!(journal.calls(), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let ex = Executor::new(fast());
        ex.start().unwrap();
        assert_eq!(ex.start().unwrap_err(), FlowError::AlreadyStarted);
        ex.wait().await.unwrap();
        assert_eq!(ex.start().unwrap_err(), FlowError::AlreadyStarted);
    }

    #[tokio::test]
    async fn test_failure_stops_run_and_keeps_upstream() {
        let journal = Journal::new();
        let ex = Executor::new(fast());
        ex.spawn(Node::new(vec!["x".into()], "y", Concat::new("A"))).unwrap();
        let bad = ex
            .spawn(Node::new(vec!["y".into()], "z", Failing::new("boom")))
            .unwrap();
        ex.spawn(Node::new(vec!["y".into()], "w", journal.tracked("late")))
            .unwrap();
        ex.put("x", texts(&["r1"])).unwrap();
        ex.start().unwrap();

        let err = ex.wait().await.unwrap_err();
        match &err {
            FlowError::NodeFailed { node, output, source } => {
                assert_eq!(*node, bad);
                assert_eq!(output, "z");
                assert_eq!(**source, FlowError::processing("boom"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(journal.calls().is_empty());
        assert_eq!(payloads(&ex.read("y").unwrap()), vec!["A(r1)"]);
        assert!(ex.read("z").is_none());
        assert_eq!(ex.status(), RunStatus::Failed(err));
        assert_eq!(ex.put("x", vec![]).unwrap_err(), FlowError::Finished("put"));
        assert!(matches!(
            ex.spawn(Node::new(vec![], "q", Concat::new("q"))),
            Err(FlowError::Finished("spawn"))
        ));
    }

    #[tokio::test]
    async fn test_many_waiters_see_same_outcome() {
        let ex = Executor::new(fast());
        ex.spawn(Node::new(vec!["x".into()], "y", Failing::new("nope")))
            .unwrap();
        ex.put("x", vec![]).unwrap();

        let w1 = tokio::spawn({
            let ex = ex.clone();
            async move { ex.wait().await }
        });
        let w2 = tokio::spawn({
            let ex = ex.clone();
            async move { ex.wait().await }
        });
        ex.start().unwrap();

        let e1 = w1.await.unwrap().unwrap_err();
        let e2 = w2.await.unwrap().unwrap_err();
        assert_eq!(e1, e2);
        assert_eq!(e1.root_cause(), &FlowError::processing("nope"));
        // Waiting after the fact still reports the failure.
        assert_eq!(ex.wait().await.unwrap_err(), e1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_timeout_fails_run() {
        let ex = Executor::new(fast().with_node_timeout_ms(50));
        let id = ex
            .spawn(Node::new(vec![], "slow", Slow::new(500, Echo)))
            .unwrap();
        ex.start().unwrap();
        assert_eq!(
            ex.wait().await.unwrap_err(),
            FlowError::NodeTimeout {
                node: id,
                output: "slow".into(),
                timeout_ms: 50
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_node_timeout_overrides_config() {
        let ex = Executor::new(fast().with_node_timeout_ms(50));
        ex.spawn(Node::new(vec![], "slow", Slow::new(200, Echo)).with_timeout_ms(0))
            .unwrap();
        ex.start().unwrap();
        ex.wait().await.unwrap();
        assert!(ex.read("slow").is_some());
    }

    #[tokio::test]
    async fn test_panicking_node_fails_run() {
        let ex = Executor::new(fast());
        let id = ex.spawn(Node::new(vec![], "bad", Panicking)).unwrap();
        ex.start().unwrap();
        assert_eq!(
            ex.wait().await.unwrap_err(),
            FlowError::NodePanicked {
                node: id,
                output: "bad".into()
            }
        );
        assert!(ex.event_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_in_flight_node() {
        let ex = Executor::new(fast());
        ex.spawn(Node::new(vec!["x".into()], "y", Slow::new(1_000, Echo)))
            .unwrap();
        ex.put("x", texts(&["r"])).unwrap();
        ex.start().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        ex.cancel();
        assert_eq!(ex.wait().await.unwrap_err(), FlowError::Cancelled);
        assert!(ex.read("y").is_none());
        assert_eq!(ex.event_log().labels(), vec!["write(x)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_reports_missing_inputs() {
        let ex = Executor::new(fast().with_stall_timeout_ms(1_000));
        ex.spawn(Node::new(vec!["never".into()], "y", Echo)).unwrap();
        ex.start().unwrap();
        assert_eq!(
            ex.wait().await.unwrap_err(),
            FlowError::Stalled {
                missing: vec!["never".into()],
                idle_ms: 1_000
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_nodes_spawned_after_start_still_run() {
        let ex = Executor::new(fast().with_settle_ms(100));
        ex.start().unwrap();
        ex.spawn(Node::new(vec!["prompt".into()], "answer", Concat::new("gen")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        ex.put("prompt", texts(&["q"])).unwrap();
        ex.wait().await.unwrap();
        assert_eq!(payloads(&ex.read("answer").unwrap()), vec!["gen(q)"]);
    }

    #[tokio::test]
    async fn test_events_follow_execution() {
        let ex = Executor::new(fast());
        let mut rx = ex.subscribe();
        ex.spawn(Node::new(vec!["x".into()], "y", Echo)).unwrap();
        ex.put("x", texts(&["r"])).unwrap();
        ex.start().unwrap();
        ex.wait().await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                FlowEvent::RunStarted => "started",
                FlowEvent::NodeStarted { .. } => "node_started",
                FlowEvent::NodeCompleted { .. } => "node_completed",
                FlowEvent::DataWritten { .. } => "written",
                FlowEvent::RunCompleted => "completed",
                FlowEvent::RunFailed { .. } => "failed",
            });
        }
        assert_eq!(
            kinds,
            vec!["written", "started", "node_started", "node_completed", "written", "completed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let gauge = Gauge::new();
        let ex = Executor::new(fast().with_max_concurrent_nodes(3));
        for i in 0..6 {
            ex.spawn(Node::new(vec!["seed".into()], format!("out{}", i), gauge.hold(50)))
                .unwrap();
        }
        ex.put("seed", texts(&["s"])).unwrap();
        ex.start().unwrap();
        ex.wait().await.unwrap();

        assert_eq!(gauge.total(), 6);
        assert_eq!(gauge.peak(), 3);
        assert_eq!(ex.event_log().node_runs().count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_by_default() {
        let gauge = Gauge::new();
        let ex = Executor::new(fast());
        for i in 0..3 {
            ex.spawn(Node::new(vec![], format!("out{}", i), gauge.hold(10)))
                .unwrap();
        }
        ex.start().unwrap();
        ex.wait().await.unwrap();
        assert_eq!(gauge.peak(), 1);
    }

    #[test]
    fn test_start_without_runtime_is_rejected() {
        let ex = Executor::new(fast());
        assert_eq!(ex.start().unwrap_err(), FlowError::NoRuntime);
        assert_eq!(ex.status(), RunStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_at_drain_boundary_is_run_or_rejected() {
        for i in 0..40u64 {
            let ex = Executor::new(fast().with_settle_ms(1));
            ex.start().unwrap();
            std::thread::sleep(Duration::from_micros(i * 50));

            match ex.spawn(Node::new(vec![], "late", Echo)) {
                Ok(_) => {
                    ex.wait().await.unwrap();
                    assert!(ex.read("late").is_some(), "accepted node never ran (offset {})", i);
                }
                Err(e) => {
                    assert_eq!(e, FlowError::Finished("spawn"));
                    ex.wait().await.unwrap();
                }
            }
            assert_eq!(ex.status(), RunStatus::Completed);
            assert_eq!(ex.pending_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_status_is_terminal_before_completion_event() {
        let ex = Executor::new(fast());
        let mut rx = ex.subscribe();
        ex.start().unwrap();

        loop {
            match rx.recv().await.unwrap() {
                FlowEvent::RunCompleted => break,
                FlowEvent::RunFailed { error } => panic!("run failed: {}", error),
                _ => {}
            }
        }
        assert_eq!(ex.status(), RunStatus::Completed);
        assert_eq!(
            ex.put("x", vec![]).unwrap_err(),
            FlowError::Finished("put")
        );
    }

    #[tokio::test]
    async fn test_failure_is_committed_before_failure_event() {
        let ex = Executor::new(fast());
        let mut rx = ex.subscribe();
        ex.spawn(Node::new(vec![], "bad", Failing::new("boom"))).unwrap();
        ex.start().unwrap();

        loop {
            if let FlowEvent::RunFailed { .. } = rx.recv().await.unwrap() {
                break;
            }
        }
        assert!(matches!(ex.status(), RunStatus::Failed(_)));
        assert!(matches!(
            ex.spawn(Node::new(vec![], "later", Echo)),
            Err(FlowError::Finished("spawn"))
        ));
    }
}
