//! Dataflow execution engine: key-wired node graphs with a replayable run log.
//!
//! A graph is a set of `Node`s. Edges are implicit: a node lists the keys it
//! reads and the single key it writes, and becomes ready once every input
//! key has been written to the `DataStore`.
//!
//! The `Executor` runs ready nodes (earliest registered first) until none are
//! pending, recording every write and every execution in a `RunLog`. A
//! `ReplayExecutor` turns that log back into a store, optionally re-running
//! node logic to check it still produces what was recorded.

pub mod executor;
pub mod node;
pub mod replay;
pub mod run_log;
pub mod store;

pub use executor::{Executor, RunStatus};
pub use node::{Node, NodeDescriptor};
pub use replay::{Divergence, DivergenceKind, ReplayExecutor, ReplayReport};
pub use run_log::{RunLog, RunLogEntry};
pub use store::DataStore;
