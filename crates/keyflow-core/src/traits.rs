use std::future::Future;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::Record;

/// Processing function of a node.
///
/// Receives the concatenated records of the node's inputs and returns the
/// records to store under its output key. Implementations may reach out to
/// remote services but never see the store or the run log.
pub trait Processor: Send + Sync + 'static {
    /// Run the node's logic over its inputs.
    fn process(&self, inputs: Vec<Record>) -> BoxFuture<'_, Result<Vec<Record>>>;
}

/// Adapter turning an async closure into a [`Processor`].
pub struct FnProcessor<F>(F);

impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Vec<Record>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Record>>> + Send + 'static,
{
    fn process(&self, inputs: Vec<Record>) -> BoxFuture<'_, Result<Vec<Record>>> {
        Box::pin((self.0)(inputs))
    }
}

/// Adapter turning a blocking-free synchronous closure into a [`Processor`].
pub struct SyncFnProcessor<F>(F);

impl<F> Processor for SyncFnProcessor<F>
where
    F: Fn(Vec<Record>) -> Result<Vec<Record>> + Send + Sync + 'static,
{
    fn process(&self, inputs: Vec<Record>) -> BoxFuture<'_, Result<Vec<Record>>> {
        let result = (self.0)(inputs);
        Box::pin(futures::future::ready(result))
    }
}

/// Wrap an async closure.
pub fn from_fn<F, Fut>(f: F) -> FnProcessor<F>
where
    F: Fn(Vec<Record>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Record>>> + Send + 'static,
{
    FnProcessor(f)
}

/// Wrap a synchronous closure.
pub fn from_sync_fn<F>(f: F) -> SyncFnProcessor<F>
where
    F: Fn(Vec<Record>) -> Result<Vec<Record>> + Send + Sync + 'static,
{
    SyncFnProcessor(f)
}
