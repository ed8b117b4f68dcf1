//! Shared fixtures for keyflow tests: record helpers and canned processors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use keyflow_core::error::{FlowError, Result};
use keyflow_core::traits::Processor;
use keyflow_core::types::Record;

/// A text record.
pub fn text(s: &str) -> Record {
    Record::text(s)
}

/// One text record per string.
pub fn texts(values: &[&str]) -> Vec<Record> {
    values.iter().map(|s| Record::text(*s)).collect()
}

/// The string payloads of `records` (non-strings render as JSON).
pub fn payloads(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| match r.as_text() {
            Some(s) => s.to_string(),
            None => r.content.to_string(),
        })
        .collect()
}

/// Returns its inputs unchanged.
pub struct Echo;

impl Processor for Echo {
    fn process(&self, inputs: Vec<Record>) -> BoxFuture<'_, Result<Vec<Record>>> {
        Box::pin(async move { Ok(inputs) })
    }
}

/// Emits a single record `tag(in1+in2+...)`, making the data path visible
/// in assertions.
pub struct Concat {
    pub tag: String,
}

impl Concat {
    pub fn new(tag: &str) -> Self {
        Self { tag: tag.to_string() }
    }
}

impl Processor for Concat {
    fn process(&self, inputs: Vec<Record>) -> BoxFuture<'_, Result<Vec<Record>>> {
        Box::pin(async move {
            let joined = payloads(&inputs).join("+");
            Ok(vec![Record::text(format!("{}({})", self.tag, joined))])
        })
    }
}

/// Always fails with a processing error carrying `message`.
pub struct Failing {
    pub message: String,
}

impl Failing {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl Processor for Failing {
    fn process(&self, _inputs: Vec<Record>) -> BoxFuture<'_, Result<Vec<Record>>> {
        Box::pin(async move { Err(FlowError::processing(self.message.clone())) })
    }
}

/// Panics when invoked.
pub struct Panicking;

impl Processor for Panicking {
    fn process(&self, inputs: Vec<Record>) -> BoxFuture<'_, Result<Vec<Record>>> {
        Box::pin(explode(inputs))
    }
}

async fn explode(_inputs: Vec<Record>) -> Result<Vec<Record>> {
    panic!("processor panicked on purpose")
}

/// Sleeps before delegating to another processor.
pub struct Slow<P> {
    pub delay: Duration,
    pub inner: P,
}

impl<P: Processor> Slow<P> {
    pub fn new(delay_ms: u64, inner: P) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            inner,
        }
    }
}

impl<P: Processor> Processor for Slow<P> {
    fn process(&self, inputs: Vec<Record>) -> BoxFuture<'_, Result<Vec<Record>>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.process(inputs).await
        })
    }
}

/// Shared journal of processor invocations, in call order.
#[derive(Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// A processor that records `tag` in this journal, then behaves like
    /// [`Concat`].
    pub fn tracked(&self, tag: &str) -> Tracked {
        Tracked {
            journal: self.clone(),
            inner: Concat::new(tag),
        }
    }
}

/// See [`Journal::tracked`].
pub struct Tracked {
    journal: Journal,
    inner: Concat,
}

impl Processor for Tracked {
    fn process(&self, inputs: Vec<Record>) -> BoxFuture<'_, Result<Vec<Record>>> {
        self.journal.push(self.inner.tag.clone());
        self.inner.process(inputs)
    }
}

/// Counts invocations and tracks the peak number of overlapping calls.
#[derive(Clone, Default)]
pub struct Gauge {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// A processor that holds a slot for `delay_ms`, then echoes its inputs.
    pub fn hold(&self, delay_ms: u64) -> Held {
        Held {
            gauge: self.clone(),
            delay: Duration::from_millis(delay_ms),
        }
    }
}

/// See [`Gauge::hold`].
pub struct Held {
    gauge: Gauge,
    delay: Duration,
}

impl Processor for Held {
    fn process(&self, inputs: Vec<Record>) -> BoxFuture<'_, Result<Vec<Record>>> {
        Box::pin(async move {
            let now = self.gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(now, Ordering::SeqCst);
            self.gauge.total.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.gauge.active.fetch_sub(1, Ordering::SeqCst);
            Ok(inputs)
        })
    }
}

/// A config file exercising every section.
pub fn sample_config_toml() -> &'static str {
    r#"
[executor]
max_concurrent_nodes = 4
node_timeout_ms = 2500
stall_timeout_ms = 10000
settle_ms = 20
event_capacity = 64

[replay]
mode = "verify"
record_log = false
"#
}
