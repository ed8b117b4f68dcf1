use serde::{Deserialize, Serialize};

use keyflow_core::types::Record;

use crate::node::NodeDescriptor;

/// One step of a run, as it happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunLogEntry {
    /// `records` became the value of `key`.
    DataWrite { key: String, records: Vec<Record> },
    /// A node ran successfully.
    NodeRun { node: NodeDescriptor },
}

impl RunLogEntry {
    pub fn is_write(&self) -> bool {
        matches!(self, Self::DataWrite { .. })
    }

    pub fn is_run(&self) -> bool {
        matches!(self, Self::NodeRun { .. })
    }

    /// Short label for logs and listings: `write(key)` or `run(#id)`.
    pub fn label(&self) -> String {
        match self {
            Self::DataWrite { key, .. } => format!("write({})", key),
            Self::NodeRun { node } => format!("run({})", node.id),
        }
    }
}

/// Append-only history of every write and node execution of one executor.
///
/// Entries are never mutated or removed once appended; the executor hands
/// out clones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunLog {
    entries: Vec<RunLogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append_write(&mut self, key: impl Into<String>, records: Vec<Record>) {
        self.entries.push(RunLogEntry::DataWrite {
            key: key.into(),
            records,
        });
    }

    pub(crate) fn append_run(&mut self, node: NodeDescriptor) {
        self.entries.push(RunLogEntry::NodeRun { node });
    }

    pub fn entries(&self) -> &[RunLogEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RunLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Node executions in the order they were recorded.
    pub fn node_runs(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.entries.iter().filter_map(|e| match e {
            RunLogEntry::NodeRun { node } => Some(node),
            RunLogEntry::DataWrite { .. } => None,
        })
    }

    /// Data writes in the order they were recorded.
    pub fn writes(&self) -> impl Iterator<Item = (&str, &[Record])> {
        self.entries.iter().filter_map(|e| match e {
            RunLogEntry::DataWrite { key, records } => Some((key.as_str(), records.as_slice())),
            RunLogEntry::NodeRun { .. } => None,
        })
    }

    /// Labels of all entries, e.g. `["write(x)", "run(#0)", "write(y)"]`.
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(RunLogEntry::label).collect()
    }
}

impl FromIterator<RunLogEntry> for RunLog {
    fn from_iter<I: IntoIterator<Item = RunLogEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RunLog {
    type Item = &'a RunLogEntry;
    type IntoIter = std::slice::Iter<'a, RunLogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyflow_core::types::NodeId;

    fn descriptor(id: u64, output: &str) -> NodeDescriptor {
        NodeDescriptor {
            id: NodeId(id),
            name: None,
            inputs: vec!["x".into()],
            output: output.into(),
        }
    }

    #[test]
    fn test_append_preserves_order() {
        let mut log = RunLog::new();
        log.append_write("x", vec![Record::text("r1")]);
        log.append_run(descriptor(0, "y"));
        log.append_write("y", vec![]);

        assert_eq!(log.len(), 3);
        assert_eq!(log.labels(), vec!["write(x)", "run(#0)", "write(y)"]);
        assert!(log.entries()[0].is_write());
        assert!(log.entries()[1].is_run());
    }

    #[test]
    fn test_filtered_views() {
        let mut log = RunLog::new();
        log.append_write("x", vec![Record::text("r1")]);
        log.append_run(descriptor(4, "y"));
        log.append_write("y", vec![Record::text("r2")]);

        let runs: Vec<_> = log.node_runs().map(|n| n.id).collect();
        assert_eq!(runs, vec![NodeId(4)]);

        let keys: Vec<_> = log.writes().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[test]
    fn test_jsonl_style_serialization() {
        let mut log = RunLog::new();
        log.append_run(descriptor(1, "y"));
        let json = serde_json::to_string(&log.entries()[0]).unwrap();
        assert!(json.contains("\"kind\":\"node_run\""));

        let parsed: RunLogEntry = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_run());
    }

    #[test]
    fn test_from_iterator() {
        let log: RunLog = vec![RunLogEntry::DataWrite {
            key: "seed".into(),
            records: vec![],
        }]
        .into_iter()
        .collect();
        assert_eq!(log.labels(), vec!["write(seed)"]);
        assert_eq!((&log).into_iter().count(), 1);
    }
}
