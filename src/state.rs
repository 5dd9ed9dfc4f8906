use crate::control::PumpPhase;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::watch;

/// Outcome of one control cycle, kept for the health endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub timestamp: OffsetDateTime,
    pub raw_distance: Option<f64>,
    pub filtered_distance: Option<f64>,
    pub level: Option<u8>,
    pub phase: PumpPhase,
    pub sensor_fault: bool,
    pub settings_faults: usize,
    pub transitions: usize,
    pub status_published: bool,
}

/// Shared device tree addressed by `/`-separated key paths, plus the latest
/// cycle report. Every tree mutation bumps a revision on a watch channel.
#[derive(Debug)]
pub struct AppState {
    tree: Value,
    revision: u64,
    revision_tx: watch::Sender<u64>,
    last_cycle: Option<CycleReport>,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Child slot for `key`, turning `node` into an object first if needed.
fn child_slot<'a>(node: &'a mut Value, key: &str) -> &'a mut Value {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map.entry(key.to_string()).or_insert(Value::Null),
        other => other,
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::with_tree(Value::Object(Map::new()))
    }

    /// Start from a previously saved tree. Anything but an object starts empty.
    pub fn with_tree(tree: Value) -> Self {
        let tree = match tree {
            Value::Object(map) => Value::Object(map),
            _ => Value::Object(Map::new()),
        };
        let (revision_tx, _revision_rx) = watch::channel(0);
        Self {
            tree,
            revision: 0,
            revision_tx,
            last_cycle: None,
        }
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut node = &self.tree;
        for segment in segments(path) {
            node = node.as_object()?.get(segment)?;
        }
        Some(node)
    }

    /// Replace the value at `path`, creating parents. `null` removes the node.
    pub fn set(&mut self, path: &str, value: Value) {
        if value.is_null() {
            self.remove(path);
            return;
        }
        let mut node = &mut self.tree;
        for segment in segments(path) {
            node = child_slot(node, segment);
        }
        *node = value;
        self.bump();
    }

    pub fn merge(&mut self, path: &str, fields: Map<String, Value>) {
        for (key, value) in fields {
            self.set(&format!("{path}/{key}"), value);
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let parts: Vec<&str> = segments(path).collect();
        let Some((last, parents)) = parts.split_last() else {
            let removed = std::mem::replace(&mut self.tree, Value::Object(Map::new()));
            self.bump();
            return Some(removed);
        };
        let mut node = &mut self.tree;
        for segment in parents {
            node = node.as_object_mut()?.get_mut(*segment)?;
        }
        let removed = node.as_object_mut()?.remove(*last);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn subscribe_revision(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    pub fn last_cycle(&self) -> Option<&CycleReport> {
        self.last_cycle.as_ref()
    }

    pub fn set_last_cycle(&mut self, report: CycleReport) {
        self.last_cycle = Some(report);
    }

    fn bump(&mut self) {
        self.revision += 1;
        self.revision_tx.send_replace(self.revision);
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
