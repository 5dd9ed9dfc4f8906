//! Outbound telemetry queue.
//!
//! The control loop never writes to the store directly. It enqueues writes on
//! a bounded channel and a writer task applies them, so a slow store cannot
//! delay the next sampling cycle. A full or closed queue drops the write.

use crate::error::AppError;
use crate::store::KeyValueStore;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// Replace the value at the path.
    Set,
    /// Merge the object's fields into the path, leaving other children untouched.
    Merge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryWrite {
    pub path: String,
    pub value: Value,
    pub op: WriteOp,
}

impl TelemetryWrite {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
            op: WriteOp::Set,
        }
    }

    pub fn merge(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
            op: WriteOp::Merge,
        }
    }

    pub fn set_serialized<T: Serialize>(path: impl Into<String>, value: &T) -> Result<Self, AppError> {
        let value =
            serde_json::to_value(value).map_err(|err| AppError::TelemetryWrite(err.to_string()))?;
        Ok(Self::set(path, value))
    }
}

pub trait TelemetrySink {
    /// Hand a write over without waiting for it to be applied. Returns `false`
    /// when the write was dropped.
    fn submit(&self, write: TelemetryWrite) -> bool;
}

#[derive(Debug, Clone)]
pub struct TelemetryQueue {
    tx: mpsc::Sender<TelemetryWrite>,
}

pub fn telemetry_channel(capacity: usize) -> (TelemetryQueue, mpsc::Receiver<TelemetryWrite>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TelemetryQueue { tx }, rx)
}

impl TelemetrySink for TelemetryQueue {
    fn submit(&self, write: TelemetryWrite) -> bool {
        let (write, err) = match self.tx.try_send(write) {
            Ok(()) => return true,
            Err(TrySendError::Full(write)) => (write, "queue full"),
            Err(TrySendError::Closed(write)) => (write, "writer stopped"),
        };
        let err = AppError::TelemetryWrite(err.to_string());
        warn!(path = %write.path, error = %err, "Dropping telemetry write");
        false
    }
}

/// Apply queued writes to the store until every queue handle is dropped.
pub async fn run_telemetry_writer<K>(mut rx: mpsc::Receiver<TelemetryWrite>, store: K)
where
    K: KeyValueStore,
{
    while let Some(write) = rx.recv().await {
        if let Err(err) = apply_write(&store, write.clone()) {
            warn!(path = %write.path, error = %err, "Telemetry write rejected");
        }
    }
    debug!("Telemetry queue closed, writer exiting");
}

pub fn apply_write<K: KeyValueStore + ?Sized>(
    store: &K,
    write: TelemetryWrite,
) -> Result<(), AppError> {
    match write.op {
        WriteOp::Set => store.set(&write.path, write.value),
        WriteOp::Merge => match write.value {
            Value::Object(fields) => store.merge(&write.path, fields),
            other => store.set(&write.path, other),
        },
    }
}

/// Sink that keeps every write in memory; clones share the log.
#[derive(Debug, Clone)]
pub struct MemorySink {
    writes: Arc<Mutex<Vec<TelemetryWrite>>>,
    accepting: Arc<AtomicBool>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self {
            writes: Arc::new(Mutex::new(Vec::new())),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// While `false`, writes are dropped the way a full queue drops them.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Relaxed);
    }

    pub fn writes(&self) -> Vec<TelemetryWrite> {
        self.writes
            .lock()
            .map(|writes| writes.clone())
            .unwrap_or_default()
    }

    pub fn writes_under(&self, prefix: &str) -> Vec<TelemetryWrite> {
        self.writes()
            .into_iter()
            .filter(|write| write.path.starts_with(prefix))
            .collect()
    }
}

impl TelemetrySink for MemorySink {
    fn submit(&self, write: TelemetryWrite) -> bool {
        if !self.accepting.load(Ordering::Relaxed) {
            return false;
        }
        match self.writes.lock() {
            Ok(mut writes) => {
                writes.push(write);
                true
            }
            Err(_) => false,
        }
    }
}
