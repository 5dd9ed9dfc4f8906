//! The device key-value tree and the paths the engine reads and writes.

use crate::bus::telemetry::{TelemetryWrite, apply_write};
use crate::error::AppError;
use crate::events::{KeyGenerator, Notification, NotificationKind};
use crate::state::AppState;
use crate::status::StatusUpdate;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;
use tracing::info;

pub mod paths;
pub mod settings;
pub mod snapshot;

pub use settings::DeviceSettings;

pub trait KeyValueStore {
    fn get(&self, path: &str) -> Result<Option<Value>, AppError>;
    fn set(&self, path: &str, value: Value) -> Result<(), AppError>;
    /// Write each field under `path`, leaving siblings untouched.
    fn merge(&self, path: &str, fields: Map<String, Value>) -> Result<(), AppError>;
}

impl KeyValueStore for Arc<RwLock<AppState>> {
    fn get(&self, path: &str) -> Result<Option<Value>, AppError> {
        let guard = self.read().map_err(|_| AppError::StateLock)?;
        Ok(guard.get(path).cloned())
    }

    fn set(&self, path: &str, value: Value) -> Result<(), AppError> {
        let mut guard = self.write().map_err(|_| AppError::StateLock)?;
        guard.set(path, value);
        Ok(())
    }

    fn merge(&self, path: &str, fields: Map<String, Value>) -> Result<(), AppError> {
        let mut guard = self.write().map_err(|_| AppError::StateLock)?;
        guard.merge(path, fields);
        Ok(())
    }
}

/// Remote manual command. `Ok(None)` when the path holds nothing yet.
pub fn read_command<K: KeyValueStore + ?Sized>(
    store: &K,
    device: &str,
) -> Result<Option<bool>, AppError> {
    let path = paths::command(device);
    match store.get(&path)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(on)) => Ok(Some(on)),
        Some(other) => Err(AppError::ConfigRead {
            path,
            reason: format!("expected a boolean, got {other}"),
        }),
    }
}

/// Populate the nodes a fresh device needs. Existing nodes are left alone.
/// Returns `true` when anything was written.
pub fn seed_device<K: KeyValueStore + ?Sized>(
    store: &K,
    device: &str,
    defaults: &DeviceSettings,
    now: OffsetDateTime,
) -> Result<bool, AppError> {
    let mut writes = Vec::new();

    if store.get(&paths::settings(device))?.is_none() {
        writes.push(TelemetryWrite::set(paths::settings(device), defaults.to_value()));
    }
    if store.get(&paths::status(device))?.is_none() {
        let status = StatusUpdate {
            is_pump_on: false,
            water_level: 0,
            last_updated: now,
        };
        writes.push(TelemetryWrite::set_serialized(paths::status(device), &status)?);
    }
    if store.get(&paths::command(device))?.is_none() {
        writes.push(TelemetryWrite::set(paths::command(device), Value::Bool(false)));
    }
    if store.get(&paths::notifications(device))?.is_none() {
        let mut keys = KeyGenerator::new("ntf");
        let ready = Notification::new(
            keys.next(now),
            "System ready",
            "Water level monitoring has started".to_string(),
            now,
            NotificationKind::Info,
            None,
        );
        writes.push(TelemetryWrite::set_serialized(
            paths::notification(device, &ready.id),
            &ready,
        )?);
    }

    let seeded = !writes.is_empty();
    for write in writes {
        apply_write(store, write)?;
    }
    if seeded {
        info!(device, "Seeded default device nodes");
    }
    Ok(seeded)
}
