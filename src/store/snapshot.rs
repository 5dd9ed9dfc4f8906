//! On-disk copy of the device tree, so events, notifications and settings
//! edits survive a restart.

use crate::error::AppError;
use crate::state::AppState;
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

fn snapshot_error(path: &Path, reason: impl ToString) -> AppError {
    AppError::Snapshot {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Read a saved tree. `Ok(None)` when no snapshot exists yet.
pub fn load_tree(path: &Path) -> Result<Option<Value>, AppError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(snapshot_error(path, err)),
    };
    let tree = serde_json::from_reader(BufReader::new(file)).map_err(|err| snapshot_error(path, err))?;
    Ok(Some(tree))
}

/// Write `tree` next to `path` and rename it into place, so a crash mid-write
/// leaves the previous snapshot intact.
pub fn save_tree(path: &Path, tree: &Value) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| snapshot_error(parent, err))?;
    }
    let staging = path.with_extension("tmp");
    let file = File::create(&staging).map_err(|err| snapshot_error(&staging, err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, tree).map_err(|err| snapshot_error(&staging, err))?;
    writer.flush().map_err(|err| snapshot_error(&staging, err))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|err| snapshot_error(&staging, err))?;
    std::fs::rename(&staging, path).map_err(|err| snapshot_error(path, err))
}

/// Save the current tree and return the revision it was taken at.
pub fn save_state(state: &Arc<RwLock<AppState>>, path: &Path) -> Result<u64, AppError> {
    let (tree, revision) = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        (guard.tree().clone(), guard.revision())
    };
    save_tree(path, &tree)?;
    Ok(revision)
}

/// Build the shared state from the snapshot at `path`, or empty when there is none.
pub fn restore_state(path: &Path) -> Result<AppState, AppError> {
    match load_tree(path)? {
        Some(tree) => {
            info!(path = %path.display(), "Store restored from snapshot");
            Ok(AppState::with_tree(tree))
        }
        None => {
            info!(path = %path.display(), "No store snapshot, starting empty");
            Ok(AppState::new())
        }
    }
}

/// Save the tree once at start, then after every revision bump until the state
/// is dropped. Bumps that land while a save runs are folded into the next one.
pub async fn run_snapshot_writer(state: Arc<RwLock<AppState>>, path: PathBuf) {
    let mut revisions = match state.read() {
        Ok(guard) => guard.subscribe_revision(),
        Err(_) => {
            warn!(error = %AppError::StateLock, "Snapshot writer not started");
            return;
        }
    };
    revisions.mark_changed();
    while revisions.changed().await.is_ok() {
        revisions.borrow_and_update();
        let state = Arc::clone(&state);
        let target = path.clone();
        match tokio::task::spawn_blocking(move || save_state(&state, &target)).await {
            Ok(Ok(revision)) => debug!(revision, "Store snapshot saved"),
            Ok(Err(err)) => warn!(error = %err, "Store snapshot failed"),
            Err(err) => warn!(error = %err, "Store snapshot task failed"),
        }
    }
    debug!("State dropped, snapshot writer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyValueStore;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        Ok(std::env::temp_dir()
            .join(format!("tank-flow-{name}-{nanos}"))
            .join("store.json"))
    }

    #[test]
    fn missing_snapshot_loads_as_none() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_path("missing")?;

        assert_eq!(load_tree(&path)?, None);
        assert_eq!(restore_state(&path)?.tree(), &json!({}));
        Ok(())
    }

    #[test]
    fn saved_state_restores_after_restart() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_path("restart")?;
        let state = Arc::new(RwLock::new(AppState::new()));
        state.set("/history/device1/events/evt_1", json!({ "duration": 125 }))?;
        state.set("/devices/device1/settings/maxWaterLevel", json!(80))?;

        let revision = save_state(&state, &path)?;
        let restored = restore_state(&path)?;

        assert_eq!(revision, 2);
        assert_eq!(
            restored.get("/history/device1/events/evt_1/duration"),
            Some(&json!(125))
        );
        assert_eq!(
            restored.get("/devices/device1/settings/maxWaterLevel"),
            Some(&json!(80))
        );
        assert!(!path.with_extension("tmp").exists());
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    #[test]
    fn corrupt_snapshot_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_path("corrupt")?;
        save_tree(&path, &json!({}))?;
        std::fs::write(&path, "{ not json")?;

        let err = load_tree(&path).unwrap_err();

        assert!(matches!(err, AppError::Snapshot { .. }));
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn writer_saves_after_each_change() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_path("writer")?;
        let state = Arc::new(RwLock::new(AppState::new()));
        let writer = tokio::spawn(run_snapshot_writer(Arc::clone(&state), path.clone()));

        state.set("/notifications/device1/ntf_1/read", json!(true))?;

        let saved = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if let Ok(Some(tree)) = load_tree(&path)
                    && tree.pointer("/notifications/device1/ntf_1/read") == Some(&json!(true))
                {
                    return tree;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await?;

        assert_eq!(saved["notifications"]["device1"]["ntf_1"]["read"], json!(true));
        writer.abort();
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}
