//! # Snapshot Engine
//!
//! Point-in-time persistence for standalone mode: the keyspace state is
//! serialized to a versioned `snapshot.<ms>` file via a temp name and an
//! atomic rename. An atomic gate keeps snapshots from overlapping, and a
//! background thread takes one every interval.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ckv_common::{now_ms, KvError, KvResult};
use ckv_engine::{KeyRecord, Keyspace};

/// On-disk snapshot layout.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    state: Vec<KeyRecord>,
    latest_snapshot_ms: i64,
}

/// Writes and restores point-in-time keyspace images.
pub struct SnapshotEngine {
    keyspace: Arc<Keyspace>,
    dir: PathBuf,
    in_progress: AtomicBool,
}

impl SnapshotEngine {
    pub fn new(keyspace: Arc<Keyspace>, dir: PathBuf) -> KvResult<Arc<Self>> {
        fs::create_dir_all(&dir)?;
        Ok(Arc::new(SnapshotEngine {
            keyspace,
            dir,
            in_progress: AtomicBool::new(false),
        }))
    }

    /// Writes one snapshot, returning its timestamp. Overlapping calls
    /// fail transiently.
    pub fn take_snapshot(&self) -> KvResult<i64> {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            return Err(KvError::Transient(
                "snapshot already in progress".to_string(),
            ));
        }
        let result = self.take_inner();
        self.in_progress.store(false, Ordering::Release);
        result
    }

    fn take_inner(&self) -> KvResult<i64> {
        let state = self.keyspace.export_state()?;
        let stamp = now_ms();
        let image = SnapshotFile {
            state,
            latest_snapshot_ms: stamp,
        };
        let encoded = serde_json::to_vec(&image)
            .map_err(|err| KvError::Fatal(format!("snapshot serialization failed: {}", err)))?;

        let final_path = self.dir.join(format!("snapshot.{}", stamp));
        let tmp_path = self.dir.join(format!("snapshot.{}.tmp", stamp));
        fs::write(&tmp_path, encoded)?;
        fs::rename(&tmp_path, &final_path)?;
        info!(stamp, keys = image.state.len(), "snapshot written");
        Ok(stamp)
    }

    /// Loads the newest snapshot in the data directory, filtering entries
    /// that expired while the server was down. Returns its timestamp, or
    /// `None` when no snapshot exists.
    pub fn restore_latest(&self) -> KvResult<Option<i64>> {
        let mut latest: Option<i64> = None;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stamp) = name
                .to_str()
                .and_then(|name| name.strip_prefix("snapshot."))
                .and_then(|stamp| stamp.parse::<i64>().ok())
            else {
                continue;
            };
            latest = Some(latest.map_or(stamp, |best| best.max(stamp)));
        }
        let Some(stamp) = latest else {
            return Ok(None);
        };

        let raw = fs::read(self.dir.join(format!("snapshot.{}", stamp)))?;
        let image: SnapshotFile = serde_json::from_slice(&raw)
            .map_err(|err| KvError::Fatal(format!("corrupt snapshot: {}", err)))?;
        let imported = self.keyspace.import_state(image.state, now_ms())?;
        info!(stamp, imported, "snapshot restored");
        Ok(Some(stamp))
    }
}

/// Handle for the periodic snapshot thread.
pub struct SnapshotterHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SnapshotterHandle {
    /// Stops the snapshotter and waits for the thread to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Starts a background thread that snapshots every `interval`.
pub fn start_snapshotter(engine: &Arc<SnapshotEngine>, interval: Duration) -> SnapshotterHandle {
    let interval = if interval.is_zero() {
        Duration::from_secs(1)
    } else {
        interval
    };
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = Arc::clone(&stop);
    let engine = Arc::clone(engine);

    let join = std::thread::spawn(move || {
        while !stop_thread.load(Ordering::Acquire) {
            std::thread::sleep(interval);
            if stop_thread.load(Ordering::Acquire) {
                break;
            }
            if let Err(err) = engine.take_snapshot() {
                warn!(%err, "periodic snapshot failed");
            }
        }
    });

    SnapshotterHandle {
        stop,
        join: Some(join),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckv_engine::{KeyspaceConfig, Value};
    use tempfile::tempdir;

    fn keyspace() -> Arc<Keyspace> {
        Arc::new(Keyspace::new(KeyspaceConfig::default()))
    }

    #[test]
    fn snapshot_then_restore_is_identity_over_live_state() {
        let dir = tempdir().unwrap();
        let source = keyspace();
        {
            let mut entry = source.create_key("num");
            entry.set_value(Value::Int(7));
        }
        {
            let mut entry = source.create_key("gone");
            entry.set_value(Value::Int(0));
            entry.set_expiry(Some(now_ms() - 5), false);
        }

        let engine = SnapshotEngine::new(Arc::clone(&source), dir.path().to_path_buf()).unwrap();
        engine.take_snapshot().unwrap();

        let target = keyspace();
        let restorer = SnapshotEngine::new(Arc::clone(&target), dir.path().to_path_buf()).unwrap();
        let stamp = restorer.restore_latest().unwrap();
        assert!(stamp.is_some());
        assert_eq!(target.read_key("num").unwrap().value(), &Value::Int(7));
        assert!(!target.contains_key("gone"));
    }

    #[test]
    fn restore_picks_the_newest_snapshot() {
        let dir = tempdir().unwrap();
        let source = keyspace();
        let engine = SnapshotEngine::new(Arc::clone(&source), dir.path().to_path_buf()).unwrap();

        {
            let mut entry = source.create_key("v");
            entry.set_value(Value::Int(1));
        }
        let first = engine.take_snapshot().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        {
            let mut entry = source.write_key("v").unwrap();
            entry.set_value(Value::Int(2));
        }
        let second = engine.take_snapshot().unwrap();
        assert!(second > first);

        let target = keyspace();
        let restorer = SnapshotEngine::new(Arc::clone(&target), dir.path().to_path_buf()).unwrap();
        assert_eq!(restorer.restore_latest().unwrap(), Some(second));
        assert_eq!(target.read_key("v").unwrap().value(), &Value::Int(2));
    }

    #[test]
    fn empty_directory_restores_nothing() {
        let dir = tempdir().unwrap();
        let engine = SnapshotEngine::new(keyspace(), dir.path().to_path_buf()).unwrap();
        assert_eq!(engine.restore_latest().unwrap(), None);
    }
}
