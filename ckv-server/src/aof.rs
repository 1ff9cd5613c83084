//! # Append-Only File Engine
//!
//! Purpose: Make synchronized writes durable as a preamble (full-state
//! image) plus an append log of raw wire commands, and restore the
//! keyspace by replaying both.
//!
//! ## Design Principles
//! 1. **Writer Task Owns Syncing**: Callers enqueue encoded frames on a
//!    bounded channel; the background writer applies the fsync strategy
//!    so the request path never blocks on disk.
//! 2. **Shared File Lock**: The writer and the rewrite path contend on
//!    one file mutex, so a truncate can never interleave with an append.
//! 3. **Replay Through The Dispatcher**: Restore re-executes logged
//!    commands on the standard execution path with durability side
//!    effects disabled.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{info, warn};

use ckv_common::{now_ms, KvError, KvResult};
use ckv_engine::{KeyRecord, Keyspace};

use crate::dispatch::{ConnContext, Dispatcher};
use crate::protocol::RespParser;

/// Full-state image file name inside the data directory.
pub const PREAMBLE_FILE: &str = "preamble";

/// Append log file name inside the data directory.
pub const LOG_FILE: &str = "aof.log";

/// Bound on queued-but-unwritten log frames; senders block past this.
const QUEUE_DEPTH: usize = 1024;

/// Fsync policy applied by the writer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Fsync after every write.
    Always,
    /// Fsync at most once per second.
    EverySec,
    /// Leave flushing to the operating system.
    No,
}

impl FromStr for SyncStrategy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "always" => Ok(SyncStrategy::Always),
            "everysec" => Ok(SyncStrategy::EverySec),
            "no" => Ok(SyncStrategy::No),
            other => Err(format!("unknown aof sync strategy '{}'", other)),
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStrategy::Always => "always",
            SyncStrategy::EverySec => "everysec",
            SyncStrategy::No => "no",
        };
        f.write_str(name)
    }
}

/// AOF engine construction parameters.
#[derive(Debug, Clone)]
pub struct AofConfig {
    pub dir: PathBuf,
    pub strategy: SyncStrategy,
}

/// Handle for the background writer thread.
pub struct AofWriterHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl AofWriterHandle {
    /// Signals the writer, drains the queue, and joins the thread.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Preamble plus append-log durability engine.
pub struct AofEngine {
    keyspace: Arc<Keyspace>,
    dispatcher: Arc<Dispatcher>,
    dir: PathBuf,
    log_file: Arc<Mutex<File>>,
    tx: SyncSender<Vec<u8>>,
    rewrite_lock: Mutex<()>,
    rewrite_in_progress: AtomicBool,
}

impl AofEngine {
    /// Opens (or creates) the log, spawns the writer task, and returns
    /// the engine with the writer's stop handle.
    pub fn start(
        keyspace: Arc<Keyspace>,
        dispatcher: Arc<Dispatcher>,
        config: AofConfig,
    ) -> KvResult<(Arc<AofEngine>, AofWriterHandle)> {
        fs::create_dir_all(&config.dir)?;
        let log_path = config.dir.join(LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let log_file = Arc::new(Mutex::new(file));

        let (tx, rx) = sync_channel(QUEUE_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));
        let writer_file = Arc::clone(&log_file);
        let writer_stop = Arc::clone(&stop);
        let strategy = config.strategy;
        let join = std::thread::spawn(move || {
            writer_loop(rx, writer_file, strategy, writer_stop);
        });

        let engine = AofEngine {
            keyspace,
            dispatcher,
            dir: config.dir,
            log_file,
            tx,
            rewrite_lock: Mutex::new(()),
            rewrite_in_progress: AtomicBool::new(false),
        };
        Ok((
            Arc::new(engine),
            AofWriterHandle {
                stop,
                join: Some(join),
            },
        ))
    }

    /// Enqueues one executed command for the writer task.
    ///
    /// Blocks briefly when the queue is full; a dead writer drops the
    /// entry with a warning rather than wedging the request path.
    pub fn append(&self, args: &[String]) {
        let frame = crate::protocol::encode_command(args);
        if self.tx.send(frame).is_err() {
            warn!("aof writer is gone; dropping log entry");
        }
    }

    /// Replays the preamble into the keyspace, then re-dispatches each
    /// logged command with durability side effects disabled.
    pub fn restore(&self) -> KvResult<usize> {
        let preamble_path = self.dir.join(PREAMBLE_FILE);
        if preamble_path.exists() {
            let raw = fs::read(&preamble_path)?;
            let records: Vec<KeyRecord> = serde_json::from_slice(&raw)
                .map_err(|err| KvError::Fatal(format!("corrupt preamble: {}", err)))?;
            let imported = self.keyspace.import_state(records, now_ms())?;
            info!(imported, "preamble restored");
        }

        let log_path = self.dir.join(LOG_FILE);
        if !log_path.exists() {
            return Ok(0);
        }
        let raw = fs::read(&log_path)?;
        let mut buffer = BytesMut::from(&raw[..]);
        let mut parser = RespParser::new();
        let replay_conn = ConnContext::internal("aof-restore", 0);
        let mut replayed = 0;
        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(frame)) => {
                    let args: Vec<String> = frame
                        .iter()
                        .map(|arg| String::from_utf8_lossy(arg).into_owned())
                        .collect();
                    if let Err(err) = self.dispatcher.execute_local(&replay_conn, &args) {
                        warn!(%err, command = ?args.first(), "replayed command failed");
                    }
                    replayed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("append log ends in a truncated entry; stopping replay");
                    break;
                }
            }
        }
        info!(replayed, "append log replayed");
        Ok(replayed)
    }

    /// Snapshots the keyspace into a fresh preamble and truncates the
    /// log. Concurrent rewrites serialize on one mutex; the in-progress
    /// flag also fails fast for observers.
    pub fn rewrite(&self) -> KvResult<()> {
        let _serialized = self.rewrite_lock.lock();
        if self.rewrite_in_progress.swap(true, Ordering::AcqRel) {
            return Err(KvError::Transient(
                "aof rewrite already in progress".to_string(),
            ));
        }
        let result = self.rewrite_inner();
        self.rewrite_in_progress.store(false, Ordering::Release);
        result
    }

    fn rewrite_inner(&self) -> KvResult<()> {
        let records = self.keyspace.export_state()?;
        let encoded = serde_json::to_vec(&records)
            .map_err(|err| KvError::Fatal(format!("preamble serialization failed: {}", err)))?;

        let tmp = self.dir.join(format!("{}.tmp", PREAMBLE_FILE));
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, self.dir.join(PREAMBLE_FILE))?;

        // Truncate under the shared lock so the writer cannot interleave.
        let file = self.log_file.lock();
        file.set_len(0)?;
        file.sync_all()?;
        info!(keys = records.len(), "aof rewritten");
        Ok(())
    }
}

fn writer_loop(
    rx: Receiver<Vec<u8>>,
    file: Arc<Mutex<File>>,
    strategy: SyncStrategy,
    stop: Arc<AtomicBool>,
) {
    let mut last_sync = Instant::now();
    let mut dirty = false;
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => {
                let mut file = file.lock();
                if let Err(err) = file.write_all(&frame) {
                    warn!(%err, "aof write failed");
                } else {
                    match strategy {
                        SyncStrategy::Always => {
                            let _ = file.sync_data();
                        }
                        SyncStrategy::EverySec => dirty = true,
                        SyncStrategy::No => {}
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if dirty && last_sync.elapsed() >= Duration::from_secs(1) {
            let _ = file.lock().sync_data();
            dirty = false;
            last_sync = Instant::now();
        }

        if stop.load(Ordering::Acquire) {
            // Drain whatever the request path already enqueued.
            while let Ok(frame) = rx.try_recv() {
                let mut file = file.lock();
                let _ = file.write_all(&frame);
            }
            let _ = file.lock().sync_data();
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatcher, ServerContext};
    use ckv_engine::{KeyspaceConfig, Value};
    use tempfile::tempdir;

    fn fixture(dir: PathBuf) -> (Arc<Keyspace>, Arc<AofEngine>, AofWriterHandle) {
        let keyspace = Arc::new(Keyspace::new(KeyspaceConfig::default()));
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(ServerContext::new(Arc::clone(
            &keyspace,
        )))));
        let (engine, handle) = AofEngine::start(
            Arc::clone(&keyspace),
            dispatcher,
            AofConfig {
                dir,
                strategy: SyncStrategy::Always,
            },
        )
        .unwrap();
        (keyspace, engine, handle)
    }

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|token| token.to_string()).collect()
    }

    #[test]
    fn sync_strategy_parses() {
        assert_eq!("always".parse::<SyncStrategy>().unwrap(), SyncStrategy::Always);
        assert_eq!("EVERYSEC".parse::<SyncStrategy>().unwrap(), SyncStrategy::EverySec);
        assert_eq!("no".parse::<SyncStrategy>().unwrap(), SyncStrategy::No);
        assert!("sometimes".parse::<SyncStrategy>().is_err());
    }

    #[test]
    fn appended_commands_survive_restart() {
        let dir = tempdir().unwrap();
        {
            let (_keyspace, engine, handle) = fixture(dir.path().to_path_buf());
            engine.append(&args(&["SET", "alpha", "1"]));
            engine.append(&args(&["ZADD", "board", "2", "player"]));
            handle.stop();
        }

        let (keyspace, engine, handle) = fixture(dir.path().to_path_buf());
        let replayed = engine.restore().unwrap();
        assert_eq!(replayed, 2);
        assert!(keyspace.contains_key("alpha"));
        let score = keyspace
            .read_key("board")
            .unwrap()
            .value()
            .as_sorted_set()
            .unwrap()
            .score("player");
        assert_eq!(score, Some(2.0));
        handle.stop();
    }

    #[test]
    fn rewrite_moves_state_into_the_preamble() {
        let dir = tempdir().unwrap();
        let (keyspace, engine, handle) = fixture(dir.path().to_path_buf());
        {
            let mut entry = keyspace.create_key("kept");
            entry.set_value(Value::Int(9));
        }
        engine.append(&args(&["SET", "kept", "9"]));
        handle.stop();

        engine.rewrite().unwrap();
        assert_eq!(fs::read(dir.path().join(LOG_FILE)).unwrap().len(), 0);
        let preamble = fs::read(dir.path().join(PREAMBLE_FILE)).unwrap();
        let records: Vec<KeyRecord> = serde_json::from_slice(&preamble).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "kept");

        // A fresh engine restores the preamble alone.
        let (restored, engine, handle) = fixture(dir.path().to_path_buf());
        engine.restore().unwrap();
        assert_eq!(
            restored.read_key("kept").unwrap().value(),
            &Value::Int(9)
        );
        handle.stop();
    }

    #[test]
    fn restore_tolerates_a_truncated_tail() {
        let dir = tempdir().unwrap();
        {
            let (_keyspace, engine, handle) = fixture(dir.path().to_path_buf());
            engine.append(&args(&["SET", "whole", "1"]));
            handle.stop();
        }
        // Corrupt the tail with a half-written frame.
        let log_path = dir.path().join(LOG_FILE);
        let mut raw = fs::read(&log_path).unwrap();
        raw.extend_from_slice(b"*3\r\n$3\r\nSET\r\n$4\r\nhal");
        fs::write(&log_path, raw).unwrap();

        let (keyspace, engine, handle) = fixture(dir.path().to_path_buf());
        assert_eq!(engine.restore().unwrap(), 1);
        assert!(keyspace.contains_key("whole"));
        assert!(!keyspace.contains_key("hal"));
        handle.stop();
    }
}
