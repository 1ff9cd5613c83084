//! # Replicated State Machine
//!
//! Purpose: Apply committed log entries by re-invoking the same handlers
//! the TCP path uses, and snapshot/restore the keyspace for log
//! compaction and catch-up.
//!
//! The consensus transport and membership live outside this crate; the
//! dispatcher reaches the log through the `Replicator` trait, and
//! `LocalReplicator` supplies the single-voter total order by applying
//! entries under one mutex. A reply returns to the caller only after the
//! state machine has applied the entry.

use std::io::Read;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ckv_common::{now_ms, KvError, KvResult};
use ckv_engine::{KeyRecord, Keyspace};

use crate::dispatch::{ConnContext, Dispatcher};
use crate::protocol;

/// What a log entry asks the state machine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyKind {
    /// Remove one key.
    DeleteKey,
    /// Execute a full command through the dispatcher's handlers.
    Command,
}

/// Serialized request carried by one replicated log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub kind: ApplyKind,
    pub server_id: String,
    pub conn_id: u64,
    pub key: String,
    pub cmd: Vec<String>,
}

/// Entry point the consensus layer drives.
pub trait Replicator: Send + Sync {
    /// Appends the request to the replicated log and returns the state
    /// machine's response once the entry has applied.
    fn submit(&self, request: &ApplyRequest) -> KvResult<Vec<u8>>;
}

/// The state machine: committed entries re-enter the standard execution
/// path with durability side effects disabled (the log is the
/// durability).
pub struct Fsm {
    keyspace: Arc<Keyspace>,
    dispatcher: Arc<Dispatcher>,
}

impl Fsm {
    pub fn new(keyspace: Arc<Keyspace>, dispatcher: Arc<Dispatcher>) -> Self {
        Fsm {
            keyspace,
            dispatcher,
        }
    }

    /// Applies one committed entry and returns the response bytes.
    ///
    /// Malformed entries produce an error reply rather than a crash; the
    /// log itself is trusted, but a version-skewed peer must not take the
    /// state machine down.
    pub fn apply(&self, entry: &[u8]) -> Vec<u8> {
        match serde_json::from_slice::<ApplyRequest>(entry) {
            Ok(request) => self.apply_request(&request),
            Err(err) => protocol::error(&format!("malformed log entry: {}", err)),
        }
    }

    pub fn apply_request(&self, request: &ApplyRequest) -> Vec<u8> {
        debug!(kind = ?request.kind, key = %request.key, "applying log entry");
        match request.kind {
            ApplyKind::DeleteKey => {
                let removed = self.keyspace.delete_key(&request.key);
                protocol::integer(removed as i64)
            }
            ApplyKind::Command => {
                let conn = ConnContext::internal(&request.server_id, request.conn_id);
                match self.dispatcher.execute_local(&conn, &request.cmd) {
                    Ok(response) => response,
                    Err(err) => protocol::error_reply(&err),
                }
            }
        }
    }

    /// Streams the keyspace as a JSON snapshot under the state-copy guard.
    pub fn snapshot(&self) -> KvResult<Vec<u8>> {
        let records = self.keyspace.export_state()?;
        serde_json::to_vec(&records)
            .map_err(|err| KvError::Fatal(format!("fsm snapshot serialization failed: {}", err)))
    }

    /// Clears the keyspace and re-inserts each non-expired entry from a
    /// snapshot stream.
    pub fn restore<R: Read>(&self, reader: R) -> KvResult<usize> {
        let records: Vec<KeyRecord> = serde_json::from_reader(reader)
            .map_err(|err| KvError::Fatal(format!("corrupt fsm snapshot: {}", err)))?;
        self.keyspace.flush();
        self.keyspace.import_state(records, now_ms())
    }
}

/// Single-voter log: entries serialize through one mutex and apply
/// immediately, which is exactly the quorum for a cluster of one.
pub struct LocalReplicator {
    fsm: Fsm,
    applied_index: Mutex<u64>,
}

impl LocalReplicator {
    pub fn new(fsm: Fsm) -> Self {
        LocalReplicator {
            fsm,
            applied_index: Mutex::new(0),
        }
    }

    /// Index of the last applied entry.
    pub fn applied_index(&self) -> u64 {
        *self.applied_index.lock()
    }
}

impl Replicator for LocalReplicator {
    fn submit(&self, request: &ApplyRequest) -> KvResult<Vec<u8>> {
        let entry = serde_json::to_vec(request)
            .map_err(|err| KvError::Fatal(format!("log entry serialization failed: {}", err)))?;
        let mut index = self.applied_index.lock();
        *index += 1;
        Ok(self.fsm.apply(&entry))
    }
}
