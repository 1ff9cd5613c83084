//! # Keyspace Execution Engine
//!
//! Provide the typed in-memory keyspace that backs every command: per-key
//! reader/writer locking, TTL tracking with a background reaper, LRU/LFU
//! eviction bookkeeping, and the sorted-set algebra.
//!
//! ## Structure Overview
//!
//! ```text
//! Keyspace
//!   ├── entries: RwLock<HashMap<String, Arc<RwLock<Entry>>>>
//!   │         └── Entry { value: Value, expires_at: Option<i64> }
//!   ├── creation: Mutex<()>            (serializes first insertion)
//!   ├── ttl_index: Mutex<HashMap<String, i64>>
//!   ├── lru / lfu: Mutex<LruCache> / Mutex<LfuCache>
//!   └── state_copy / state_mutation: AtomicBool guards
//! ```

pub mod eviction;
pub mod keyspace;
pub mod reaper;
pub mod sorted_set;
pub mod value;

pub use eviction::EvictionPolicy;
pub use keyspace::{KeyRecord, Keyspace, KeyspaceConfig, ReadHandle, WriteHandle};
pub use reaper::{start_reaper, ReaperHandle};
pub use sorted_set::{
    parse_score, AddOptions, AddResult, Aggregate, Comparison, SortedSet, UpdatePolicy,
};
pub use value::Value;
