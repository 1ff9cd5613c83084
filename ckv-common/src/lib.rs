// ckv-common - Shared error model and helpers for CoralKV
//
// This crate defines the failure kinds every other crate speaks and the
// wall-clock helpers used for TTL deadlines.

pub mod error;
pub mod time;

// Re-export for convenience
pub use error::{KvError, KvResult};
pub use time::now_ms;
