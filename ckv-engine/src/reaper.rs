//! # TTL Reaper
//!
//! Periodically sweep the TTL index and delete keys whose deadline has
//! passed. The reaper is eventually consistent: a key may be observed
//! live for up to one interval after its deadline, and contended keys
//! are skipped until the next pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use ckv_common::now_ms;

use crate::keyspace::Keyspace;

/// Handle for the background reaper thread.
///
/// Call `stop` to signal shutdown and join the thread.
pub struct ReaperHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stops the reaper and waits for the thread to finish.
    ///
    /// Use this in tests or shutdown hooks to avoid leaking threads.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Starts a background thread that deletes expired keys every `interval`.
///
/// The returned handle must be stopped to avoid leaking the thread.
pub fn start_reaper(keyspace: &Arc<Keyspace>, interval: Duration) -> ReaperHandle {
    let interval = if interval.is_zero() {
        Duration::from_millis(1)
    } else {
        interval
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = Arc::clone(&stop);
    let keyspace = Arc::clone(keyspace);

    let join = std::thread::spawn(move || {
        while !stop_thread.load(Ordering::Acquire) {
            std::thread::sleep(interval);
            let removed = keyspace.remove_expired(now_ms());
            if removed > 0 {
                debug!(removed, "reaper pass removed expired keys");
            }
        }
    });

    ReaperHandle {
        stop,
        join: Some(join),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::KeyspaceConfig;
    use crate::value::Value;

    #[test]
    fn reaper_clears_expired_keys() {
        let keyspace = Arc::new(Keyspace::new(KeyspaceConfig::default()));
        {
            let mut handle = keyspace.create_key("short");
            handle.set_value(Value::Int(1));
            handle.set_expiry(Some(now_ms() + 5), false);
        }

        let reaper = start_reaper(&keyspace, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(30));
        reaper.stop();

        assert!(!keyspace.contains_key("short"));
        assert_eq!(keyspace.len(), 0);
    }

    #[test]
    fn reaper_leaves_unexpired_keys() {
        let keyspace = Arc::new(Keyspace::new(KeyspaceConfig::default()));
        {
            let mut handle = keyspace.create_key("long");
            handle.set_value(Value::Int(1));
            handle.set_expiry(Some(now_ms() + 60_000), false);
        }

        let reaper = start_reaper(&keyspace, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        reaper.stop();

        assert!(keyspace.contains_key("long"));
    }
}
