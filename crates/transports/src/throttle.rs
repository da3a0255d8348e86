//! Throttled debug logging for unknown upstream events.
//!
//! Malformed or unrecognized notifications must never spam the log: at most
//! one entry per key per window, with a rollup of how many were suppressed
//! in between.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Per-key rate limiter for debug logs.
pub struct DebugThrottle {
    window: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for DebugThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl DebugThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `Some(suppressed_count)` when the caller should log now,
    /// `None` when the log line should be dropped. The count covers drops
    /// since the previous logged line for the same key.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(key) {
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
            Some(entry) if now.duration_since(entry.last_logged) >= self.window => {
                let suppressed = entry.suppressed;
                entry.last_logged = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            Some(entry) => {
                entry.suppressed += 1;
                None
            }
        }
    }
}

/// Log an unknown upstream event at debug level, throttled per method.
pub fn debug_unknown(throttle: &DebugThrottle, source: &str, method: &str) {
    if let Some(suppressed) = throttle.check(method) {
        if suppressed > 0 {
            tracing::debug!(
                component = source,
                method = %method,
                suppressed = suppressed,
                "Unhandled event (rolled up)"
            );
        } else {
            tracing::debug!(component = source, method = %method, "Unhandled event");
        }
    }
}
