//! Signal deduplication.
//!
//! TradingView retries webhook deliveries, so the same signal_id can
//! arrive more than once. The guard remembers seen ids for a TTL and
//! admits each id exactly once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Remembers signal ids for a TTL.
pub struct SignalGuard {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl SignalGuard {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, seen: Mutex::new(HashMap::new()) }
    }

    /// Register a signal id. Returns true on first observation.
    ///
    /// Pruning and check-and-insert happen under one lock, so two
    /// concurrent deliveries of the same id admit exactly one.
    pub async fn register(&self, signal_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;

        seen.retain(|_, first_seen| now.duration_since(*first_seen) <= self.ttl);

        if seen.contains_key(signal_id) {
            return false;
        }
        seen.insert(signal_id.to_string(), now);
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
