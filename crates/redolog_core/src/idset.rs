//! Time-bounded committed-id set.
//!
//! Tracks which identifiers the consumer has committed so the writer can
//! suppress duplicate data records and the replayer can skip already
//! processed ones. Entries expire after a TTL: a producer may legitimately
//! re-issue an id shortly after commit, and the set must not grow without
//! bound.

use crate::error::JournalResult;
use crate::sync::Shutdown;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const SHARD_COUNT: usize = 32;

type Shard = Mutex<HashMap<i64, Instant>>;

/// Thread-safe set of 64-bit ids with per-entry TTL.
///
/// Internally sharded; `add` under contention does not block readers of
/// other shards. A background sweeper evicts expired entries every `ttl/2`
/// and stops when the supplied [`Shutdown`] fires or the set is dropped.
pub struct TtlSet {
    shards: Arc<Vec<Shard>>,
    ttl: Duration,
}

impl TtlSet {
    /// Creates a set whose entries live for `ttl`, spawning the sweeper.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweeper thread cannot be spawned.
    pub fn new(shutdown: Shutdown, ttl: Duration) -> JournalResult<Self> {
        let shards: Arc<Vec<Shard>> = Arc::new(
            (0..SHARD_COUNT)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        );

        let weak = Arc::downgrade(&shards);
        let interval = (ttl / 2).max(Duration::from_millis(10));
        thread::Builder::new()
            .name("redolog-idset-sweeper".to_string())
            .spawn(move || sweep_loop(&weak, ttl, interval, &shutdown))?;

        Ok(Self { shards, ttl })
    }

    fn shard(&self, id: i64) -> &Shard {
        &self.shards[(id as u64 % SHARD_COUNT as u64) as usize]
    }

    /// Inserts `id` with the current timestamp, refreshing it if present.
    pub fn add(&self, id: i64) {
        self.shard(id).lock().insert(id, Instant::now());
    }

    /// Removes `id` if present. Returns `true` only when the entry existed
    /// and had not expired; an expired entry is evicted and reported absent.
    pub fn check_and_remove(&self, id: i64) -> bool {
        match self.shard(id).lock().remove(&id) {
            Some(added_at) => added_at.elapsed() <= self.ttl,
            None => false,
        }
    }

    /// Approximate cardinality. May transiently count expired entries the
    /// sweeper has not reached yet.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Whether the set is (approximately) empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Extend<i64> for TtlSet {
    fn extend<I: IntoIterator<Item = i64>>(&mut self, iter: I) {
        for id in iter {
            self.add(id);
        }
    }
}

// Bulk loaders hand out `&mut impl Extend<i64>`; the set's interior locking
// makes a shared reference sufficient.
impl Extend<i64> for &TtlSet {
    fn extend<I: IntoIterator<Item = i64>>(&mut self, iter: I) {
        for id in iter {
            self.add(id);
        }
    }
}

impl std::fmt::Debug for TtlSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlSet")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}

fn sweep_loop(shards: &Weak<Vec<Shard>>, ttl: Duration, interval: Duration, shutdown: &Shutdown) {
    loop {
        if shutdown.wait_timeout(interval) {
            debug!("idset sweeper cancelled");
            return;
        }
        let Some(shards) = shards.upgrade() else {
            // set dropped
            return;
        };
        let mut evicted = 0usize;
        for shard in shards.iter() {
            let mut guard = shard.lock();
            let before = guard.len();
            guard.retain(|_, added_at| added_at.elapsed() <= ttl);
            evicted += before - guard.len();
        }
        if evicted > 0 {
            debug!(evicted, "evicted expired committed ids");
        }
    }
}
