use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use shared::models::ChunkLog;
use tokio::sync::Mutex;
use tracing::trace;

use super::ChunkLogStore;

#[derive(Debug, Clone)]
struct StoredRecord {
    log: ChunkLog,
    expires_at: Instant,
}

/// In-process [`ChunkLogStore`] with per-key expiry.
///
/// Expiry is enforced lazily on access; [`InMemoryChunkStore::spawn_purge`]
/// adds a periodic scan for records nothing ever reads again.
#[derive(Debug, Default)]
pub struct InMemoryChunkStore {
    records: Mutex<HashMap<String, StoredRecord>>,
}

impl InMemoryChunkStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a background task dropping expired records every `interval`.
    ///
    /// The task holds only a weak reference: dropping the last store handle
    /// ends it, and it keeps neither the store nor the process alive.
    pub fn spawn_purge(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else { break };
                store.purge_expired().await;
            }
        });
    }

    /// Drops every expired record now. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.records.lock().await;
        let before = guard.len();
        guard.retain(|_, record| record.expires_at > now);
        let removed = before - guard.len();
        if removed > 0 {
            trace!(removed, "purged expired chunk logs");
        }
        removed
    }
}

#[async_trait]
impl ChunkLogStore for InMemoryChunkStore {
    async fn load(&self, stream_id: &str) -> Result<Option<ChunkLog>> {
        let mut guard = self.records.lock().await;
        match guard.get(stream_id) {
            Some(record) if record.expires_at > Instant::now() => Ok(Some(record.log.clone())),
            Some(_) => {
                guard.remove(stream_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, stream_id: &str, log: &ChunkLog, ttl: Duration) -> Result<()> {
        let record = StoredRecord {
            log: log.clone(),
            expires_at: Instant::now() + ttl,
        };
        self.records.lock().await.insert(stream_id.to_owned(), record);
        Ok(())
    }

    async fn touch(&self, stream_id: &str, ttl: Duration) -> Result<bool> {
        let mut guard = self.records.lock().await;
        match guard.get_mut(stream_id) {
            Some(record) if record.expires_at > Instant::now() => {
                record.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            Some(_) => {
                guard.remove(stream_id);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, stream_id: &str) -> Result<()> {
        self.records.lock().await.remove(stream_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::Timestamp;
    use tokio::time::sleep;

    fn sample_log() -> ChunkLog {
        let mut log = ChunkLog::new(Timestamp::now());
        log.append("hello", Timestamp::now());
        log
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryChunkStore::new();
        let log = sample_log();

        store.save("s1", &log, Duration::from_secs(60)).await.unwrap();
        let loaded = store.load("s1").await.unwrap();

        assert_eq!(loaded, Some(log));
    }

    #[tokio::test]
    async fn expired_record_reads_as_absent() {
        let store = InMemoryChunkStore::new();
        store
            .save("s1", &sample_log(), Duration::from_millis(10))
            .await
            .unwrap();

        sleep(Duration::from_millis(30)).await;

        assert_eq!(store.load("s1").await.unwrap(), None);
        assert!(!store.touch("s1", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn touch_extends_expiry() {
        let store = InMemoryChunkStore::new();
        store
            .save("s1", &sample_log(), Duration::from_millis(40))
            .await
            .unwrap();

        sleep(Duration::from_millis(20)).await;
        assert!(store.touch("s1", Duration::from_secs(60)).await.unwrap());
        sleep(Duration::from_millis(40)).await;

        assert!(store.load("s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_drops_only_expired_records() {
        let store = InMemoryChunkStore::new();
        store
            .save("stale", &sample_log(), Duration::from_millis(10))
            .await
            .unwrap();
        store
            .save("fresh", &sample_log(), Duration::from_secs(60))
            .await
            .unwrap();

        sleep(Duration::from_millis(30)).await;
        let removed = store.purge_expired().await;

        assert_eq!(removed, 1);
        assert!(store.load("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = InMemoryChunkStore::new();
        store
            .save("s1", &sample_log(), Duration::from_secs(60))
            .await
            .unwrap();

        store.remove("s1").await.unwrap();
        store.remove("s1").await.unwrap();

        assert_eq!(store.load("s1").await.unwrap(), None);
    }
}
