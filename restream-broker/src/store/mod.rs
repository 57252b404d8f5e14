//! Chunk log persistence seam.
//!
//! The broker needs keyed get / set-with-ttl / delete semantics and nothing
//! else, so the backing store can be an in-process map with expiry or a
//! networked key-value store with expiring keys interchangeably.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use shared::models::ChunkLog;

pub mod memory;

pub use memory::InMemoryChunkStore;

/// Keyed, TTL-bounded storage for per-stream chunk logs.
#[async_trait]
pub trait ChunkLogStore: Send + Sync {
    /// Loads the record for `stream_id`, if present and unexpired.
    async fn load(&self, stream_id: &str) -> Result<Option<ChunkLog>>;

    /// Stores `log` under `stream_id`, (re)arming its TTL.
    async fn save(&self, stream_id: &str, log: &ChunkLog, ttl: Duration) -> Result<()>;

    /// Re-arms the TTL for `stream_id`. Returns `false` when the record is
    /// absent or already expired.
    async fn touch(&self, stream_id: &str, ttl: Duration) -> Result<bool>;

    /// Removes the record for `stream_id`, if any.
    async fn remove(&self, stream_id: &str) -> Result<()>;
}
