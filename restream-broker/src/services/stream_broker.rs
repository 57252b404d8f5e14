use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use metrics::{counter, gauge};
use shared::config::BrokerConfig;
use shared::models::{ChunkLog, Timestamp};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::error::BrokerResult;
use crate::services::active_stream::ActiveStream;
use crate::store::ChunkLogStore;

/// Shared broker handle, the form host code keeps in its state.
pub type SharedStreamBroker = Arc<StreamBroker>;

/// Resumable stream broker.
///
/// Owns two keyed stores with independent lifetimes: the active registry of
/// currently-producing streams (cancellation handle, live notifier, mutation
/// gate) and the TTL-bounded chunk log store consumers replay from. A stream
/// can be finished, with no registry entry, yet still replayable from the
/// log until its TTL lapses.
///
/// Producers drive [`start`](Self::start) / [`append`](Self::append) /
/// [`finalize`](Self::finalize); watchdogs and users call
/// [`stop`](Self::stop); consumers call
/// [`subscribe`](StreamBroker::subscribe) at any time, including after a
/// reconnect.
pub struct StreamBroker {
    pub(crate) config: BrokerConfig,
    pub(crate) store: Arc<dyn ChunkLogStore>,
    active: RwLock<HashMap<String, Arc<ActiveStream>>>,
}

impl fmt::Debug for StreamBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBroker").finish()
    }
}

impl StreamBroker {
    /// Builds a broker over `store` with the given limits.
    #[must_use]
    pub fn new(config: BrokerConfig, store: Arc<dyn ChunkLogStore>) -> Self {
        Self {
            config,
            store,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Spawns the periodic idle sweep.
    ///
    /// The task holds only a weak reference: dropping the last broker handle
    /// ends it, and it keeps neither the broker nor the process alive.
    pub fn spawn_idle_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(broker) = weak.upgrade() else { break };
                if let Err(err) = broker.sweep_idle().await {
                    warn!(error = %err, "idle sweep failed");
                }
            }
        });
    }

    /// Force-stops every stream idle past the configured TTL, covering
    /// streams no further operation would ever visit. Returns the reaped
    /// count.
    ///
    /// # Errors
    /// Returns a store failure from the underlying stop operations.
    pub async fn sweep_idle(&self) -> BrokerResult<usize> {
        let idle_ttl = self.config.idle_ttl();
        let expired: Vec<String> = {
            let guard = self.active.read().await;
            guard
                .iter()
                .filter(|(_, control)| control.last_active().elapsed() >= idle_ttl)
                .map(|(stream_id, _)| stream_id.clone())
                .collect()
        };

        let mut reaped = 0;
        for stream_id in expired {
            // The record may have TTL-expired alongside the control, so the
            // stop result does not decide whether the control was reclaimed.
            self.stop(&stream_id, "idle-timeout").await?;
            counter!("restream_streams_reaped_total").increment(1);
            reaped += 1;
        }
        if reaped > 0 {
            debug!(reaped, "idle sweep reaped streams");
        }
        Ok(reaped)
    }

    /// Registers a fresh stream under `stream_id`.
    ///
    /// Any prior control for the id is completed first, releasing its
    /// subscribers; the buffered log is overwritten with an empty one. The
    /// optional `cancel` token stays owned by the producer and is only ever
    /// fired, never awaited, by the broker.
    ///
    /// # Errors
    /// Returns a store failure if the fresh log cannot be persisted.
    #[instrument(name = "broker.start", skip(self, cancel), err)]
    pub async fn start(
        &self,
        stream_id: &str,
        cancel: Option<CancellationToken>,
    ) -> BrokerResult<()> {
        self.release_replaced(stream_id).await;

        let control = Arc::new(ActiveStream::new(
            self.config.notify_channel_capacity,
            cancel,
        ));
        self.install_control(stream_id, &control).await?;

        let _gate = control.lock_mutations().await;
        let log = ChunkLog::new(Timestamp::now());
        self.store
            .save(stream_id, &log, self.config.idle_ttl())
            .await?;
        self.update_active_gauge().await;
        debug!("stream started");
        Ok(())
    }

    /// Attaches an opaque correlation id to the live control. No-op when the
    /// stream is not active; the id is not persisted past the control.
    pub async fn set_assistant_message_id(&self, stream_id: &str, id: Uuid) {
        if let Some(control) = self.lookup(stream_id).await {
            control.set_assistant_message_id(id);
        }
    }

    /// Correlation id previously attached to the live control, if any.
    pub async fn get_assistant_message_id(&self, stream_id: &str) -> Option<Uuid> {
        self.lookup(stream_id)
            .await
            .and_then(|control| control.assistant_message_id())
    }

    /// Appends one chunk of producer output.
    ///
    /// No-op when the stream is unknown or already done. The chunk is
    /// persisted before subscribers are notified, so a subscriber never
    /// observes output that is not in the log; the oldest chunks are trimmed
    /// once the window exceeds the per-stream caps, degrading replay
    /// completeness rather than ever blocking the producer.
    ///
    /// # Errors
    /// Returns a store failure; the corresponding notification is suppressed.
    #[instrument(name = "broker.append", skip(self, value), err)]
    pub async fn append(&self, stream_id: &str, value: &str) -> BrokerResult<()> {
        let Some(control) = self.lookup(stream_id).await else {
            return Ok(());
        };
        let _gate = control.lock_mutations().await;

        let Some(mut log) = self.store.load(stream_id).await? else {
            return Ok(());
        };
        if log.done {
            return Ok(());
        }

        let chunk = log.append(value, Timestamp::now());
        let dropped = log.trim(
            self.config.max_stream_chunks,
            self.config.max_stream_buffer_bytes,
        );
        if dropped > 0 {
            counter!("restream_chunks_trimmed_total").increment(dropped as u64);
            trace!(dropped, "trimmed oldest chunks past buffer caps");
        }
        self.store
            .save(stream_id, &log, self.config.idle_ttl())
            .await?;

        control.touch();
        control.notify_chunk(chunk);
        counter!("restream_chunks_appended_total").increment(1);
        Ok(())
    }

    /// Marks the stream complete on normal producer shutdown.
    ///
    /// Idempotent: no-op when the record is missing or already done. The log
    /// stays replayable with a refreshed TTL.
    ///
    /// # Errors
    /// Returns a store failure from the completion write.
    #[instrument(name = "broker.finalize", skip(self), err)]
    pub async fn finalize(&self, stream_id: &str) -> BrokerResult<()> {
        let control = self.lookup(stream_id).await;
        self.complete_stream(stream_id, control.as_ref()).await?;
        Ok(())
    }

    /// Cancels a live stream and finalizes it.
    ///
    /// Returns `false` when no live control exists (unknown id or already
    /// done). The cancellation handle is fired best-effort; the broker
    /// finalizes regardless of whether the producer has actually halted.
    ///
    /// # Errors
    /// Returns a store failure from the completion write.
    #[instrument(name = "broker.stop", skip(self), err)]
    pub async fn stop(&self, stream_id: &str, reason: &str) -> BrokerResult<bool> {
        let Some(control) = self.lookup(stream_id).await else {
            return Ok(false);
        };

        control.cancel();
        let stopped = self.complete_stream(stream_id, Some(&control)).await?;
        if stopped {
            counter!("restream_streams_stopped_total").increment(1);
            debug!(reason, "stream stopped");
        }
        Ok(stopped)
    }

    /// Number of currently-producing streams.
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub(crate) async fn lookup(&self, stream_id: &str) -> Option<Arc<ActiveStream>> {
        self.active.read().await.get(stream_id).cloned()
    }

    /// Completes the old control for `stream_id`, if one exists, so its
    /// subscribers are released rather than left hanging or errored.
    async fn release_replaced(&self, stream_id: &str) {
        let prior = self.active.write().await.remove(stream_id);
        if let Some(prior) = prior {
            prior.notify_complete();
            debug!("replaced existing active stream");
        }
    }

    /// Inserts `control`, force-stopping least-recently-active streams first
    /// whenever the insert would push the registry over the global cap. The
    /// check happens under the registry write lock, so the cap holds even
    /// transiently.
    async fn install_control(
        &self,
        stream_id: &str,
        control: &Arc<ActiveStream>,
    ) -> BrokerResult<()> {
        loop {
            let victim = {
                let mut guard = self.active.write().await;
                if guard.len() < self.config.max_active_streams {
                    guard.insert(stream_id.to_owned(), Arc::clone(control));
                    return Ok(());
                }
                guard
                    .iter()
                    .min_by_key(|(_, candidate)| candidate.last_active())
                    .map(|(id, _)| id.clone())
            };

            let Some(victim) = victim else {
                return Ok(());
            };
            warn!(victim = %victim, "active stream cap reached, evicting least recently active");
            counter!("restream_streams_evicted_total").increment(1);
            self.stop(&victim, "capacity-evicted").await?;
        }
    }

    /// Marks the record done (unless it already is), notifies subscribers of
    /// the end of the stream, and unregisters `control`. Returns whether
    /// this call performed the done transition.
    async fn complete_stream(
        &self,
        stream_id: &str,
        control: Option<&Arc<ActiveStream>>,
    ) -> BrokerResult<bool> {
        let _gate = match control {
            Some(control) => Some(control.lock_mutations().await),
            None => None,
        };

        let transitioned = match self.store.load(stream_id).await? {
            Some(mut log) if !log.done => {
                log.mark_done(Timestamp::now());
                self.store
                    .save(stream_id, &log, self.config.idle_ttl())
                    .await?;
                true
            }
            _ => false,
        };

        if let Some(control) = control {
            control.notify_complete();
            self.unregister(stream_id, control).await;
        }
        self.update_active_gauge().await;
        Ok(transitioned)
    }

    /// Removes `control` from the registry unless a replacement has already
    /// taken the id.
    async fn unregister(&self, stream_id: &str, control: &Arc<ActiveStream>) {
        let mut guard = self.active.write().await;
        if guard
            .get(stream_id)
            .is_some_and(|current| Arc::ptr_eq(current, control))
        {
            guard.remove(stream_id);
        }
    }

    async fn update_active_gauge(&self) {
        let count = self.active.read().await.len();
        gauge!("restream_active_streams").set(count as f64);
    }
}
