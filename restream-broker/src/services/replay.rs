use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures_util::Stream;
use metrics::{counter, gauge};
use shared::models::ChunkLog;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{instrument, warn};

use crate::error::BrokerResult;
use crate::services::active_stream::StreamSignal;
use crate::services::stream_broker::StreamBroker;
use crate::store::ChunkLogStore;

/// Lazily-evaluated sequence of chunk values handed to one subscriber.
pub type ChunkStream = Pin<Box<dyn Stream<Item = String> + Send + 'static>>;

/// Decrements the live-subscriber gauge when a subscriber goes away,
/// whether it drained the stream or dropped it mid-flight.
struct SubscriberGuard;

impl SubscriberGuard {
    fn new() -> Self {
        gauge!("restream_subscribers").increment(1.0);
        Self
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        gauge!("restream_subscribers").decrement(1.0);
    }
}

impl StreamBroker {
    /// Attaches a consumer to `stream_id`.
    ///
    /// Returns `None` when no record exists at all. Otherwise the sequence
    /// first drains the buffered window in `seq` order; if the stream is
    /// still producing, it then follows live notifications across the
    /// hand-off with no duplicates and no gaps, ending on completion. Each
    /// call is an independent pass, and subscribing refreshes the record's
    /// TTL and the stream's activity clock. Dropping the returned stream
    /// detaches the subscriber.
    ///
    /// # Errors
    /// Returns a store failure from the snapshot read or TTL refresh.
    #[instrument(name = "broker.subscribe", skip(self), err)]
    pub async fn subscribe(&self, stream_id: &str) -> BrokerResult<Option<ChunkStream>> {
        // Register for live signals before snapshotting so nothing can fall
        // between the snapshot and the hand-off; the seq filter drops the
        // overlap instead.
        let control = self.lookup(stream_id).await;
        let receiver = control.as_ref().map(|control| control.subscribe_signals());

        let Some(snapshot) = self.store.load(stream_id).await? else {
            return Ok(None);
        };
        self.store
            .touch(stream_id, self.config.idle_ttl())
            .await?;
        if let Some(control) = &control {
            control.touch();
        }

        counter!("restream_subscribes_total").increment(1);
        let live = if snapshot.done { None } else { receiver };
        Ok(Some(replay_stream(
            snapshot,
            live,
            Arc::clone(&self.store),
            stream_id.to_owned(),
        )))
    }
}

/// Builds the subscriber-facing sequence: snapshot replay, then live
/// signals filtered to `seq > last_replayed`.
fn replay_stream(
    snapshot: ChunkLog,
    live: Option<broadcast::Receiver<StreamSignal>>,
    store: Arc<dyn ChunkLogStore>,
    stream_id: String,
) -> ChunkStream {
    let guard = SubscriberGuard::new();
    Box::pin(stream! {
        let _guard = guard;
        let mut last_seq: Option<u64> = None;

        for chunk in snapshot.chunks {
            last_seq = Some(chunk.seq);
            yield chunk.value;
            // Cooperative yield so a large buffered window cannot starve
            // the executor.
            tokio::task::yield_now().await;
        }

        if let Some(mut receiver) = live {
            loop {
                match receiver.recv().await {
                    Ok(StreamSignal::Chunk(chunk)) => {
                        if last_seq.is_some_and(|seen| chunk.seq <= seen) {
                            continue;
                        }
                        last_seq = Some(chunk.seq);
                        yield chunk.value;
                    }
                    Ok(StreamSignal::Complete) => break,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(stream_id = %stream_id, missed, "subscriber lagged, re-syncing from the log");
                        match store.load(&stream_id).await {
                            Ok(Some(log)) => {
                                let done = log.done;
                                for chunk in log.chunks {
                                    if last_seq.is_some_and(|seen| chunk.seq <= seen) {
                                        continue;
                                    }
                                    last_seq = Some(chunk.seq);
                                    yield chunk.value;
                                    tokio::task::yield_now().await;
                                }
                                if done {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                warn!(stream_id = %stream_id, error = %err, "re-sync failed, ending subscriber");
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryChunkStore;
    use futures_util::StreamExt;
    use shared::config::BrokerConfig;
    use std::time::Duration;
    use tokio::time::timeout;

    fn tiny_channel_broker() -> Arc<StreamBroker> {
        let config = BrokerConfig {
            notify_channel_capacity: 4,
            ..BrokerConfig::default()
        };
        Arc::new(StreamBroker::new(
            config,
            Arc::new(InMemoryChunkStore::new()),
        ))
    }

    #[tokio::test]
    async fn lagged_subscriber_resyncs_from_the_log_without_gaps() {
        let broker = tiny_channel_broker();
        broker.start("s1", None).await.unwrap();

        // Attach but do not poll; the producer then overruns the 4-slot
        // notification channel before the subscriber wakes up.
        let stream = broker.subscribe("s1").await.unwrap().unwrap();
        for i in 0..20 {
            broker.append("s1", &i.to_string()).await.unwrap();
        }
        broker.finalize("s1").await.unwrap();

        let values = timeout(Duration::from_secs(2), stream.collect::<Vec<_>>())
            .await
            .expect("stream should terminate");

        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(values, expected);
    }

    #[tokio::test]
    async fn dropping_a_live_subscriber_detaches_it() {
        let broker = tiny_channel_broker();
        broker.start("s1", None).await.unwrap();

        let stream = broker.subscribe("s1").await.unwrap().unwrap();
        drop(stream);

        // The producer keeps going; the dropped receiver must not wedge it.
        broker.append("s1", "a").await.unwrap();
        broker.finalize("s1").await.unwrap();

        let replay = broker.subscribe("s1").await.unwrap().unwrap();
        let values = timeout(Duration::from_secs(1), replay.collect::<Vec<_>>())
            .await
            .expect("stream should terminate");
        assert_eq!(values, vec!["a"]);
    }

    #[tokio::test]
    async fn finished_stream_replays_item_by_item_then_terminates() {
        let broker = tiny_channel_broker();
        broker.start("s1", None).await.unwrap();
        broker.append("s1", "a").await.unwrap();
        broker.finalize("s1").await.unwrap();

        let mut stream = broker.subscribe("s1").await.unwrap().unwrap();
        let first = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("replayed chunk");
        assert_eq!(first.as_deref(), Some("a"));
        let end = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("termination");
        assert_eq!(end, None);
    }
}
