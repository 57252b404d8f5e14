use std::sync::Mutex;
use std::time::Instant;

use shared::models::StreamChunk;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Live notification fanned out to attached subscribers.
#[derive(Debug, Clone)]
pub(crate) enum StreamSignal {
    /// A chunk was durably appended.
    Chunk(StreamChunk),
    /// The stream finished; no further chunks will arrive.
    Complete,
}

/// Bookkeeping for a stream that still has a producer attached: the
/// externally-owned cancellation handle, the live notifier, the per-stream
/// mutation gate, and the activity clock the governor evicts by.
#[derive(Debug)]
pub(crate) struct ActiveStream {
    cancel: Option<CancellationToken>,
    signals: broadcast::Sender<StreamSignal>,
    gate: AsyncMutex<()>,
    last_active: Mutex<Instant>,
    assistant_message_id: Mutex<Option<Uuid>>,
}

impl ActiveStream {
    pub(crate) fn new(channel_capacity: usize, cancel: Option<CancellationToken>) -> Self {
        let (signals, _) = broadcast::channel(channel_capacity);
        Self {
            cancel,
            signals,
            gate: AsyncMutex::new(()),
            last_active: Mutex::new(Instant::now()),
            assistant_message_id: Mutex::new(None),
        }
    }

    /// Serializes mutating operations for this stream. The guard must be
    /// held across the store round-trip so concurrent callers observe a
    /// total order of effects.
    pub(crate) async fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    pub(crate) fn subscribe_signals(&self) -> broadcast::Receiver<StreamSignal> {
        self.signals.subscribe()
    }

    pub(crate) fn notify_chunk(&self, chunk: StreamChunk) {
        // A send error only means no subscriber is attached right now.
        let _ = self.signals.send(StreamSignal::Chunk(chunk));
    }

    pub(crate) fn notify_complete(&self) {
        let _ = self.signals.send(StreamSignal::Complete);
    }

    /// Fires the cancellation handle, if the producer supplied one.
    /// Advisory: the producer decides when to actually halt.
    pub(crate) fn cancel(&self) {
        if let Some(token) = &self.cancel {
            token.cancel();
        }
    }

    pub(crate) fn touch(&self) {
        *self
            .last_active
            .lock()
            .expect("active stream clock poisoned") = Instant::now();
    }

    pub(crate) fn last_active(&self) -> Instant {
        *self
            .last_active
            .lock()
            .expect("active stream clock poisoned")
    }

    pub(crate) fn set_assistant_message_id(&self, id: Uuid) {
        *self
            .assistant_message_id
            .lock()
            .expect("assistant message id mutex poisoned") = Some(id);
    }

    pub(crate) fn assistant_message_id(&self) -> Option<Uuid> {
        *self
            .assistant_message_id
            .lock()
            .expect("assistant message id mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signals_reach_every_subscriber() {
        let control = ActiveStream::new(8, None);
        let mut first = control.subscribe_signals();
        let mut second = control.subscribe_signals();

        control.notify_chunk(StreamChunk::new(0, "a"));
        control.notify_complete();

        for receiver in [&mut first, &mut second] {
            assert!(matches!(
                receiver.recv().await.unwrap(),
                StreamSignal::Chunk(chunk) if chunk.seq == 0
            ));
            assert!(matches!(
                receiver.recv().await.unwrap(),
                StreamSignal::Complete
            ));
        }
    }

    #[tokio::test]
    async fn cancel_fires_the_external_token() {
        let token = CancellationToken::new();
        let control = ActiveStream::new(8, Some(token.clone()));

        control.cancel();

        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_without_token_is_a_no_op() {
        let control = ActiveStream::new(8, None);
        control.cancel();
    }

    #[tokio::test]
    async fn touch_advances_the_activity_clock() {
        let control = ActiveStream::new(8, None);
        let initial = control.last_active();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        control.touch();

        assert!(control.last_active() > initial);
    }
}
