//! Stream brokering services built over the chunk log store.

pub(crate) mod active_stream;
pub mod replay;
pub mod stream_broker;

pub use stream_broker::StreamBroker;
