#![cfg_attr(not(test), forbid(unsafe_code))]

//! # restream broker
//!
//! A resumable stream broker sitting between a long-running producer (an AI
//! generation loop) and any number of possibly-disconnecting consumers. One
//! producer appends ordered text chunks to a stream; consumers subscribe at
//! any time and first replay the buffered window, then follow live output.
//! Per-stream and global caps bound memory, and idle streams are reclaimed
//! in the background.

pub mod error;
pub mod services;
pub mod store;

pub use error::{BrokerError, BrokerResult};
pub use services::replay::ChunkStream;
pub use services::stream_broker::{SharedStreamBroker, StreamBroker};
pub use store::{ChunkLogStore, InMemoryChunkStore};
