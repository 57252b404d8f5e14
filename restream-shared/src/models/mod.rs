pub mod chunk;
pub mod chunk_log;
pub mod timestamp;

pub use chunk::StreamChunk;
pub use chunk_log::ChunkLog;
pub use timestamp::Timestamp;
