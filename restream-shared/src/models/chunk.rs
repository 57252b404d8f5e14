use serde::{Deserialize, Serialize};

/// One unit of streamed output with a per-stream monotonic sequence number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamChunk {
    /// Sequence number, assigned from 0 per stream; never reused or reordered.
    pub seq: u64,
    /// Chunk text emitted by the producer.
    pub value: String,
    /// UTF-8 byte length of `value`.
    pub bytes: u32,
}

impl StreamChunk {
    /// Builds a chunk for `value` at `seq`, computing the byte accounting.
    #[must_use]
    pub fn new(seq: u64, value: impl Into<String>) -> Self {
        let value = value.into();
        let bytes = u32::try_from(value.len()).unwrap_or(u32::MAX);
        Self { seq, value, bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_chunk_round_trip() {
        let chunk = StreamChunk::new(3, "hello");

        let serialized = serde_json::to_string(&chunk).unwrap();
        let deserialized: StreamChunk = serde_json::from_str(&serialized).unwrap();

        assert_eq!(chunk, deserialized);
    }

    #[test]
    fn bytes_count_utf8_length() {
        let chunk = StreamChunk::new(0, "héllo");
        assert_eq!(chunk.bytes, 6);
    }
}
