//! Chunks and chunk sinks
//!
//! A [`Chunk`] is one frame of a streamed result. Both streamers number
//! chunks from 1 without gaps and flag exactly one chunk, the final one, with
//! `is_last`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chunk {
    /// 1-based, contiguous within a stream
    pub sequence_number: u64,
    /// Rows (columnar streams) or bytes (file streams)
    pub count: u64,
    /// Arrow IPC streams (columnar) or a single file window (file)
    pub data: Vec<Vec<u8>>,
    pub is_last: bool,
}

/// The receiving side went away.
#[derive(Debug, Error)]
#[error("sink closed: {0}")]
pub struct SinkClosed(pub String);

/// Destination for outbound chunks.
///
/// `send` may block until the consumer has room; that is the only
/// backpressure the streamers get.
pub trait ChunkSink {
    fn send(&mut self, chunk: Chunk) -> Result<(), SinkClosed>;
}

impl ChunkSink for Vec<Chunk> {
    fn send(&mut self, chunk: Chunk) -> Result<(), SinkClosed> {
        self.push(chunk);
        Ok(())
    }
}

/// Totals for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub chunks: u64,
    /// Rows or bytes, matching [`Chunk::count`]
    pub total: u64,
}
