//! Chunked Streamer
//!
//! Drains a record-batch cursor into fixed-size chunks of Arrow IPC.
//!
//! ## Chunk boundaries
//!
//! Engine batches rarely line up with the requested chunk size, so batches
//! are sliced at the boundary (zero-copy) and the remainder carried into the
//! next chunk. Every chunk therefore holds exactly `chunk_rows` rows except
//! the final one:
//!
//! ```text
//! batches:  [2048      ][452 ]          chunk_rows = 1000
//! chunks:   [1000][1000][48+452]
//!             #1    #2     #3 (is_last)
//! ```
//!
//! Termination is signalled explicitly: after assembling a chunk the cursor
//! is peeked (skipping empty batches) and `is_last` is set when nothing is
//! left. An empty result produces a single empty chunk with `is_last`.
//!
//! ## Memory
//!
//! Each piece is serialised as its own IPC stream (schema + batch) and the
//! batch is dropped right after, so at most one chunk plus one engine batch
//! is held at a time regardless of result size.

use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use std::iter::Peekable;
use tracing::debug;

use crate::chunk::{Chunk, ChunkSink, StreamSummary};
use crate::error::{Error, Result};

/// Serialise one batch as a self-describing Arrow IPC stream.
pub fn encode_batch(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut writer = StreamWriter::try_new(&mut buf, &batch.schema())
        .map_err(|e| Error::Encode(e.to_string()))?;
    writer
        .write(batch)
        .map_err(|e| Error::Encode(e.to_string()))?;
    writer.finish().map_err(|e| Error::Encode(e.to_string()))?;
    drop(writer);
    Ok(buf)
}

/// Stream `cursor` into `sink` in chunks of `chunk_rows` rows.
pub fn stream_columnar<I, S>(cursor: I, chunk_rows: usize, sink: &mut S) -> Result<StreamSummary>
where
    I: Iterator<Item = Result<RecordBatch>>,
    S: ChunkSink + ?Sized,
{
    if chunk_rows == 0 {
        return Err(Error::InvalidArgument(
            "chunk size must be at least 1 row".to_string(),
        ));
    }

    let mut cursor = cursor.peekable();
    let mut carry: Option<RecordBatch> = None;
    let mut summary = StreamSummary::default();

    loop {
        let mut data = Vec::new();
        let mut rows = 0usize;

        while rows < chunk_rows {
            let batch = match carry.take() {
                Some(batch) => batch,
                None => match cursor.next() {
                    Some(batch) => batch?,
                    None => break,
                },
            };

            let take = (chunk_rows - rows).min(batch.num_rows());
            if take == 0 {
                continue;
            }
            if take < batch.num_rows() {
                carry = Some(batch.slice(take, batch.num_rows() - take));
            }
            data.push(encode_batch(&batch.slice(0, take))?);
            rows += take;
        }

        let is_last = carry.is_none() && !has_more(&mut cursor);
        summary.chunks += 1;
        summary.total += rows as u64;

        let chunk = Chunk {
            sequence_number: summary.chunks,
            count: rows as u64,
            data,
            is_last,
        };
        sink.send(chunk).map_err(|e| Error::Stream(e.to_string()))?;
        debug!(
            sequence_number = summary.chunks,
            rows, is_last, "Sent columnar chunk"
        );

        if is_last {
            return Ok(summary);
        }
    }
}

/// Whether the cursor still has a non-empty batch (or an error) pending.
fn has_more<I>(cursor: &mut Peekable<I>) -> bool
where
    I: Iterator<Item = Result<RecordBatch>>,
{
    loop {
        match cursor.peek() {
            None => return false,
            Some(Ok(batch)) if batch.num_rows() == 0 => {
                cursor.next();
            }
            Some(_) => return true,
        }
    }
}
