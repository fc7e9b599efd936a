//! Stream reassembly for duckctl
//!
//! Turns a `QueryChunk` stream back into something usable:
//! - Arrow streams into record batches (printed or saved as an Arrow IPC file)
//! - File streams into the exported Parquet file on local disk
//!
//! Every stream is checked as it arrives: sequence numbers must run 1, 2, 3...
//! and the stream must end with a chunk flagged `is_last`.

use anyhow::{bail, Context, Result};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use duckstream_proto::duckstream::QueryChunk;
use std::io::Cursor;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_stream::{Stream, StreamExt};
use tonic::{Status, Streaming};

/// Checks chunk ordering and termination.
#[derive(Debug, Default)]
pub struct ChunkTracker {
    received: u64,
    finished: bool,
}

impl ChunkTracker {
    pub fn accept(&mut self, chunk: &QueryChunk) -> Result<()> {
        if self.finished {
            bail!(
                "Received chunk {} after the final chunk",
                chunk.sequence_number
            );
        }
        let expected = self.received + 1;
        if chunk.sequence_number != expected {
            bail!(
                "Out-of-order chunk: expected {}, got {}",
                expected,
                chunk.sequence_number
            );
        }
        self.received = expected;
        self.finished = chunk.is_last;
        Ok(())
    }

    pub fn finish(&self) -> Result<u64> {
        if !self.finished {
            bail!(
                "Stream ended after {} chunks without a final chunk",
                self.received
            );
        }
        Ok(self.received)
    }
}

/// Decode every Arrow IPC entry of a chunk.
pub fn decode_chunk(chunk: &QueryChunk) -> Result<Vec<RecordBatch>> {
    let mut batches = Vec::new();
    for entry in &chunk.data {
        let reader = StreamReader::try_new(Cursor::new(entry.as_slice()), None)
            .context("Invalid Arrow IPC stream in chunk")?;
        for batch in reader {
            batches.push(batch.context("Failed to decode record batch")?);
        }
    }
    Ok(batches)
}

/// Drain an Arrow result stream into record batches.
pub async fn collect_batches(mut stream: Streaming<QueryChunk>) -> Result<Vec<RecordBatch>> {
    let mut tracker = ChunkTracker::default();
    let mut batches = Vec::new();

    while let Some(chunk) = stream.message().await.context("Stream failed")? {
        tracker.accept(&chunk)?;
        let decoded = decode_chunk(&chunk)?;
        let rows: usize = decoded.iter().map(|b| b.num_rows()).sum();
        if rows as u64 != chunk.count {
            bail!(
                "Chunk {} announced {} rows but carried {}",
                chunk.sequence_number,
                chunk.count,
                rows
            );
        }
        batches.extend(decoded);
    }

    tracker.finish()?;
    Ok(batches)
}

/// Write batches as an Arrow IPC file. Returns the number of rows written.
pub fn write_arrow_file(path: &Path, batches: &[RecordBatch]) -> Result<usize> {
    let Some(first) = batches.first() else {
        bail!("Result is empty, nothing to write to {}", path.display());
    };

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = FileWriter::try_new(file, &first.schema())?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.finish()?;

    Ok(batches.iter().map(|b| b.num_rows()).sum())
}

/// Drain a file stream into `path`. Returns the number of bytes written.
///
/// A partial file is removed when the stream fails or ends early.
pub async fn save_file_stream<S>(stream: S, path: &Path) -> Result<u64>
where
    S: Stream<Item = Result<QueryChunk, Status>>,
{
    let result = write_file_stream(stream, path).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(path).await;
    }
    result
}

async fn write_file_stream<S>(stream: S, path: &Path) -> Result<u64>
where
    S: Stream<Item = Result<QueryChunk, Status>>,
{
    tokio::pin!(stream);
    let mut tracker = ChunkTracker::default();
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Stream failed")?;
        tracker.accept(&chunk)?;
        for window in &chunk.data {
            file.write_all(window).await?;
            written += window.len() as u64;
        }
    }
    file.flush().await?;

    tracker.finish()?;
    Ok(written)
}
