//! File-Export Streamer
//!
//! Writes a view to a Parquet file through DuckDB, then streams the file back
//! in fixed-size byte windows.
//!
//! ## Windows
//!
//! Each window is filled up to `chunk_bytes` (or end of file), so a short OS
//! read never produces a short frame in the middle of the file. The file
//! length is taken when the file is opened and the window that reaches it is
//! flagged `is_last`; no trailing zero-byte read is needed to find the end.
//!
//! ## Encryption
//!
//! With `encrypt` set, the Parquet footer is encrypted with the process-wide
//! key registered on every engine under [`PARQUET_KEY_NAME`]. Readers need the
//! same key.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::chunk::{Chunk, ChunkSink, StreamSummary};
use crate::config::PARQUET_KEY_NAME;
use crate::engine::{quote_literal, Engine};
use crate::error::{Error, Result};

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Zstd,
    Gzip,
    Snappy,
    Uncompressed,
}

impl Compression {
    fn as_sql(self) -> &'static str {
        match self {
            Compression::Zstd => "zstd",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Uncompressed => "uncompressed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub compression: Compression,
    pub encrypt: bool,
}

impl ExportOptions {
    /// Default for exports written to a caller-chosen path.
    pub fn file_default() -> Self {
        Self {
            compression: Compression::Zstd,
            encrypt: false,
        }
    }

    /// Default for exports streamed back over the wire.
    pub fn stream_default() -> Self {
        Self {
            compression: Compression::Gzip,
            encrypt: false,
        }
    }
}

/// `COPY <view> TO '<path>' (FORMAT PARQUET, ...)`
pub fn export_to_file(
    engine: &Engine,
    view: &str,
    path: &Path,
    options: &ExportOptions,
) -> Result<()> {
    if options.encrypt && !engine.encryption_enabled() {
        return Err(Error::EncryptionUnavailable);
    }

    let mut copy_options = vec![
        "FORMAT PARQUET".to_string(),
        format!("COMPRESSION {}", quote_literal(options.compression.as_sql())),
    ];
    if options.encrypt {
        copy_options.push(format!(
            "ENCRYPTION_CONFIG {{footer_key: {}}}",
            quote_literal(PARQUET_KEY_NAME)
        ));
    }

    let sql = format!(
        "COPY {} TO {} ({});",
        view,
        quote_literal(&path.to_string_lossy()),
        copy_options.join(", ")
    );
    engine.exec(&sql).map_err(|e| Error::Export(e.to_string()))?;

    info!(
        path = %path.display(),
        compression = options.compression.as_sql(),
        encrypt = options.encrypt,
        "Exported result as parquet"
    );
    Ok(())
}

/// Stream the bytes of `path` in windows of `chunk_bytes`.
pub fn stream_file<S>(path: &Path, chunk_bytes: usize, sink: &mut S) -> Result<StreamSummary>
where
    S: ChunkSink + ?Sized,
{
    if chunk_bytes == 0 {
        return Err(Error::InvalidArgument(
            "file chunk size must be at least 1 byte".to_string(),
        ));
    }

    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut summary = StreamSummary::default();

    if len == 0 {
        sink.send(Chunk {
            sequence_number: 1,
            is_last: true,
            ..Default::default()
        })
        .map_err(|e| Error::Stream(e.to_string()))?;
        return Ok(StreamSummary { chunks: 1, total: 0 });
    }

    loop {
        let mut window = vec![0u8; chunk_bytes];
        let filled = read_window(&mut file, &mut window)?;
        if filled == 0 {
            // File shrank after open
            warn!(path = %path.display(), expected = len, read = summary.total, "Export file ended early");
            return Err(Error::Stream(format!(
                "export file truncated at {} of {} bytes",
                summary.total, len
            )));
        }
        window.truncate(filled);

        summary.chunks += 1;
        summary.total += filled as u64;
        let is_last = summary.total >= len;

        sink.send(Chunk {
            sequence_number: summary.chunks,
            count: filled as u64,
            data: vec![window],
            is_last,
        })
        .map_err(|e| Error::Stream(e.to_string()))?;
        debug!(
            sequence_number = summary.chunks,
            bytes = filled,
            is_last,
            "Sent file chunk"
        );

        if is_last {
            return Ok(summary);
        }
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn read_window<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A transient export file, removed when dropped.
#[derive(Debug)]
pub struct ExportArtifact {
    path: PathBuf,
}

impl ExportArtifact {
    /// Reserve a unique `export-<uuid>.parquet` path under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("export-{}.parquet", uuid::Uuid::new_v4())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExportArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed export artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove export artifact"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SinkClosed;
    use crate::config::EngineSettings;
    use crate::transform::{define_view, Transform, RESULT_VIEW};

    const KEY: &str = "01234567891123450123456789112345";

    fn engine_in(dir: &Path, key: Option<&str>) -> Engine {
        let spill = dir.join("spill");
        std::fs::create_dir_all(&spill).unwrap();
        let mut settings = EngineSettings::new(spill);
        if let Some(key) = key {
            settings = settings.with_encryption_key(key);
        }
        let engine = Engine::open(&dir.join("export.duckdb"), &settings).unwrap();
        define_view(
            &engine,
            RESULT_VIEW,
            &Transform::Sql("SELECT range AS id, 'row-' || range AS label FROM range(5000)".to_string()),
        )
        .unwrap();
        engine
    }

    fn count_parquet(engine: &Engine, path: &Path, encrypted: bool) -> i64 {
        let reader = if encrypted {
            format!(
                "read_parquet({}, encryption_config = {{footer_key: '{}'}})",
                quote_literal(&path.to_string_lossy()),
                PARQUET_KEY_NAME
            )
        } else {
            format!("read_parquet({})", quote_literal(&path.to_string_lossy()))
        };
        engine
            .query_rows(&format!("SELECT COUNT(*) FROM {}", reader), |row| {
                row.get::<_, i64>(0)
            })
            .unwrap()[0]
    }

    #[test]
    fn test_export_each_codec() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path(), None);

        for codec in [
            Compression::Zstd,
            Compression::Gzip,
            Compression::Snappy,
            Compression::Uncompressed,
        ] {
            let path = temp.path().join(format!("{}.parquet", codec.as_sql()));
            let options = ExportOptions {
                compression: codec,
                encrypt: false,
            };
            export_to_file(&engine, RESULT_VIEW, &path, &options).unwrap();
            assert_eq!(count_parquet(&engine, &path, false), 5000);
        }
    }

    #[test]
    fn test_encrypted_export_needs_key_to_read() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path(), Some(KEY));
        let path = temp.path().join("secret.parquet");
        let options = ExportOptions {
            compression: Compression::Gzip,
            encrypt: true,
        };

        export_to_file(&engine, RESULT_VIEW, &path, &options).unwrap();
        assert_eq!(count_parquet(&engine, &path, true), 5000);

        let plain = engine.query_rows(
            &format!(
                "SELECT COUNT(*) FROM read_parquet({})",
                quote_literal(&path.to_string_lossy())
            ),
            |row| row.get::<_, i64>(0),
        );
        assert!(plain.is_err());
    }

    #[test]
    fn test_encrypt_without_key_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path(), None);
        let path = temp.path().join("x.parquet");
        let options = ExportOptions {
            compression: Compression::Zstd,
            encrypt: true,
        };

        let err = export_to_file(&engine, RESULT_VIEW, &path, &options).unwrap_err();
        assert!(matches!(err, Error::EncryptionUnavailable));
        assert!(!path.exists());
    }

    #[test]
    fn test_export_unknown_view_is_export_error() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path(), None);
        let err = export_to_file(
            &engine,
            "v_missing",
            &temp.path().join("x.parquet"),
            &ExportOptions::file_default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Export(_)));
    }

    #[test]
    fn test_stream_file_windows_concatenate_to_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("blob.bin");
        let bytes: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &bytes).unwrap();

        let mut sink: Vec<Chunk> = Vec::new();
        let summary = stream_file(&path, 4096, &mut sink).unwrap();

        assert_eq!(summary, StreamSummary { chunks: 3, total: 10_000 });
        let sizes: Vec<u64> = sink.iter().map(|c| c.count).collect();
        assert_eq!(sizes, vec![4096, 4096, 1808]);
        let seqs: Vec<u64> = sink.iter().map(|c| c.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(
            sink.iter().filter(|c| c.is_last).count(),
            1,
            "exactly one terminal chunk"
        );
        assert!(sink[2].is_last);

        let joined: Vec<u8> = sink.iter().flat_map(|c| c.data[0].clone()).collect();
        assert_eq!(joined, bytes);
    }

    #[test]
    fn test_stream_file_exact_multiple_flags_last_window() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("even.bin");
        std::fs::write(&path, vec![7u8; 2048]).unwrap();

        let mut sink: Vec<Chunk> = Vec::new();
        stream_file(&path, 1024, &mut sink).unwrap();
        assert_eq!(sink.len(), 2);
        assert!(!sink[0].is_last);
        assert!(sink[1].is_last);
    }

    #[test]
    fn test_stream_missing_file_is_io_error() {
        let temp = tempfile::tempdir().unwrap();
        let mut sink: Vec<Chunk> = Vec::new();
        let err = stream_file(&temp.path().join("nope"), 16, &mut sink).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_stream_file_sink_failure() {
        struct Closed;
        impl ChunkSink for Closed {
            fn send(&mut self, _chunk: Chunk) -> std::result::Result<(), SinkClosed> {
                Err(SinkClosed("gone".to_string()))
            }
        }

        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("blob.bin");
        std::fs::write(&path, b"hello").unwrap();
        let err = stream_file(&path, 2, &mut Closed).unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[test]
    fn test_artifact_removed_on_drop() {
        let temp = tempfile::tempdir().unwrap();
        let artifact = ExportArtifact::in_dir(temp.path());
        let path = artifact.path().to_path_buf();
        std::fs::write(&path, b"parquet").unwrap();

        drop(artifact);
        assert!(!path.exists());
        // Never-written artifacts drop quietly
        drop(ExportArtifact::in_dir(temp.path()));
    }

    #[test]
    fn test_read_window_fills_across_short_reads() {
        struct Trickle<'a>(&'a [u8]);
        impl Read for Trickle<'_> {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0[0];
                self.0 = &self.0[1..];
                Ok(1)
            }
        }

        let mut reader = Trickle(b"abcdefg");
        let mut buf = [0u8; 5];
        assert_eq!(read_window(&mut reader, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"abcde");
        assert_eq!(read_window(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_window(&mut reader, &mut buf).unwrap(), 0);
    }
}
