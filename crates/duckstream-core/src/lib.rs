//! duckstream core
//!
//! Session-scoped DuckDB execution: ingest a CSV/Parquet source into a
//! per-session database file, define a result view over it and stream that
//! result back in bounded chunks, either as Arrow IPC or as an exported
//! Parquet file.

pub mod chunk;
pub mod chunker;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod ingest;
pub mod pipeline;
pub mod session;
pub mod transform;

pub use chunk::{Chunk, ChunkSink, SinkClosed, StreamSummary};
pub use config::{ConfigError, EngineSettings, ServerConfig, StreamSettings};
pub use error::{Error, Result};
pub use export::{Compression, ExportOptions};
pub use ingest::{DataSource, IngestStep, SourceFormat};
pub use pipeline::{Outcome, Output, Pipeline, Plan, SessionMode};
pub use session::SessionStore;
pub use transform::Transform;
