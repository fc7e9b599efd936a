//! Error Types for duckstream
//!
//! Every pipeline step returns `Result<T>` aliased to `Result<T, Error>`. The
//! variants line up with the stage that failed so the RPC layer can pick a
//! status code without inspecting messages.
//!
//! ## Error Categories
//!
//! ### Session Errors
//! - `InvalidSession`: backing file absent or identifier malformed
//!
//! ### Engine Errors
//! - `EngineOpen`: DuckDB could not open/initialise the session file
//! - `Query`: statement or cursor failure while reading results
//!
//! ### Pipeline Errors
//! - `Download` / `Ingest`: the source could not be fetched or loaded
//! - `Transform`: the view over the loaded table could not be created
//! - `Export`: DuckDB could not write the Parquet artifact
//! - `Encode`: a record batch could not be written as Arrow IPC
//! - `Stream`: the outbound sink rejected a chunk (client went away)
//! - `Task`: the blocking engine task panicked or was cancelled
//!
//! ### Request Errors
//! - `EncryptionUnavailable`: encrypted export requested, no key configured
//! - `InvalidArgument`: request field missing or malformed
//!
//! ### Startup Errors
//! - `HttpClient`: the download client could not be constructed

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("could not initialize engine: {0}")]
    EngineOpen(String),

    #[error("could not download '{url}': {message}")]
    Download { url: String, message: String },

    #[error("could not load the source into table '{table}': {message}")]
    Ingest { table: String, message: String },

    #[error("could not create view: {0}")]
    Transform(String),

    #[error("could not execute the query: {0}")]
    Query(String),

    #[error("could not export result as parquet: {0}")]
    Export(String),

    #[error("could not encode record batch: {0}")]
    Encode(String),

    #[error("could not stream the response: {0}")]
    Stream(String),

    #[error("engine task failed: {0}")]
    Task(String),

    #[error("could not build HTTP client: {0}")]
    HttpClient(String),

    #[error("encrypted export requested but no encryption key is configured")]
    EncryptionUnavailable,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
