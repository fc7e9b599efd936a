//! Command handlers for duckctl
//!
//! - Session: load a source, write a result server-side, clear a session
//! - Query: stream results from a session or from a one-shot run

pub mod query;
pub mod session;

use clap::ValueEnum;
use duckstream_proto::duckstream::{Compression, SourceFormat};

/// Source format argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Csv,
    Parquet,
}

/// Parquet codec argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompressionArg {
    Zstd,
    Gzip,
    Snappy,
    Uncompressed,
}

/// `None` lets the server infer the format from the file extension.
pub fn source_format(format: Option<FormatArg>) -> i32 {
    let format = match format {
        None => SourceFormat::Unspecified,
        Some(FormatArg::Csv) => SourceFormat::Csv,
        Some(FormatArg::Parquet) => SourceFormat::Parquet,
    };
    format as i32
}

/// `None` uses the server's default codec for the call.
pub fn compression(codec: Option<CompressionArg>) -> i32 {
    let codec = match codec {
        None => Compression::Unspecified,
        Some(CompressionArg::Zstd) => Compression::Zstd,
        Some(CompressionArg::Gzip) => Compression::Gzip,
        Some(CompressionArg::Snappy) => Compression::Snappy,
        Some(CompressionArg::Uncompressed) => Compression::Uncompressed,
    };
    codec as i32
}
