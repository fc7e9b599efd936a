//! Session commands: load, write, clear

use anyhow::{Context, Result};
use duckstream_proto::duckstream::{
    data_transform_client::DataTransformClient, ClearRequest, LoadRequest, WriteToFileRequest,
};
use tonic::transport::Channel;

use super::{compression, source_format, CompressionArg, FormatArg};

/// Loads a source into a new session and prints its id.
///
/// ## Example
/// ```bash
/// duckctl load ./trips.csv --table trips --job-id nightly
/// ```
pub async fn handle_load(
    client: &mut DataTransformClient<Channel>,
    file_path: String,
    table: String,
    job_id: String,
    format: Option<FormatArg>,
) -> Result<()> {
    let request = LoadRequest {
        job_id,
        table_name: table.clone(),
        file_path: file_path.clone(),
        format: source_format(format),
    };

    let response = client
        .load(request)
        .await
        .with_context(|| format!("Failed to load {}", file_path))?
        .into_inner();

    println!("✅ Loaded {} rows into '{}'", response.row_count, table);
    println!("  Session: {}", response.session_id);
    Ok(())
}

/// Runs a query and has the server write the result to a Parquet file on its
/// own filesystem.
pub async fn handle_write(
    client: &mut DataTransformClient<Channel>,
    session_id: String,
    query: String,
    path: String,
    codec: Option<CompressionArg>,
    encrypt: bool,
) -> Result<()> {
    let request = WriteToFileRequest {
        session_id,
        query,
        file_export_path: path.clone(),
        compression: compression(codec),
        encrypt,
    };

    client
        .write_to_file(request)
        .await
        .context("Failed to write result")?;

    println!("✅ Result written to {} (server side)", path);
    Ok(())
}

pub async fn handle_clear(
    client: &mut DataTransformClient<Channel>,
    session_id: String,
) -> Result<()> {
    client
        .clear(ClearRequest {
            session_id: session_id.clone(),
        })
        .await
        .context("Failed to clear session")?;

    println!("✅ Session cleared: {}", session_id);
    Ok(())
}
