//! Streaming commands: query, export, run

use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use duckstream_proto::duckstream::{
    data_transform_client::DataTransformClient, ExportStreamRequest, LoadAndExportStreamRequest,
    LoadAndQueryStreamRequest, QueryStreamRequest,
};
use std::path::{Path, PathBuf};
use tonic::transport::Channel;

use super::{compression, source_format, CompressionArg, FormatArg};
use crate::stream::{collect_batches, save_file_stream, write_arrow_file};

/// Options shared by the export-style commands.
#[derive(Debug, Clone)]
pub struct ExportArgs {
    pub codec: Option<CompressionArg>,
    pub encrypt: bool,
}

/// Streams a query over an existing session.
///
/// Prints the result as a table, or saves it as an Arrow IPC file when
/// `output` is given.
pub async fn handle_query(
    client: &mut DataTransformClient<Channel>,
    session_id: String,
    query: String,
    output: Option<PathBuf>,
) -> Result<()> {
    let stream = client
        .query_stream(QueryStreamRequest { session_id, query })
        .await
        .context("Failed to start query")?
        .into_inner();

    let batches = collect_batches(stream).await?;
    emit_batches(&batches, output.as_deref())
}

/// Streams an exported Parquet file of a query over an existing session.
pub async fn handle_export(
    client: &mut DataTransformClient<Channel>,
    session_id: String,
    query: String,
    output: PathBuf,
    export: ExportArgs,
) -> Result<()> {
    let stream = client
        .export_stream(ExportStreamRequest {
            session_id,
            query,
            compression: compression(export.codec),
            encrypt: export.encrypt,
        })
        .await
        .context("Failed to start export")?
        .into_inner();

    let bytes = save_file_stream(stream, &output).await?;
    println!("✅ Saved {} bytes to {}", bytes, output.display());
    Ok(())
}

/// One-shot load, query and stream without keeping a session.
///
/// ## Example
/// ```bash
/// duckctl run https://host/trips.parquet --table trips \
///     --query "SELECT zone, COUNT(*) FROM trips GROUP BY zone"
/// duckctl run ./trips.csv --table trips --export --output trips.parquet
/// ```
pub async fn handle_run(
    client: &mut DataTransformClient<Channel>,
    file_path: String,
    table: String,
    query: Option<String>,
    format: Option<FormatArg>,
    output: Option<PathBuf>,
    export: Option<ExportArgs>,
) -> Result<()> {
    let query = query.unwrap_or_default();

    match export {
        Some(export) => {
            let output = output.context("--output is required with --export")?;
            let stream = client
                .load_and_export_stream(LoadAndExportStreamRequest {
                    file_path,
                    table_name: table,
                    query,
                    format: source_format(format),
                    compression: compression(export.codec),
                    encrypt: export.encrypt,
                })
                .await
                .context("Failed to start run")?
                .into_inner();

            let bytes = save_file_stream(stream, &output).await?;
            println!("✅ Saved {} bytes to {}", bytes, output.display());
        }
        None => {
            let stream = client
                .load_and_query_stream(LoadAndQueryStreamRequest {
                    file_path,
                    table_name: table,
                    query,
                    format: source_format(format),
                })
                .await
                .context("Failed to start run")?
                .into_inner();

            let batches = collect_batches(stream).await?;
            emit_batches(&batches, output.as_deref())?;
        }
    }

    Ok(())
}

fn emit_batches(batches: &[RecordBatch], output: Option<&Path>) -> Result<()> {
    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();

    match output {
        Some(path) => {
            write_arrow_file(path, batches)?;
            println!("✅ Saved {} rows to {}", rows, path.display());
        }
        None if rows == 0 => println!("(0 rows)"),
        None => {
            println!("{}", pretty_format_batches(batches)?);
            println!("({} rows)", rows);
        }
    }
    Ok(())
}
