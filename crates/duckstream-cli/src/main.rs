//! duckstream CLI (duckctl)
//!
//! Command-line tool for interacting with a duckstream server via gRPC.
//!
//! ## Overview
//!
//! `duckctl` drives every `DataTransform` RPC:
//! - **Sessions**: load a CSV/Parquet source, clear a session
//! - **Queries**: stream a result as a table or an Arrow IPC file
//! - **Exports**: stream a Parquet export to a local file, or have the server
//!   write it on its side
//! - **One-shot runs**: load, query and stream without keeping a session
//!
//! ## Quick Start
//!
//! ```bash
//! export DUCKSTREAM_ADDR=http://localhost:9000
//!
//! # Load a file and keep the session
//! duckctl load ./trips.csv --table trips --job-id nightly
//!
//! # Query it
//! duckctl query <session-id> "SELECT zone, COUNT(*) FROM trips GROUP BY zone"
//!
//! # Export it as Parquet to a local file
//! duckctl export <session-id> "SELECT * FROM trips" --output trips.parquet
//!
//! # Drop the session
//! duckctl clear <session-id>
//!
//! # Or do it all at once
//! duckctl run ./trips.csv --table trips --query "SELECT COUNT(*) FROM trips"
//! ```
//!
//! ## Configuration
//!
//! - `DUCKSTREAM_ADDR`: Server address (default: http://localhost:9000)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use duckstream_proto::duckstream::data_transform_client::DataTransformClient;
use std::path::PathBuf;
use tonic::transport::Channel;

mod commands;
mod stream;

use commands::query::ExportArgs;
use commands::{CompressionArg, FormatArg};

#[derive(Parser)]
#[command(name = "duckctl")]
#[command(about = "duckstream command-line tool", long_about = None)]
struct Cli {
    /// Server address (gRPC)
    #[arg(
        short,
        long,
        env = "DUCKSTREAM_ADDR",
        default_value = "http://localhost:9000"
    )]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a CSV or Parquet source into a new session
    Load {
        /// Local path (on the server) or http(s) URL
        file_path: String,
        /// Table to create
        #[arg(short, long)]
        table: String,
        /// Job identifier the session id is derived from
        #[arg(short, long)]
        job_id: String,
        /// Source format (default: inferred from the extension)
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,
    },
    /// Stream a query over a session
    Query {
        /// Session id returned by `load`
        session_id: String,
        /// SQL to run
        query: String,
        /// Save as an Arrow IPC file instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Stream a query over a session as a Parquet file
    Export {
        /// Session id returned by `load`
        session_id: String,
        /// SQL to run
        query: String,
        /// Local file to write
        #[arg(short, long)]
        output: PathBuf,
        /// Parquet codec (default: gzip)
        #[arg(short, long, value_enum)]
        compression: Option<CompressionArg>,
        /// Encrypt the Parquet footer with the server's key
        #[arg(long)]
        encrypt: bool,
    },
    /// Have the server write a query result to a Parquet file on its side
    Write {
        /// Session id returned by `load`
        session_id: String,
        /// SQL to run
        query: String,
        /// Server-side path
        #[arg(short, long)]
        path: String,
        /// Parquet codec (default: zstd)
        #[arg(short, long, value_enum)]
        compression: Option<CompressionArg>,
        /// Encrypt the Parquet footer with the server's key
        #[arg(long)]
        encrypt: bool,
    },
    /// Delete a session
    Clear {
        /// Session id returned by `load`
        session_id: String,
    },
    /// Load, query and stream in one call without keeping a session
    Run {
        /// Local path (on the server) or http(s) URL
        file_path: String,
        /// Table to create
        #[arg(short, long)]
        table: String,
        /// SQL to run (default: the whole table)
        #[arg(short, long)]
        query: Option<String>,
        /// Source format (default: inferred from the extension)
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,
        /// Arrow IPC file, or Parquet file with --export
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Stream a Parquet export instead of Arrow batches
        #[arg(long)]
        export: bool,
        /// Parquet codec for --export (default: gzip)
        #[arg(short, long, value_enum)]
        compression: Option<CompressionArg>,
        /// Encrypt the Parquet footer with the server's key
        #[arg(long)]
        encrypt: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let channel = Channel::from_shared(cli.server.clone())
        .context("Invalid server address")?
        .connect()
        .await
        .with_context(|| format!("Failed to connect to server at {}", cli.server))?;

    let mut client = DataTransformClient::new(channel);

    match cli.command {
        Commands::Load {
            file_path,
            table,
            job_id,
            format,
        } => commands::session::handle_load(&mut client, file_path, table, job_id, format).await?,
        Commands::Query {
            session_id,
            query,
            output,
        } => commands::query::handle_query(&mut client, session_id, query, output).await?,
        Commands::Export {
            session_id,
            query,
            output,
            compression,
            encrypt,
        } => {
            let export = ExportArgs {
                codec: compression,
                encrypt,
            };
            commands::query::handle_export(&mut client, session_id, query, output, export).await?
        }
        Commands::Write {
            session_id,
            query,
            path,
            compression,
            encrypt,
        } => {
            commands::session::handle_write(&mut client, session_id, query, path, compression, encrypt)
                .await?
        }
        Commands::Clear { session_id } => {
            commands::session::handle_clear(&mut client, session_id).await?
        }
        Commands::Run {
            file_path,
            table,
            query,
            format,
            output,
            export,
            compression,
            encrypt,
        } => {
            let export = export.then_some(ExportArgs {
                codec: compression,
                encrypt,
            });
            commands::query::handle_run(&mut client, file_path, table, query, format, output, export)
                .await?
        }
    }

    Ok(())
}
