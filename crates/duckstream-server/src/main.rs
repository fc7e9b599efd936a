//! duckstream gRPC Server
//!
//! Main entry point for the duckstream data transformation server.
//!
//! ## Overview
//! Callers load CSV or Parquet sources (local paths or http(s) URLs) into
//! private DuckDB session files, run SQL over them and receive results as a
//! stream of bounded chunks: Arrow IPC record batches or the bytes of an
//! exported Parquet file.
//!
//! ## Configuration
//! All configuration is done via environment variables. A `.env` file in the
//! working directory is loaded first when present.
//!
//! ### Required
//! - `HOST`, `PORT`: listen address (`HOST` may be an IP or a hostname)
//! - `TEMP_DOWNLOAD_DIR`: remote downloads and export artifacts
//! - `TEMP_DUCKDB_DIR`: DuckDB spill directory
//! - `DUCKDB_DIR`: session database files
//! - `CHUNK_SIZE`: rows per Arrow chunk
//! - `FILE_CHUNK_SIZE`: bytes per file chunk
//!
//! ### Optional
//! - `DUCKDB_MEMORY_LIMIT` (default: 2GB)
//! - `PARQUET_ENCRYPTION_KEY`: enables encrypted exports
//! - `STREAM_CHANNEL_CAPACITY` (default: 2)
//! - `DOWNLOAD_TIMEOUT_SECS` (default: 300)
//!
//! ## gRPC Reflection
//! ```bash
//! grpcurl -plaintext localhost:9000 list
//! grpcurl -plaintext -d '{"session_id": "..."}' localhost:9000 duckstream.DataTransform/Clear
//! ```
//!
//! ## Logging
//! Logging is controlled via the `RUST_LOG` environment variable:
//! ```bash
//! RUST_LOG=debug cargo run -p duckstream-server    # Per-chunk logs
//! RUST_LOG=info cargo run -p duckstream-server     # Standard logs (default)
//! ```

use duckstream_core::{Pipeline, ServerConfig};
use duckstream_server::{pb::data_transform_server::DataTransformServer, DataTransformService};
use std::sync::Arc;
use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Configuration; any missing or malformed value stops startup here
    let config = ServerConfig::from_env()?;
    config.ensure_dirs()?;
    let bind_addr = duckstream_server::resolve_bind_addr(&config.bind_addr()).await?;

    tracing::info!("duckstream server starting on {}", bind_addr);
    tracing::info!("Configuration:");
    tracing::info!("  Sessions: {}", config.session_dir.display());
    tracing::info!("  Downloads: {}", config.download_dir.display());
    tracing::info!("  Spill: {}", config.engine.temp_dir.display());
    tracing::info!("  Memory limit: {}", config.engine.memory_limit);
    tracing::info!(
        "  Chunking: {} rows / {} bytes (buffer {} chunks)",
        config.stream.chunk_rows,
        config.stream.file_chunk_bytes,
        config.stream.channel_capacity
    );
    tracing::info!(
        "  Encrypted exports: {}",
        if config.engine.encryption_key.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    let pipeline = Pipeline::new(Arc::new(config))?;
    let service = DataTransformService::new(pipeline);

    // Set up reflection service
    let reflection_service = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(duckstream_proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            },
        }

        let _ = shutdown_tx.send(());
    });

    // Start server with reflection and graceful shutdown
    Server::builder()
        .add_service(DataTransformServer::new(service))
        .add_service(reflection_service)
        .serve_with_shutdown(bind_addr, async {
            shutdown_rx.await.ok();
        })
        .await?;

    tracing::info!("duckstream server shut down gracefully");

    Ok(())
}
