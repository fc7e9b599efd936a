//! duckstream Protocol Buffer Definitions
//!
//! This crate contains the gRPC service definition and message types shared by
//! the duckstream server, the `duckctl` CLI and the integration tests.
//!
//! ## Services
//!
//! - **DataTransform**: session-scoped load / query / export API
//!   - Session: Load, Clear
//!   - Unary export: WriteToFile
//!   - Streaming: QueryStream, ExportStream
//!   - One-shot streaming: LoadAndQueryStream, LoadAndExportStream
//!
//! ## Usage
//!
//! ### Client-side
//!
//! ```ignore
//! use duckstream_proto::duckstream::{
//!     data_transform_client::DataTransformClient, QueryStreamRequest,
//! };
//!
//! let mut client = DataTransformClient::connect("http://localhost:9000").await?;
//! let mut stream = client
//!     .query_stream(QueryStreamRequest {
//!         session_id,
//!         query: "SELECT * FROM trips".to_string(),
//!     })
//!     .await?
//!     .into_inner();
//!
//! while let Some(chunk) = stream.message().await? {
//!     println!("chunk {} ({} rows)", chunk.sequence_number, chunk.count);
//!     if chunk.is_last {
//!         break;
//!     }
//! }
//! ```
//!
//! ### Server-side
//!
//! ```ignore
//! use duckstream_proto::duckstream::data_transform_server::{
//!     DataTransform, DataTransformServer,
//! };
//! ```

/// DataTransform service and messages.
pub mod duckstream {
    tonic::include_proto!("duckstream");
}

/// Encoded file descriptor set for gRPC reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("duckstream_descriptor");
