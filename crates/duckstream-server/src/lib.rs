//! duckstream gRPC Server
//!
//! Provides the `DataTransform` gRPC API for:
//! - Session operations (load a source, clear a session)
//! - Query operations (stream a result as Arrow IPC, write it as Parquet)
//! - One-shot operations (load, query and stream without keeping a session)

pub mod services;

pub use duckstream_proto::duckstream as pb;
pub use services::DataTransformService;

use std::io;
use std::net::SocketAddr;

/// Resolve a `host:port` listen address. Hostnames such as `localhost` are
/// looked up; the first resolved address wins.
pub async fn resolve_bind_addr(addr: &str) -> io::Result<SocketAddr> {
    tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} resolved to no address", addr),
        )
    })
}
