// Build script to compile protobuf files into Rust code.
//
// Generates both the server stubs (used by duckstream-server) and the client
// stubs (used by duckctl and the integration tests), plus the file descriptor
// set served by gRPC reflection.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("duckstream_descriptor.bin"))
        .compile_protos(&["proto/duckstream.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/duckstream.proto");
    Ok(())
}
