//! CLI integration tests
//!
//! Argument handling of the duckctl binary, plus an end-to-end run against
//! an in-process server.

use duckstream_core::{Pipeline, ServerConfig};
use duckstream_server::pb::data_transform_server::DataTransformServer;
use duckstream_server::DataTransformService;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::transport::Server;

fn duckctl() -> Command {
    Command::new(env!("CARGO_BIN_EXE_duckctl"))
}

async fn start_server(base: &std::path::Path) -> String {
    let mut config = ServerConfig::rooted_at(base);
    config.stream.chunk_rows = 3;
    config.stream.file_chunk_bytes = 256;
    config.ensure_dirs().unwrap();

    let service = DataTransformService::new(Pipeline::new(Arc::new(config)).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        Server::builder()
            .add_service(DataTransformServer::new(service))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    format!("http://{}", addr)
}

#[test]
fn test_help_flag() {
    let output = duckctl()
        .arg("--help")
        .output()
        .expect("Failed to execute duckctl");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("duckctl") || stdout.contains("duckstream"));
}

#[test]
fn test_help_contains_subcommands() {
    let output = duckctl()
        .arg("--help")
        .output()
        .expect("Failed to execute duckctl");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["load", "query", "export", "write", "clear", "run"] {
        assert!(stdout.contains(command), "help should list '{}'", command);
    }
}

#[test]
fn test_invalid_subcommand_fails() {
    let output = duckctl()
        .arg("nonexistent-command")
        .output()
        .expect("Failed to execute duckctl");

    assert!(!output.status.success());
}

#[test]
fn test_load_requires_table() {
    let output = duckctl()
        .args(["load", "data.csv", "--job-id", "j"])
        .output()
        .expect("Failed to execute duckctl");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--table"));
}

#[test]
fn test_unknown_compression_rejected() {
    let output = duckctl()
        .args(["export", "abc", "SELECT 1", "--output", "x.parquet", "-c", "lz4"])
        .output()
        .expect("Failed to execute duckctl");

    assert!(!output.status.success());
}

#[test]
fn test_unreachable_server_fails() {
    let output = duckctl()
        .args(["--server", "http://127.0.0.1:1", "clear", "abc"])
        .output()
        .expect("Failed to execute duckctl");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to connect"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_query_export_clear_against_server() {
    let temp = tempfile::tempdir().unwrap();
    let server = start_server(temp.path()).await;
    let csv = temp.path().join("cities.csv");
    std::fs::write(&csv, "id,name\n1,oslo\n2,lima\n3,pune\n4,kyiv\n5,baku\n").unwrap();

    let run = |args: Vec<String>| {
        let server = server.clone();
        tokio::task::spawn_blocking(move || {
            duckctl()
                .arg("--server")
                .arg(server)
                .args(args)
                .output()
                .expect("Failed to execute duckctl")
        })
    };

    let output = run(vec![
        "load".into(),
        csv.to_string_lossy().into(),
        "--table".into(),
        "cities".into(),
        "--job-id".into(),
        "cli-test".into(),
    ])
    .await
    .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    assert!(stdout.contains("Loaded 5 rows"));
    let session_id = stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("Session: "))
        .unwrap()
        .to_string();

    let output = run(vec![
        "query".into(),
        session_id.clone(),
        "SELECT name FROM cities ORDER BY id".into(),
    ])
    .await
    .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("oslo") && stdout.contains("baku"));
    assert!(stdout.contains("(5 rows)"));

    let parquet = temp.path().join("cities.parquet");
    let output = run(vec![
        "export".into(),
        session_id.clone(),
        "SELECT * FROM cities".into(),
        "--output".into(),
        parquet.to_string_lossy().into(),
    ])
    .await
    .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let bytes = std::fs::read(&parquet).unwrap();
    assert_eq!(&bytes[..4], b"PAR1");

    let output = run(vec!["clear".into(), session_id.clone()]).await.unwrap();
    assert!(output.status.success());

    let output = run(vec!["clear".into(), session_id]).await.unwrap();
    assert!(!output.status.success());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_saves_arrow_file() {
    let temp = tempfile::tempdir().unwrap();
    let server = start_server(temp.path()).await;
    let csv = temp.path().join("n.csv");
    std::fs::write(&csv, "v\n1\n2\n3\n4\n5\n6\n7\n").unwrap();
    let out = temp.path().join("n.arrow");

    let args = vec![
        "--server".to_string(),
        server,
        "run".to_string(),
        csv.to_string_lossy().to_string(),
        "--table".to_string(),
        "n".to_string(),
        "--query".to_string(),
        "SELECT v FROM n WHERE v > 2".to_string(),
        "--output".to_string(),
        out.to_string_lossy().to_string(),
    ];
    let output = tokio::task::spawn_blocking(move || duckctl().args(args).output().unwrap())
        .await
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Saved 5 rows"));
    assert!(out.exists());
}
