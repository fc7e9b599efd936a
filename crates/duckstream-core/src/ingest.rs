//! Ingest Pipeline
//!
//! Resolves where a dataset lives and loads it into a named table.
//!
//! ## Flow
//!
//! ```text
//! "s3.csv" / "https://host/a.parquet"
//!        │ DataSource::parse
//!        ▼
//! Local(path) ────────────────┐
//! Remote(url) ── download ──► temp file in download dir
//!                             │ StagedSource
//!                             ▼
//!        CREATE TABLE t AS SELECT * FROM read_csv('…') / read_parquet('…')
//! ```
//!
//! Downloads are a single sequential copy: no retry and no resume. A failed
//! download fails the call. The temp file is deleted when the
//! [`StagedSource`] is dropped, on success and on failure.

use futures::StreamExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::engine::{quote_literal, Engine};
use crate::error::{Error, Result};

/// On-disk format of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Parquet,
}

impl SourceFormat {
    /// Infer from the extension; anything that is not Parquet is read as CSV.
    pub fn infer(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".parquet") || lower.ends_with(".pq") {
            SourceFormat::Parquet
        } else {
            SourceFormat::Csv
        }
    }

    fn reader(self) -> &'static str {
        match self {
            SourceFormat::Csv => "read_csv",
            SourceFormat::Parquet => "read_parquet",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            SourceFormat::Csv => ".csv",
            SourceFormat::Parquet => ".parquet",
        }
    }
}

/// Where a dataset comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Local(PathBuf),
    Remote(Url),
}

impl DataSource {
    /// `http://` and `https://` locations are remote; everything else is a
    /// local path.
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(Error::InvalidArgument("file path is empty".to_string()));
        }

        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = Url::parse(location)
                .map_err(|e| Error::InvalidArgument(format!("invalid URL '{}': {}", location, e)))?;
            Ok(DataSource::Remote(url))
        } else {
            Ok(DataSource::Local(PathBuf::from(location)))
        }
    }

    pub fn infer_format(&self) -> SourceFormat {
        match self {
            DataSource::Local(path) => SourceFormat::infer(&path.to_string_lossy()),
            DataSource::Remote(url) => SourceFormat::infer(url.path()),
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Local(path) => write!(f, "{}", path.display()),
            DataSource::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// What to load and into which table.
#[derive(Debug, Clone)]
pub struct IngestStep {
    pub table: String,
    pub source: DataSource,
    /// `None` infers from the source extension
    pub format: Option<SourceFormat>,
}

impl IngestStep {
    pub fn new(table: impl Into<String>, source: DataSource) -> Self {
        Self {
            table: table.into(),
            source,
            format: None,
        }
    }

    pub fn with_format(mut self, format: Option<SourceFormat>) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> SourceFormat {
        self.format.unwrap_or_else(|| self.source.infer_format())
    }
}

/// A source that is readable from the local filesystem. Owns the temp file of
/// a remote download so it outlives the load.
#[derive(Debug)]
pub struct StagedSource {
    path: PathBuf,
    _download: Option<NamedTempFile>,
}

impl StagedSource {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Make `step.source` available on local disk, downloading it if remote.
pub async fn stage(
    client: &reqwest::Client,
    step: &IngestStep,
    download_dir: &Path,
) -> Result<StagedSource> {
    match &step.source {
        DataSource::Local(path) => Ok(StagedSource {
            path: path.clone(),
            _download: None,
        }),
        DataSource::Remote(url) => {
            info!(url = %url, "Downloading file since received path is http(s)");
            let temp = download(client, url, download_dir, step.format().suffix()).await?;
            Ok(StagedSource {
                path: temp.path().to_path_buf(),
                _download: Some(temp),
            })
        }
    }
}

/// Stream `url` into a fresh temp file under `dir`.
pub async fn download(
    client: &reqwest::Client,
    url: &Url,
    dir: &Path,
    suffix: &str,
) -> Result<NamedTempFile> {
    let fail = |message: String| Error::Download {
        url: url.to_string(),
        message,
    };

    let response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| fail(e.to_string()))?;

    let temp = tempfile::Builder::new()
        .prefix("download-")
        .suffix(suffix)
        .tempfile_in(dir)?;
    let mut file = tokio::fs::File::from_std(temp.reopen()?);

    let mut body = response.bytes_stream();
    let mut bytes = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| fail(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| fail(e.to_string()))?;
        bytes += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| fail(e.to_string()))?;

    debug!(url = %url, bytes, path = %temp.path().display(), "Download complete");
    Ok(temp)
}

/// Load `path` into a new table and return its row count.
pub fn load(engine: &Engine, table: &str, path: &Path, format: SourceFormat) -> Result<u64> {
    if table.trim().is_empty() {
        return Err(Error::InvalidArgument("table name is empty".to_string()));
    }
    let fail = |message: String| Error::Ingest {
        table: table.to_string(),
        message,
    };

    let sql = format!(
        "CREATE TABLE {} AS SELECT * FROM {}({});",
        table,
        format.reader(),
        quote_literal(&path.to_string_lossy())
    );
    engine.exec(&sql).map_err(|e| fail(e.to_string()))?;

    let counts = engine
        .query_rows(&format!("SELECT COUNT(*) FROM {}", table), |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| fail(e.to_string()))?;
    let rows = counts.first().copied().unwrap_or_default().max(0) as u64;

    info!(table = %table, rows, format = ?format, "Loaded data to duckdb");
    Ok(rows)
}
