//! Pipeline Orchestrator
//!
//! Every RPC is a [`Plan`]: which session to use, an optional ingest step, an
//! optional transform and one output. [`Pipeline::run`] executes a plan
//! start to finish.
//!
//! ## Execution
//!
//! ```text
//! resolve session ──► stage source (async download)
//!                          │
//!                          ▼  spawn_blocking
//!        open engine ─► load ─► define v_result ─► output ─► close
//! ```
//!
//! Engine work runs on the blocking pool; the sink is how chunks get back to
//! the async side.
//!
//! ## Session lifetime
//!
//! | Mode        | Created here | Removed on success | Removed on failure |
//! |-------------|--------------|--------------------|--------------------|
//! | `Create`    | yes          | no                 | yes                |
//! | `Existing`  | no           | no                 | no                 |
//! | `Ephemeral` | yes          | yes                | yes                |
//!
//! Removal happens after the engine is closed, from the same blocking task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::chunk::{ChunkSink, StreamSummary};
use crate::chunker::stream_columnar;
use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::export::{export_to_file, stream_file, ExportArtifact, ExportOptions};
use crate::ingest::{self, IngestStep, StagedSource};
use crate::session::{Session, SessionGuard, SessionStore};
use crate::transform::{define_view, Transform, RESULT_VIEW};

/// Which session a plan runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    /// New persistent session derived from `seed`; kept only if the plan
    /// succeeds.
    Create { seed: String },
    /// A session created earlier, addressed by id.
    Existing(String),
    /// Private session removed when the plan ends.
    Ephemeral,
}

/// What happens to the result view.
#[derive(Debug, Clone)]
pub enum Output {
    None,
    /// Stream rows as Arrow IPC chunks.
    Columnar,
    /// Write Parquet to a server-side path.
    WriteFile { path: PathBuf, options: ExportOptions },
    /// Write Parquet to a transient file and stream its bytes.
    StreamFile { options: ExportOptions },
}

impl Output {
    fn needs_view(&self) -> bool {
        !matches!(self, Output::None)
    }
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub session: SessionMode,
    pub ingest: Option<IngestStep>,
    pub transform: Option<Transform>,
    pub output: Output,
}

impl Plan {
    /// Load a source into a new persistent session.
    pub fn load(job_id: &str, step: IngestStep) -> Self {
        Self {
            session: SessionMode::Create {
                seed: job_id.to_string(),
            },
            ingest: Some(step),
            transform: None,
            output: Output::None,
        }
    }

    /// Query an existing session and write the result to `path`.
    pub fn write_to_file(
        session_id: &str,
        query: &str,
        path: PathBuf,
        options: ExportOptions,
    ) -> Self {
        Self::on_session(
            session_id,
            query,
            Output::WriteFile { path, options },
        )
    }

    /// Query an existing session and stream rows.
    pub fn query_stream(session_id: &str, query: &str) -> Self {
        Self::on_session(session_id, query, Output::Columnar)
    }

    /// Query an existing session and stream the exported file.
    pub fn export_stream(session_id: &str, query: &str, options: ExportOptions) -> Self {
        Self::on_session(session_id, query, Output::StreamFile { options })
    }

    /// Load into a throwaway session, query, and stream rows.
    pub fn load_and_query_stream(step: IngestStep, query: &str) -> Self {
        Self::one_shot(step, query, Output::Columnar)
    }

    /// Load into a throwaway session, query, and stream the exported file.
    pub fn load_and_export_stream(step: IngestStep, query: &str, options: ExportOptions) -> Self {
        Self::one_shot(step, query, Output::StreamFile { options })
    }

    fn on_session(session_id: &str, query: &str, output: Output) -> Self {
        Self {
            session: SessionMode::Existing(session_id.to_string()),
            ingest: None,
            transform: Some(Transform::Sql(query.to_string())),
            output,
        }
    }

    fn one_shot(step: IngestStep, query: &str, output: Output) -> Self {
        let transform = Transform::sql_or_identity(query, &step.table);
        Self {
            session: SessionMode::Ephemeral,
            ingest: Some(step),
            transform: Some(transform),
            output,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.output.needs_view() && self.transform.is_none() {
            return Err(Error::InvalidArgument(
                "an output was requested without a query".to_string(),
            ));
        }
        if let Some(step) = &self.ingest {
            if step.table.trim().is_empty() {
                return Err(Error::InvalidArgument("table name is empty".to_string()));
            }
        }
        if let Output::WriteFile { path, .. } = &self.output {
            if path.as_os_str().is_empty() {
                return Err(Error::InvalidArgument("export path is empty".to_string()));
            }
        }
        Ok(())
    }
}

/// What a finished plan produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Id of the persistent session the plan ran against
    pub session_id: Option<String>,
    /// Rows loaded by the ingest step
    pub rows_loaded: Option<u64>,
    /// Totals of a streamed output
    pub summary: Option<StreamSummary>,
}

/// Runs plans against the session directory described by a [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Arc<ServerConfig>,
    sessions: SessionStore,
    client: reqwest::Client,
}

impl Pipeline {
    pub fn new(config: Arc<ServerConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout())
            .build()
            .map_err(|e| Error::HttpClient(e.to_string()))?;
        let sessions = SessionStore::new(&config.session_dir);
        Ok(Self {
            config,
            sessions,
            client,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Execute `plan`, sending any streamed chunks to `sink`.
    ///
    /// `sink` is driven from a blocking thread, so a sink that blocks while
    /// its consumer catches up is fine.
    #[tracing::instrument(skip_all, fields(mode = ?plan.session))]
    pub async fn run<S>(&self, plan: Plan, mut sink: S) -> Result<Outcome>
    where
        S: ChunkSink + Send + 'static,
    {
        let started = Instant::now();
        plan.validate()?;

        let Plan {
            session,
            ingest,
            transform,
            output,
        } = plan;

        let (session, guard, persistent) = match session {
            SessionMode::Existing(id) => (self.sessions.open_existing(&id)?, None, true),
            SessionMode::Create { seed } => {
                let session = self.sessions.create(&seed);
                (session.clone(), Some(SessionGuard::new(session)), true)
            }
            SessionMode::Ephemeral => {
                let seed = format!("ephemeral-{}", uuid::Uuid::new_v4());
                let session = self.sessions.create(&seed);
                (session.clone(), Some(SessionGuard::new(session)), false)
            }
        };
        debug!(session_id = %session.id, "Session resolved");

        // A failed download drops the guard here, before any file exists.
        let staged = match &ingest {
            Some(step) => Some(ingest::stage(&self.client, step, &self.config.download_dir).await?),
            None => None,
        };

        let config = Arc::clone(&self.config);
        let session_id = session.id.clone();
        let (rows_loaded, summary) = tokio::task::spawn_blocking(move || {
            let result = execute(
                &config,
                &session,
                ingest.as_ref().zip(staged.as_ref()),
                transform.as_ref(),
                &output,
                &mut sink,
            );
            drop(staged);
            // Keep a freshly created session only when it is persistent and
            // the plan succeeded.
            if let Some(guard) = guard {
                if persistent && result.is_ok() {
                    guard.disarm();
                }
            }
            result
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))??;

        info!(
            session_id = %session_id,
            rows_loaded = ?rows_loaded,
            chunks = ?summary.map(|s| s.chunks),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Plan completed"
        );

        Ok(Outcome {
            session_id: persistent.then_some(session_id),
            rows_loaded,
            summary,
        })
    }

    /// Delete a persistent session.
    pub fn clear(&self, session_id: &str) -> Result<()> {
        self.sessions.destroy(session_id)?;
        info!(session_id = %session_id, "Session cleared");
        Ok(())
    }
}

/// Engine half of a plan; runs on a blocking thread.
fn execute<S>(
    config: &ServerConfig,
    session: &Session,
    ingest: Option<(&IngestStep, &StagedSource)>,
    transform: Option<&Transform>,
    output: &Output,
    sink: &mut S,
) -> Result<(Option<u64>, Option<StreamSummary>)>
where
    S: ChunkSink + ?Sized,
{
    let engine = Engine::open(&session.path, &config.engine)?;

    let rows_loaded = match ingest {
        Some((step, staged)) => Some(ingest::load(
            &engine,
            &step.table,
            staged.path(),
            step.format(),
        )?),
        None => None,
    };

    if let Some(transform) = transform {
        define_view(&engine, RESULT_VIEW, transform)?;
    }

    let summary = match output {
        Output::None => None,
        Output::Columnar => {
            let sql = format!("SELECT * FROM {}", RESULT_VIEW);
            let chunk_rows = config.stream.chunk_rows;
            Some(engine.query_columnar(&sql, |cursor| stream_columnar(cursor, chunk_rows, sink))?)
        }
        Output::WriteFile { path, options } => {
            export_to_file(&engine, RESULT_VIEW, path, options)?;
            None
        }
        Output::StreamFile { options } => {
            let artifact = ExportArtifact::in_dir(&config.download_dir);
            export_to_file(&engine, RESULT_VIEW, artifact.path(), options)?;
            Some(stream_file(
                artifact.path(),
                config.stream.file_chunk_bytes,
                sink,
            )?)
        }
    };

    engine
        .close()
        .map_err(|e| Error::Query(format!("closing session: {}", e)))?;
    Ok((rows_loaded, summary))
}
