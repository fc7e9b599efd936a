use crate::pb::{data_transform_server::DataTransform, *};
use duckstream_core::{
    Chunk, ChunkSink, DataSource, Error, ExportOptions, IngestStep, Pipeline, Plan, SinkClosed,
};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{error, info, warn};

type ChunkStream = ReceiverStream<Result<QueryChunk, Status>>;

/// duckstream gRPC service implementation
///
/// Thin translation layer: every RPC becomes a [`Plan`] run by the shared
/// [`Pipeline`]. Streaming RPCs run their plan on a spawned task and hand
/// chunks back through a bounded channel.
#[derive(Debug, Clone)]
pub struct DataTransformService {
    pipeline: Pipeline,
}

impl DataTransformService {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Run `plan` on its own task and return the receiving end of its chunks.
    fn spawn_stream(&self, rpc: &'static str, plan: Plan) -> ChunkStream {
        let (tx, rx) = mpsc::channel(self.pipeline.config().stream.channel_capacity);
        let pipeline = self.pipeline.clone();
        let sink = GrpcSink { tx: tx.clone() };

        tokio::spawn(async move {
            let started = Instant::now();
            match pipeline.run(plan, sink).await {
                Ok(outcome) => {
                    let summary = outcome.summary.unwrap_or_default();
                    info!(
                        rpc,
                        chunks = summary.chunks,
                        total = summary.total,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Stream completed"
                    );
                }
                Err(Error::Stream(reason)) => {
                    warn!(rpc, reason = %reason, "Client went away mid-stream");
                }
                Err(e) => {
                    let status = fail(rpc, &e);
                    // Receiver may already be gone; nothing left to tell it.
                    let _ = tx.send(Err(status)).await;
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// Reject unknown sessions before a stream is opened.
    fn check_session(&self, rpc: &'static str, session_id: &str) -> Result<(), Status> {
        self.pipeline
            .sessions()
            .open_existing(session_id)
            .map(|_| ())
            .map_err(|e| fail(rpc, &e))
    }
}

/// Forwards chunks into the response channel, blocking while it is full.
struct GrpcSink {
    tx: mpsc::Sender<Result<QueryChunk, Status>>,
}

impl ChunkSink for GrpcSink {
    fn send(&mut self, chunk: Chunk) -> Result<(), SinkClosed> {
        self.tx
            .blocking_send(Ok(to_proto(chunk)))
            .map_err(|_| SinkClosed("response stream closed by client".to_string()))
    }
}

fn to_proto(chunk: Chunk) -> QueryChunk {
    QueryChunk {
        sequence_number: chunk.sequence_number,
        count: chunk.count,
        data: chunk.data,
        is_last: chunk.is_last,
    }
}

/// Map a pipeline error onto a gRPC status.
pub fn to_status(err: &Error) -> Status {
    match err {
        Error::InvalidSession(_) => Status::unavailable(err.to_string()),
        Error::EncryptionUnavailable => Status::failed_precondition(err.to_string()),
        Error::InvalidArgument(msg) => Status::invalid_argument(msg.clone()),
        _ => Status::internal(err.to_string()),
    }
}

fn fail(rpc: &'static str, err: &Error) -> Status {
    error!(rpc, error = %err, "Request failed");
    to_status(err)
}

fn source_format(format: SourceFormat) -> Option<duckstream_core::SourceFormat> {
    match format {
        SourceFormat::Unspecified => None,
        SourceFormat::Csv => Some(duckstream_core::SourceFormat::Csv),
        SourceFormat::Parquet => Some(duckstream_core::SourceFormat::Parquet),
    }
}

fn export_options(compression: Compression, encrypt: bool, fallback: ExportOptions) -> ExportOptions {
    use duckstream_core::Compression as Codec;

    let compression = match compression {
        Compression::Unspecified => fallback.compression,
        Compression::Zstd => Codec::Zstd,
        Compression::Gzip => Codec::Gzip,
        Compression::Snappy => Codec::Snappy,
        Compression::Uncompressed => Codec::Uncompressed,
    };
    ExportOptions {
        compression,
        encrypt,
    }
}

fn ingest_step(
    rpc: &'static str,
    file_path: &str,
    table_name: &str,
    format: SourceFormat,
) -> Result<IngestStep, Status> {
    let source = DataSource::parse(file_path).map_err(|e| fail(rpc, &e))?;
    Ok(IngestStep::new(table_name.trim(), source).with_format(source_format(format)))
}

#[tonic::async_trait]
impl DataTransform for DataTransformService {
    type QueryStreamStream = ChunkStream;
    type ExportStreamStream = ChunkStream;
    type LoadAndQueryStreamStream = ChunkStream;
    type LoadAndExportStreamStream = ChunkStream;

    // ========================================================================
    // Session Operations
    // ========================================================================

    #[tracing::instrument(skip(self, request), fields(job_id = %request.get_ref().job_id, table = %request.get_ref().table_name))]
    async fn load(
        &self,
        request: Request<LoadRequest>,
    ) -> Result<Response<LoadResponse>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        if req.job_id.trim().is_empty() {
            return Err(Status::invalid_argument("job_id is required"));
        }

        let step = ingest_step("Load", &req.file_path, &req.table_name, req.format())?;
        let outcome = self
            .pipeline
            .run(Plan::load(&req.job_id, step), Vec::<Chunk>::new())
            .await
            .map_err(|e| fail("Load", &e))?;

        let session_id = outcome
            .session_id
            .ok_or_else(|| Status::internal("load finished without a session"))?;
        let row_count = outcome.rows_loaded.unwrap_or_default();

        info!(
            session_id = %session_id,
            rows = row_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session loaded"
        );

        Ok(Response::new(LoadResponse {
            session_id,
            row_count,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(session_id = %request.get_ref().session_id))]
    async fn clear(
        &self,
        request: Request<ClearRequest>,
    ) -> Result<Response<ClearResponse>, Status> {
        let req = request.into_inner();
        self.pipeline
            .clear(&req.session_id)
            .map_err(|e| fail("Clear", &e))?;
        Ok(Response::new(ClearResponse {}))
    }

    // ========================================================================
    // Session Queries
    // ========================================================================

    #[tracing::instrument(skip(self, request), fields(session_id = %request.get_ref().session_id, path = %request.get_ref().file_export_path))]
    async fn write_to_file(
        &self,
        request: Request<WriteToFileRequest>,
    ) -> Result<Response<WriteToFileResponse>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        let options = export_options(req.compression(), req.encrypt, ExportOptions::file_default());

        let plan = Plan::write_to_file(
            &req.session_id,
            &req.query,
            PathBuf::from(req.file_export_path.trim()),
            options,
        );
        self.pipeline
            .run(plan, Vec::<Chunk>::new())
            .await
            .map_err(|e| fail("WriteToFile", &e))?;

        info!(
            path = %req.file_export_path,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Result written"
        );
        Ok(Response::new(WriteToFileResponse {}))
    }

    #[tracing::instrument(skip(self, request), fields(session_id = %request.get_ref().session_id))]
    async fn query_stream(
        &self,
        request: Request<QueryStreamRequest>,
    ) -> Result<Response<Self::QueryStreamStream>, Status> {
        let req = request.into_inner();
        self.check_session("QueryStream", &req.session_id)?;

        let plan = Plan::query_stream(&req.session_id, &req.query);
        Ok(Response::new(self.spawn_stream("QueryStream", plan)))
    }

    #[tracing::instrument(skip(self, request), fields(session_id = %request.get_ref().session_id))]
    async fn export_stream(
        &self,
        request: Request<ExportStreamRequest>,
    ) -> Result<Response<Self::ExportStreamStream>, Status> {
        let req = request.into_inner();
        self.check_session("ExportStream", &req.session_id)?;

        let options = export_options(req.compression(), req.encrypt, ExportOptions::stream_default());
        let plan = Plan::export_stream(&req.session_id, &req.query, options);
        Ok(Response::new(self.spawn_stream("ExportStream", plan)))
    }

    // ========================================================================
    // One-shot Operations
    // ========================================================================

    #[tracing::instrument(skip(self, request), fields(table = %request.get_ref().table_name))]
    async fn load_and_query_stream(
        &self,
        request: Request<LoadAndQueryStreamRequest>,
    ) -> Result<Response<Self::LoadAndQueryStreamStream>, Status> {
        let req = request.into_inner();
        let step = ingest_step("LoadAndQueryStream", &req.file_path, &req.table_name, req.format())?;

        let plan = Plan::load_and_query_stream(step, &req.query);
        Ok(Response::new(self.spawn_stream("LoadAndQueryStream", plan)))
    }

    #[tracing::instrument(skip(self, request), fields(table = %request.get_ref().table_name))]
    async fn load_and_export_stream(
        &self,
        request: Request<LoadAndExportStreamRequest>,
    ) -> Result<Response<Self::LoadAndExportStreamStream>, Status> {
        let req = request.into_inner();
        let step = ingest_step("LoadAndExportStream", &req.file_path, &req.table_name, req.format())?;
        let options = export_options(req.compression(), req.encrypt, ExportOptions::stream_default());

        let plan = Plan::load_and_export_stream(step, &req.query, options);
        Ok(Response::new(self.spawn_stream("LoadAndExportStream", plan)))
    }
}
