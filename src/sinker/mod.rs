//! The sinker: a supervised connection loop turning a Substreams streaming
//! RPC into an ordered sequence of handler invocations.
//!
//! The loop opens the server-streaming `Blocks` call, demultiplexes the
//! incoming messages, feeds block data through the optional undo buffer and
//! reconnects with exponential backoff on transient failures, resuming from
//! the active cursor so the handler never misses or repeats a block.

mod builder;

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBuilder};
use futures::Stream;
use metrics::{counter, gauge};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, trace, warn};

use crate::SinkError;
use crate::buffer::BlockBuffer;
use crate::client::{SubstreamsClient, SubstreamsClientConfig};
use crate::cursor::{BlockRef, Cursor};
use crate::liveness::LivenessChecker;
use crate::metrics as metric_names;
use crate::pb::substreams::rpc::v2::{
    BlockScopedData, BlockUndoSignal, ModulesProgress, Request, Response, response,
};
use crate::pb::substreams::v1::{Module, Modules};
use crate::range::BlockRange;
use crate::stats::Stats;

pub use builder::{DEFAULT_MAX_RETRIES, DEFAULT_UNDO_BUFFER_SIZE, SinkerBuilder};

/// Whether the request runs the endpoint's production or development code
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstreamsMode {
    Development,
    Production,
}

impl fmt::Display for SubstreamsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubstreamsMode::Development => write!(f, "development"),
            SubstreamsMode::Production => write!(f, "production"),
        }
    }
}

/// User-side consumer of the stream.
///
/// Both methods are invoked from the sinker's single driving task, one
/// message at a time; ordering of delivered blocks is guaranteed as long as
/// the implementation completes its work before returning.
pub trait SinkerHandler: Send {
    /// Handles one block worth of output data.
    ///
    /// `cursor` resumes the stream right after this block; persist it along
    /// with the processed data so an interrupted process can restart without
    /// gaps. `is_live` is `Some` only when a liveness checker is configured.
    ///
    /// Returning [`SinkError::retryable`] makes the sinker reconnect from
    /// the active cursor; any other error terminates the run.
    fn handle_block_scoped_data(
        &mut self,
        data: BlockScopedData,
        is_live: Option<bool>,
        cursor: &Cursor,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Handles a fork signal: every block above `last_valid_block` must be
    /// treated as rolled back, then `cursor` persisted.
    ///
    /// Never invoked when an undo buffer is configured (the buffer absorbs
    /// the rewind) nor in final-blocks-only mode.
    fn handle_block_undo_signal(
        &mut self,
        undo: BlockUndoSignal,
        cursor: &Cursor,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Connection seam between the sinker loop and the transport, letting tests
/// drive the loop with scripted streams.
pub(crate) trait BlocksClient: Send {
    type Stream: Stream<Item = Result<Response, tonic::Status>> + Send + Unpin;

    fn blocks(
        &mut self,
        request: Request,
    ) -> impl Future<Output = Result<Self::Stream, tonic::Status>> + Send;
}

impl BlocksClient for SubstreamsClient {
    type Stream = tonic::codec::Streaming<Response>;

    async fn blocks(&mut self, request: Request) -> Result<Self::Stream, tonic::Status> {
        SubstreamsClient::blocks(self, request).await
    }
}

/// Status codes that denote a broken transport rather than a rejected
/// request; only these are worth reconnecting for. A cancelled status is
/// terminal, the cancellation came from our side of the call.
fn is_transient_code(code: tonic::Code) -> bool {
    !matches!(
        code,
        tonic::Code::Cancelled
            | tonic::Code::InvalidArgument
            | tonic::Code::NotFound
            | tonic::Code::AlreadyExists
            | tonic::Code::PermissionDenied
            | tonic::Code::FailedPrecondition
            | tonic::Code::OutOfRange
            | tonic::Code::Unimplemented
            | tonic::Code::Unauthenticated
    )
}

fn payload_size(data: &BlockScopedData) -> u64 {
    data.output
        .as_ref()
        .and_then(|output| output.map_output.as_ref())
        .map_or(0, |any| any.value.len() as u64)
}

/// Supervised consumer of one Substreams output module.
///
/// Built through [`SinkerBuilder`]; [`Sinker::run`] drives the stream until
/// the stop block is reached, the caller cancels, or a fatal error occurs.
pub struct Sinker {
    pub(crate) mode: SubstreamsMode,
    pub(crate) modules: Modules,
    pub(crate) output_module: Module,
    pub(crate) output_module_hash: String,
    pub(crate) client_config: SubstreamsClientConfig,

    pub(crate) buffer: Option<BlockBuffer>,
    pub(crate) block_range: Option<BlockRange>,
    pub(crate) final_blocks_only: bool,
    pub(crate) liveness_checker: Option<Box<dyn LivenessChecker>>,
    pub(crate) backoff: ExponentialBuilder,
    pub(crate) extra_headers: tonic::metadata::MetadataMap,

    pub(crate) stats: Stats,
}

impl fmt::Debug for Sinker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sinker")
            .field("mode", &self.mode)
            .field("output_module_hash", &self.output_module_hash)
            .field("client_config", &self.client_config)
            .field("block_range", &self.block_range)
            .field("final_blocks_only", &self.final_blocks_only)
            .finish_non_exhaustive()
    }
}

impl Sinker {
    #[must_use]
    pub fn block_range(&self) -> Option<BlockRange> {
        self.block_range
    }

    #[must_use]
    pub fn output_module(&self) -> &Module {
        &self.output_module
    }

    #[must_use]
    pub fn output_module_name(&self) -> &str {
        &self.output_module.name
    }

    #[must_use]
    pub fn output_module_hash(&self) -> &str {
        &self.output_module_hash
    }

    /// Runs the sinker until the stop block is reached, `shutdown` is
    /// cancelled, the retry budget is exhausted, or a fatal error occurs.
    ///
    /// Resumes from `start_cursor`; pass [`Cursor::blank`] to start from the
    /// configured range. Cancellation through `shutdown` is a clean stop and
    /// returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// See [`SinkError`]; only transient transport failures and
    /// [`SinkError::retryable`] handler errors are retried internally, every
    /// other error surfaces here.
    pub async fn run<H: SinkerHandler>(
        mut self,
        shutdown: CancellationToken,
        start_cursor: Cursor,
        handler: &mut H,
    ) -> Result<(), SinkError> {
        let log_each = if tracing::enabled!(Level::DEBUG) {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(15)
        };

        let mut client = SubstreamsClient::connect(&self.client_config, self.extra_headers.clone())?;

        let stats_shutdown = CancellationToken::new();
        let stats_task = self.stats.start(log_each, stats_shutdown.clone());

        let end_at = self
            .adjusted_stream_range()
            .and_then(|range| range.end())
            .map_or_else(|| "never".to_string(), |end| format!("#{end}"));

        info!(
            stats_refresh_each = ?log_each,
            restarting_at = %start_cursor.block(),
            end_at = %end_at,
            "starting sinker"
        );

        let result = self
            .stream_loop(&mut client, &shutdown, start_cursor, handler)
            .await;

        // The stats task flushes a last line on cancellation; wait for it so
        // the final state is always logged before we return.
        stats_shutdown.cancel();
        let _ = stats_task.await;
        info!("sinker terminating");

        match result {
            Ok(last_cursor) => {
                info!(
                    last_block_seen = %last_cursor.block(),
                    "substreams ended correctly, reached your stop block"
                );
                Ok(())
            }
            Err(SinkError::Cancelled) if shutdown.is_cancelled() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// The stream range widened by the buffer capacity so a bounded stream
    /// still delivers enough trailing blocks to flush the buffer.
    fn adjusted_stream_range(&self) -> Option<BlockRange> {
        let range = self.block_range?;

        if let (Some(buffer), Some(end)) = (&self.buffer, range.end()) {
            if let Ok(adjusted) =
                BlockRange::bounded(range.start(), end.saturating_add(buffer.capacity() as u64))
            {
                return Some(adjusted);
            }
        }

        Some(range)
    }

    async fn stream_loop<C: BlocksClient, H: SinkerHandler>(
        &mut self,
        client: &mut C,
        shutdown: &CancellationToken,
        start_cursor: Cursor,
        handler: &mut H,
    ) -> Result<Cursor, SinkError> {
        let adjusted_range = self.adjusted_stream_range();
        let start_block = adjusted_range.map_or(0, |range| range.start());
        let stop_block = adjusted_range.and_then(|range| range.end()).unwrap_or(u64::MAX);

        let mut active_cursor = start_cursor;
        let mut backoff = self.backoff.build();

        loop {
            let request = Request {
                start_block_num: start_block as i64,
                start_cursor: active_cursor.to_opaque().to_string(),
                stop_block_num: stop_block,
                final_blocks_only: self.final_blocks_only,
                production_mode: self.mode == SubstreamsMode::Production,
                output_module: self.output_module.name.clone(),
                modules: Some(self.modules.clone()),
            };

            let (received_message, outcome) = self
                .consume_stream(client, request, &mut active_cursor, shutdown, handler)
                .await;

            // A stream that delivered at least one message re-arms the full
            // retry budget: backoff measures consecutive failures, not
            // failures over the lifetime of the sinker.
            if received_message {
                backoff = self.backoff.build();
            }

            match outcome {
                Ok(()) => return Ok(active_cursor),
                Err(err) => {
                    counter!(metric_names::ERROR_COUNT).increment(1);

                    if matches!(err, SinkError::Cancelled) || !err.is_retryable() {
                        return Err(err);
                    }

                    error!(error = %err, "substreams encountered a retryable error");

                    let Some(sleep_for) = backoff.next() else {
                        return Err(SinkError::BackoffExpired);
                    };

                    info!(sleep = ?sleep_for, "sleeping before re-connecting");
                    tokio::select! {
                        () = tokio::time::sleep(sleep_for) => {}
                        () = shutdown.cancelled() => return Err(SinkError::Cancelled),
                    }
                }
            }
        }
    }

    /// Opens one stream and consumes it to completion, reporting whether at
    /// least one message was received. `Ok(())` means the server closed the
    /// stream cleanly, which the protocol defines as the stop block being
    /// reached.
    async fn consume_stream<C: BlocksClient, H: SinkerHandler>(
        &mut self,
        client: &mut C,
        request: Request,
        active_cursor: &mut Cursor,
        shutdown: &CancellationToken,
        handler: &mut H,
    ) -> (bool, Result<(), SinkError>) {
        debug!(
            start_block = request.start_block_num,
            cursor = %active_cursor,
            "launching substreams request"
        );

        let mut received_message = false;

        let opened = tokio::select! {
            opened = client.blocks(request) => opened,
            () = shutdown.cancelled() => return (received_message, Err(SinkError::Cancelled)),
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(status) => {
                let err = SinkError::retryable(SinkError::OpenStream(status));
                return (received_message, Err(err));
            }
        };

        loop {
            let message = tokio::select! {
                message = stream.next() => message,
                () = shutdown.cancelled() => return (received_message, Err(SinkError::Cancelled)),
            };

            let response = match message {
                None => return (received_message, Ok(())),
                Some(Err(status)) => {
                    let transient = is_transient_code(status.code());
                    let err = SinkError::Transport(status);
                    let err = if transient {
                        SinkError::retryable(err)
                    } else {
                        err
                    };
                    return (received_message, Err(err));
                }
                Some(Ok(response)) => response,
            };

            received_message = true;

            if let Err(err) = self.dispatch(response, active_cursor, handler).await {
                return (received_message, Err(err));
            }
        }
    }

    async fn dispatch<H: SinkerHandler>(
        &mut self,
        response: Response,
        active_cursor: &mut Cursor,
        handler: &mut H,
    ) -> Result<(), SinkError> {
        let Some(message) = response.message else {
            warn!("received an empty response message, ignoring");
            return Ok(());
        };

        match message {
            response::Message::Session(session) => {
                info!(trace_id = %session.trace_id, "session initialized with remote endpoint");
            }
            response::Message::Progress(progress) => self.on_progress(&progress),
            response::Message::BlockScopedData(data) => {
                self.on_block_scoped_data(data, active_cursor, handler).await?;
            }
            response::Message::BlockUndoSignal(undo) => {
                self.on_block_undo_signal(undo, active_cursor, handler).await?;
            }
            response::Message::DebugSnapshotData(_) | response::Message::DebugSnapshotComplete(_) => {
                warn!("received debug snapshot message, there is no reason to receive those here");
            }
        }

        Ok(())
    }

    fn on_progress(&self, progress: &ModulesProgress) {
        let mut total_processed_blocks = 0u64;
        let mut jobs_per_stage: BTreeMap<u32, u64> = BTreeMap::new();

        for job in &progress.running_jobs {
            total_processed_blocks += job.processed_blocks;
            *jobs_per_stage.entry(job.stage).or_default() += 1;
            gauge!(metric_names::PROGRESS_LAST_PROCESSED_BLOCK, "stage" => job.stage.to_string())
                .set((job.start_block + job.processed_blocks) as f64);
        }

        for (stage, jobs) in jobs_per_stage {
            gauge!(metric_names::PROGRESS_RUNNING_JOBS, "stage" => stage.to_string())
                .set(jobs as f64);
        }

        for module_stats in &progress.modules_stats {
            counter!(metric_names::PROGRESS_MESSAGE_COUNT, "module" => module_stats.name.clone())
                .increment(1);
            total_processed_blocks += module_stats.total_processed_block_count;
        }

        for (index, stage) in progress.stages.iter().enumerate() {
            if let Some(range) = stage.completed_ranges.first() {
                gauge!(metric_names::PROGRESS_LAST_CONTIGUOUS_BLOCK, "stage" => index.to_string())
                    .set(range.end_block as f64);
            }
        }

        gauge!(metric_names::PROGRESS_TOTAL_PROCESSED_BLOCKS).set(total_processed_blocks as f64);

        trace!(
            running_jobs = progress.running_jobs.len(),
            modules = progress.modules_stats.len(),
            "received response Progress"
        );
    }

    async fn on_block_scoped_data<H: SinkerHandler>(
        &mut self,
        data: BlockScopedData,
        active_cursor: &mut Cursor,
        handler: &mut H,
    ) -> Result<(), SinkError> {
        let block = data
            .clock
            .as_ref()
            .map(BlockRef::from)
            .ok_or(SinkError::MalformedResponse("BlockScopedData", "clock"))?;

        trace!(
            at = %block,
            payload_bytes = payload_size(&data),
            "received response BlockScopedData"
        );

        // Stats and metrics reflect the state of the stream, not the state
        // of the buffer.
        self.stats.record_block(block.clone());
        self.stats.record_data_message();
        gauge!(metric_names::HEAD_BLOCK_NUMBER).set(block.num as f64);
        counter!(metric_names::DATA_MESSAGE_COUNT).increment(1);
        counter!(metric_names::DATA_MESSAGE_SIZE_BYTES).increment(payload_size(&data));

        let buffered = self.buffer.is_some();
        let emitted = match &mut self.buffer {
            None => vec![data],
            Some(buffer) => {
                *active_cursor = Cursor::from_opaque(&data.cursor)?;
                buffer.handle_block_scoped_data(data)?
            }
        };

        for block_data in emitted {
            let current_cursor = Cursor::from_opaque(&block_data.cursor)?;

            let is_live = match &mut self.liveness_checker {
                None => None,
                Some(checker) => Some(
                    block_data
                        .clock
                        .as_ref()
                        .is_some_and(|clock| checker.is_live(clock)),
                ),
            };

            let handling_started = Instant::now();
            handler
                .handle_block_scoped_data(block_data, is_live, &current_cursor)
                .await?;
            self.stats
                .record_block_processing_time(handling_started.elapsed());

            if !buffered {
                // Without a buffer, the block just handled is the resume
                // point; with one, the cursor already sits at the newest
                // received block and the buffer replays what was unseen.
                *active_cursor = current_cursor;
            }
        }

        Ok(())
    }

    async fn on_block_undo_signal<H: SinkerHandler>(
        &mut self,
        undo: BlockUndoSignal,
        active_cursor: &mut Cursor,
        handler: &mut H,
    ) -> Result<(), SinkError> {
        let last_valid_block = undo
            .last_valid_block
            .as_ref()
            .map(BlockRef::from)
            .ok_or(SinkError::MalformedResponse("BlockUndoSignal", "last_valid_block"))?;

        trace!(
            last_valid_block = %last_valid_block,
            last_valid_cursor = %undo.last_valid_cursor,
            "received response BlockUndoSignal"
        );

        *active_cursor = Cursor::from_opaque(&undo.last_valid_cursor)?;

        self.stats.record_block(last_valid_block.clone());
        self.stats.record_undo_message();
        counter!(metric_names::UNDO_MESSAGE_COUNT).increment(1);
        gauge!(metric_names::HEAD_BLOCK_NUMBER).set(last_valid_block.num as f64);

        match &mut self.buffer {
            None => handler.handle_block_undo_signal(undo, active_cursor).await,
            // The buffer absorbs the rewind; a fork reaching below an
            // already-emitted block fails here because the configured buffer
            // size was insufficient for it.
            Some(buffer) => buffer.handle_block_undo_signal(&undo),
        }
    }
}
