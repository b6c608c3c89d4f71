use std::time::Duration;

use backon::ExponentialBuilder;
use tonic::metadata::MetadataMap;
use tracing::info;

use crate::SinkError;
use crate::buffer::BlockBuffer;
use crate::client::SubstreamsClientConfig;
use crate::liveness::LivenessChecker;
use crate::pb::substreams::v1::{Module, Modules, module};
use crate::range::BlockRange;
use crate::sinker::{Sinker, SubstreamsMode};
use crate::stats::Stats;

/// Undo buffer capacity used by the standard flag set; builders start with
/// no buffer until [`SinkerBuilder::undo_buffer_size`] is called.
pub const DEFAULT_UNDO_BUFFER_SIZE: usize = 12;

/// Default cap on consecutive reconnection attempts, spanning roughly five
/// minutes of exponential backoff.
pub const DEFAULT_MAX_RETRIES: usize = 15;

/// Builder/configuration for a [`Sinker`].
pub struct SinkerBuilder {
    mode: SubstreamsMode,
    modules: Modules,
    output_module: Module,
    output_module_hash: String,
    client_config: SubstreamsClientConfig,

    undo_buffer_size: usize,
    infinite_retry: bool,
    final_blocks_only: bool,
    backoff: ExponentialBuilder,
    liveness_checker: Option<Box<dyn LivenessChecker>>,
    block_range: Option<BlockRange>,
    extra_headers: MetadataMap,
    average_block_processing_time: bool,
    average_blocks_per_second: bool,
}

impl SinkerBuilder {
    /// Starts a builder from the stream request essentials: the module
    /// graph, the output module to sink (with its hash) and the endpoint
    /// connection settings.
    #[must_use]
    pub fn new(
        mode: SubstreamsMode,
        modules: Modules,
        output_module: Module,
        output_module_hash: impl AsRef<[u8]>,
        client_config: SubstreamsClientConfig,
    ) -> Self {
        Self {
            mode,
            modules,
            output_module,
            output_module_hash: hex::encode(output_module_hash),
            client_config,
            undo_buffer_size: 0,
            infinite_retry: false,
            final_blocks_only: false,
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(500))
                .with_factor(1.5)
                .with_jitter()
                .with_max_times(DEFAULT_MAX_RETRIES),
            liveness_checker: None,
            block_range: None,
            extra_headers: MetadataMap::new(),
            average_block_processing_time: false,
            average_blocks_per_second: false,
        }
    }

    /// Buffers up to `size` non-final blocks to absorb fork reorganizations
    /// before they reach the handler; 0 disables buffering.
    ///
    /// A buffer too small for an actual fork makes the sinker fail when the
    /// corresponding undo signal arrives; a buffer too large delays delivery
    /// by as many blocks.
    #[must_use]
    pub fn undo_buffer_size(mut self, size: usize) -> Self {
        self.undo_buffer_size = size;
        self
    }

    /// Retries forever instead of giving up after
    /// [`DEFAULT_MAX_RETRIES`] consecutive failed attempts.
    #[must_use]
    pub fn infinite_retry(mut self) -> Self {
        self.infinite_retry = true;
        self
    }

    /// Requests only final blocks from the endpoint. The undo buffer is
    /// disabled and the undo handler is never invoked.
    #[must_use]
    pub fn final_blocks_only(mut self) -> Self {
        self.final_blocks_only = true;
        self
    }

    /// Replaces the default exponential backoff (500 ms initial, 1.5
    /// multiplier, jittered).
    #[must_use]
    pub fn backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enables the liveness signal passed to the data handler.
    #[must_use]
    pub fn liveness_checker(mut self, checker: impl LivenessChecker + 'static) -> Self {
        self.liveness_checker = Some(Box::new(checker));
        self
    }

    /// Restricts the stream to `range` instead of streaming from the
    /// module's start block forever.
    #[must_use]
    pub fn block_range(mut self, range: BlockRange) -> Self {
        self.block_range = Some(range);
        self
    }

    /// Attaches extra gRPC metadata to every stream request.
    #[must_use]
    pub fn extra_headers(mut self, headers: MetadataMap) -> Self {
        self.extra_headers = headers;
        self
    }

    /// Tracks a rolling average of the time spent in the data handler.
    #[must_use]
    pub fn average_block_processing_time(mut self) -> Self {
        self.average_block_processing_time = true;
        self
    }

    /// Tracks a rolling average of blocks delivered per second.
    #[must_use]
    pub fn average_blocks_per_second(mut self) -> Self {
        self.average_blocks_per_second = true;
        self
    }

    /// Validates the configuration and builds the [`Sinker`].
    ///
    /// # Errors
    ///
    /// [`SinkError::Configuration`] when the output module is not a mapper.
    pub fn build(self) -> Result<Sinker, SinkError> {
        if !matches!(self.output_module.kind, Some(module::Kind::KindMap(_))) {
            return Err(SinkError::Configuration(format!(
                "output module {:?} is not of type 'Mapper'",
                self.output_module.name
            )));
        }

        // Final-only streams cannot fork, the buffer would only add latency.
        let buffer = (!self.final_blocks_only && self.undo_buffer_size > 0)
            .then(|| BlockBuffer::new(self.undo_buffer_size));

        let backoff = if self.infinite_retry {
            self.backoff.without_max_times()
        } else {
            self.backoff
        };

        let block_range = self
            .block_range
            .map_or_else(|| "none".to_string(), |range| range.to_string());

        info!(
            mode = %self.mode,
            module_count = self.modules.modules.len(),
            output_module_name = %self.output_module.name,
            output_module_hash = %self.output_module_hash,
            client_config = %self.client_config,
            buffer = buffer.is_some(),
            block_range = %block_range,
            infinite_retry = self.infinite_retry,
            final_blocks_only = self.final_blocks_only,
            liveness_checker = self.liveness_checker.is_some(),
            "sinker configured"
        );

        Ok(Sinker {
            mode: self.mode,
            modules: self.modules,
            output_module: self.output_module,
            output_module_hash: self.output_module_hash,
            client_config: self.client_config,
            buffer,
            block_range: self.block_range,
            final_blocks_only: self.final_blocks_only,
            liveness_checker: self.liveness_checker,
            backoff,
            extra_headers: self.extra_headers,
            stats: Stats::new(
                self.average_block_processing_time,
                self.average_blocks_per_second,
            ),
        })
    }
}
