//! Consumer framework for Substreams streaming endpoints.
//!
//! A [`Sinker`] opens the server-streaming `Blocks` RPC against a remote
//! Substreams endpoint and turns it into an ordered sequence of calls on a
//! user [`SinkerHandler`], taking care of reconnection with exponential
//! backoff, cursor continuity across reconnects, and fork handling: either
//! by forwarding undo signals or by absorbing them in a bounded block
//! buffer so the handler only ever sees blocks that will not be retracted.
//!
//! ```rust,no_run
//! use substreams_sink::{
//!     Cursor, SinkError, SinkerBuilder, SinkerHandler, SubstreamsClientConfig, SubstreamsMode,
//! };
//! use substreams_sink::pb::substreams::rpc::v2::{BlockScopedData, BlockUndoSignal};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Printer;
//!
//! impl SinkerHandler for Printer {
//!     async fn handle_block_scoped_data(
//!         &mut self,
//!         _data: BlockScopedData,
//!         _is_live: Option<bool>,
//!         cursor: &Cursor,
//!     ) -> Result<(), SinkError> {
//!         println!("block {} at cursor {cursor}", cursor.block());
//!         // Persist your output and `cursor` here.
//!         Ok(())
//!     }
//!
//!     async fn handle_block_undo_signal(
//!         &mut self,
//!         _undo: BlockUndoSignal,
//!         _cursor: &Cursor,
//!     ) -> Result<(), SinkError> {
//!         // Discard data above `undo.last_valid_block`, then persist `cursor`.
//!         Ok(())
//!     }
//! }
//!
//! # async fn run(modules: substreams_sink::pb::substreams::v1::Modules) -> Result<(), SinkError> {
//! let output_module = substreams_sink::resolve_output_module(&modules, "map_events", None)?;
//! let sinker = SinkerBuilder::new(
//!     SubstreamsMode::Production,
//!     modules,
//!     output_module,
//!     [0u8; 0],
//!     SubstreamsClientConfig::new(
//!         "mainnet.eth.streamingfast.io:443",
//!         substreams_sink::read_api_token(),
//!         false,
//!         false,
//!     ),
//! )
//! .undo_buffer_size(12)
//! .build()?;
//!
//! sinker.run(CancellationToken::new(), Cursor::blank(), &mut Printer).await
//! # }
//! ```

pub mod metrics;
pub mod pb;

mod buffer;
mod client;
mod cursor;
mod error;
mod flags;
mod liveness;
mod range;
mod sinker;
mod stats;

pub use client::SubstreamsClientConfig;
pub use cursor::{BlockRef, Cursor};
pub use error::{BoxError, SinkError};
pub use flags::{SinkerFlags, apply_params, read_api_token, resolve_output_module};
pub use liveness::{DeltaLivenessChecker, LivenessChecker};
pub use range::{BlockRange, read_block_range};
pub use sinker::{
    DEFAULT_MAX_RETRIES, DEFAULT_UNDO_BUFFER_SIZE, Sinker, SinkerBuilder, SinkerHandler,
    SubstreamsMode,
};
