//! Metric names exported by the sink.
//!
//! The crate records through the `metrics` facade; wiring an actual exporter
//! (Prometheus or otherwise) is the embedding application's job.

use metrics::{describe_counter, describe_gauge};

pub const HEAD_BLOCK_NUMBER: &str = "substreams_sink_head_block_number";
pub const ERROR_COUNT: &str = "substreams_sink_error";
pub const DATA_MESSAGE_COUNT: &str = "substreams_sink_data_message";
pub const DATA_MESSAGE_SIZE_BYTES: &str = "substreams_sink_data_message_size_bytes";
pub const UNDO_MESSAGE_COUNT: &str = "substreams_sink_undo_message";
pub const PROGRESS_MESSAGE_COUNT: &str = "substreams_sink_progress_message";
pub const PROGRESS_LAST_PROCESSED_BLOCK: &str = "substreams_sink_progress_last_processed_block";
pub const PROGRESS_RUNNING_JOBS: &str = "substreams_sink_progress_running_jobs";
pub const PROGRESS_TOTAL_PROCESSED_BLOCKS: &str = "substreams_sink_progress_total_processed_blocks";
pub const PROGRESS_LAST_CONTIGUOUS_BLOCK: &str = "substreams_sink_progress_last_contiguous_block";

/// Registers help text for every metric the sink emits. Call once at
/// startup, after installing a recorder.
pub fn describe_metrics() {
    describe_gauge!(
        HEAD_BLOCK_NUMBER,
        "Last block number received from the Substreams stream"
    );
    describe_counter!(
        ERROR_COUNT,
        "The error count we encountered when interacting with Substreams for which we had to restart the connection loop"
    );
    describe_counter!(DATA_MESSAGE_COUNT, "The number of data messages received");
    describe_counter!(
        DATA_MESSAGE_SIZE_BYTES,
        "Total size in bytes of data message payloads received"
    );
    describe_counter!(
        UNDO_MESSAGE_COUNT,
        "The number of block undo messages received"
    );
    describe_counter!(
        PROGRESS_MESSAGE_COUNT,
        "The number of progress messages received, labeled by module"
    );
    describe_gauge!(
        PROGRESS_LAST_PROCESSED_BLOCK,
        "Last processed block reported by a backprocessing job, labeled by stage"
    );
    describe_gauge!(
        PROGRESS_RUNNING_JOBS,
        "Number of running backprocessing jobs, labeled by stage"
    );
    describe_gauge!(
        PROGRESS_TOTAL_PROCESSED_BLOCKS,
        "Total number of blocks processed by backprocessing jobs"
    );
    describe_gauge!(
        PROGRESS_LAST_CONTIGUOUS_BLOCK,
        "End of the first contiguous range of completed blocks, labeled by stage"
    );
}
