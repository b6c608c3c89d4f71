//! Bounded ordered buffer that hides fork volatility from handlers.
//!
//! Non-final blocks are held back until either the remote asserts them final
//! (`final_block_height`) or enough later blocks accumulate that the oldest
//! can be treated as effectively final. Undo signals that stay within the
//! buffered tail are absorbed by rewinding it, so a correctly sized buffer
//! means the downstream handler never observes an undo.

use std::collections::VecDeque;

use crate::SinkError;
use crate::cursor::BlockRef;
use crate::pb::substreams::rpc::v2::{BlockScopedData, BlockUndoSignal};

pub(crate) struct BlockBuffer {
    capacity: usize,
    data: VecDeque<BlockScopedData>,
    last_emitted: Option<BlockRef>,
}

fn block_ref_of(data: &BlockScopedData) -> Result<BlockRef, SinkError> {
    let clock = data
        .clock
        .as_ref()
        .ok_or(SinkError::MalformedResponse("BlockScopedData", "clock"))?;

    Ok(BlockRef::from(clock))
}

fn height_of(data: &BlockScopedData) -> u64 {
    data.clock.as_ref().map(|clock| clock.number).unwrap_or(0)
}

impl BlockBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            data: VecDeque::with_capacity(capacity),
            last_emitted: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Accepts the next block from the stream and returns every block that
    /// became safe to deliver, oldest first.
    ///
    /// Blocks must arrive in strictly increasing height order within a
    /// connection; a non-increasing height is a protocol violation.
    pub fn handle_block_scoped_data(
        &mut self,
        data: BlockScopedData,
    ) -> Result<Vec<BlockScopedData>, SinkError> {
        let received = block_ref_of(&data)?;

        if let Some(newest) = self.data.back() {
            let newest_height = height_of(newest);
            if received.num <= newest_height {
                return Err(SinkError::OrderingViolation {
                    received,
                    latest: block_ref_of(newest)?,
                });
            }
        }

        let mut emitted = Vec::new();

        // Index of the newest buffered block the incoming message asserts
        // final, if any.
        let last_final_index = self
            .data
            .iter()
            .rposition(|buffered| height_of(buffered) <= data.final_block_height);

        if self.data.len() == self.capacity || last_final_index.is_some() {
            // A full buffer with no finality signal pseudo-finalizes the
            // single oldest block to make room.
            let drain_to = last_final_index.unwrap_or(0);
            emitted.extend(self.data.drain(..=drain_to));

            if let Some(newest_emitted) = emitted.last() {
                self.last_emitted = Some(block_ref_of(newest_emitted)?);
            }
        }

        if received.num <= data.final_block_height {
            // Already final, deliver without buffering.
            emitted.push(data);
        } else {
            self.data.push_back(data);
        }

        Ok(emitted)
    }

    /// Rewinds the buffered tail down to `last_valid_block`.
    ///
    /// Succeeds silently when the fork stays within the buffer, including
    /// when it predates every buffered block (the whole tail is discarded).
    /// Fails when a block above the undo point was already delivered, which
    /// means the buffer was sized too small for this fork.
    pub fn handle_block_undo_signal(&mut self, undo: &BlockUndoSignal) -> Result<(), SinkError> {
        let last_valid: BlockRef = undo
            .last_valid_block
            .as_ref()
            .map(BlockRef::from)
            .ok_or(SinkError::MalformedResponse(
                "BlockUndoSignal",
                "last_valid_block",
            ))?;

        if let Some(emitted) = &self.last_emitted {
            if emitted.num >= last_valid.num && *emitted != last_valid {
                return Err(SinkError::UndoPastEmitted {
                    last_valid,
                    emitted: emitted.clone(),
                });
            }
        }

        while let Some(newest) = self.data.back() {
            if height_of(newest) > last_valid.num {
                self.data.pop_back();
            } else {
                break;
            }
        }

        Ok(())
    }
}
