//! Block references and resumable stream cursors.
//!
//! A [`Cursor`] is an opaque checkpoint handed out by the remote endpoint
//! alongside every block. Feeding it back as the start cursor of a new
//! request resumes the stream right after the block it was produced at.
//! The sink never persists cursors itself; that is the caller's job.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::SinkError;
use crate::pb::substreams::rpc::v2 as pbrpc;
use crate::pb::substreams::v1::Clock;

/// A `(height, id)` reference to a block of the upstream chain.
///
/// The blank reference (empty id, height 0) renders as `None` and is used
/// where no block has been observed yet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockRef {
    pub id: String,
    pub num: u64,
}

impl BlockRef {
    #[must_use]
    pub fn new(id: impl Into<String>, num: u64) -> Self {
        Self { id: id.into(), num }
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.id.is_empty() && self.num == 0
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_blank() {
            return write!(f, "None");
        }

        if self.id.is_empty() {
            write!(f, "#{}", self.num)
        } else {
            write!(f, "#{} ({})", self.num, self.id)
        }
    }
}

impl From<&Clock> for BlockRef {
    fn from(clock: &Clock) -> Self {
        BlockRef::new(clock.id.clone(), clock.number)
    }
}

impl From<&pbrpc::BlockRef> for BlockRef {
    fn from(block: &pbrpc::BlockRef) -> Self {
        BlockRef::new(block.id.clone(), block.number)
    }
}

/// Opaque resumable position within a Substreams stream.
///
/// A cursor is either *blank* (renders as `""` on the wire) or *bound*, in
/// which case it carries both the opaque blob understood by the remote and
/// the [`BlockRef`] decoded out of it. Cursors are immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cursor {
    opaque: String,
    block: BlockRef,
}

impl Cursor {
    /// The blank cursor, used to start a stream from the requested range
    /// rather than from a checkpoint.
    #[must_use]
    pub fn blank() -> Self {
        Cursor::default()
    }

    /// Decodes an opaque cursor received from the remote. The empty string
    /// decodes to the blank cursor.
    ///
    /// # Errors
    ///
    /// [`SinkError::InvalidCursor`] when the blob is not a cursor this
    /// library understands, which usually means the protocol bindings here
    /// are behind the remote endpoint.
    pub fn from_opaque(opaque: &str) -> Result<Self, SinkError> {
        if opaque.is_empty() {
            return Ok(Cursor::blank());
        }

        let invalid = |reason: &str| SinkError::InvalidCursor {
            cursor: opaque.to_string(),
            reason: reason.to_string(),
        };

        let raw = URL_SAFE_NO_PAD
            .decode(opaque)
            .map_err(|_| invalid("not base64"))?;
        let decoded = String::from_utf8(raw).map_err(|_| invalid("not utf-8"))?;

        let mut segments = decoded.split(':');
        let version = segments.next().unwrap_or_default();
        if !version.starts_with('c') {
            return Err(invalid("unknown cursor version"));
        }

        let num = segments
            .next()
            .ok_or_else(|| invalid("missing block number"))?
            .parse::<u64>()
            .map_err(|_| invalid("invalid block number"))?;
        let id = segments.next().ok_or_else(|| invalid("missing block id"))?;

        // Trailing segments (head block, LIB) are carried opaquely through
        // the stored blob and ignored here.
        Ok(Cursor {
            opaque: opaque.to_string(),
            block: BlockRef::new(id, num),
        })
    }

    /// Builds a bound cursor pointing at `block`, encoding a fresh blob.
    #[must_use]
    pub fn from_block(block: BlockRef) -> Self {
        let opaque = URL_SAFE_NO_PAD.encode(format!("c1:{}:{}", block.num, block.id));
        Cursor { opaque, block }
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.opaque.is_empty()
    }

    /// The block this cursor points at; blank for the blank cursor.
    #[must_use]
    pub fn block(&self) -> &BlockRef {
        &self.block
    }

    /// The wire form of the cursor, suitable for a request's start cursor.
    /// The blank cursor renders as `""`.
    #[must_use]
    pub fn to_opaque(&self) -> &str {
        &self.opaque
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_blank() {
            return write!(f, "<Blank>");
        }

        write!(f, "{}", self.opaque)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_block_ref_renders_none() {
        assert_eq!(BlockRef::default().to_string(), "None");
        assert_eq!(BlockRef::new("", 7).to_string(), "#7");
        assert_eq!(BlockRef::new("0xabc", 7).to_string(), "#7 (0xabc)");
    }

    #[test]
    fn blank_cursor_round_trips_through_empty_string() {
        let blank = Cursor::from_opaque("").unwrap();
        assert!(blank.is_blank());
        assert_eq!(blank.to_opaque(), "");
        assert_eq!(blank, Cursor::blank());
    }

    #[test]
    fn bound_cursor_round_trips() {
        let cursor = Cursor::from_block(BlockRef::new("0xdeadbeef", 12_345));
        let decoded = Cursor::from_opaque(cursor.to_opaque()).unwrap();

        assert_eq!(decoded, cursor);
        assert_eq!(decoded.block(), &BlockRef::new("0xdeadbeef", 12_345));
    }

    #[test]
    fn decode_preserves_trailing_segments_verbatim() {
        let blob = URL_SAFE_NO_PAD.encode("c3:42:0xaa:50:0xbb:40");
        let cursor = Cursor::from_opaque(&blob).unwrap();

        assert_eq!(cursor.block(), &BlockRef::new("0xaa", 42));
        assert_eq!(cursor.to_opaque(), blob);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Cursor::from_opaque("not/base64!"),
            Err(SinkError::InvalidCursor { .. })
        ));

        let not_a_cursor = URL_SAFE_NO_PAD.encode("hello world");
        assert!(matches!(
            Cursor::from_opaque(&not_a_cursor),
            Err(SinkError::InvalidCursor { .. })
        ));

        let bad_number = URL_SAFE_NO_PAD.encode("c1:abc:0xaa");
        assert!(matches!(
            Cursor::from_opaque(&bad_number),
            Err(SinkError::InvalidCursor { .. })
        ));
    }

    #[test]
    fn blank_cursors_compare_equal_bound_by_content() {
        assert_eq!(Cursor::blank(), Cursor::blank());

        let a = Cursor::from_block(BlockRef::new("0xaa", 1));
        let b = Cursor::from_block(BlockRef::new("0xaa", 1));
        let c = Cursor::from_block(BlockRef::new("0xbb", 1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, Cursor::blank());
    }
}
