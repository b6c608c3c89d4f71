//! Block range value type and the range expression mini-language.

use std::fmt;

use crate::SinkError;
use crate::pb::substreams::v1::Module;

/// A half-open `[start, end)` block span; `end = None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    start: u64,
    end: Option<u64>,
}

impl BlockRange {
    /// An unbounded range starting at `start`.
    #[must_use]
    pub fn open(start: u64) -> Self {
        Self { start, end: None }
    }

    /// A bounded range, `end` exclusive.
    ///
    /// # Errors
    ///
    /// [`SinkError::InvalidRange`] when `start >= end`.
    pub fn bounded(start: u64, end: u64) -> Result<Self, SinkError> {
        if start >= end {
            return Err(SinkError::InvalidRange(format!(
                "start block {start} is equal or above stop block {end}"
            )));
        }

        Ok(Self {
            start,
            end: Some(end),
        })
    }

    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive end block, `None` for unbounded ranges.
    #[must_use]
    pub fn end(&self) -> Option<u64> {
        self.end
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, +\u{221e})", self.start),
        }
    }
}

/// Parses a number of the range mini-language, flagging the `+` relative
/// prefix.
fn parse_number(input: &str) -> Result<(i64, bool), SinkError> {
    let relative = input.starts_with('+');
    let number = input
        .strip_prefix('+')
        .unwrap_or(input)
        .parse::<i64>()
        .map_err(|_| SinkError::InvalidRange(format!("invalid block number value {input:?}")))?;

    if relative && number < 0 {
        return Err(SinkError::InvalidRange(format!(
            "invalid relative block number value {input:?}"
        )));
    }

    Ok((number, relative))
}

/// Resolves a block range expression against a module's initial block `S`.
///
/// Grammar:
///
/// - `""`, `"-1"` or `":"` is the open range `[S, +∞)`
/// - a single number `N` is `[S, N)`; `+N` is `[S, S+N)`
/// - `A:B` is `[A, B)`; either side may be empty (defaulting to `S` and `+∞`
///   respectively), prefixed with `+` (relative to `S` for the start, to the
///   resolved start for the stop), or `-1` on the stop side for `+∞`
///
/// # Errors
///
/// [`SinkError::InvalidRange`] on unparseable numbers or when the resolved
/// start is not strictly below the resolved stop.
pub fn read_block_range(module: &Module, input: &str) -> Result<BlockRange, SinkError> {
    let initial_block = module.initial_block;
    let input = if input.is_empty() { "-1" } else { input };

    let Some((before, after)) = input.split_once(':') else {
        // A lone value is a stop block right away.
        let (value, relative) = parse_number(input)?;
        if !relative && value < 1 {
            return Ok(BlockRange::open(initial_block));
        }

        let stop = if relative {
            initial_block + value as u64
        } else {
            value as u64
        };

        return BlockRange::bounded(initial_block, stop);
    };

    let start = if before.is_empty() {
        initial_block
    } else {
        let (value, relative) = parse_number(before)?;
        if relative {
            initial_block + value as u64
        } else if value < 0 {
            initial_block
        } else {
            value as u64
        }
    };

    if after.is_empty() {
        return Ok(BlockRange::open(start));
    }

    let (value, relative) = parse_number(after)?;
    if !relative && value == -1 {
        return Ok(BlockRange::open(start));
    }
    if !relative && value < 0 {
        return Err(SinkError::InvalidRange(format!(
            "invalid stop block value {after:?}"
        )));
    }

    let stop = if relative {
        start + value as u64
    } else {
        value as u64
    };

    BlockRange::bounded(start, stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(initial_block: u64) -> Module {
        Module {
            initial_block,
            ..Default::default()
        }
    }

    #[test]
    fn empty_input_is_open_from_module_start() {
        let module = module(5);

        assert_eq!(read_block_range(&module, "").unwrap(), BlockRange::open(5));
        assert_eq!(read_block_range(&module, "-1").unwrap(), BlockRange::open(5));
        assert_eq!(read_block_range(&module, ":").unwrap(), BlockRange::open(5));
    }

    #[test]
    fn single_value_is_an_exclusive_stop() {
        let module = module(5);

        assert_eq!(
            read_block_range(&module, "11").unwrap(),
            BlockRange::bounded(5, 11).unwrap()
        );
        assert_eq!(
            read_block_range(&module, "+10").unwrap(),
            BlockRange::bounded(5, 15).unwrap()
        );
    }

    #[test]
    fn start_and_stop_with_relative_markers() {
        let module = module(5);

        assert_eq!(
            read_block_range(&module, "10:+10").unwrap(),
            BlockRange::bounded(10, 20).unwrap()
        );
        assert_eq!(
            read_block_range(&module, "+10:+10").unwrap(),
            BlockRange::bounded(15, 25).unwrap()
        );
        assert_eq!(
            read_block_range(&module, "10:20").unwrap(),
            BlockRange::bounded(10, 20).unwrap()
        );
    }

    #[test]
    fn open_ended_variants() {
        let module = module(5);

        assert_eq!(read_block_range(&module, "10:").unwrap(), BlockRange::open(10));
        assert_eq!(read_block_range(&module, "10:-1").unwrap(), BlockRange::open(10));
        assert_eq!(
            read_block_range(&module, ":11").unwrap(),
            BlockRange::bounded(5, 11).unwrap()
        );
    }

    #[test]
    fn empty_start_ranges_never_fail() {
        for initial_block in [0, 1, 5, 1_000_000] {
            let module = module(initial_block);
            assert_eq!(
                read_block_range(&module, "").unwrap(),
                BlockRange::open(initial_block)
            );
        }
    }

    #[test]
    fn degenerate_ranges_are_rejected() {
        let module = module(5);

        assert!(matches!(
            read_block_range(&module, "10:10"),
            Err(SinkError::InvalidRange(_))
        ));
        assert!(matches!(
            read_block_range(&module, "20:10"),
            Err(SinkError::InvalidRange(_))
        ));
        assert!(matches!(
            read_block_range(&module, "abc"),
            Err(SinkError::InvalidRange(_))
        ));
        assert!(matches!(
            read_block_range(&module, "10:abc"),
            Err(SinkError::InvalidRange(_))
        ));
    }

    #[test]
    fn display_forms() {
        let module = module(5);

        assert_eq!(read_block_range(&module, "").unwrap().to_string(), "[5, +\u{221e})");
        assert_eq!(read_block_range(&module, "11").unwrap().to_string(), "[5, 11)");
    }
}
