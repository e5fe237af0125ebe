//! Byte-range requests
//!
//! Parses a `Range` header against a known object size into a validated
//! [`ByteRange`], and serves partial reads through [`RangeResponder`].
//!
//! Only single `bytes=` ranges are understood. Anything the parser cannot
//! turn into a satisfiable window is rejected, and the responder answers
//! with `416` plus `Content-Range: bytes */<size>`.
//!
//! # Example
//!
//! ```
//! use filegate::range::parse_range;
//!
//! let range = parse_range("bytes=0-99", 1000).unwrap();
//! assert_eq!(range.start(), 0);
//! assert_eq!(range.end(), 99);
//! assert_eq!(range.len(), 100);
//! assert_eq!(range.content_range(1000), "bytes 0-99/1000");
//!
//! assert!(parse_range("bytes=1000-", 1000).is_err());
//! assert!(parse_range("bytes=-0", 1000).is_err());
//! ```

use thiserror::Error;

pub mod responder;

pub use responder::{RangeResponder, ReadOutcome};

/// Unit prefix of the only range form accepted.
const BYTES_UNIT: &str = "bytes=";

/// Range rejection reasons
///
/// Both variants map to `416 Range Not Satisfiable`; the split only matters
/// for logs and metrics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("Unparseable range header: {0}")]
    Unparseable(String),

    #[error("Range not satisfiable for object of {size} bytes")]
    Unsatisfiable { size: u64 },
}

/// A validated, inclusive byte window into an object.
///
/// Only [`parse_range`] (and [`ByteRange::full`]) build one, so
/// `start <= end < size` holds for the size it was validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// The whole of a non-empty object.
    pub fn full(size: u64) -> Option<Self> {
        (size > 0).then(|| Self {
            start: 0,
            end: size - 1,
        })
    }

    /// First byte offset (inclusive)
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte offset (inclusive)
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a 206 response
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }

    /// `Range` request header value, as sent to the storage backend
    pub fn to_header_value(&self) -> String {
        format!("{}{}-{}", BYTES_UNIT, self.start, self.end)
    }
}

/// `Content-Range` value for a 416 response
pub fn unsatisfiable_content_range(size: u64) -> String {
    format!("bytes */{}", size)
}

/// Parse a `Range` header against an object of `size` bytes.
///
/// Accepted forms:
/// - `bytes=S-E`: clamped to the object when `E >= size`
/// - `bytes=S-`: from `S` to the last byte
/// - `bytes=-N`: the last `min(N, size)` bytes, `N > 0`
///
/// Rejected: multiple ranges, `bytes=-`, `bytes=-0`, `S >= size`, `S > E`,
/// non-numeric bounds, and every range on an empty object.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let unparseable = || RangeError::Unparseable(header.to_string());
    let unsatisfiable = RangeError::Unsatisfiable { size };

    let spec = header
        .trim()
        .strip_prefix(BYTES_UNIT)
        .ok_or_else(unparseable)?;

    if spec.contains(',') {
        return Err(unparseable());
    }

    let (start_s, end_s) = spec.split_once('-').ok_or_else(unparseable)?;
    let (start_s, end_s) = (start_s.trim(), end_s.trim());

    let (start, end) = match (start_s.is_empty(), end_s.is_empty()) {
        (true, true) => return Err(unparseable()),
        (true, false) => {
            let suffix = parse_offset(end_s).ok_or_else(unparseable)?;
            if suffix == 0 || size == 0 {
                return Err(unsatisfiable);
            }
            let suffix = suffix.min(size);
            (size - suffix, size - 1)
        }
        (false, _) => {
            let start = parse_offset(start_s).ok_or_else(unparseable)?;
            let end = if end_s.is_empty() {
                None
            } else {
                Some(parse_offset(end_s).ok_or_else(unparseable)?)
            };

            if start >= size {
                return Err(unsatisfiable);
            }
            let end = match end {
                Some(end) if end < size => end,
                _ => size - 1,
            };
            (start, end)
        }
    };

    if start > end {
        return Err(unsatisfiable);
    }

    Ok(ByteRange { start, end })
}

/// Decimal digits only; signs and whitespace inside a bound are rejected.
/// Values past `u64::MAX` saturate, so huge ends and suffixes clamp.
fn parse_offset(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(s.parse().unwrap_or(u64::MAX))
}
