//! HTTP Range header parsing and resolution.
//!
//! Parsing is deliberately forgiving: a header this server cannot
//! understand is treated as absent and the full file is served, which is
//! what players expect from a progressive source. Only a syntactically
//! valid range that lies beyond the file is rejected outright.

use thiserror::Error;

/// An inclusive byte range resolved against a concrete file length.
///
/// Only produced by [`RangeSpec::resolve`], which guarantees
/// `start <= end < file_length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte position served.
    pub start: u64,
    /// Last byte position served (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes the range covers.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// A parsed but not yet validated range specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=start-` or `bytes=start-end`.
    FromStart { start: u64, end: Option<u64> },
    /// `bytes=-n`, the final n bytes of the file.
    Suffix { length: u64 },
}

/// A syntactically valid range that the file cannot satisfy.
#[derive(Debug, Clone, Copy, Error)]
#[error("range starting at {start} not satisfiable for {file_length}-byte file")]
pub struct UnsatisfiableRange {
    pub start: u64,
    pub file_length: u64,
}

impl RangeSpec {
    /// Resolves the spec against the file length.
    ///
    /// Out-of-range end positions are clamped to the final byte, matching
    /// how players probe with huge open-ended requests.
    ///
    /// # Errors
    ///
    /// - `UnsatisfiableRange` - The first requested byte lies at or past
    ///   the end of the file
    pub fn resolve(self, file_length: u64) -> Result<ByteRange, UnsatisfiableRange> {
        match self {
            RangeSpec::FromStart { start, end } => {
                if start >= file_length {
                    return Err(UnsatisfiableRange { start, file_length });
                }

                let last = file_length - 1;
                Ok(ByteRange {
                    start,
                    end: end.unwrap_or(last).min(last),
                })
            }
            RangeSpec::Suffix { length } => {
                if file_length == 0 {
                    return Err(UnsatisfiableRange {
                        start: 0,
                        file_length,
                    });
                }

                Ok(ByteRange {
                    start: file_length.saturating_sub(length),
                    end: file_length - 1,
                })
            }
        }
    }
}

/// Parses an HTTP Range header value.
///
/// Supports the single-range forms `bytes=start-end`, `bytes=start-`,
/// and `bytes=-n`. Returns None for anything else (missing unit, multiple
/// ranges, inverted bounds, zero-length suffix), which callers treat as
/// "no range requested".
pub fn parse_range_header(value: &str) -> Option<RangeSpec> {
    let spec = value.trim().strip_prefix("bytes=")?.trim();

    // Multi-range requests are not supported; serve the full file instead.
    if spec.contains(',') {
        return None;
    }

    let (start_part, end_part) = spec.split_once('-')?;

    if start_part.is_empty() {
        let length = end_part.parse::<u64>().ok()?;
        if length == 0 {
            return None;
        }
        return Some(RangeSpec::Suffix { length });
    }

    let start = start_part.parse::<u64>().ok()?;
    let end = if end_part.is_empty() {
        None
    } else {
        let end = end_part.parse::<u64>().ok()?;
        if start > end {
            return None;
        }
        Some(end)
    };

    Some(RangeSpec::FromStart { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bounded_range() {
        assert_eq!(
            parse_range_header("bytes=10-20"),
            Some(RangeSpec::FromStart {
                start: 10,
                end: Some(20)
            })
        );
    }

    #[test]
    fn test_parse_open_ended_range() {
        assert_eq!(
            parse_range_header("bytes=50-"),
            Some(RangeSpec::FromStart {
                start: 50,
                end: None
            })
        );
    }

    #[test]
    fn test_parse_suffix_range() {
        assert_eq!(
            parse_range_header("bytes=-500"),
            Some(RangeSpec::Suffix { length: 500 })
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_range_header("invalid"), None);
        assert_eq!(parse_range_header("bytes="), None);
        assert_eq!(parse_range_header("bytes=abc-def"), None);
        assert_eq!(parse_range_header("bytes=10"), None);
        assert_eq!(parse_range_header("bytes=-"), None);
        assert_eq!(parse_range_header("bytes=-0"), None);
        // Inverted bounds
        assert_eq!(parse_range_header("bytes=20-10"), None);
        // Multi-range
        assert_eq!(parse_range_header("bytes=0-5,10-15"), None);
    }

    #[test]
    fn test_resolve_clamps_end_to_file() {
        let spec = RangeSpec::FromStart {
            start: 90,
            end: Some(500),
        };
        let range = spec.resolve(100).unwrap();

        assert_eq!(range, ByteRange { start: 90, end: 99 });
        assert_eq!(range.length(), 10);
    }

    #[test]
    fn test_resolve_open_ended() {
        let spec = RangeSpec::FromStart {
            start: 30,
            end: None,
        };
        let range = spec.resolve(100).unwrap();

        assert_eq!(range, ByteRange { start: 30, end: 99 });
    }

    #[test]
    fn test_resolve_suffix() {
        let range = RangeSpec::Suffix { length: 10 }.resolve(100).unwrap();
        assert_eq!(range, ByteRange { start: 90, end: 99 });

        // Suffix longer than the file covers the whole file
        let range = RangeSpec::Suffix { length: 500 }.resolve(100).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 99 });
    }

    #[test]
    fn test_resolve_unsatisfiable() {
        let spec = RangeSpec::FromStart {
            start: 100,
            end: None,
        };
        let err = spec.resolve(100).unwrap_err();

        assert_eq!(err.start, 100);
        assert_eq!(err.file_length, 100);
    }

    #[test]
    fn test_resolve_against_empty_file() {
        let from_start = RangeSpec::FromStart {
            start: 0,
            end: None,
        };
        assert!(from_start.resolve(0).is_err());
        assert!(RangeSpec::Suffix { length: 5 }.resolve(0).is_err());
    }
}
