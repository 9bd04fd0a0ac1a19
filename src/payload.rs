//! Result payload codec.
//!
//! The load generator reports one round's results as a single ASCII
//! payload of whitespace-separated integers:
//!
//! ```text
//! messages log_base N [bucket count]xN M [percentile]xM
//! ```
//!
//! `N` latency-histogram pairs follow in no particular bucket order;
//! `M` per-connection message-count percentiles follow and `M` must be
//! exactly [`MSG_PERCENTILE_SLOTS`]. Decoding is total and fails closed:
//! any mismatch between the declared counts and the actual token stream is
//! a decode error, never a partial result.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

/// Number of message-count percentile slots a valid payload carries.
pub const MSG_PERCENTILE_SLOTS: usize = 19;

/// Decoded result of one round, as reported by the load generator.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    /// Total messages echoed during the measured window.
    pub messages: u64,
    /// Base of the exponential latency buckets: bucket `i` covers
    /// `(log_base^(i-1), log_base^i]` nanoseconds.
    pub log_base: f64,
    /// Sparse latency histogram; absent indices imply zero count.
    pub histogram: BTreeMap<u32, u64>,
    /// Per-connection message-count percentiles, exactly
    /// [`MSG_PERCENTILE_SLOTS`] entries.
    pub msg_percentiles: Vec<u64>,
}

/// Why a payload failed to decode.
#[derive(Debug)]
pub enum DecodeError {
    /// The payload is not valid UTF-8.
    NotText,
    /// The token stream ended before the named field.
    Missing(&'static str),
    /// A token failed to parse as the named field.
    BadToken {
        what: &'static str,
        token: String,
    },
    /// The same histogram bucket index appeared twice.
    DuplicateBucket(u32),
    /// The payload declared a percentile count other than 19.
    PercentileSlots(usize),
    /// Tokens remained after the declared counts were consumed.
    TrailingTokens(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotText => write!(f, "result payload is not valid UTF-8"),
            DecodeError::Missing(what) => {
                write!(f, "result payload truncated: missing {what}")
            }
            DecodeError::BadToken { what, token } => {
                write!(f, "bad {what} token {token:?} in result payload")
            }
            DecodeError::DuplicateBucket(idx) => {
                write!(f, "duplicate histogram bucket index {idx}")
            }
            DecodeError::PercentileSlots(m) => {
                write!(
                    f,
                    "payload declares {m} percentile slots, expected {MSG_PERCENTILE_SLOTS}"
                )
            }
            DecodeError::TrailingTokens(n) => {
                write!(f, "{n} unexpected trailing tokens in result payload")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn next(&mut self, what: &'static str) -> Result<&'a str, DecodeError> {
        self.inner.next().ok_or(DecodeError::Missing(what))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, DecodeError> {
        let token = self.next(what)?;
        token.parse().map_err(|_| DecodeError::BadToken {
            what,
            token: token.to_string(),
        })
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, DecodeError> {
        let token = self.next(what)?;
        token.parse().map_err(|_| DecodeError::BadToken {
            what,
            token: token.to_string(),
        })
    }

    fn usize(&mut self, what: &'static str) -> Result<usize, DecodeError> {
        let token = self.next(what)?;
        token.parse().map_err(|_| DecodeError::BadToken {
            what,
            token: token.to_string(),
        })
    }

    fn f64(&mut self, what: &'static str) -> Result<f64, DecodeError> {
        let token = self.next(what)?;
        let value: f64 = token.parse().map_err(|_| DecodeError::BadToken {
            what,
            token: token.to_string(),
        })?;
        if !value.is_finite() {
            return Err(DecodeError::BadToken {
                what,
                token: token.to_string(),
            });
        }
        Ok(value)
    }
}

/// Decode one result payload.
pub fn decode(raw: &[u8]) -> Result<TestResult, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotText)?;
    let mut tokens = Tokens {
        inner: text.split_whitespace(),
    };

    let messages = tokens.u64("message count")?;
    let log_base = tokens.f64("log base")?;

    let pairs = tokens.usize("histogram size")?;
    let mut histogram = BTreeMap::new();
    for _ in 0..pairs {
        let bucket = tokens.u32("bucket index")?;
        let count = tokens.u64("bucket count")?;
        if histogram.insert(bucket, count).is_some() {
            return Err(DecodeError::DuplicateBucket(bucket));
        }
    }

    let slots = tokens.usize("percentile count")?;
    if slots != MSG_PERCENTILE_SLOTS {
        return Err(DecodeError::PercentileSlots(slots));
    }
    let mut msg_percentiles = Vec::with_capacity(slots);
    for _ in 0..slots {
        msg_percentiles.push(tokens.u64("percentile value")?);
    }

    let trailing = tokens.inner.count();
    if trailing != 0 {
        return Err(DecodeError::TrailingTokens(trailing));
    }

    Ok(TestResult {
        messages,
        log_base,
        histogram,
        msg_percentiles,
    })
}

/// Encode a result in the wire form produced by the load generator.
///
/// Used by the in-process load generator in tests; kept next to `decode`
/// so the two halves of the format cannot drift apart.
pub fn encode(result: &TestResult) -> String {
    let mut out = String::new();
    let _ = write!(out, "{} {}", result.messages, result.log_base);

    let _ = write!(out, " {}", result.histogram.len());
    for (bucket, count) in &result.histogram {
        let _ = write!(out, " {bucket} {count}");
    }

    let _ = write!(out, " {}", result.msg_percentiles.len());
    for value in &result.msg_percentiles {
        let _ = write!(out, " {value}");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> TestResult {
        TestResult {
            messages: 8,
            log_base: 10.0,
            histogram: BTreeMap::from([(1, 5), (3, 2), (5, 1)]),
            msg_percentiles: (1..=19).map(|i| i * 10).collect(),
        }
    }

    #[test]
    fn test_round_trip() {
        let result = sample_result();
        let decoded = decode(encode(&result).as_bytes()).unwrap();
        assert_eq!(decoded, result);
        assert_eq!(decoded.histogram, BTreeMap::from([(1, 5), (3, 2), (5, 1)]));
    }

    #[test]
    fn test_decode_known_payload() {
        let raw = b"1234 1.07177 2 10 3 12 7 19 \
                    1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19";
        let result = decode(raw).unwrap();
        assert_eq!(result.messages, 1234);
        assert!((result.log_base - 1.07177).abs() < 1e-9);
        assert_eq!(result.histogram, BTreeMap::from([(10, 3), (12, 7)]));
        assert_eq!(result.msg_percentiles.len(), 19);
    }

    #[test]
    fn test_wrong_percentile_slot_count_rejected() {
        let mut result = sample_result();
        result.msg_percentiles.pop();
        let err = decode(encode(&result).as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::PercentileSlots(18)));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        // Declares 3 histogram pairs but carries only 2.
        let raw = b"10 10 3 1 5 3 2";
        let err = decode(raw).unwrap_err();
        assert!(matches!(err, DecodeError::Missing(_)));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let mut encoded = encode(&sample_result());
        encoded.push_str(" 42");
        let err = decode(encoded.as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::TrailingTokens(1)));
    }

    #[test]
    fn test_negative_count_rejected() {
        let raw = b"10 10 1 1 -5 1 0";
        let err = decode(raw).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::BadToken {
                what: "bucket count",
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_bucket_rejected() {
        let raw = b"10 10 2 1 5 1 7 1 0";
        let err = decode(raw).unwrap_err();
        assert!(matches!(err, DecodeError::DuplicateBucket(1)));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(
            decode(b"").unwrap_err(),
            DecodeError::Missing("message count")
        ));
    }
}
