//! Error taxonomy for the dilog divergence tracer.
//!
//! Every divergence error carries enough context to point a human at the
//! first offending trace line: the channel name, the line number in the
//! `.dilog` file, and the expected/found content. Errors detected during a
//! block close cannot be raised at the point of detection (close is invoked
//! on scope-exit paths); they are latched into the channel and re-raised by
//! the next public operation.

use thiserror::Error;

/// Convenience alias used across the dilog crates.
pub type Result<T> = std::result::Result<T, DilogError>;

/// Primary error type for dilog operations.
///
/// Structured variants for the divergence taxonomy, plus the ambient
/// failure modes (I/O, misuse) a file-backed tracer can hit.
#[derive(Error, Debug)]
pub enum DilogError {
    // === Divergences ===
    /// A message was emitted but the next relevant trace line, after all
    /// reordering attempts, does not equal it.
    #[error(
        "dilog divergence on channel '{channel}' at trace line {line}: \
         expected {expected:?}, found {found:?}"
    )]
    ExpectedMessage {
        channel: String,
        line: u64,
        expected: String,
        found: String,
    },

    /// A block was opened but no matching open marker is reachable.
    #[error(
        "dilog divergence on channel '{channel}' at trace line {line}: \
         expected block open {expected:?}, found {found:?}"
    )]
    ExpectedBlockOpen {
        channel: String,
        line: u64,
        expected: String,
        found: String,
    },

    /// A block was closed but the expected close marker is not reachable.
    /// Detected at close time, latched, and raised on the next operation.
    #[error(
        "dilog divergence on channel '{channel}' at trace line {line}: \
         expected end of block {expected:?}, found {found:?}"
    )]
    ExpectedBlockClose {
        channel: String,
        line: u64,
        expected: String,
        found: String,
    },

    /// The trace file was exhausted while a match was still being sought.
    #[error(
        "dilog divergence on channel '{channel}': unexpected end of trace \
         at line {line} while expecting {expected:?}"
    )]
    UnexpectedEndOfTrace {
        channel: String,
        line: u64,
        expected: String,
    },

    // === Misuse ===
    /// A channel was touched from a thread other than the one that
    /// created it (without `thread_safe = false`).
    #[error(
        "channel '{channel}' accessed from a foreign thread; dilog channels \
         are single-threaded unless looked up with thread_safe = false"
    )]
    CrossThreadAccess { channel: String },

    /// A block or channel name contains a reserved character or is empty.
    #[error("invalid dilog name {name:?}: {detail}")]
    InvalidName { name: String, detail: String },

    /// `close_block` was called with no block open.
    #[error("channel '{channel}': close_block with no open block")]
    BlockStackEmpty { channel: String },

    /// A message payload contains bytes the line-oriented trace cannot
    /// hold (an interior newline).
    #[error("invalid message on channel '{channel}': {detail}")]
    InvalidMessage { channel: String, detail: String },

    // === Trace file ===
    /// A trace line does not conform to the `[P]msg` / `[P[` / `]P]`
    /// grammar. Normal writers never produce these.
    #[error("malformed trace line {line} on channel '{channel}': {content:?}")]
    MalformedTrace {
        channel: String,
        line: u64,
        content: String,
    },

    /// File I/O error on the trace file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DilogError {
    /// Whether this error reports a divergence between the live run and
    /// the recorded trace (as opposed to misuse or an I/O failure).
    #[must_use]
    pub const fn is_divergence(&self) -> bool {
        matches!(
            self,
            Self::ExpectedMessage { .. }
                | Self::ExpectedBlockOpen { .. }
                | Self::ExpectedBlockClose { .. }
                | Self::UnexpectedEndOfTrace { .. }
        )
    }

    /// The channel this error belongs to, when one is known.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::ExpectedMessage { channel, .. }
            | Self::ExpectedBlockOpen { channel, .. }
            | Self::ExpectedBlockClose { channel, .. }
            | Self::UnexpectedEndOfTrace { channel, .. }
            | Self::CrossThreadAccess { channel }
            | Self::BlockStackEmpty { channel }
            | Self::InvalidMessage { channel, .. }
            | Self::MalformedTrace { channel, .. } => Some(channel),
            Self::InvalidName { .. } | Self::Io(_) => None,
        }
    }

    /// The trace line number this error points at, when one is known.
    #[must_use]
    pub const fn trace_line(&self) -> Option<u64> {
        match self {
            Self::ExpectedMessage { line, .. }
            | Self::ExpectedBlockOpen { line, .. }
            | Self::ExpectedBlockClose { line, .. }
            | Self::UnexpectedEndOfTrace { line, .. }
            | Self::MalformedTrace { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Create an invalid-name error.
    pub fn invalid_name(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            detail: detail.into(),
        }
    }

    /// Reproduce this error for re-raising.
    ///
    /// Latched close-time divergences are sticky: every subsequent
    /// operation on the channel raises an equivalent error while the
    /// original stays in the latch. All divergence variants duplicate
    /// field-for-field; a wrapped I/O error is rebuilt from its kind and
    /// message (the OS-level source is not duplicable).
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::ExpectedMessage {
                channel,
                line,
                expected,
                found,
            } => Self::ExpectedMessage {
                channel: channel.clone(),
                line: *line,
                expected: expected.clone(),
                found: found.clone(),
            },
            Self::ExpectedBlockOpen {
                channel,
                line,
                expected,
                found,
            } => Self::ExpectedBlockOpen {
                channel: channel.clone(),
                line: *line,
                expected: expected.clone(),
                found: found.clone(),
            },
            Self::ExpectedBlockClose {
                channel,
                line,
                expected,
                found,
            } => Self::ExpectedBlockClose {
                channel: channel.clone(),
                line: *line,
                expected: expected.clone(),
                found: found.clone(),
            },
            Self::UnexpectedEndOfTrace {
                channel,
                line,
                expected,
            } => Self::UnexpectedEndOfTrace {
                channel: channel.clone(),
                line: *line,
                expected: expected.clone(),
            },
            Self::CrossThreadAccess { channel } => Self::CrossThreadAccess {
                channel: channel.clone(),
            },
            Self::InvalidName { name, detail } => Self::InvalidName {
                name: name.clone(),
                detail: detail.clone(),
            },
            Self::BlockStackEmpty { channel } => Self::BlockStackEmpty {
                channel: channel.clone(),
            },
            Self::InvalidMessage { channel, detail } => Self::InvalidMessage {
                channel: channel.clone(),
                detail: detail.clone(),
            },
            Self::MalformedTrace {
                channel,
                line,
                content,
            } => Self::MalformedTrace {
                channel: channel.clone(),
                line: *line,
                content: content.clone(),
            },
            Self::Io(err) => Self::Io(std::io::Error::new(err.kind(), err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_message_display() {
        let err = DilogError::ExpectedMessage {
            channel: "mytrun".to_owned(),
            line: 7,
            expected: "[mytrun]iteration 3".to_owned(),
            found: "[mytrun]iteration 4".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("mytrun"));
        assert!(msg.contains("line 7"));
        assert!(msg.contains("iteration 3"));
        assert!(msg.contains("iteration 4"));
    }

    #[test]
    fn test_divergence_classification() {
        let div = DilogError::UnexpectedEndOfTrace {
            channel: "c".to_owned(),
            line: 1,
            expected: "[c]x".to_owned(),
        };
        assert!(div.is_divergence());

        let misuse = DilogError::CrossThreadAccess {
            channel: "c".to_owned(),
        };
        assert!(!misuse.is_divergence());

        let io = DilogError::Io(std::io::Error::other("boom"));
        assert!(!io.is_divergence());
    }

    #[test]
    fn test_channel_and_line_accessors() {
        let err = DilogError::ExpectedBlockClose {
            channel: "ch".to_owned(),
            line: 42,
            expected: "]ch/loop]".to_owned(),
            found: "[ch/loop]extra".to_owned(),
        };
        assert_eq!(err.channel(), Some("ch"));
        assert_eq!(err.trace_line(), Some(42));

        let err = DilogError::invalid_name("a/b", "contains '/'");
        assert_eq!(err.channel(), None);
        assert_eq!(err.trace_line(), None);
    }

    #[test]
    fn test_duplicate_preserves_message() {
        let err = DilogError::ExpectedMessage {
            channel: "c".to_owned(),
            line: 3,
            expected: "[c]a".to_owned(),
            found: "[c]b".to_owned(),
        };
        assert_eq!(err.duplicate().to_string(), err.to_string());

        let io = DilogError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "nope",
        ));
        let dup = io.duplicate();
        match dup {
            DilogError::Io(inner) => {
                assert_eq!(inner.kind(), std::io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected duplicate: {other}"),
        }
    }

    #[test]
    fn test_io_error_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = DilogError::from(io);
        assert!(matches!(err, DilogError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
