//! Trace line codec.
//!
//! A `.dilog` trace is a sequence of `\n`-delimited lines, each in exactly
//! one of three forms for a fully qualified prefix `P`:
//!
//! ```text
//! [P]text      message
//! [P[          block open
//! ]P]          block close
//! ```
//!
//! `P` is the slash-joined path from the channel name down to the innermost
//! block (`mytrun/herd/sheep`). `text` may contain arbitrary non-newline
//! bytes. Prefixes never contain `[`, `]`, `/`-embedded empty segments, or
//! newlines; that is enforced at name validation time, which keeps decoding
//! unambiguous.

use dilog_error::{DilogError, Result};

/// Characters that may not appear in channel or block names.
const RESERVED: [char; 4] = ['/', '[', ']', '\n'];

/// One decoded trace line, borrowing from the raw line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLine<'a> {
    /// `[P]text`
    Message { prefix: &'a str, text: &'a str },
    /// `[P[`
    BlockOpen { prefix: &'a str },
    /// `]P]`
    BlockClose { prefix: &'a str },
}

impl<'a> TraceLine<'a> {
    /// The fully qualified prefix carried by this line.
    #[must_use]
    pub const fn prefix(&self) -> &'a str {
        match self {
            Self::Message { prefix, .. }
            | Self::BlockOpen { prefix }
            | Self::BlockClose { prefix } => prefix,
        }
    }
}

/// Encode a message line: `[P]text`.
#[must_use]
pub fn message_line(prefix: &str, text: &str) -> String {
    format!("[{prefix}]{text}")
}

/// Encode a block-open marker: `[P[`.
#[must_use]
pub fn open_marker(prefix: &str) -> String {
    format!("[{prefix}[")
}

/// Encode a block-close marker: `]P]`.
#[must_use]
pub fn close_marker(prefix: &str) -> String {
    format!("]{prefix}]")
}

/// Whether `line` is relevant to `prefix`: the prefix occurs as a substring
/// starting at byte offset 1, immediately after the leading `[` or `]`.
///
/// Lines not relevant to the prefix under consideration are skipped by the
/// matcher without any state change beyond the cursor and line count.
#[must_use]
pub fn is_relevant(line: &str, prefix: &str) -> bool {
    line.len() > prefix.len()
        && line.as_bytes().get(1..=prefix.len()) == Some(prefix.as_bytes())
}

/// Classify a raw trace line into one of the three §grammar forms.
///
/// Returns `None` for anything else; the caller turns that into a
/// `MalformedTrace` error with channel and line context. Normal writers
/// never produce unclassifiable lines.
#[must_use]
pub fn decode(line: &str) -> Option<TraceLine<'_>> {
    let bytes = line.as_bytes();
    let first = *bytes.first()?;
    let body = &line[1..];
    // The prefix ends at the first bracket; prefixes themselves are
    // bracket-free by name validation.
    let end = body.find(['[', ']'])?;
    if end == 0 {
        return None;
    }
    let prefix = &body[..end];
    match (first, bytes[1 + end]) {
        (b'[', b']') => Some(TraceLine::Message {
            prefix,
            text: &body[end + 1..],
        }),
        (b'[', b'[') if end + 1 == body.len() => Some(TraceLine::BlockOpen { prefix }),
        (b']', b']') if end + 1 == body.len() => Some(TraceLine::BlockClose { prefix }),
        _ => None,
    }
}

/// Validate a block name: nonempty, no `/`, brackets, or newline.
pub fn validate_block_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DilogError::invalid_name(name, "block name is empty"));
    }
    if let Some(c) = name.chars().find(|c| RESERVED.contains(c)) {
        return Err(DilogError::invalid_name(
            name,
            format!("block name contains reserved character {c:?}"),
        ));
    }
    Ok(())
}

/// Validate a channel name: the block-name rules plus filesystem safety,
/// since the name becomes the `<channel>.dilog` file name.
pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DilogError::invalid_name(name, "channel name is empty"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| RESERVED.contains(c) || matches!(c, '\\' | '\0'))
    {
        return Err(DilogError::invalid_name(
            name,
            format!("channel name contains reserved character {c:?}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_forms() {
        assert_eq!(message_line("ch/loop", "i=3"), "[ch/loop]i=3");
        assert_eq!(open_marker("ch/loop"), "[ch/loop[");
        assert_eq!(close_marker("ch/loop"), "]ch/loop]");
    }

    #[test]
    fn test_decode_message() {
        let line = "[ch/loop]sheep 4 in herd a";
        assert_eq!(
            decode(line),
            Some(TraceLine::Message {
                prefix: "ch/loop",
                text: "sheep 4 in herd a",
            })
        );
    }

    #[test]
    fn test_decode_message_with_brackets_in_text() {
        // The payload may contain brackets; only the first bracket after
        // the prefix terminates it.
        let line = "[ch]a[0] = b]c";
        assert_eq!(
            decode(line),
            Some(TraceLine::Message {
                prefix: "ch",
                text: "a[0] = b]c",
            })
        );
    }

    #[test]
    fn test_decode_empty_message() {
        assert_eq!(
            decode("[ch]"),
            Some(TraceLine::Message {
                prefix: "ch",
                text: "",
            })
        );
    }

    #[test]
    fn test_decode_markers() {
        assert_eq!(decode("[ch/b["), Some(TraceLine::BlockOpen { prefix: "ch/b" }));
        assert_eq!(decode("]ch/b]"), Some(TraceLine::BlockClose { prefix: "ch/b" }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("plain text"), None);
        assert_eq!(decode("[unterminated"), None);
        assert_eq!(decode("[["), None);
        assert_eq!(decode("]ch]trailing"), None);
        assert_eq!(decode("[ch[trailing"), None);
        assert_eq!(decode("]ch["), None);
    }

    #[test]
    fn test_relevance_is_offset_one_substring() {
        assert!(is_relevant("[ch]hello", "ch"));
        assert!(is_relevant("[ch/loop[", "ch"));
        assert!(is_relevant("]ch/loop]", "ch/loop"));
        // Parent close is not relevant to the child prefix.
        assert!(!is_relevant("]ch]", "ch/loop"));
        // Sibling prefixes do not match.
        assert!(!is_relevant("[ch/other]x", "ch/loop"));
        // Too short.
        assert!(!is_relevant("[c]", "ch"));
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_block_name("herd").is_ok());
        assert!(validate_block_name("").is_err());
        assert!(validate_block_name("a/b").is_err());
        assert!(validate_block_name("a[b").is_err());
        assert!(validate_block_name("a]b").is_err());

        assert!(validate_channel_name("mytrun").is_ok());
        assert!(validate_channel_name("my.trun-2").is_ok());
        assert!(validate_channel_name("a\\b").is_err());
        assert!(validate_channel_name("a\0b").is_err());
    }

    #[test]
    fn test_round_trip_through_decode() {
        let prefix = "run/outer/inner";
        for (encoded, expect) in [
            (
                message_line(prefix, "payload"),
                TraceLine::Message {
                    prefix,
                    text: "payload",
                },
            ),
            (open_marker(prefix), TraceLine::BlockOpen { prefix }),
            (close_marker(prefix), TraceLine::BlockClose { prefix }),
        ] {
            assert_eq!(decode(&encoded), Some(expect));
        }
    }
}
