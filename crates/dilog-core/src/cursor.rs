//! Seekable, line-counting reader over a trace file.
//!
//! The matcher navigates the trace by byte offset: it remembers the
//! position *before* an iteration's open marker and seeks back to it when
//! a different permutation of block iterations has to be tried. Offsets
//! returned by [`TraceCursor::pos`] after a `read_line` are valid seek
//! targets and correspond to the start of the next line.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};

/// A remembered position in the trace: byte offset plus the number of
/// lines consumed up to that offset.
///
/// Carrying the line count alongside the offset means a seek restores
/// accurate line numbers for error reporting without rescanning the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TracePos {
    /// Byte offset of the start of the next line.
    pub offset: u64,
    /// Number of lines fully consumed before `offset`.
    pub line: u64,
}

impl TracePos {
    /// Position at the start of the trace.
    pub const START: Self = Self { offset: 0, line: 0 };
}

/// Buffered reader over a `.dilog` file with tell/seek and line counting.
pub struct TraceCursor {
    reader: BufReader<File>,
    offset: u64,
    line: u64,
}

impl std::fmt::Debug for TraceCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceCursor")
            .field("offset", &self.offset)
            .field("line", &self.line)
            .finish_non_exhaustive()
    }
}

impl TraceCursor {
    /// Wrap an open trace file, positioned at the start.
    #[must_use]
    pub fn new(file: File) -> Self {
        Self {
            reader: BufReader::new(file),
            offset: 0,
            line: 0,
        }
    }

    /// Read the next line, stripping the terminating `\n`.
    ///
    /// Returns `Ok(None)` at end of trace. A final line without a trailing
    /// newline is still returned (tolerated on read, never produced by the
    /// recorder).
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.offset += n as u64;
        self.line += 1;
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        String::from_utf8(buf).map(Some).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("trace line {} is not valid UTF-8: {e}", self.line),
            )
        })
    }

    /// Current byte offset (start of the next unread line).
    #[must_use]
    pub const fn tell(&self) -> u64 {
        self.offset
    }

    /// Line number of the most recently read line (1-based; 0 before the
    /// first read).
    #[must_use]
    pub const fn line(&self) -> u64 {
        self.line
    }

    /// The current position as a seek target.
    #[must_use]
    pub const fn pos(&self) -> TracePos {
        TracePos {
            offset: self.offset,
            line: self.line,
        }
    }

    /// Reposition the reader and restore the line counter.
    pub fn seek(&mut self, pos: TracePos) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(pos.offset))?;
        self.offset = pos.offset;
        self.line = pos.line;
        Ok(())
    }
}
