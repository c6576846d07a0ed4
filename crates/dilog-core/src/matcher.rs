//! Replay-mode engine: the block-aware reorder matcher.
//!
//! In replay mode every live operation (message emit, block open, block
//! close) consumes trace lines through this state machine. In the common
//! case the next relevant line equals the expected one and matching is a
//! single read. When it does not, the matcher searches for a permutation
//! of recorded block iterations consistent with the live stream:
//!
//! 1. the current iteration's start is remembered as *unmatched* and the
//!    rest of the iteration is skipped;
//! 2. an earlier-seen unmatched sibling iteration is preferred, otherwise
//!    the cursor scans forward for the next sibling open marker;
//! 3. if the enclosing block is ending instead, the search ascends one
//!    level and repeats with the enclosing frame;
//! 4. once a candidate iteration is lined up, the action record is
//!    replayed against it from the candidate frame's replay index to the
//!    end of the record, re-establishing the already-matched history;
//! 5. only when the ascent reaches the channel root with no viable
//!    iteration left is the divergence terminal.
//!
//! Frames materialized while replaying the record are tagged `Synthetic`
//! and destroyed by their recorded close; user frames popped during the
//! ascent are parked on a rollback stack and restored by the `Open`
//! entries of a successful replay. Both must be fully drained when a
//! reorder succeeds.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::ops::Bound;

use tracing::{debug, error, trace};

use dilog_error::{DilogError, Result};

use crate::codec::{self, close_marker, is_relevant, message_line, open_marker};
use crate::cursor::{TraceCursor, TracePos};
use crate::record::{Action, ActionRecord};
use crate::stack::{BlockFrame, BlockStack, FrameOrigin};

/// Which expectation a divergence error should be reported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpectKind {
    Message,
    BlockOpen,
    BlockClose,
}

/// The line that failed to match, if any; `None` means the trace ended
/// while the match was still being sought.
#[derive(Debug)]
struct Offending {
    line: Option<String>,
    line_no: u64,
}

/// Outcome of a reorder attempt.
enum Reordered {
    /// A viable iteration was found and the history replayed; the caller
    /// retries its expected line.
    Recovered,
    /// No permutation of recorded iterations reconciles the live stream.
    Exhausted,
}

/// Outcome of a single-shot line match.
enum LineMatch {
    Matched,
    Mismatch(Offending),
}

/// Outcome of scanning for a block-open marker.
enum OpenScan {
    /// The open marker was consumed; `base` is the position before it.
    Opened { base: TracePos },
    /// A line relevant to the enclosing scope ended the search.
    Boundary(Offending),
}

/// Outcome of replaying the action record suffix.
enum Replayed {
    Complete,
    Mismatch(Offending),
}

/// Replay-mode state for one channel.
pub struct Replayer {
    channel: String,
    cursor: TraceCursor,
    stack: BlockStack,
    record: ActionRecord,
    /// Per prefix: iteration starts (offset before the open marker, with
    /// the line count at that offset) read but not yet consumed by a
    /// successful match.
    unmatched: BTreeMap<String, BTreeMap<u64, u64>>,
    /// Per prefix: the furthest position just past a consumed close
    /// marker. When the last unmatched sibling is closed the cursor moves
    /// here, past iterations that were matched out of trace order.
    frontier: HashMap<String, TracePos>,
    /// Per prefix: iteration starts already consumed by a successful
    /// match. The sibling scan steps over these so one trace iteration
    /// can never satisfy two live iterations.
    matched: HashMap<String, HashSet<u64>>,
    /// User frames popped during a matcher ascent, awaiting restoration
    /// by the `Open` entries of a successful replay.
    rollback: Vec<BlockFrame>,
}

impl std::fmt::Debug for Replayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayer")
            .field("channel", &self.channel)
            .field("depth", &self.stack.depth())
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Replayer {
    /// Start replaying `file` for the channel `name`.
    #[must_use]
    pub fn new(name: &str, file: File) -> Self {
        Self {
            channel: name.to_owned(),
            cursor: TraceCursor::new(file),
            stack: BlockStack::new(name),
            record: ActionRecord::default(),
            unmatched: BTreeMap::new(),
            frontier: HashMap::new(),
            matched: HashMap::new(),
            rollback: Vec::new(),
        }
    }

    /// Current block depth (1 = only the channel root).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    // ── Live operations ─────────────────────────────────────────────────

    /// Match a live message against the trace.
    pub fn emit(&mut self, text: &str) -> Result<()> {
        let prefix = self.stack.top().prefix.clone();
        let expected = message_line(&prefix, text);
        self.match_line_with_reorder(&expected, &prefix, ExpectKind::Message)?;
        if self.stack.depth() > 1 {
            self.record.push(Action::Msg(text.to_owned()));
        }
        Ok(())
    }

    /// Match a live block open against the trace and push the frame.
    pub fn open_block(&mut self, name: &str) -> Result<()> {
        codec::validate_block_name(name)?;
        let prefix = self.stack.child_prefix(name);
        let base = self.open_with_reorder(&prefix)?;
        if self.stack.depth() > 1 {
            self.record.push(Action::Open(prefix.clone()));
        }
        let replay_index = self.record.len();
        self.stack.push(BlockFrame {
            name: name.to_owned(),
            prefix,
            base,
            replay_index,
            origin: FrameOrigin::User,
        });
        Ok(())
    }

    /// Match a live block close against the trace and pop the frame.
    ///
    /// On divergence the returned error is meant to be latched by the
    /// channel, not raised; see the propagation policy on [`Channel`].
    ///
    /// [`Channel`]: crate::channel::Channel
    pub fn close_block(&mut self) -> Result<()> {
        if self.stack.depth() == 1 {
            return Err(DilogError::BlockStackEmpty {
                channel: self.channel.clone(),
            });
        }
        let prefix = self.stack.top().prefix.clone();
        let expected = close_marker(&prefix);
        self.match_line_with_reorder(&expected, &prefix, ExpectKind::BlockClose)?;
        self.finish_close()?;
        let frame = self.stack.pop().ok_or_else(|| DilogError::BlockStackEmpty {
            channel: self.channel.clone(),
        })?;
        debug_assert_eq!(frame.origin, FrameOrigin::User);
        if self.stack.depth() > 1 {
            self.record.push(Action::Close(prefix));
        } else {
            self.record.clear();
        }
        Ok(())
    }

    // ── Matching primitives ─────────────────────────────────────────────

    /// Match one expected line, invoking the reorder matcher on mismatch
    /// and retrying until it either matches or the search is exhausted.
    fn match_line_with_reorder(
        &mut self,
        expected: &str,
        prefix: &str,
        kind: ExpectKind,
    ) -> Result<()> {
        // The error, if the search exhausts, points at the first line
        // that failed to match, not at the last candidate examined.
        let mut first: Option<(Option<String>, u64)> = None;
        loop {
            match self.try_match_line(expected, prefix)? {
                LineMatch::Matched => return Ok(()),
                LineMatch::Mismatch(offending) => {
                    first.get_or_insert_with(|| (offending.line.clone(), offending.line_no));
                    match self.reorder(offending)? {
                        Reordered::Recovered => {}
                        Reordered::Exhausted => {
                            let (found, line_no) =
                                first.unwrap_or((None, self.cursor.line()));
                            return Err(self.divergence_error(kind, expected, found, line_no));
                        }
                    }
                }
            }
        }
    }

    /// Single-shot: read forward to the next line relevant to `prefix`
    /// and compare it with `expected`. Irrelevant lines are skipped.
    fn try_match_line(&mut self, expected: &str, prefix: &str) -> Result<LineMatch> {
        loop {
            let Some(line) = self.cursor.read_line()? else {
                return Err(DilogError::UnexpectedEndOfTrace {
                    channel: self.channel.clone(),
                    line: self.cursor.line(),
                    expected: expected.to_owned(),
                });
            };
            if line == expected {
                return Ok(LineMatch::Matched);
            }
            if is_relevant(&line, prefix) {
                self.check_well_formed(&line)?;
                return Ok(LineMatch::Mismatch(Offending {
                    line_no: self.cursor.line(),
                    line: Some(line),
                }));
            }
            // Noise from an unrelated scope: cursor and line count only.
        }
    }

    /// Scan for the open marker of `child_prefix`, retrying through the
    /// reorder matcher when the enclosing scope diverges. Returns the
    /// position before the consumed open marker.
    fn open_with_reorder(&mut self, child_prefix: &str) -> Result<TracePos> {
        let expected = open_marker(child_prefix);
        let mut first: Option<(Option<String>, u64)> = None;
        loop {
            let boundary = self.stack.top().prefix.clone();
            match self.scan_open(child_prefix, &boundary)? {
                OpenScan::Opened { base } => return Ok(base),
                OpenScan::Boundary(offending) => {
                    first.get_or_insert_with(|| (offending.line.clone(), offending.line_no));
                    match self.reorder(offending)? {
                        Reordered::Recovered => {}
                        Reordered::Exhausted => {
                            let (found, line_no) =
                                first.unwrap_or((None, self.cursor.line()));
                            return Err(self.divergence_error(
                                ExpectKind::BlockOpen,
                                &expected,
                                found,
                                line_no,
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Read forward for the open marker of `child_prefix`, skipping lines
    /// that belong to neither the sought block nor its enclosing scope,
    /// and stepping over sibling iterations that were already consumed by
    /// a successful match. A line relevant to the enclosing prefix that
    /// is not the open marker means the enclosing block is ending here;
    /// end of trace reports the same way with no line.
    fn scan_open(&mut self, child_prefix: &str, boundary_prefix: &str) -> Result<OpenScan> {
        let expected_open = open_marker(child_prefix);
        loop {
            let before = self.cursor.pos();
            let Some(line) = self.cursor.read_line()? else {
                return Ok(OpenScan::Boundary(Offending {
                    line: None,
                    line_no: self.cursor.line(),
                }));
            };
            if line == expected_open {
                let consumed = self
                    .matched
                    .get(child_prefix)
                    .is_some_and(|bases| bases.contains(&before.offset));
                if consumed {
                    self.scan_to_close(child_prefix)?;
                    continue;
                }
                return Ok(OpenScan::Opened { base: before });
            }
            if is_relevant(&line, boundary_prefix) {
                self.check_well_formed(&line)?;
                return Ok(OpenScan::Boundary(Offending {
                    line_no: self.cursor.line(),
                    line: Some(line),
                }));
            }
        }
    }

    /// Defensive grammar check on a line the matcher is about to treat as
    /// an offending divergence. Normal writers never produce unparseable
    /// lines; a hand-edited or truncated trace reports as malformed
    /// rather than as a bogus divergence.
    fn check_well_formed(&self, line: &str) -> Result<()> {
        if codec::decode(line).is_none() {
            return Err(DilogError::MalformedTrace {
                channel: self.channel.clone(),
                line: self.cursor.line(),
                content: line.to_owned(),
            });
        }
        Ok(())
    }

    /// Consume lines until the close marker for `prefix` has been read,
    /// fully skipping the remainder of an abandoned iteration.
    fn scan_to_close(&mut self, prefix: &str) -> Result<()> {
        let close = close_marker(prefix);
        loop {
            let Some(line) = self.cursor.read_line()? else {
                return Err(DilogError::UnexpectedEndOfTrace {
                    channel: self.channel.clone(),
                    line: self.cursor.line(),
                    expected: close,
                });
            };
            if line == close {
                return Ok(());
            }
        }
    }

    // ── Reorder search ──────────────────────────────────────────────────

    /// The §reorder state machine. Entered with the line that failed to
    /// match at the current frame; iterates sibling candidates and, when
    /// a level is exhausted, ascends to the enclosing frame.
    fn reorder(&mut self, mut offending: Offending) -> Result<Reordered> {
        loop {
            if self.stack.depth() == 1 {
                self.dump_divergence(&offending);
                self.rollback.clear();
                return Ok(Reordered::Exhausted);
            }
            let prefix = self.stack.top().prefix.clone();
            let base = self.stack.top().base;
            debug!(
                channel = %self.channel,
                prefix = %prefix,
                base_offset = base.offset,
                offending = offending.line.as_deref().unwrap_or("<end of trace>"),
                "mismatch, searching sibling iterations"
            );

            // 1. Remember this iteration as read-but-unmatched.
            self.unmatched
                .entry(prefix.clone())
                .or_default()
                .insert(base.offset, base.line);

            // 2. Skip the rest of the failed iteration, unless the
            // offending line already was its close marker.
            if offending.line.as_deref() != Some(close_marker(&prefix).as_str()) {
                self.scan_to_close(&prefix)?;
            }

            // 3. Prefer the earliest unmatched sibling beyond the failed
            // base; otherwise read forward for a fresh sibling.
            let candidate = self.unmatched.get(&prefix).and_then(|iters| {
                iters
                    .range((Bound::Excluded(base.offset), Bound::Unbounded))
                    .next()
                    .map(|(offset, line)| TracePos {
                        offset: *offset,
                        line: *line,
                    })
            });
            if let Some(pos) = candidate {
                self.cursor.seek(pos)?;
                let opened = self.cursor.read_line()?;
                debug_assert_eq!(
                    opened.as_deref(),
                    Some(open_marker(&prefix).as_str()),
                    "unmatched index entries start at open markers"
                );
                self.rebase_top(pos);
            } else {
                let boundary = self.stack.parent().prefix.clone();
                match self.scan_open(&prefix, &boundary)? {
                    OpenScan::Opened { base } => self.rebase_top(base),
                    OpenScan::Boundary(next_offending) => {
                        // 4. The enclosing block is ending: ascend.
                        let frame = self.stack.pop().ok_or_else(|| {
                            DilogError::BlockStackEmpty {
                                channel: self.channel.clone(),
                            }
                        })?;
                        trace!(
                            channel = %self.channel,
                            prefix = %frame.prefix,
                            origin = ?frame.origin,
                            "no sibling iteration, ascending"
                        );
                        if frame.origin == FrameOrigin::User {
                            self.rollback.push(frame);
                        }
                        offending = next_offending;
                        continue;
                    }
                }
            }

            // 5. Replay the already-matched history against the candidate.
            match self.replay_suffix()? {
                Replayed::Complete => {
                    debug_assert!(
                        self.rollback.is_empty(),
                        "every rolled-back user frame is restored by a successful replay"
                    );
                    debug_assert!(
                        self.stack.iter().all(|f| f.origin == FrameOrigin::User),
                        "every synthetic frame is destroyed by its recorded close"
                    );
                    debug!(channel = %self.channel, prefix = %prefix, "reorder recovered");
                    return Ok(Reordered::Recovered);
                }
                Replayed::Mismatch(next_offending) => {
                    offending = next_offending;
                }
            }
        }
    }

    /// Re-execute the action record from the current frame's replay index
    /// to the end of the record against the freshly lined-up iteration.
    fn replay_suffix(&mut self) -> Result<Replayed> {
        let mut idx = self.stack.top().replay_index;
        while let Some(action) = self.record.get(idx).cloned() {
            match action {
                Action::Msg(text) => {
                    let prefix = self.stack.top().prefix.clone();
                    let expected = message_line(&prefix, &text);
                    match self.try_match_line(&expected, &prefix)? {
                        LineMatch::Matched => {}
                        LineMatch::Mismatch(off) => return Ok(Replayed::Mismatch(off)),
                    }
                }
                Action::Open(prefix) => {
                    let boundary = self.stack.top().prefix.clone();
                    match self.scan_open(&prefix, &boundary)? {
                        OpenScan::Opened { base } => self.push_replayed(&prefix, base, idx + 1),
                        OpenScan::Boundary(off) => return Ok(Replayed::Mismatch(off)),
                    }
                }
                Action::Close(prefix) => {
                    let expected = close_marker(&prefix);
                    match self.try_match_line(&expected, &prefix)? {
                        LineMatch::Matched => {
                            self.finish_close()?;
                            let frame =
                                self.stack.pop().ok_or_else(|| DilogError::BlockStackEmpty {
                                    channel: self.channel.clone(),
                                })?;
                            debug_assert_eq!(frame.prefix, prefix);
                        }
                        LineMatch::Mismatch(off) => return Ok(Replayed::Mismatch(off)),
                    }
                }
            }
            idx += 1;
        }
        Ok(Replayed::Complete)
    }

    /// Push the frame for a replayed `Open`: the parked user frame with
    /// this prefix and replay index if the ascent popped one, otherwise a
    /// fresh synthetic frame.
    fn push_replayed(&mut self, prefix: &str, base: TracePos, replay_index: usize) {
        let parked = self
            .rollback
            .iter()
            .position(|f| f.prefix == prefix && f.replay_index == replay_index);
        let frame = match parked {
            Some(i) => {
                let mut frame = self.rollback.swap_remove(i);
                frame.base = base;
                frame
            }
            None => {
                let name = prefix.rsplit('/').next().unwrap_or(prefix).to_owned();
                BlockFrame {
                    name,
                    prefix: prefix.to_owned(),
                    base,
                    replay_index,
                    origin: FrameOrigin::Synthetic,
                }
            }
        };
        self.stack.push(frame);
    }

    // ── Bookkeeping ─────────────────────────────────────────────────────

    /// Re-base the top frame onto a candidate iteration, discarding the
    /// interior bookkeeping of the abandoned one.
    fn rebase_top(&mut self, base: TracePos) {
        let prefix = self.stack.top().prefix.clone();
        self.purge_descendants(&prefix);
        self.stack.top_mut().base = base;
    }

    /// After a close marker for the top frame has been consumed: update
    /// the unmatched index and the consumed frontier, then position the
    /// cursor for the next sibling (earliest unmatched iteration if any
    /// remain, else past the furthest consumed close).
    fn finish_close(&mut self) -> Result<()> {
        let prefix = self.stack.top().prefix.clone();
        let base = self.stack.top().base;
        let end = self.cursor.pos();

        self.purge_descendants(&prefix);
        if let Some(iters) = self.unmatched.get_mut(&prefix) {
            iters.remove(&base.offset);
            if iters.is_empty() {
                self.unmatched.remove(&prefix);
            }
        }
        self.matched
            .entry(prefix.clone())
            .or_default()
            .insert(base.offset);
        let frontier = self.frontier.entry(prefix.clone()).or_insert(end);
        if end.offset > frontier.offset {
            *frontier = end;
        }

        let next = self.unmatched.get(&prefix).and_then(|iters| {
            iters.iter().next().map(|(offset, line)| TracePos {
                offset: *offset,
                line: *line,
            })
        });
        match next {
            Some(pos) => self.cursor.seek(pos)?,
            None => {
                let target = self.frontier[&prefix];
                if target.offset != self.cursor.tell() {
                    self.cursor.seek(target)?;
                }
            }
        }
        Ok(())
    }

    /// Drop unmatched, frontier, and matched entries for prefixes
    /// strictly below `prefix`; their scope (one enclosing iteration) is
    /// gone.
    fn purge_descendants(&mut self, prefix: &str) {
        let below = format!("{prefix}/");
        self.unmatched.retain(|k, _| !k.starts_with(&below));
        self.frontier.retain(|k, _| !k.starts_with(&below));
        self.matched.retain(|k, _| !k.starts_with(&below));
    }

    // ── Error reporting ─────────────────────────────────────────────────

    /// Build the divergence error for an exhausted search.
    fn divergence_error(
        &self,
        kind: ExpectKind,
        expected: &str,
        found: Option<String>,
        line_no: u64,
    ) -> DilogError {
        let channel = self.channel.clone();
        let expected = expected.to_owned();
        match found {
            None => DilogError::UnexpectedEndOfTrace {
                channel,
                line: self.cursor.line(),
                expected,
            },
            Some(found) => match kind {
                ExpectKind::Message => DilogError::ExpectedMessage {
                    channel,
                    line: line_no,
                    expected,
                    found,
                },
                ExpectKind::BlockOpen => DilogError::ExpectedBlockOpen {
                    channel,
                    line: line_no,
                    expected,
                    found,
                },
                ExpectKind::BlockClose => DilogError::ExpectedBlockClose {
                    channel,
                    line: line_no,
                    expected,
                    found,
                },
            },
        }
    }

    /// Terminal failure: dump the action record (indented by nesting) and
    /// the unmatched iteration line numbers for every open prefix.
    fn dump_divergence(&self, offending: &Offending) {
        let mut summary = String::new();
        summary.push_str("dilog divergence context\n");
        summary.push_str("  actions since the outermost open block:\n");
        if self.record.is_empty() {
            summary.push_str("    (none)\n");
        } else {
            for line in self.record.render().lines() {
                summary.push_str("  ");
                summary.push_str(line);
                summary.push('\n');
            }
        }
        summary.push_str("  unmatched iterations still on file:\n");
        if self.unmatched.is_empty() {
            summary.push_str("    (none)\n");
        } else {
            for (prefix, iters) in &self.unmatched {
                let lines: Vec<u64> = iters.values().map(|line| line + 1).collect();
                summary.push_str(&format!("    {prefix}: trace lines {lines:?}\n"));
            }
        }
        error!(
            channel = %self.channel,
            line = offending.line_no,
            found = offending.line.as_deref().unwrap_or("<end of trace>"),
            "no permutation of block iterations reconciles the live stream"
        );
        eprintln!("{summary}");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn replayer(content: &str) -> Replayer {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        tmp.write_all(content.as_bytes()).expect("write");
        tmp.flush().expect("flush");
        Replayer::new("ch", tmp.reopen().expect("reopen"))
    }

    #[test]
    fn test_plain_messages_match() {
        let mut rep = replayer("[ch]one\n[ch]two\n");
        rep.emit("one").expect("first message");
        rep.emit("two").expect("second message");
    }

    #[test]
    fn test_plain_message_mismatch_reports_line() {
        let mut rep = replayer("[ch]hello\n");
        let err = rep.emit("world").expect_err("divergence");
        match err {
            DilogError::ExpectedMessage {
                line,
                expected,
                found,
                ..
            } => {
                assert_eq!(line, 1);
                assert_eq!(expected, "[ch]world");
                assert_eq!(found, "[ch]hello");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_end_of_trace() {
        let mut rep = replayer("[ch]only\n");
        rep.emit("only").expect("matches");
        let err = rep.emit("more").expect_err("trace exhausted");
        assert!(matches!(err, DilogError::UnexpectedEndOfTrace { .. }));
    }

    #[test]
    fn test_block_round_trip_in_order() {
        let mut rep = replayer("[ch/L[\n[ch/L]i=0\n]ch/L]\n[ch/L[\n[ch/L]i=1\n]ch/L]\n");
        for i in 0..2 {
            rep.open_block("L").expect("open");
            rep.emit(&format!("i={i}")).expect("message");
            rep.close_block().expect("close");
        }
        assert_eq!(rep.depth(), 1);
    }

    #[test]
    fn test_block_iterations_swapped() {
        let mut rep = replayer("[ch/L[\n[ch/L]i=0\n]ch/L]\n[ch/L[\n[ch/L]i=1\n]ch/L]\n");
        for i in [1, 0] {
            rep.open_block("L").expect("open");
            rep.emit(&format!("i={i}")).expect("message");
            rep.close_block().expect("close");
        }
        assert_eq!(rep.depth(), 1);
    }

    #[test]
    fn test_messages_within_iteration_are_ordered() {
        let mut rep = replayer("[ch/L[\n[ch/L]a\n[ch/L]b\n]ch/L]\n");
        rep.open_block("L").expect("open");
        let err = rep.emit("b").expect_err("in-block order is fixed");
        assert!(err.is_divergence());
    }

    #[test]
    fn test_partial_iteration_match_then_reorder() {
        // Both iterations share the first message; divergence appears at
        // the second, so the matcher must replay the shared history
        // against the sibling.
        let trace = "[ch/L[\n[ch/L]shared\n[ch/L]first\n]ch/L]\n\
                     [ch/L[\n[ch/L]shared\n[ch/L]second\n]ch/L]\n";
        let mut rep = replayer(trace);
        rep.open_block("L").expect("open");
        rep.emit("shared").expect("shared prefix");
        rep.emit("second").expect("matches the second iteration");
        rep.close_block().expect("close");
        rep.open_block("L").expect("open again");
        rep.emit("shared").expect("shared prefix");
        rep.emit("first").expect("matches the first iteration");
        rep.close_block().expect("close");
    }

    #[test]
    fn test_omitted_iteration_detected() {
        let trace = "[ch/L[\n[ch/L]i=0\n]ch/L]\n[ch/L[\n[ch/L]i=1\n]ch/L]\n[ch]done\n";
        let mut rep = replayer(trace);
        rep.open_block("L").expect("open");
        rep.emit("i=1").expect("matches second iteration");
        rep.close_block().expect("close");
        // The unmatched first iteration blocks the trailing message.
        let err = rep.emit("done").expect_err("iteration 0 was never matched");
        assert!(err.is_divergence());
    }

    #[test]
    fn test_nested_inner_swap() {
        let trace = "[ch/F[\n\
                     [ch/F/S[\n[ch/F/S]a\n]ch/F/S]\n\
                     [ch/F/S[\n[ch/F/S]b\n]ch/F/S]\n\
                     ]ch/F]\n";
        let mut rep = replayer(trace);
        rep.open_block("F").expect("open outer");
        for msg in ["b", "a"] {
            rep.open_block("S").expect("open inner");
            rep.emit(msg).expect("inner message");
            rep.close_block().expect("close inner");
        }
        rep.close_block().expect("close outer");
        assert_eq!(rep.depth(), 1);
    }

    #[test]
    fn test_nested_wrong_message_fails() {
        let trace = "[ch/F[\n\
                     [ch/F/S[\n[ch/F/S]a\n]ch/F/S]\n\
                     [ch/F/S[\n[ch/F/S]b\n]ch/F/S]\n\
                     ]ch/F]\n";
        let mut rep = replayer(trace);
        rep.open_block("F").expect("open outer");
        rep.open_block("S").expect("open inner");
        let err = rep.emit("c").expect_err("no iteration carries c");
        assert!(err.is_divergence());
    }

    #[test]
    fn test_close_without_open_is_misuse() {
        let mut rep = replayer("");
        let err = rep.close_block().expect_err("nothing to close");
        assert!(matches!(err, DilogError::BlockStackEmpty { .. }));
    }

    #[test]
    fn test_extra_live_iteration_detected() {
        let trace = "[ch/L[\n[ch/L]i=0\n]ch/L]\n";
        let mut rep = replayer(trace);
        rep.open_block("L").expect("open");
        rep.emit("i=0").expect("message");
        rep.close_block().expect("close");
        let err = rep.open_block("L").expect_err("trace holds one iteration");
        assert!(err.is_divergence());
    }

    #[test]
    fn test_malformed_relevant_line() {
        // A truncated line that still carries the channel prefix reports
        // as malformed, not as a divergence.
        let mut rep = replayer("[ch]ok\n[chgarbage\n");
        rep.emit("ok").expect("first line is fine");
        let err = rep.emit("next").expect_err("unparseable line");
        match err {
            DilogError::MalformedTrace { line, content, .. } => {
                assert_eq!(line, 2);
                assert_eq!(content, "[chgarbage");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_open_against_message_line() {
        let mut rep = replayer("[ch]plain\n");
        let err = rep.open_block("L").expect_err("trace has a message here");
        match err {
            DilogError::ExpectedBlockOpen { expected, found, .. } => {
                assert_eq!(expected, "[ch/L[");
                assert_eq!(found, "[ch]plain");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
