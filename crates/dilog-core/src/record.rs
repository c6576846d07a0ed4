//! Action record: the replayable log of live operations.
//!
//! While the stack is deeper than the channel root, every successful live
//! action (message, block open, block close) is appended here. When the
//! matcher abandons the trace iteration currently under a frame and tries
//! a sibling iteration instead, it replays this record from the frame's
//! remembered index to re-establish the already-matched history against
//! the candidate. The record is cleared whenever the stack returns to
//! depth 1 after a successful top-level block match.

use std::fmt::Write as _;

/// One observable live action, in the order it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A message emitted at the then-current top-of-stack prefix.
    Msg(String),
    /// A block open at the given fully qualified prefix.
    Open(String),
    /// A block close at the given fully qualified prefix.
    Close(String),
}

/// Ordered, append-only log of [`Action`]s since the outermost open block
/// began. Replay walks it forward from a stored index; no copies are made.
#[derive(Debug, Default)]
pub struct ActionRecord {
    actions: Vec<Action>,
}

impl ActionRecord {
    /// Number of recorded actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the record is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Append one action.
    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// The action at `index`, if recorded.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Action> {
        self.actions.get(index)
    }

    /// Drop all recorded actions (stack returned to depth 1).
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Render the record with indentation reflecting block nesting, for
    /// the terminal divergence dump.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut depth = 1_usize;
        for action in &self.actions {
            match action {
                Action::Open(prefix) => {
                    let _ = writeln!(out, "{:indent$}open {prefix}", "", indent = depth * 2);
                    depth += 1;
                }
                Action::Close(prefix) => {
                    depth = depth.saturating_sub(1).max(1);
                    let _ = writeln!(out, "{:indent$}close {prefix}", "", indent = depth * 2);
                }
                Action::Msg(text) => {
                    let _ = writeln!(out, "{:indent$}msg {text:?}", "", indent = depth * 2);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_get_clear() {
        let mut rec = ActionRecord::default();
        assert!(rec.is_empty());
        rec.push(Action::Open("ch/F".to_owned()));
        rec.push(Action::Msg("hello".to_owned()));
        rec.push(Action::Close("ch/F".to_owned()));
        assert_eq!(rec.len(), 3);
        assert_eq!(rec.get(1), Some(&Action::Msg("hello".to_owned())));
        assert_eq!(rec.get(3), None);
        rec.clear();
        assert!(rec.is_empty());
    }

    #[test]
    fn test_render_indents_by_nesting() {
        let mut rec = ActionRecord::default();
        rec.push(Action::Open("ch/F/S".to_owned()));
        rec.push(Action::Msg("a".to_owned()));
        rec.push(Action::Close("ch/F/S".to_owned()));
        rec.push(Action::Msg("after".to_owned()));
        let rendered = rec.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "  open ch/F/S");
        assert_eq!(lines[1], "    msg \"a\"");
        assert_eq!(lines[2], "  close ch/F/S");
        assert_eq!(lines[3], "  msg \"after\"");
    }
}
