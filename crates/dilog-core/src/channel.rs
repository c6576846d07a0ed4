//! Channels: one trace file, one matcher state, one owning thread.
//!
//! A channel is created lazily on first lookup through the
//! [`Registry`](crate::registry::Registry). Its mode is decided once, at
//! creation: if `<channel>.dilog` can be opened for reading the channel
//! replays against it, otherwise the file is created and the channel
//! records into it.
//!
//! # Propagation policy
//!
//! Divergences from [`Channel::emit`] and [`Channel::open_block`] are
//! raised synchronously (and latched, so the channel stays bad).
//! [`Channel::close_block`] never raises a divergence: close runs on
//! scope-exit paths, so a detected divergence is written to standard
//! error and latched into the channel; the next `emit` or `open_block`
//! raises it. Once latched, the error is sticky for the channel's
//! lifetime.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, trace, warn};

use dilog_error::{DilogError, Result};

use crate::codec::{self, close_marker, message_line, open_marker};
use crate::cursor::TracePos;
use crate::matcher::Replayer;
use crate::stack::{BlockFrame, BlockStack, FrameOrigin};

/// Options recognized at channel lookup.
#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    /// When false, the thread-affinity check is skipped for this handle.
    /// Meant for shutdown paths where destructors run on a different
    /// thread than the one that created the channel.
    pub thread_safe: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self { thread_safe: true }
    }
}

/// Record-mode state: an append sink plus the name stack for prefixes.
struct Recorder {
    out: BufWriter<File>,
    stack: BlockStack,
}

impl Recorder {
    fn new(name: &str, file: File) -> Self {
        Self {
            out: BufWriter::new(file),
            stack: BlockStack::new(name),
        }
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn emit(&mut self, text: &str) -> Result<()> {
        let line = message_line(&self.stack.top().prefix, text);
        self.write_line(&line)
    }

    fn open_block(&mut self, name: &str) -> Result<()> {
        codec::validate_block_name(name)?;
        let prefix = self.stack.child_prefix(name);
        self.write_line(&open_marker(&prefix))?;
        self.stack.push(BlockFrame {
            name: name.to_owned(),
            prefix,
            base: TracePos::START,
            replay_index: 0,
            origin: FrameOrigin::User,
        });
        Ok(())
    }

    fn close_block(&mut self, channel: &str) -> Result<()> {
        if self.stack.depth() == 1 {
            return Err(DilogError::BlockStackEmpty {
                channel: channel.to_owned(),
            });
        }
        let line = close_marker(&self.stack.top().prefix);
        self.write_line(&line)?;
        self.stack.pop();
        Ok(())
    }
}

enum Mode {
    Record(Recorder),
    Replay(Replayer),
}

struct ChannelState {
    mode: Mode,
    latched: Option<DilogError>,
}

/// Channel identity and state shared between all handles for a name.
pub(crate) struct ChannelShared {
    name: String,
    owner: ThreadId,
    state: Mutex<ChannelState>,
}

impl ChannelShared {
    /// Create the channel for `name`, deciding the mode from the trace
    /// file at `path`: readable means replay, otherwise record into a
    /// fresh file.
    pub(crate) fn create(name: &str, path: &std::path::Path) -> Result<Arc<Self>> {
        let mode = match File::open(path) {
            Ok(file) => {
                debug!(channel = name, path = %path.display(), "replaying existing trace");
                Mode::Replay(Replayer::new(name, file))
            }
            Err(_) => {
                let file = File::create(path)?;
                debug!(channel = name, path = %path.display(), "recording new trace");
                Mode::Record(Recorder::new(name, file))
            }
        };
        Ok(Arc::new(Self {
            name: name.to_owned(),
            owner: thread::current().id(),
            state: Mutex::new(ChannelState { mode, latched: None }),
        }))
    }
}

/// A handle to one channel.
///
/// Handles are cheap to clone through the registry; all of them share the
/// same underlying state. The `thread_safe` option is a property of the
/// handle, so a shutdown path can hold an unchecked handle while regular
/// code keeps the affinity check.
pub struct Channel {
    shared: Arc<ChannelShared>,
    check_affinity: bool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.shared.name)
            .field("check_affinity", &self.check_affinity)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(shared: Arc<ChannelShared>, options: ChannelOptions) -> Self {
        Self {
            shared,
            check_affinity: options.thread_safe,
        }
    }

    /// The channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether this channel replays an existing trace (as opposed to
    /// recording a new one).
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        let state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        matches!(state.mode, Mode::Replay(_))
    }

    /// Affinity check plus state lock. The mutex makes shared handles
    /// memory-safe even when the affinity check is disabled; the check
    /// exists to *detect* cross-thread misuse, not to serialize it.
    fn lock(&self) -> Result<MutexGuard<'_, ChannelState>> {
        if self.check_affinity && thread::current().id() != self.shared.owner {
            return Err(DilogError::CrossThreadAccess {
                channel: self.shared.name.clone(),
            });
        }
        Ok(self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn take_latched(state: &ChannelState) -> Option<DilogError> {
        state.latched.as_ref().map(DilogError::duplicate)
    }

    /// Emit one marker message.
    ///
    /// A single trailing `\n` is tolerated and stripped, matching
    /// `printf`-style call sites; interior newlines are rejected because
    /// the trace is line-oriented.
    pub fn emit(&self, text: &str) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(err) = Self::take_latched(&state) {
            return Err(err);
        }
        let text = text.strip_suffix('\n').unwrap_or(text);
        if text.contains('\n') {
            return Err(DilogError::InvalidMessage {
                channel: self.shared.name.clone(),
                detail: "message text may not contain interior newlines".to_owned(),
            });
        }
        let result = match &mut state.mode {
            Mode::Record(rec) => rec.emit(text),
            Mode::Replay(rep) => rep.emit(text),
        };
        self.latch_if_divergence(&mut state, result)
    }

    /// Open a named block. Iterations of a same-named block are treated
    /// as unordered siblings during replay.
    pub fn open_block(&self, name: &str) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(err) = Self::take_latched(&state) {
            return Err(err);
        }
        trace!(channel = %self.shared.name, block = name, "open block");
        let result = match &mut state.mode {
            Mode::Record(rec) => rec.open_block(name),
            Mode::Replay(rep) => rep.open_block(name),
        };
        self.latch_if_divergence(&mut state, result)
    }

    /// Close the innermost open block.
    ///
    /// Replay-mode divergences are latched, not raised: the error is
    /// reported on standard error here and returned from the next `emit`
    /// or `open_block`.
    pub fn close_block(&self) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(err) = Self::take_latched(&state) {
            return Err(err);
        }
        trace!(channel = %self.shared.name, "close block");
        let result = match &mut state.mode {
            Mode::Record(rec) => rec.close_block(&self.shared.name),
            Mode::Replay(rep) => rep.close_block(),
        };
        match result {
            Err(err) if err.is_divergence() => {
                warn!(channel = %self.shared.name, error = %err, "divergence latched at block close");
                eprintln!("dilog: {err}");
                state.latched = Some(err);
                Ok(())
            }
            other => other,
        }
    }

    /// Run `body` between [`Channel::open_block`] and
    /// [`Channel::close_block`], closing on every exit path including the
    /// body's error path.
    pub fn with_block<R>(&self, name: &str, body: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        self.open_block(name)?;
        let result = body(self);
        let closed = self.close_block();
        match result {
            Ok(value) => closed.map(|()| value),
            Err(err) => Err(err),
        }
    }

    /// Raise synchronously, but also latch divergences so the channel
    /// stays known-bad for subsequent operations.
    fn latch_if_divergence(&self, state: &mut ChannelState, result: Result<()>) -> Result<()> {
        if let Err(err) = result {
            if err.is_divergence() {
                state.latched = Some(err.duplicate());
            }
            return Err(err);
        }
        Ok(())
    }
}
