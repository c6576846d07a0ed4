//! Public API facade for dilog.
//!
//! dilog is a diagnostic facility for applications that should produce
//! identical results on every run but do not. Instrument the suspect
//! code with marker messages: the first run in a directory records each
//! channel to `<channel>.dilog`, and every later run checks the live
//! messages against the recording, failing at the first divergence.
//! Bracket unordered work (hash-map iteration, thread pools) into named
//! blocks; block iterations may come in any order between runs while
//! everything inside one iteration stays ordered.
//!
//! ```no_run
//! fn main() -> dilog::Result<()> {
//!     for sheep in ["dolly", "shaun", "timmy"] {
//!         let ch = dilog::channel("mytrun")?;
//!         ch.with_block("herd", |ch| {
//!             dilog::emit!(ch, "sheep {sheep} counted")
//!         })?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! This tool is meant for chasing down a known irreproducibility, not
//! for production builds: tracing every message costs a file write or a
//! matching pass per call.

pub use dilog_core::{Channel, ChannelOptions, Registry, channel, channel_with, global};
pub use dilog_error::{DilogError, Result};

/// Format and emit a marker message on a channel, `printf` style.
///
/// Expands to `channel.emit(&format!(...))`; formatting stays at the
/// call site, the trace only ever sees the finished text.
#[macro_export]
macro_rules! emit {
    ($channel:expr, $($arg:tt)*) => {
        $channel.emit(&format!($($arg)*))
    };
}
