//! Core engine of the dilog divergence tracer.
//!
//! dilog finds the first point at which two runs of an
//! otherwise-deterministic application diverge in their observable
//! behavior. The application is instrumented with marker messages; the
//! first run records them to a `<channel>.dilog` trace file, and every
//! later run matches each newly produced message against the recording.
//! Messages bracketed into named *blocks* may have whole block
//! iterations reordered between runs (unordered containers, thread
//! pools) without counting as divergence; everything else must match
//! byte for byte, and the first irreconcilable operation reports the
//! offending trace line.
//!
//! Layering, leaves first:
//!
//! | module                  | role                                    |
//! |-------------------------|-----------------------------------------|
//! | [`codec`]               | trace line grammar                      |
//! | [`cursor`]              | seekable, line-counting trace reader    |
//! | [`stack`]               | open-block frames                       |
//! | [`record`]              | replayable log of live actions          |
//! | [`matcher`]             | the block-aware reorder matcher         |
//! | [`channel`], [`registry`] | public surface                        |

pub mod channel;
pub mod codec;
pub mod cursor;
pub mod matcher;
pub mod record;
pub mod registry;
pub mod stack;

pub use channel::{Channel, ChannelOptions};
pub use registry::{Registry, channel, channel_with, global};

pub use dilog_error::{DilogError, Result};
