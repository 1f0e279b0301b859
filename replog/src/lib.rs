//! A durable replicated log for a Raft-style consensus node.
//!
//! The log persists two kinds of frames: the node's election state
//! ([`ReplicantState`]) and the entries the state machine applies
//! ([`StateMachineUpdate`]). Frames are serialized with the `bstream`
//! codec and wrapped on disk in checksummed envelopes, so a crash leaves
//! the longest prefix of intact records recoverable by [`Log::restart`].
//!
//! All operations are synchronous with respect to the caller's thread:
//! consensus correctness depends on knowing that a write is durable before
//! acting on it, so every append and state update flushes before returning.

pub mod error;
pub mod frame;
pub mod log;

pub use error::{Error, Result};
pub use frame::{
    FilePosition, Frame, FrameKind, Index, ReplicantId, ReplicantState, StateMachineUpdate, Term,
};
pub use log::{Log, FRAME_SIZE_HINT};
