//! Seekable stream buffers over abstract byte sequences.
//!
//! A stream buffer maintains an in-memory window onto a longer byte
//! sequence. The window is described by plain cursor structs; the public
//! read/write algorithms are provided trait methods, and concrete adapters
//! implement only the `really_*` hooks that load, drain or reposition the
//! window against their particular sink or source.

pub mod file;
pub mod input;
pub mod memory;
pub mod output;

pub use file::{FileInBuf, FileOutBuf, OpenMode};
pub use input::InStreamBuf;
pub use memory::{MemInBuf, MemOutBuf};
pub use output::OutStreamBuf;

/// Anchor for seek and tell operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekAnchor {
    Begin,
    Current,
    End,
}

/// Marks a position as "not a position".
pub const INVALID_POSITION: i64 = -1;

/// Read-side window state.
///
/// `base_offset` is the stream position of the first window byte, `next`
/// the read cursor within the window and `end` the count of valid bytes.
/// Invariant: `next <= end <= window.len()`.
#[derive(Debug, Default, Clone)]
pub struct InCursor {
    pub base_offset: i64,
    pub next: usize,
    pub end: usize,
}

impl InCursor {
    /// Current stream position.
    pub fn pos(&self) -> i64 {
        self.base_offset + self.next as i64
    }

    pub fn available(&self) -> usize {
        self.end - self.next
    }
}

/// Write-side window state.
///
/// In addition to the window triple this tracks the dirty range
/// `[dirty_start, next)`, the high watermark (largest position ever
/// occupied by written data) and the position at which the most recent
/// synchronization ended.
#[derive(Debug, Clone)]
pub struct OutCursor {
    pub base_offset: i64,
    pub next: usize,
    pub end: usize,
    pub dirty_start: usize,
    pub dirty: bool,
    pub writable: bool,
    pub high_watermark: i64,
    pub last_touched: i64,
}

impl Default for OutCursor {
    fn default() -> OutCursor {
        OutCursor {
            base_offset: 0,
            next: 0,
            end: 0,
            dirty_start: 0,
            dirty: false,
            writable: true,
            high_watermark: 0,
            last_touched: 0,
        }
    }
}

impl OutCursor {
    /// Current stream position.
    pub fn pos(&self) -> i64 {
        self.base_offset + self.next as i64
    }
}
