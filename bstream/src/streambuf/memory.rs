use crate::buffer::{Buffer, Policy};
use crate::error::{Error, Result};
use crate::streambuf::{InCursor, InStreamBuf, OutCursor, OutStreamBuf, SeekAnchor};

/// Input stream buffer over an in-memory [`Buffer`].
///
/// The whole buffer is the window, so reads never copy: `getn` hands out
/// slices of the shared block.
pub struct MemInBuf {
    buf: Buffer,
    cur: InCursor,
}

impl MemInBuf {
    pub fn new(buf: Buffer) -> MemInBuf {
        let end = buf.len();
        MemInBuf {
            buf,
            cur: InCursor {
                base_offset: 0,
                next: 0,
                end,
            },
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buf
    }

    pub fn into_buffer(self) -> Buffer {
        self.buf
    }
}

impl InStreamBuf for MemInBuf {
    fn window(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn cursor(&self) -> &InCursor {
        &self.cur
    }

    fn cursor_mut(&mut self) -> &mut InCursor {
        &mut self.cur
    }

    fn really_underflow(&mut self) -> Result<usize> {
        // the window always covers the entire buffer
        Ok(self.cur.available())
    }

    fn really_seek(&mut self, anchor: SeekAnchor, offset: i64) -> Result<i64> {
        let size = self.buf.len() as i64;
        let target = match anchor {
            SeekAnchor::Begin => offset,
            SeekAnchor::Current => self.cur.pos() + offset,
            SeekAnchor::End => size + offset,
        };
        if target < 0 || target > size {
            return Err(Error::InvalidSeek);
        }
        self.cur.next = target as usize;
        Ok(target)
    }

    fn really_tell(&mut self, anchor: SeekAnchor) -> Result<i64> {
        Ok(match anchor {
            SeekAnchor::Begin => 0,
            SeekAnchor::Current => self.cur.pos(),
            SeekAnchor::End => self.buf.len() as i64,
        })
    }

    /// Zero-copy: the result shares the underlying block.
    fn getn(&mut self, n: usize) -> Result<Buffer> {
        let take = n.min(self.cur.available());
        let out = self.buf.slice(self.cur.next, take, false)?;
        self.cur.next += take;
        Ok(out)
    }
}

/// Output stream buffer over a growable in-memory [`Buffer`].
///
/// Flushing is a no-op (the buffer is the sink); overflow grows the
/// allocation. [`MemOutBuf::buffer`] hands off everything below the high
/// watermark as a shared view; the next write re-privatizes the storage
/// under the buffer's policy.
pub struct MemOutBuf {
    buf: Buffer,
    cur: OutCursor,
}

impl MemOutBuf {
    pub fn with_capacity(capacity: usize) -> MemOutBuf {
        MemOutBuf::with_buffer(Buffer::with_capacity(capacity, Policy::CopyOnWrite))
    }

    pub fn with_buffer(buf: Buffer) -> MemOutBuf {
        let end = buf.len();
        MemOutBuf {
            buf,
            cur: OutCursor {
                end,
                ..OutCursor::default()
            },
        }
    }

    /// The written sequence `[0, high_watermark)` as a shared view.
    pub fn buffer(&mut self) -> Result<Buffer> {
        self.flush()?;
        let hwm = self.cur.high_watermark as usize;
        let view = self.buf.slice(0, hwm, false)?;
        self.cur.writable = false;
        Ok(view)
    }

    /// Rewinds to an empty stream for reuse; the allocation is kept.
    pub fn clear(&mut self) {
        let writable = self.cur.writable;
        self.cur = OutCursor {
            end: self.buf.len(),
            writable,
            ..OutCursor::default()
        };
    }
}

impl OutStreamBuf for MemOutBuf {
    fn window_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut_slice()
    }

    fn cursor(&self) -> &OutCursor {
        &self.cur
    }

    fn cursor_mut(&mut self) -> &mut OutCursor {
        &mut self.cur
    }

    fn really_flush(&mut self) -> Result<()> {
        // memory is the sink
        Ok(())
    }

    fn really_overflow(&mut self, needed: usize) -> Result<()> {
        let cap = self.buf.len();
        let grown = (2 * needed).max(cap + cap / 2).max(cap + needed);
        self.buf.resize(grown);
        self.cur.end = self.buf.len();
        Ok(())
    }

    fn really_touch(&mut self) -> Result<()> {
        // fresh storage is zeroed, so holes need no materialization
        let c = &mut self.cur;
        if c.pos() > c.high_watermark {
            c.high_watermark = c.pos();
        }
        c.last_touched = c.pos();
        Ok(())
    }

    fn really_seek(&mut self, anchor: SeekAnchor, offset: i64) -> Result<i64> {
        self.flush()?;
        let target = match anchor {
            SeekAnchor::Begin => offset,
            SeekAnchor::Current => self.cur.pos() + offset,
            SeekAnchor::End => self.cur.high_watermark + offset,
        };
        if target < 0 {
            return Err(Error::InvalidSeek);
        }
        if target as usize > self.buf.len() {
            self.buf.resize(target as usize);
        }
        self.cur.next = target as usize;
        self.cur.end = self.buf.len();
        Ok(target)
    }

    fn really_make_writable(&mut self) -> Result<()> {
        // re-privatize after a hand-off; a copy happens only if a view of
        // the block is still alive
        self.buf.ensure_unique();
        self.cur.end = self.buf.len();
        Ok(())
    }
}
