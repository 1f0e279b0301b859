use crate::buffer::{Buffer, Policy};
use crate::error::{Error, Result};
use crate::streambuf::{InCursor, SeekAnchor};

/// Read-oriented cursor over an abstract byte sequence.
///
/// Implementors provide the window accessors and the three `really_*`
/// hooks; everything else is derived. `really_underflow` must either load
/// more bytes into the window, advancing `base_offset` to the window's new
/// stream position, or report zero bytes available.
pub trait InStreamBuf {
    /// The loaded window. Bytes at `[cursor().next, cursor().end)` are
    /// unconsumed.
    fn window(&self) -> &[u8];

    fn cursor(&self) -> &InCursor;

    fn cursor_mut(&mut self) -> &mut InCursor;

    /// Loads more bytes when the window is exhausted; returns the number of
    /// bytes now available at the cursor.
    fn really_underflow(&mut self) -> Result<usize>;

    fn really_seek(&mut self, anchor: SeekAnchor, offset: i64) -> Result<i64>;

    fn really_tell(&mut self, anchor: SeekAnchor) -> Result<i64>;

    /// Reads one byte.
    fn get(&mut self) -> Result<u8> {
        if self.cursor().available() == 0 && self.really_underflow()? == 0 {
            return Err(Error::ReadPastEndOfStream);
        }
        let b = self.window()[self.cursor().next];
        self.cursor_mut().next += 1;
        Ok(b)
    }

    /// Reads one byte without consuming it.
    fn peek(&mut self) -> Result<u8> {
        if self.cursor().available() == 0 && self.really_underflow()? == 0 {
            return Err(Error::ReadPastEndOfStream);
        }
        Ok(self.window()[self.cursor().next])
    }

    /// Copies up to `dst.len()` bytes into `dst`, refilling the window as
    /// needed. Returns the number of bytes read; short only at end of
    /// stream.
    fn getn_into(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < dst.len() {
            let avail = self.cursor().available();
            if avail == 0 {
                if self.really_underflow()? == 0 {
                    break;
                }
                continue;
            }
            let n = avail.min(dst.len() - filled);
            let start = self.cursor().next;
            dst[filled..filled + n].copy_from_slice(&self.window()[start..start + n]);
            self.cursor_mut().next += n;
            filled += n;
        }
        Ok(filled)
    }

    /// Reads up to `n` bytes into a fresh buffer; short only at end of
    /// stream. Adapters whose window is itself a shared buffer may override
    /// this with a zero-copy slice.
    fn getn(&mut self, n: usize) -> Result<Buffer> {
        let mut buf = Buffer::with_capacity(n, Policy::CopyOnWrite);
        let got = self.getn_into(buf.as_mut_slice())?;
        if got < n {
            buf.resize(got);
        }
        Ok(buf)
    }

    fn seek(&mut self, anchor: SeekAnchor, offset: i64) -> Result<i64> {
        self.really_seek(anchor, offset)
    }

    fn seek_to(&mut self, pos: i64) -> Result<i64> {
        self.really_seek(SeekAnchor::Begin, pos)
    }

    fn tell(&mut self, anchor: SeekAnchor) -> Result<i64> {
        self.really_tell(anchor)
    }

    /// Current stream position.
    fn position(&mut self) -> Result<i64> {
        self.really_tell(SeekAnchor::Current)
    }

    /// Total size of the underlying sequence.
    fn size(&mut self) -> Result<u64> {
        Ok(self.really_tell(SeekAnchor::End)? as u64)
    }
}
