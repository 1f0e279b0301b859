use crate::error::{Error, Result};
use crate::streambuf::{OutCursor, SeekAnchor};

/// Write-oriented cursor into an abstract byte sequence.
///
/// Implementors provide the window accessors, `really_flush`, and whichever
/// other hooks differ from the defaults. The provided methods implement the
/// dirty-range, hole and high-watermark discipline:
///
/// * bytes written since the last flush live in `[dirty_start, next)`;
/// * a seek past the high watermark followed by a write opens a hole, which
///   `touch` materializes (by default, zero-fill and flush) before the first
///   dirty byte at the new position is recorded;
/// * `flush` synchronizes the dirty range, then records the high watermark
///   and the touch position.
pub trait OutStreamBuf {
    /// The writable window.
    fn window_mut(&mut self) -> &mut [u8];

    fn cursor(&self) -> &OutCursor;

    fn cursor_mut(&mut self) -> &mut OutCursor;

    /// Synchronizes `[dirty_start, next)` with the underlying sink. May
    /// slide the window, but must preserve the current position.
    fn really_flush(&mut self) -> Result<()>;

    /// Obtains window space for at least one more byte. The default cannot.
    fn really_overflow(&mut self, _needed: usize) -> Result<()> {
        Err(Error::NoBufferSpace)
    }

    /// Acknowledges a hole between the high watermark and the current
    /// position. The default materializes it with zero bytes.
    fn really_touch(&mut self) -> Result<()> {
        let hwm = self.cursor().high_watermark;
        let pos = self.cursor().pos();
        debug_assert_ne!(self.cursor().last_touched, pos);
        if hwm < pos {
            // rewind to the watermark and fill the gap
            let c = self.cursor_mut();
            c.next = (hwm - c.base_offset) as usize;
            self.filln(0, (pos - hwm) as usize)?;
            self.flush()?;
            debug_assert_eq!(self.cursor().pos(), pos);
            debug_assert_eq!(self.cursor().high_watermark, pos);
        } else {
            self.cursor_mut().last_touched = pos;
        }
        Ok(())
    }

    fn really_seek(&mut self, anchor: SeekAnchor, offset: i64) -> Result<i64> {
        self.flush()?;
        let target = match anchor {
            SeekAnchor::Begin => offset,
            SeekAnchor::Current => self.cursor().pos() + offset,
            SeekAnchor::End => self.cursor().high_watermark + offset,
        };
        let c = self.cursor_mut();
        if target < 0 || target < c.base_offset || target - c.base_offset > c.end as i64 {
            return Err(Error::InvalidSeek);
        }
        c.next = (target - c.base_offset) as usize;
        Ok(target)
    }

    fn really_tell(&mut self, anchor: SeekAnchor) -> Result<i64> {
        Ok(match anchor {
            SeekAnchor::Begin => 0,
            SeekAnchor::Current => self.cursor().pos(),
            SeekAnchor::End => {
                let c = self.cursor_mut();
                if c.dirty && c.pos() > c.high_watermark {
                    c.high_watermark = c.pos();
                }
                c.high_watermark
            }
        })
    }

    /// Restores writability after a hand-off of the underlying storage.
    fn really_make_writable(&mut self) -> Result<()> {
        Ok(())
    }

    /// Writes one byte at the current position.
    fn put(&mut self, byte: u8) -> Result<()> {
        self.make_writable()?;
        if !self.cursor().dirty {
            self.touch()?;
        }
        if self.cursor().next >= self.cursor().end {
            self.overflow(1)?;
            debug_assert!(!self.cursor().dirty);
        }
        let next = self.cursor().next;
        if !self.cursor().dirty {
            self.cursor_mut().dirty_start = next;
        }
        self.window_mut()[next] = byte;
        let c = self.cursor_mut();
        c.next = next + 1;
        c.dirty = true;
        Ok(())
    }

    /// Writes all of `src` at the current position.
    fn putn(&mut self, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        self.make_writable()?;
        if !self.cursor().dirty {
            self.touch()?;
        }
        let mut remaining = src;
        while !remaining.is_empty() {
            if self.cursor().next >= self.cursor().end {
                self.overflow(remaining.len())?;
            }
            let next = self.cursor().next;
            let room = self.cursor().end - next;
            let chunk = room.min(remaining.len());
            if !self.cursor().dirty {
                self.cursor_mut().dirty_start = next;
            }
            self.window_mut()[next..next + chunk].copy_from_slice(&remaining[..chunk]);
            let c = self.cursor_mut();
            c.next = next + chunk;
            c.dirty = true;
            remaining = &remaining[chunk..];
        }
        Ok(())
    }

    /// Writes `n` copies of `byte` at the current position.
    fn filln(&mut self, byte: u8, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.make_writable()?;
        if !self.cursor().dirty {
            self.touch()?;
        }
        let mut remaining = n;
        while remaining > 0 {
            if self.cursor().next >= self.cursor().end {
                self.overflow(remaining)?;
            }
            let next = self.cursor().next;
            let room = self.cursor().end - next;
            let chunk = room.min(remaining);
            if !self.cursor().dirty {
                self.cursor_mut().dirty_start = next;
            }
            self.window_mut()[next..next + chunk].fill(byte);
            let c = self.cursor_mut();
            c.next = next + chunk;
            c.dirty = true;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Synchronizes any dirty bytes; a no-op when none were written since
    /// the last flush.
    fn flush(&mut self) -> Result<()> {
        if self.cursor().dirty {
            debug_assert!(self.cursor().writable);
            self.really_flush()?;
            let c = self.cursor_mut();
            let pos = c.pos();
            if pos > c.high_watermark {
                c.high_watermark = pos;
            }
            c.last_touched = pos;
            c.dirty = false;
        }
        Ok(())
    }

    /// Announces an imminent write at the current position.
    fn touch(&mut self) -> Result<()> {
        debug_assert!(!self.cursor().dirty);
        let pos = self.cursor().pos();
        if self.cursor().last_touched != pos {
            self.really_touch()?;
        }
        debug_assert_eq!(self.cursor().pos(), pos);
        debug_assert_eq!(self.cursor().last_touched, pos);
        Ok(())
    }

    fn overflow(&mut self, needed: usize) -> Result<()> {
        self.flush()?;
        self.really_overflow(needed)?;
        debug_assert!(self.cursor().end > self.cursor().next);
        Ok(())
    }

    fn make_writable(&mut self) -> Result<()> {
        if !self.cursor().writable {
            self.really_make_writable()?;
            self.cursor_mut().writable = true;
        }
        Ok(())
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
}

#[cfg(test)]
mod test {
    use super::*;

    /// A minimal adapter over a fixed window, relying on every default
    /// hook: no overflow space, zero-fill touch, in-window seeks.
    struct FixedBuf {
        data: [u8; 16],
        cur: OutCursor,
    }

    impl FixedBuf {
        fn new() -> FixedBuf {
            FixedBuf {
                data: [0xaa; 16],
                cur: OutCursor {
                    end: 16,
                    ..OutCursor::default()
                },
            }
        }
    }

    impl OutStreamBuf for FixedBuf {
        fn window_mut(&mut self) -> &mut [u8] {
            &mut self.data
        }

        fn cursor(&self) -> &OutCursor {
            &self.cur
        }

        fn cursor_mut(&mut self) -> &mut OutCursor {
            &mut self.cur
        }

        fn really_flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn default_overflow_reports_no_space() {
        let mut buf = FixedBuf::new();
        buf.putn(&[1; 16]).unwrap();
        assert!(matches!(buf.put(0), Err(Error::NoBufferSpace)));
    }

    #[test]
    fn default_touch_zero_fills_the_hole() {
        let mut buf = FixedBuf::new();
        buf.putn(b"ab").unwrap();
        buf.seek_to(6).unwrap();
        buf.put(b'z').unwrap();
        buf.flush().unwrap();
        assert_eq!(&buf.data[..7], b"ab\0\0\0\0z");
        assert_eq!(buf.cursor().high_watermark, 7);
    }

    #[test]
    fn default_seek_stays_in_the_window() {
        let mut buf = FixedBuf::new();
        buf.putn(b"abcd").unwrap();
        assert_eq!(buf.seek(SeekAnchor::Current, -2).unwrap(), 2);
        assert_eq!(buf.seek(SeekAnchor::End, 0).unwrap(), 4);
        assert!(matches!(
            buf.seek(SeekAnchor::Begin, 17),
            Err(Error::InvalidSeek)
        ));
        assert!(matches!(
            buf.seek(SeekAnchor::Begin, -1),
            Err(Error::InvalidSeek)
        ));
    }

    #[test]
    fn dirty_range_tracks_writes_between_flushes() {
        let mut buf = FixedBuf::new();
        buf.put(1).unwrap();
        buf.put(2).unwrap();
        assert!(buf.cursor().dirty);
        assert_eq!(buf.cursor().dirty_start, 0);
        buf.flush().unwrap();
        assert!(!buf.cursor().dirty);
        buf.put(3).unwrap();
        assert_eq!(buf.cursor().dirty_start, 2);
    }
}
