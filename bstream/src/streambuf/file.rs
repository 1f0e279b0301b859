use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::streambuf::{InCursor, InStreamBuf, OutCursor, OutStreamBuf, SeekAnchor};

/// Staging window size for file-backed stream buffers.
pub const DEFAULT_STAGING_SIZE: usize = 16 * 1024;

/// How a [`FileOutBuf`] opens its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open (creating if needed) and position at the beginning.
    AtBegin,
    /// Open (creating if needed) and position at end-of-file.
    AtEnd,
    /// Like `AtEnd`, but every flush lands at end-of-file regardless of
    /// any intervening seek.
    Append,
    /// Clear the file on open.
    Truncate,
}

fn not_open() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::NotConnected, "file is not open"))
}

/// Input stream buffer over a file, refilled through a fixed staging window
/// with positional reads.
pub struct FileInBuf {
    file: File,
    staging: Vec<u8>,
    cur: InCursor,
}

impl FileInBuf {
    pub fn open(path: impl AsRef<Path>) -> Result<FileInBuf> {
        FileInBuf::with_capacity(path, DEFAULT_STAGING_SIZE)
    }

    pub fn with_capacity(path: impl AsRef<Path>, staging_size: usize) -> Result<FileInBuf> {
        let file = File::open(path)?;
        Ok(FileInBuf {
            file,
            staging: vec![0u8; staging_size.max(1)],
            cur: InCursor::default(),
        })
    }
}

impl InStreamBuf for FileInBuf {
    fn window(&self) -> &[u8] {
        &self.staging
    }

    fn cursor(&self) -> &InCursor {
        &self.cur
    }

    fn cursor_mut(&mut self) -> &mut InCursor {
        &mut self.cur
    }

    fn really_underflow(&mut self) -> Result<usize> {
        let pos = self.cur.pos();
        let n = self.file.read_at(&mut self.staging, pos as u64)?;
        self.cur.base_offset = pos;
        self.cur.next = 0;
        self.cur.end = n;
        Ok(n)
    }

    fn really_seek(&mut self, anchor: SeekAnchor, offset: i64) -> Result<i64> {
        let size = self.file.metadata()?.len() as i64;
        let target = match anchor {
            SeekAnchor::Begin => offset,
            SeekAnchor::Current => self.cur.pos() + offset,
            SeekAnchor::End => size + offset,
        };
        if target < 0 || target > size {
            return Err(Error::InvalidSeek);
        }
        self.cur.base_offset = target;
        self.cur.next = 0;
        self.cur.end = 0;
        Ok(target)
    }

    fn really_tell(&mut self, anchor: SeekAnchor) -> Result<i64> {
        Ok(match anchor {
            SeekAnchor::Begin => 0,
            SeekAnchor::Current => self.cur.pos(),
            SeekAnchor::End => self.file.metadata()?.len() as i64,
        })
    }
}

/// Output stream buffer over a file. Dirty bytes are staged in memory and
/// written positionally on flush, after which the staging window slides
/// forward to the current position.
pub struct FileOutBuf {
    file: Option<File>,
    path: PathBuf,
    mode: OpenMode,
    staging: Vec<u8>,
    cur: OutCursor,
}

impl FileOutBuf {
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<FileOutBuf> {
        FileOutBuf::with_capacity(path, mode, DEFAULT_STAGING_SIZE)
    }

    pub fn with_capacity(
        path: impl AsRef<Path>,
        mode: OpenMode,
        staging_size: usize,
    ) -> Result<FileOutBuf> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(mode == OpenMode::Truncate)
            .open(&path)?;
        let eof = file.metadata()?.len() as i64;
        let mut cur = OutCursor {
            end: staging_size.max(1),
            high_watermark: eof,
            ..OutCursor::default()
        };
        if matches!(mode, OpenMode::AtEnd | OpenMode::Append) {
            cur.base_offset = eof;
            cur.last_touched = eof;
        }
        Ok(FileOutBuf {
            file: Some(file),
            path,
            mode,
            staging: vec![0u8; staging_size.max(1)],
            cur,
        })
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Flushes and releases the file handle. Further writes fail until the
    /// value is replaced.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.file.take();
        Ok(())
    }
}

impl OutStreamBuf for FileOutBuf {
    fn window_mut(&mut self) -> &mut [u8] {
        &mut self.staging
    }

    fn cursor(&self) -> &OutCursor {
        &self.cur
    }

    fn cursor_mut(&mut self) -> &mut OutCursor {
        &mut self.cur
    }

    fn really_flush(&mut self) -> Result<()> {
        let file = self.file.as_ref().ok_or_else(not_open)?;
        let start = self.cur.dirty_start;
        let data = &self.staging[start..self.cur.next];
        let off = if self.mode == OpenMode::Append {
            // append mode targets end-of-file no matter where the cursor
            // was moved; reanchor the window so the position lands there
            let eof = file.metadata()?.len();
            self.cur.base_offset = eof as i64 - start as i64;
            eof
        } else {
            (self.cur.base_offset + start as i64) as u64
        };
        file.write_all_at(data, off)?;
        let c = &mut self.cur;
        c.base_offset += c.next as i64;
        c.next = 0;
        c.dirty_start = 0;
        Ok(())
    }

    fn really_overflow(&mut self, _needed: usize) -> Result<()> {
        // the preceding flush drained the staging window
        debug_assert_eq!(self.cur.next, 0);
        Ok(())
    }

    fn really_touch(&mut self) -> Result<()> {
        let pos = self.cur.pos();
        if self.cur.high_watermark < pos {
            let file = self.file.as_ref().ok_or_else(not_open)?;
            // extend with a sparse region; readers of the gap see zeros
            if file.metadata()?.len() < pos as u64 {
                file.set_len(pos as u64)?;
            }
            self.cur.high_watermark = pos;
        }
        self.cur.last_touched = pos;
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
        let c = &mut self.cur;
        c.base_offset = target;
        c.next = 0;
        c.dirty_start = 0;
        Ok(target)
    }
}

impl Drop for FileOutBuf {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.close() {
                tracing::error!("failed to flush file stream on drop: {e}");
            }
        }
    }
}
