//! Endianness-aware fixed-width numeric I/O over a stream buffer.
//!
//! The byte order is a property of the stream, not of the type; it defaults
//! to big-endian, which is the wire order of the codec and the log envelope.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::streambuf::{InStreamBuf, OutStreamBuf, SeekAnchor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

macro_rules! put_impl {
    ($name:ident, $t:ty) => {
        pub fn $name(&mut self, value: $t) -> Result<()> {
            let bytes = match self.order {
                ByteOrder::Big => value.to_be_bytes(),
                ByteOrder::Little => value.to_le_bytes(),
            };
            self.buf.putn(&bytes)
        }
    };
}

macro_rules! get_impl {
    ($name:ident, $t:ty) => {
        pub fn $name(&mut self) -> Result<$t> {
            let mut bytes = [0u8; std::mem::size_of::<$t>()];
            if self.buf.getn_into(&mut bytes)? < bytes.len() {
                return Err(Error::ReadPastEndOfStream);
            }
            Ok(match self.order {
                ByteOrder::Big => <$t>::from_be_bytes(bytes),
                ByteOrder::Little => <$t>::from_le_bytes(bytes),
            })
        }
    };
}

/// Typed writer over an [`OutStreamBuf`].
pub struct NumWriter<B> {
    buf: B,
    order: ByteOrder,
}

impl<B: OutStreamBuf> NumWriter<B> {
    pub fn new(buf: B) -> NumWriter<B> {
        NumWriter::with_order(buf, ByteOrder::Big)
    }

    pub fn with_order(buf: B, order: ByteOrder) -> NumWriter<B> {
        NumWriter { buf, order }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn get_ref(&self) -> &B {
        &self.buf
    }

    pub fn get_mut(&mut self) -> &mut B {
        &mut self.buf
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.buf.put(value)
    }

    pub fn put_i8(&mut self, value: i8) -> Result<()> {
        self.buf.put(value as u8)
    }

    put_impl!(put_u16, u16);
    put_impl!(put_u32, u32);
    put_impl!(put_u64, u64);
    put_impl!(put_i16, i16);
    put_impl!(put_i32, i32);
    put_impl!(put_i64, i64);
    put_impl!(put_f32, f32);
    put_impl!(put_f64, f64);

    pub fn putn(&mut self, src: &[u8]) -> Result<()> {
        self.buf.putn(src)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.buf.flush()
    }

    pub fn position(&mut self) -> Result<i64> {
        self.buf.position()
    }

    pub fn seek(&mut self, anchor: SeekAnchor, offset: i64) -> Result<i64> {
        self.buf.seek(anchor, offset)
    }

    pub fn seek_to(&mut self, pos: i64) -> Result<i64> {
        self.buf.seek_to(pos)
    }

    pub fn size(&mut self) -> Result<u64> {
        Ok(self.buf.tell(SeekAnchor::End)? as u64)
    }
}

/// Typed reader over an [`InStreamBuf`].
pub struct NumReader<B> {
    buf: B,
    order: ByteOrder,
}

impl<B: InStreamBuf> NumReader<B> {
    pub fn new(buf: B) -> NumReader<B> {
        NumReader::with_order(buf, ByteOrder::Big)
    }

    pub fn with_order(buf: B, order: ByteOrder) -> NumReader<B> {
        NumReader { buf, order }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn get_ref(&self) -> &B {
        &self.buf
    }

    pub fn get_mut(&mut self) -> &mut B {
        &mut self.buf
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.buf.get()
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(self.buf.get()? as i8)
    }

    pub fn peek_u8(&mut self) -> Result<u8> {
        self.buf.peek()
    }

    get_impl!(get_u16, u16);
    get_impl!(get_u32, u32);
    get_impl!(get_u64, u64);
    get_impl!(get_i16, i16);
    get_impl!(get_i32, i32);
    get_impl!(get_i64, i64);
    get_impl!(get_f32, f32);
    get_impl!(get_f64, f64);

    /// Reads up to `n` bytes; short only at end of stream.
    pub fn getn(&mut self, n: usize) -> Result<Buffer> {
        self.buf.getn(n)
    }

    /// Reads exactly `n` bytes or fails with [`Error::ReadPastEndOfStream`].
    pub fn getn_exact(&mut self, n: usize) -> Result<Buffer> {
        let out = self.buf.getn(n)?;
        if out.len() < n {
            return Err(Error::ReadPastEndOfStream);
        }
        Ok(out)
    }

    pub fn position(&mut self) -> Result<i64> {
        self.buf.position()
    }

    pub fn seek(&mut self, anchor: SeekAnchor, offset: i64) -> Result<i64> {
        self.buf.seek(anchor, offset)
    }

    pub fn seek_to(&mut self, pos: i64) -> Result<i64> {
        self.buf.seek_to(pos)
    }

    pub fn size(&mut self) -> Result<u64> {
        self.buf.size()
    }
}
