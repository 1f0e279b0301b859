use std::any::Any;

use crate::buffer::Buffer;
use crate::context::{Context, ErrorCode, INVALID_TYPE_TAG};
use crate::error::{Error, Result};
use crate::numstream::NumWriter;
use crate::streambuf::{MemOutBuf, OutStreamBuf};
use crate::typecode;

/// A value that knows how to write itself to an [`Encoder`].
///
/// Implementations write a single encoded value: typically an array header
/// followed by the fields, base fields first for types that extend another
/// serialized form.
pub trait Encode {
    fn encode<B: OutStreamBuf>(&self, enc: &mut Encoder<B>) -> Result<()>;
}

/// Self-describing value writer over a stream buffer.
///
/// Integers are written in their narrowest encoding; sizes pick the
/// smallest header form. The underlying numeric writer is reachable through
/// [`Encoder::num`] for callers that frame raw fields around encoded
/// values.
pub struct Encoder<B> {
    w: NumWriter<B>,
}

impl Encoder<MemOutBuf> {
    /// An encoder over a growable in-memory buffer.
    pub fn memory(capacity: usize) -> Encoder<MemOutBuf> {
        Encoder::new(MemOutBuf::with_capacity(capacity))
    }

    /// The encoded sequence so far, as a shared view.
    pub fn buffer(&mut self) -> Result<Buffer> {
        self.w.get_mut().buffer()
    }

    /// Rewinds to an empty stream for reuse.
    pub fn clear(&mut self) {
        self.w.get_mut().clear();
    }
}

impl<B: OutStreamBuf> Encoder<B> {
    pub fn new(buf: B) -> Encoder<B> {
        Encoder {
            w: NumWriter::new(buf),
        }
    }

    /// The raw numeric writer beneath the codec.
    pub fn num(&mut self) -> &mut NumWriter<B> {
        &mut self.w
    }

    pub fn into_inner(self) -> B {
        self.w.into_inner()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()
    }

    pub fn position(&mut self) -> Result<i64> {
        self.w.position()
    }

    pub fn size(&mut self) -> Result<u64> {
        self.w.size()
    }

    pub fn write_nil(&mut self) -> Result<()> {
        self.w.put_u8(typecode::NIL)
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.w.put_u8(if value {
            typecode::BOOL_TRUE
        } else {
            typecode::BOOL_FALSE
        })
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        if value <= typecode::POSITIVE_FIXINT_MAX as u64 {
            self.w.put_u8(value as u8)
        } else if value <= u8::MAX as u64 {
            self.w.put_u8(typecode::UINT_8)?;
            self.w.put_u8(value as u8)
        } else if value <= u16::MAX as u64 {
            self.w.put_u8(typecode::UINT_16)?;
            self.w.put_u16(value as u16)
        } else if value <= u32::MAX as u64 {
            self.w.put_u8(typecode::UINT_32)?;
            self.w.put_u32(value as u32)
        } else {
            self.w.put_u8(typecode::UINT_64)?;
            self.w.put_u64(value)
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_u64(value as u64)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_u64(value as u64)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_u64(value as u64)
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        if value >= 0 {
            return self.write_u64(value as u64);
        }
        if value >= -32 {
            self.w.put_i8(value as i8)
        } else if value >= i8::MIN as i64 {
            self.w.put_u8(typecode::INT_8)?;
            self.w.put_i8(value as i8)
        } else if value >= i16::MIN as i64 {
            self.w.put_u8(typecode::INT_16)?;
            self.w.put_i16(value as i16)
        } else if value >= i32::MIN as i64 {
            self.w.put_u8(typecode::INT_32)?;
            self.w.put_i32(value as i32)
        } else {
            self.w.put_u8(typecode::INT_64)?;
            self.w.put_i64(value)
        }
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.write_i64(value as i64)
    }

    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_i64(value as i64)
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_i64(value as i64)
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.w.put_u8(typecode::FLOAT_32)?;
        self.w.put_f32(value)
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.w.put_u8(typecode::FLOAT_64)?;
        self.w.put_f64(value)
    }

    pub fn write_str(&mut self, value: &str) -> Result<()> {
        let bytes = value.as_bytes();
        let len = bytes.len();
        if len <= 31 {
            self.w.put_u8(typecode::FIXSTR_MIN | len as u8)?;
        } else if len <= u8::MAX as usize {
            self.w.put_u8(typecode::STR_8)?;
            self.w.put_u8(len as u8)?;
        } else if len <= u16::MAX as usize {
            self.w.put_u8(typecode::STR_16)?;
            self.w.put_u16(len as u16)?;
        } else {
            self.w.put_u8(typecode::STR_32)?;
            self.w.put_u32(len as u32)?;
        }
        self.w.putn(bytes)
    }

    pub fn write_blob_header(&mut self, len: u32) -> Result<()> {
        if len <= u8::MAX as u32 {
            self.w.put_u8(typecode::BIN_8)?;
            self.w.put_u8(len as u8)
        } else if len <= u16::MAX as u32 {
            self.w.put_u8(typecode::BIN_16)?;
            self.w.put_u16(len as u16)
        } else {
            self.w.put_u8(typecode::BIN_32)?;
            self.w.put_u32(len)
        }
    }

    pub fn write_blob(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > u32::MAX as usize {
            return Err(Error::InvalidArgument);
        }
        self.write_blob_header(bytes.len() as u32)?;
        self.w.putn(bytes)
    }

    pub fn write_array_header(&mut self, len: u32) -> Result<()> {
        if len <= 15 {
            self.w.put_u8(typecode::FIXARRAY_MIN | len as u8)
        } else if len <= u16::MAX as u32 {
            self.w.put_u8(typecode::ARRAY_16)?;
            self.w.put_u16(len as u16)
        } else {
            self.w.put_u8(typecode::ARRAY_32)?;
            self.w.put_u32(len)
        }
    }

    pub fn write_map_header(&mut self, len: u32) -> Result<()> {
        if len <= 15 {
            self.w.put_u8(typecode::FIXMAP_MIN | len as u8)
        } else if len <= u16::MAX as u32 {
            self.w.put_u8(typecode::MAP_16)?;
            self.w.put_u16(len as u16)
        } else {
            self.w.put_u8(typecode::MAP_32)?;
            self.w.put_u32(len)
        }
    }

    pub fn write_ext_header(&mut self, ext_type: u8, len: u32) -> Result<()> {
        match len {
            1 => self.w.put_u8(typecode::FIXEXT_1)?,
            2 => self.w.put_u8(typecode::FIXEXT_2)?,
            4 => self.w.put_u8(typecode::FIXEXT_4)?,
            8 => self.w.put_u8(typecode::FIXEXT_8)?,
            16 => self.w.put_u8(typecode::FIXEXT_16)?,
            _ => {
                if len <= u8::MAX as u32 {
                    self.w.put_u8(typecode::EXT_8)?;
                    self.w.put_u8(len as u8)?;
                } else if len <= u16::MAX as u32 {
                    self.w.put_u8(typecode::EXT_16)?;
                    self.w.put_u16(len as u16)?;
                } else {
                    self.w.put_u8(typecode::EXT_32)?;
                    self.w.put_u32(len)?;
                }
            }
        }
        self.w.put_u8(ext_type)
    }

    pub fn write_ext(&mut self, ext_type: u8, bytes: &[u8]) -> Result<()> {
        if bytes.len() > u32::MAX as usize {
            return Err(Error::InvalidArgument);
        }
        self.write_ext_header(ext_type, bytes.len() as u32)?;
        self.w.putn(bytes)
    }

    /// Writes an error value as `[category_index, value]`. The category
    /// must be registered with the context.
    pub fn write_error_code<T>(&mut self, ctx: &Context<T>, code: &ErrorCode) -> Result<()> {
        let index = ctx
            .category_index(code.category)
            .ok_or(Error::InvalidArgument)?;
        self.write_array_header(2)?;
        self.write_u64(index as u64)?;
        self.write_i64(code.value)
    }

    /// Writes the absent-value form of a polymorphic slot.
    pub fn write_null_ptr(&mut self) -> Result<()> {
        self.write_array_header(2)?;
        self.write_i64(INVALID_TYPE_TAG)?;
        self.write_nil()
    }

    /// Writes a polymorphic value: an ext envelope carrying the type tag
    /// registered for `V` and the value's own encoding.
    pub fn write_poly<T, V>(&mut self, ctx: &Context<T>, value: &V) -> Result<()>
    where
        V: Encode + Any,
    {
        let tag = ctx.tag_of::<V>().ok_or(Error::TypeError)?;
        let mut scratch = Encoder::memory(64);
        value.encode(&mut scratch)?;
        let bytes = scratch.buffer()?;
        self.write_ext(tag, bytes.as_slice())
    }

    /// Writes any [`Encode`] value.
    pub fn write<V: Encode>(&mut self, value: &V) -> Result<()> {
        value.encode(self)
    }
}
