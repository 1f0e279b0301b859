use crate::buffer::Buffer;
use crate::context::{Context, ErrorCode, INVALID_TYPE_TAG};
use crate::error::{Error, Result};
use crate::numstream::NumReader;
use crate::streambuf::{InStreamBuf, MemInBuf};
use crate::typecode;

/// A value that knows how to read itself from a [`Decoder`].
pub trait Decode: Sized {
    fn decode<B: InStreamBuf>(dec: &mut Decoder<B>) -> Result<Self>;
}

/// Self-describing value reader over a stream buffer.
///
/// Integer reads widen: any encoding whose value fits the requested type is
/// accepted (fixints and bools everywhere, unsigned tags for unsigned
/// targets, both families for signed targets). A value that does not fit
/// fails with [`Error::TypeError`]; nothing is silently truncated.
pub struct Decoder<B> {
    r: NumReader<B>,
}

impl Decoder<MemInBuf> {
    /// A decoder over an in-memory buffer. Blob reads are zero-copy.
    pub fn from_buffer(buf: Buffer) -> Decoder<MemInBuf> {
        Decoder::new(MemInBuf::new(buf))
    }
}

impl<B: InStreamBuf> Decoder<B> {
    pub fn new(buf: B) -> Decoder<B> {
        Decoder {
            r: NumReader::new(buf),
        }
    }

    /// The raw numeric reader beneath the codec.
    pub fn num(&mut self) -> &mut NumReader<B> {
        &mut self.r
    }

    pub fn into_inner(self) -> B {
        self.r.into_inner()
    }

    pub fn position(&mut self) -> Result<i64> {
        self.r.position()
    }

    pub fn size(&mut self) -> Result<u64> {
        self.r.size()
    }

    /// The next type code, without consuming it.
    pub fn peek_typecode(&mut self) -> Result<u8> {
        self.r.peek_u8()
    }

    pub fn read_nil(&mut self) -> Result<()> {
        match self.r.get_u8()? {
            typecode::NIL => Ok(()),
            _ => Err(Error::TypeError),
        }
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.r.get_u8()? {
            typecode::BOOL_TRUE => Ok(true),
            typecode::BOOL_FALSE => Ok(false),
            _ => Err(Error::TypeError),
        }
    }

    fn read_unsigned(&mut self, max: u64) -> Result<u64> {
        let code = self.r.get_u8()?;
        let value = if typecode::is_positive_fixint(code) {
            code as u64
        } else {
            match code {
                typecode::BOOL_TRUE => 1,
                typecode::BOOL_FALSE => 0,
                typecode::UINT_8 => self.r.get_u8()? as u64,
                typecode::UINT_16 if max >= u16::MAX as u64 => self.r.get_u16()? as u64,
                typecode::UINT_32 if max >= u32::MAX as u64 => self.r.get_u32()? as u64,
                typecode::UINT_64 if max == u64::MAX => self.r.get_u64()?,
                _ => return Err(Error::TypeError),
            }
        };
        if value > max {
            return Err(Error::TypeError);
        }
        Ok(value)
    }

    fn read_signed(&mut self, min: i64, max: i64) -> Result<i64> {
        let code = self.r.get_u8()?;
        let value = if typecode::is_positive_fixint(code) {
            code as i64
        } else if typecode::is_negative_fixint(code) {
            code as i8 as i64
        } else {
            match code {
                typecode::BOOL_TRUE => 1,
                typecode::BOOL_FALSE => 0,
                typecode::INT_8 => self.r.get_i8()? as i64,
                typecode::UINT_8 if max > i8::MAX as i64 => self.r.get_u8()? as i64,
                typecode::INT_16 if min <= i16::MIN as i64 => self.r.get_i16()? as i64,
                typecode::UINT_16 if max > i8::MAX as i64 => self.r.get_u16()? as i64,
                typecode::INT_32 if min <= i32::MIN as i64 => self.r.get_i32()? as i64,
                typecode::UINT_32 if max > i16::MAX as i64 => self.r.get_u32()? as i64,
                typecode::INT_64 if min == i64::MIN => self.r.get_i64()?,
                typecode::UINT_64 if max == i64::MAX => {
                    let v = self.r.get_u64()?;
                    if v > i64::MAX as u64 {
                        return Err(Error::TypeError);
                    }
                    v as i64
                }
                _ => return Err(Error::TypeError),
            }
        };
        if value < min || value > max {
            return Err(Error::TypeError);
        }
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_unsigned(u8::MAX as u64)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_unsigned(u16::MAX as u64)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_unsigned(u32::MAX as u64)? as u32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_unsigned(u64::MAX)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_signed(i8::MIN as i64, i8::MAX as i64)? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_signed(i16::MIN as i64, i16::MAX as i64)? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_signed(i32::MIN as i64, i32::MAX as i64)? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.read_signed(i64::MIN, i64::MAX)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        match self.r.get_u8()? {
            typecode::FLOAT_32 => self.r.get_f32(),
            _ => Err(Error::TypeError),
        }
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        match self.r.get_u8()? {
            typecode::FLOAT_32 => Ok(self.r.get_f32()? as f64),
            typecode::FLOAT_64 => self.r.get_f64(),
            _ => Err(Error::TypeError),
        }
    }

    pub fn read_str(&mut self) -> Result<String> {
        let code = self.r.get_u8()?;
        let len = if typecode::is_fixstr(code) {
            (code & 0x1f) as usize
        } else {
            match code {
                typecode::STR_8 => self.r.get_u8()? as usize,
                typecode::STR_16 => self.r.get_u16()? as usize,
                typecode::STR_32 => self.r.get_u32()? as usize,
                _ => return Err(Error::TypeError),
            }
        };
        let bytes = self.r.getn_exact(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::TypeError)
    }

    pub fn read_blob(&mut self) -> Result<Buffer> {
        let code = self.r.get_u8()?;
        let len = match code {
            typecode::BIN_8 => self.r.get_u8()? as usize,
            typecode::BIN_16 => self.r.get_u16()? as usize,
            typecode::BIN_32 => self.r.get_u32()? as usize,
            _ => return Err(Error::TypeError),
        };
        self.r.getn_exact(len)
    }

    pub fn read_array_header(&mut self) -> Result<u32> {
        let code = self.r.get_u8()?;
        if typecode::is_fixarray(code) {
            return Ok((code & 0x0f) as u32);
        }
        match code {
            typecode::ARRAY_16 => Ok(self.r.get_u16()? as u32),
            typecode::ARRAY_32 => self.r.get_u32(),
            _ => Err(Error::TypeError),
        }
    }

    /// Reads an array header and requires exactly `expected` items.
    pub fn expect_array_header(&mut self, expected: u32) -> Result<()> {
        if self.read_array_header()? != expected {
            return Err(Error::TypeError);
        }
        Ok(())
    }

    pub fn read_map_header(&mut self) -> Result<u32> {
        let code = self.r.get_u8()?;
        if typecode::is_fixmap(code) {
            return Ok((code & 0x0f) as u32);
        }
        match code {
            typecode::MAP_16 => Ok(self.r.get_u16()? as u32),
            typecode::MAP_32 => self.r.get_u32(),
            _ => Err(Error::TypeError),
        }
    }

    /// Reads an ext header; returns `(ext_type, payload_len)`.
    pub fn read_ext_header(&mut self) -> Result<(u8, u32)> {
        let code = self.r.get_u8()?;
        let len = match code {
            typecode::FIXEXT_1 => 1,
            typecode::FIXEXT_2 => 2,
            typecode::FIXEXT_4 => 4,
            typecode::FIXEXT_8 => 8,
            typecode::FIXEXT_16 => 16,
            typecode::EXT_8 => self.r.get_u8()? as u32,
            typecode::EXT_16 => self.r.get_u16()? as u32,
            typecode::EXT_32 => self.r.get_u32()?,
            _ => return Err(Error::TypeError),
        };
        let ext_type = self.r.get_u8()?;
        Ok((ext_type, len))
    }

    pub fn read_ext(&mut self) -> Result<(u8, Buffer)> {
        let (ext_type, len) = self.read_ext_header()?;
        Ok((ext_type, self.r.getn_exact(len as usize)?))
    }

    pub fn read_error_code<T>(&mut self, ctx: &Context<T>) -> Result<ErrorCode> {
        self.expect_array_header(2)?;
        let index = self.read_u32()?;
        let value = self.read_i64()?;
        let category = ctx.category_name(index).ok_or(Error::TypeError)?;
        Ok(ErrorCode { category, value })
    }

    /// Reads a polymorphic value through the context's constructor table.
    pub fn read_poly<T>(&mut self, ctx: &Context<T>) -> Result<T> {
        let (tag, len) = self.read_ext_header()?;
        let ctor = ctx.decoder_for(tag).ok_or(Error::TypeError)?;
        let bytes = self.r.getn_exact(len as usize)?;
        let mut inner = Decoder::from_buffer(bytes);
        ctor(&mut inner)
    }

    /// Reads a possibly-absent polymorphic value. The absent form is the
    /// 2-array `[INVALID_TYPE_TAG, nil]`; dispatch is on the leading
    /// marker, not on array shape.
    pub fn read_poly_opt<T>(&mut self, ctx: &Context<T>) -> Result<Option<T>> {
        let code = self.peek_typecode()?;
        let is_array = typecode::is_fixarray(code)
            || code == typecode::ARRAY_16
            || code == typecode::ARRAY_32;
        if is_array {
            self.expect_array_header(2)?;
            if self.read_i64()? != INVALID_TYPE_TAG {
                return Err(Error::TypeError);
            }
            self.read_nil()?;
            return Ok(None);
        }
        Ok(Some(self.read_poly(ctx)?))
    }

    /// Reads any [`Decode`] value.
    pub fn read<V: Decode>(&mut self) -> Result<V> {
        V::decode(self)
    }
}

macro_rules! decode_impl {
    ($t:ty, $read:ident) => {
        impl Decode for $t {
            fn decode<B: InStreamBuf>(dec: &mut Decoder<B>) -> Result<$t> {
                dec.$read()
            }
        }
    };
}

decode_impl!(u8, read_u8);
decode_impl!(u16, read_u16);
decode_impl!(u32, read_u32);
decode_impl!(u64, read_u64);
decode_impl!(i8, read_i8);
decode_impl!(i16, read_i16);
decode_impl!(i32, read_i32);
decode_impl!(i64, read_i64);
decode_impl!(bool, read_bool);
decode_impl!(f32, read_f32);
decode_impl!(f64, read_f64);
decode_impl!(String, read_str);
decode_impl!(Buffer, read_blob);

#[cfg(test)]
mod test {
    use super::*;
    use crate::encode::{Encode, Encoder};
    use crate::streambuf::{MemOutBuf, OutStreamBuf};
    use proptest::prelude::*;

    fn encoded(f: impl FnOnce(&mut Encoder<MemOutBuf>)) -> Buffer {
        let mut enc = Encoder::memory(64);
        f(&mut enc);
        enc.buffer().unwrap()
    }

    fn decoder_for(buf: Buffer) -> Decoder<MemInBuf> {
        Decoder::from_buffer(buf)
    }

    #[test]
    fn scalar_wire_bytes() {
        assert_eq!(
            encoded(|e| e.write_u64(0x7f).unwrap()).as_slice(),
            &[0x7f]
        );
        assert_eq!(
            encoded(|e| e.write_u64(0x80).unwrap()).as_slice(),
            &[typecode::UINT_8, 0x80]
        );
        assert_eq!(
            encoded(|e| e.write_i64(-1).unwrap()).as_slice(),
            &[0xff]
        );
        assert_eq!(
            encoded(|e| e.write_i64(-33).unwrap()).as_slice(),
            &[typecode::INT_8, 0xdf]
        );
        assert_eq!(
            encoded(|e| e.write_str("hi").unwrap()).as_slice(),
            &[0xa2, b'h', b'i']
        );
        assert_eq!(encoded(|e| e.write_nil().unwrap()).as_slice(), &[0xc0]);
        assert_eq!(
            encoded(|e| e.write_bool(true).unwrap()).as_slice(),
            &[0xc3]
        );
        assert_eq!(
            encoded(|e| e.write_u64(0x1_0000).unwrap()).as_slice(),
            &[typecode::UINT_32, 0x00, 0x01, 0x00, 0x00]
        );
        assert_eq!(
            encoded(|e| e.write_blob(b"xyz").unwrap()).as_slice(),
            &[typecode::BIN_8, 3, b'x', b'y', b'z']
        );
        assert_eq!(
            encoded(|e| e.write_array_header(4).unwrap()).as_slice(),
            &[0x94]
        );
        assert_eq!(
            encoded(|e| e.write_map_header(20).unwrap()).as_slice(),
            &[typecode::MAP_16, 0, 20]
        );
    }

    #[test]
    fn widening_accepts_anything_that_fits() {
        let buf = encoded(|e| e.write_u64(5).unwrap());
        assert_eq!(decoder_for(buf.clone()).read_u16().unwrap(), 5);
        assert_eq!(decoder_for(buf.clone()).read_u64().unwrap(), 5);
        assert_eq!(decoder_for(buf).read_i8().unwrap(), 5);

        let buf = encoded(|e| e.write_bool(true).unwrap());
        assert_eq!(decoder_for(buf).read_u32().unwrap(), 1);

        let buf = encoded(|e| e.write_i64(-7).unwrap());
        assert_eq!(decoder_for(buf).read_i64().unwrap(), -7);
    }

    #[test]
    fn narrowing_fails_instead_of_truncating() {
        let buf = encoded(|e| e.write_u64(70_000).unwrap());
        assert!(matches!(
            decoder_for(buf).read_u16(),
            Err(Error::TypeError)
        ));

        let buf = encoded(|e| e.write_i64(-1).unwrap());
        assert!(matches!(
            decoder_for(buf).read_u64(),
            Err(Error::TypeError)
        ));

        let buf = encoded(|e| e.write_u64(u64::MAX).unwrap());
        assert!(matches!(
            decoder_for(buf).read_i64(),
            Err(Error::TypeError)
        ));

        let buf = encoded(|e| e.write_u64(200).unwrap());
        assert!(matches!(decoder_for(buf).read_i8(), Err(Error::TypeError)));
    }

    #[test]
    fn float_reads() {
        let buf = encoded(|e| e.write_f32(1.25).unwrap());
        assert_eq!(decoder_for(buf.clone()).read_f32().unwrap(), 1.25);
        assert_eq!(decoder_for(buf).read_f64().unwrap(), 1.25);

        let buf = encoded(|e| e.write_f64(-0.5).unwrap());
        assert_eq!(decoder_for(buf.clone()).read_f64().unwrap(), -0.5);
        assert!(matches!(
            decoder_for(buf).read_f32(),
            Err(Error::TypeError)
        ));
    }

    #[test]
    fn map_round_trip() {
        let buf = encoded(|e| {
            e.write_map_header(3).unwrap();
            for (k, v) in [("a", 1u64), ("b", 2), ("c", 3)] {
                e.write_str(k).unwrap();
                e.write_u64(v).unwrap();
            }
        });
        let mut dec = decoder_for(buf);
        assert_eq!(dec.read_map_header().unwrap(), 3);
        for (k, v) in [("a", 1u64), ("b", 2), ("c", 3)] {
            assert_eq!(dec.read_str().unwrap(), k);
            assert_eq!(dec.read_u64().unwrap(), v);
        }
    }

    #[test]
    fn ext_round_trip() {
        let buf = encoded(|e| e.write_ext(5, &[1, 2, 3, 4]).unwrap());
        assert_eq!(
            buf.as_slice(),
            &[typecode::FIXEXT_4, 5, 1, 2, 3, 4]
        );
        let (ext_type, data) = decoder_for(buf).read_ext().unwrap();
        assert_eq!(ext_type, 5);
        assert_eq!(data.as_slice(), &[1, 2, 3, 4]);

        let buf = encoded(|e| e.write_ext(9, &[7; 6]).unwrap());
        let (ext_type, data) = decoder_for(buf).read_ext().unwrap();
        assert_eq!(ext_type, 9);
        assert_eq!(data.len(), 6);
    }

    #[test]
    fn error_code_round_trip() {
        let mut ctx: Context<()> = Context::new();
        ctx.register_category("io");
        ctx.register_category("raft");
        let code = ErrorCode {
            category: "raft",
            value: 12,
        };
        let mut enc = Encoder::memory(16);
        enc.write_error_code(&ctx, &code).unwrap();
        let got = decoder_for(enc.buffer().unwrap())
            .read_error_code(&ctx)
            .unwrap();
        assert_eq!(got, code);
    }

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    impl Encode for Point {
        fn encode<B: OutStreamBuf>(&self, enc: &mut Encoder<B>) -> Result<()> {
            enc.write_array_header(2)?;
            enc.write_i64(self.x)?;
            enc.write_i64(self.y)
        }
    }

    #[derive(Debug, PartialEq)]
    enum Shape {
        Point(Point),
    }

    fn shape_context() -> Context<Shape> {
        let mut ctx = Context::new();
        ctx.register::<Point>(1, |dec| {
            dec.expect_array_header(2)?;
            Ok(Shape::Point(Point {
                x: dec.read_i64()?,
                y: dec.read_i64()?,
            }))
        })
        .unwrap();
        ctx
    }

    #[test]
    fn poly_round_trip() {
        let ctx = shape_context();
        let mut enc = Encoder::memory(32);
        enc.write_poly(&ctx, &Point { x: -3, y: 900 }).unwrap();
        let shape = decoder_for(enc.buffer().unwrap()).read_poly(&ctx).unwrap();
        assert_eq!(shape, Shape::Point(Point { x: -3, y: 900 }));
    }

    #[test]
    fn poly_null_pointer_form() {
        let ctx = shape_context();
        let mut enc = Encoder::memory(8);
        enc.write_null_ptr().unwrap();
        let got = decoder_for(enc.buffer().unwrap())
            .read_poly_opt(&ctx)
            .unwrap();
        assert!(got.is_none());

        let mut enc = Encoder::memory(32);
        enc.write_poly(&ctx, &Point { x: 1, y: 2 }).unwrap();
        let got = decoder_for(enc.buffer().unwrap())
            .read_poly_opt(&ctx)
            .unwrap();
        assert_eq!(got, Some(Shape::Point(Point { x: 1, y: 2 })));
    }

    #[test]
    fn unregistered_poly_tag_fails() {
        let ctx = shape_context();
        let buf = encoded(|e| e.write_ext(42, &[0x90]).unwrap());
        assert!(matches!(
            decoder_for(buf).read_poly(&ctx),
            Err(Error::TypeError)
        ));
    }

    proptest! {
        #[test]
        fn u64_round_trip(v in any::<u64>()) {
            let buf = encoded(|e| e.write_u64(v).unwrap());
            prop_assert_eq!(decoder_for(buf).read_u64().unwrap(), v);
        }

        #[test]
        fn i64_round_trip(v in any::<i64>()) {
            let buf = encoded(|e| e.write_i64(v).unwrap());
            prop_assert_eq!(decoder_for(buf).read_i64().unwrap(), v);
        }

        #[test]
        fn str_round_trip(s in ".{0,80}") {
            let buf = encoded(|e| e.write_str(&s).unwrap());
            prop_assert_eq!(decoder_for(buf).read_str().unwrap(), s);
        }

        #[test]
        fn blob_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
            let buf = encoded(|e| e.write_blob(&bytes).unwrap());
            let got = decoder_for(buf).read_blob().unwrap();
            prop_assert_eq!(got.as_slice(), &bytes[..]);
        }

        #[test]
        fn narrow_reads_agree_with_range(v in any::<u64>()) {
            let buf = encoded(|e| e.write_u64(v).unwrap());
            let got = decoder_for(buf).read_u16();
            if v <= u16::MAX as u64 {
                prop_assert_eq!(got.unwrap(), v as u16);
            } else {
                prop_assert!(matches!(got, Err(Error::TypeError)));
            }
        }
    }
}
