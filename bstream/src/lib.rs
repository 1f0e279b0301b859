//! Byte buffers, stream buffers and the binary value codec.
//!
//! The crate is layered bottom-up:
//!
//! * [`Buffer`] — a reference-counted byte region with policy-controlled
//!   sharing and mutation, cheap slicing and a CRC32-IEEE checksum;
//! * [`streambuf`] — seekable read/write cursors over abstract byte
//!   sequences, with in-memory and file-backed adapters;
//! * [`numstream`] — endianness-aware fixed-width numeric I/O;
//! * [`Encoder`]/[`Decoder`] — a self-describing, MessagePack-compatible
//!   value codec, including polymorphic values dispatched through an
//!   explicit per-stream [`Context`].
//!
//! All core state is single-threaded by design: buffer reference counts
//! are non-atomic, and a buffer that must cross threads is first made
//! exclusive.

pub mod buffer;
pub mod context;
pub mod decode;
pub mod encode;
pub mod error;
pub mod numstream;
pub mod streambuf;
pub mod typecode;

pub use buffer::{Buffer, Policy, CRC32};
pub use context::{Context, ErrorCode, INVALID_TYPE_TAG};
pub use decode::{Decode, Decoder};
pub use encode::{Encode, Encoder};
pub use error::{Error, Result};
pub use numstream::{ByteOrder, NumReader, NumWriter};
pub use streambuf::{
    FileInBuf, FileOutBuf, InStreamBuf, MemInBuf, MemOutBuf, OpenMode, OutStreamBuf, SeekAnchor,
};
