use std::any::TypeId;
use std::collections::HashMap;

use crate::decode::Decoder;
use crate::error::{Error, Result};
use crate::streambuf::MemInBuf;

/// Type tag written in place of a polymorphic value that is absent.
pub const INVALID_TYPE_TAG: i64 = -1;

/// Constructor invoked to rebuild a registered value from its encoded
/// bytes. Polymorphic payloads are length-prefixed, so the constructor
/// always reads from an in-memory stream.
pub type DecodeFn<T> = fn(&mut Decoder<MemInBuf>) -> Result<T>;

/// An error value transported as `[category_index, value]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub category: &'static str,
    pub value: i64,
}

/// Per-stream registry of polymorphic types and error categories.
///
/// A context maps each registered concrete type to a small positive tag and
/// a constructor, and each error category to its index. Streams carry a
/// context explicitly; there is no process-wide registry.
pub struct Context<T> {
    decoders: HashMap<u8, DecodeFn<T>>,
    tags: HashMap<TypeId, u8>,
    categories: Vec<&'static str>,
}

impl<T> Default for Context<T> {
    fn default() -> Context<T> {
        Context::new()
    }
}

impl<T> Context<T> {
    pub fn new() -> Context<T> {
        Context {
            decoders: HashMap::new(),
            tags: HashMap::new(),
            categories: Vec::new(),
        }
    }

    /// Registers concrete type `V` under `tag`. Tags must be positive and
    /// unique within the context.
    pub fn register<V: 'static>(&mut self, tag: u8, decode: DecodeFn<T>) -> Result<()> {
        if tag == 0
            || self.decoders.contains_key(&tag)
            || self.tags.contains_key(&TypeId::of::<V>())
        {
            return Err(Error::InvalidArgument);
        }
        self.tags.insert(TypeId::of::<V>(), tag);
        self.decoders.insert(tag, decode);
        Ok(())
    }

    pub fn tag_of<V: 'static>(&self) -> Option<u8> {
        self.tags.get(&TypeId::of::<V>()).copied()
    }

    pub fn decoder_for(&self, tag: u8) -> Option<DecodeFn<T>> {
        self.decoders.get(&tag).copied()
    }

    /// Registers an error category and returns its index. Registering the
    /// same name again returns the existing index.
    pub fn register_category(&mut self, name: &'static str) -> u32 {
        if let Some(i) = self.category_index(name) {
            return i;
        }
        self.categories.push(name);
        (self.categories.len() - 1) as u32
    }

    pub fn category_index(&self, name: &str) -> Option<u32> {
        self.categories.iter().position(|c| *c == name).map(|i| i as u32)
    }

    pub fn category_name(&self, index: u32) -> Option<&'static str> {
        self.categories.get(index as usize).copied()
    }
}
