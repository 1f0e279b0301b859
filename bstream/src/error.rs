/// Errors surfaced by buffers, stream buffers and the codec.
///
/// Every fallible operation in this crate reports through this one enum;
/// there is no panicking flavor of the API outside of tests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("read past end of stream")]
    ReadPastEndOfStream,
    #[error("type code does not match the requested type")]
    TypeError,
    #[error("seek target is outside the stream")]
    InvalidSeek,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no buffer space available")]
    NoBufferSpace,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the error indicates that the underlying byte source
    /// simply ran out of data, as opposed to a malformed encoding.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::ReadPastEndOfStream)
    }
}
