/// Errors surfaced by the replicated log.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("frame checksum mismatch")]
    Checksum,
    #[error("frame type does not match the requested frame class")]
    FrameType,
    #[error("replicant id {found} does not match configured id {expected}")]
    ServerId { expected: u64, found: u64 },
    #[error("log index out of range")]
    IndexOutOfRange,
    #[error("no replicant state frame found during recovery")]
    Recovery,
    #[error("log entries are not contiguous at the requested index")]
    StateNotRecoverable,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("log file is not open")]
    NotOpen,
    #[error(transparent)]
    Stream(#[from] bstream::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
