//! Error taxonomy for the store core.
//!
//! Hand-rolled rather than built on `thiserror`/`anyhow`: the crate's
//! dependency table carries neither, matching the style of the storage
//! engine this crate is descended from.

use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Key is empty, exceeds `max_key_size`, or (during decode) not valid UTF-8.
    InvalidKey(String),
    /// Value exceeds the configured maximum.
    OversizedValue { len: usize, max: usize },
    /// A record would not fit in any segment, even an empty one.
    OversizedRecord { framed_size: usize, max_segment_size: u64 },
    /// A record was cut short by a crash; tolerated during scan, surfaced elsewhere.
    Truncated,
    /// A well-framed region decoded to something semantically invalid.
    InvalidRecord { segment_id: u64, offset: u64, reason: String },
    /// Appending would push the active segment past its size or entry bound.
    SegmentFull,
    /// Append attempted on a segment that is no longer active.
    SegmentSealed { segment_id: u64 },
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// The keydir pointed at a record whose timestamp disagrees with what was read.
    KeydirStale { key: String },
    /// Another store instance already holds the directory lock.
    AlreadyLocked { path: PathBuf },
    /// Configuration failed validation at `open`.
    InvalidConfig(String),
    /// An operation was attempted after `close()`.
    StoreClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidKey(reason) => write!(f, "invalid key: {reason}"),
            Error::OversizedValue { len, max } => {
                write!(f, "value of {len} bytes exceeds max_value_size of {max} bytes")
            }
            Error::OversizedRecord { framed_size, max_segment_size } => write!(
                f,
                "record of {framed_size} bytes would not fit in an empty segment (max_segment_size={max_segment_size})"
            ),
            Error::Truncated => write!(f, "record truncated mid-log"),
            Error::InvalidRecord { segment_id, offset, reason } => write!(
                f,
                "invalid record in segment {segment_id} at offset {offset}: {reason}"
            ),
            Error::SegmentFull => write!(f, "segment full"),
            Error::SegmentSealed { segment_id } => {
                write!(f, "segment {segment_id} is sealed and cannot be appended to")
            }
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::KeydirStale { key } => {
                write!(f, "keydir entry for key {key:?} is stale (timestamp mismatch)")
            }
            Error::AlreadyLocked { path } => {
                write!(f, "data directory {} is already locked by another store", path.display())
            }
            Error::InvalidConfig(reason) => write!(f, "invalid configuration: {reason}"),
            Error::StoreClosed => write!(f, "store is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Truncated
        } else {
            Error::Io(err)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Io(std::io::Error::other(err))
    }
}
