//! Error types for the journal storage engine.
//!
//! [`JournalError`] covers every failure mode of pages, writers, readers
//! and locators. Incomplete or corrupt frames are not errors: readers treat
//! them as "no data yet".

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur within the journal subsystem.
#[derive(Debug)]
#[non_exhaustive]
pub enum JournalError {
    /// An I/O error occurred while reading or writing journal files.
    Io {
        /// The underlying I/O error message.
        message: String,
        /// The file path involved, if known.
        path: Option<PathBuf>,
    },

    /// A record could not be serialized into a frame payload.
    SerializationError {
        /// The underlying serialization error message.
        message: String,
    },

    /// A frame payload could not be decoded as the requested record type.
    DeserializationError {
        /// The message-type tag of the frame.
        msg_type: i32,
        /// The underlying deserialization error message.
        message: String,
    },

    /// A frame payload failed CRC32 verification.
    CorruptFrame {
        /// The id of the corrupt frame.
        frame_id: u64,
        /// The CRC32 stored in the frame header.
        expected_crc: u32,
        /// The CRC32 computed from the payload bytes.
        actual_crc: u32,
    },

    /// A frame does not fit in an empty page.
    FrameTooLarge {
        /// The size of the frame including its header, in bytes.
        frame_bytes: usize,
        /// The configured page size in bytes.
        page_size: usize,
    },

    /// A page file has an unexpected header.
    InvalidPageHeader {
        /// The page file path.
        path: PathBuf,
        /// Description of the header problem.
        message: String,
    },

    /// The journal root directory does not exist or is not accessible.
    InvalidDirectory {
        /// The path that was expected to be a valid directory.
        path: PathBuf,
    },

    /// Two different locations hash to the same uid.
    UidCollision {
        /// The colliding uid.
        uid: u32,
        /// The uname already registered under `uid`.
        existing: String,
        /// The uname that attempted to register.
        incoming: String,
    },

    /// `open_frame` was called while another frame is still open.
    FrameAlreadyOpen,

    /// `close_frame` was called without a matching `open_frame`.
    NoOpenFrame,

    /// `close_frame` was given a length larger than the reserved buffer.
    FrameOverrun {
        /// Bytes reserved by `open_frame`.
        reserved: usize,
        /// Bytes claimed by `close_frame`.
        requested: usize,
    },

    /// The message-type tag is not present in the record registry.
    UnknownTag {
        /// The unrecognised tag.
        msg_type: i32,
    },
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalError::Io { message, path } => {
                if let Some(p) = path {
                    write!(f, "journal I/O error at {}: {message}", p.display())
                } else {
                    write!(f, "journal I/O error: {message}")
                }
            }
            JournalError::SerializationError { message } => {
                write!(f, "frame serialization error: {message}")
            }
            JournalError::DeserializationError { msg_type, message } => {
                write!(
                    f,
                    "frame deserialization error for msg_type {msg_type}: {message}"
                )
            }
            JournalError::CorruptFrame {
                frame_id,
                expected_crc,
                actual_crc,
            } => {
                write!(
                    f,
                    "corrupt frame {frame_id:#018x}: \
                     expected CRC {expected_crc:#010x}, got {actual_crc:#010x}"
                )
            }
            JournalError::FrameTooLarge {
                frame_bytes,
                page_size,
            } => {
                write!(
                    f,
                    "frame too large: {frame_bytes} bytes exceeds \
                     page size {page_size} bytes"
                )
            }
            JournalError::InvalidPageHeader { path, message } => {
                write!(f, "invalid page header in {}: {message}", path.display())
            }
            JournalError::InvalidDirectory { path } => {
                write!(f, "invalid journal directory: {}", path.display())
            }
            JournalError::UidCollision {
                uid,
                existing,
                incoming,
            } => {
                write!(
                    f,
                    "location uid {uid:08x} collision: {incoming} conflicts with {existing}"
                )
            }
            JournalError::FrameAlreadyOpen => write!(f, "a frame is already open"),
            JournalError::NoOpenFrame => write!(f, "no frame is open"),
            JournalError::FrameOverrun {
                reserved,
                requested,
            } => {
                write!(
                    f,
                    "frame length {requested} exceeds reserved {reserved} bytes"
                )
            }
            JournalError::UnknownTag { msg_type } => {
                write!(f, "unknown msg_type {msg_type}")
            }
        }
    }
}

impl std::error::Error for JournalError {}

impl From<std::io::Error> for JournalError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        JournalError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}

/// Wraps an I/O error with the path it relates to.
#[cold]
pub(crate) fn io_error(err: std::io::Error, path: &std::path::Path) -> JournalError {
    JournalError::Io {
        message: err.to_string(),
        path: Some(path.to_path_buf()),
    }
}
