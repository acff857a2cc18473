//! Frame header format.
//!
//! # On-Disk Frame Format (little-endian)
//!
//! ```text
//! offset  field           type
//!      0  frame_length    u32   header + payload bytes, published last
//!      4  payload_length  u32
//!      8  gen_time        i64   ns, assigned by the writer
//!     16  trigger_time    i64   ns, logical event time
//!     24  msg_type        i32   record tag
//!     28  source          u32   writer location uid
//!     32  dest            u32   destination uid
//!     36  checksum        u32   CRC32 of the payload
//!     40  frame_id        u64   (page_id << 32) | index in page
//!     48  payload ...
//! ```
//!
//! Frames start on 8-byte boundaries. A zero `frame_length` means the slot
//! has not been published yet.

use super::error::JournalError;
use crate::types::Record;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_LENGTH: usize = 48;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Header plus payload bytes.
    pub frame_length: u32,
    /// Payload bytes.
    pub payload_length: u32,
    /// Generation time in nanoseconds.
    pub gen_time: i64,
    /// Trigger time in nanoseconds.
    pub trigger_time: i64,
    /// Record tag.
    pub msg_type: i32,
    /// Source location uid.
    pub source: u32,
    /// Destination uid.
    pub dest: u32,
    /// CRC32 of the payload.
    pub checksum: u32,
    /// Stream-unique frame id.
    pub frame_id: u64,
}

impl FrameHeader {
    /// Writes every field except `frame_length` into `buf`.
    ///
    /// `buf` must hold at least [`FRAME_HEADER_LENGTH`] bytes.
    pub(crate) fn write_body(&self, buf: &mut [u8]) {
        buf[4..8].copy_from_slice(&self.payload_length.to_le_bytes());
        buf[8..16].copy_from_slice(&self.gen_time.to_le_bytes());
        buf[16..24].copy_from_slice(&self.trigger_time.to_le_bytes());
        buf[24..28].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[28..32].copy_from_slice(&self.source.to_le_bytes());
        buf[32..36].copy_from_slice(&self.dest.to_le_bytes());
        buf[36..40].copy_from_slice(&self.checksum.to_le_bytes());
        buf[40..48].copy_from_slice(&self.frame_id.to_le_bytes());
    }

    /// Decodes the fields after `frame_length` from `buf`.
    pub(crate) fn read_body(frame_length: u32, buf: &[u8]) -> Option<Self> {
        let b = buf.get(..FRAME_HEADER_LENGTH)?;
        Some(Self {
            frame_length,
            payload_length: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            gen_time: i64::from_le_bytes([b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]]),
            trigger_time: i64::from_le_bytes([
                b[16], b[17], b[18], b[19], b[20], b[21], b[22], b[23],
            ]),
            msg_type: i32::from_le_bytes([b[24], b[25], b[26], b[27]]),
            source: u32::from_le_bytes([b[28], b[29], b[30], b[31]]),
            dest: u32::from_le_bytes([b[32], b[33], b[34], b[35]]),
            checksum: u32::from_le_bytes([b[36], b[37], b[38], b[39]]),
            frame_id: u64::from_le_bytes([
                b[40], b[41], b[42], b[43], b[44], b[45], b[46], b[47],
            ]),
        })
    }

    /// Page id encoded in the frame id.
    #[must_use]
    pub fn page_id(&self) -> u32 {
        (self.frame_id >> 32) as u32
    }
}

/// Builds a frame id from its page id and index within the page.
#[inline]
#[must_use]
pub fn make_frame_id(page_id: u32, index: u32) -> u64 {
    (u64::from(page_id) << 32) | u64::from(index)
}

/// Publishes `frame_length` at the start of `slot` with Release ordering.
///
/// # Safety
///
/// `slot` must point into a live shared mapping, be 4-byte aligned and
/// have at least 4 writable bytes.
#[inline]
pub(crate) unsafe fn store_frame_length(slot: *mut u8, frame_length: u32) {
    // SAFETY: alignment and validity are guaranteed by the caller.
    let atomic = unsafe { AtomicU32::from_ptr(slot.cast::<u32>()) };
    atomic.store(frame_length.to_le(), Ordering::Release);
}

/// Loads the `frame_length` at `offset` with Acquire ordering.
///
/// Returns `None` if `offset` is unaligned or out of bounds.
#[inline]
pub(crate) fn load_frame_length(data: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    if end > data.len() || offset % 4 != 0 {
        return None;
    }
    let ptr = data[offset..end].as_ptr();
    if (ptr as usize) % 4 != 0 {
        return None;
    }
    // SAFETY: the pointer is in bounds and 4-byte aligned. `AtomicU32` has
    // the same layout as `u32` and a shared reference only permits loads.
    let atomic = unsafe { &*ptr.cast::<AtomicU32>() };
    Some(u32::from_le(atomic.load(Ordering::Acquire)))
}

/// One frame copied out of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
}

impl Frame {
    /// Builds a frame from a header and payload.
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// The frame header.
    #[must_use]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Generation time.
    #[must_use]
    pub fn gen_time(&self) -> i64 {
        self.header.gen_time
    }

    /// Trigger time.
    #[must_use]
    pub fn trigger_time(&self) -> i64 {
        self.header.trigger_time
    }

    /// Record tag.
    #[must_use]
    pub fn msg_type(&self) -> i32 {
        self.header.msg_type
    }

    /// Source uid.
    #[must_use]
    pub fn source(&self) -> u32 {
        self.header.source
    }

    /// Destination uid.
    #[must_use]
    pub fn dest(&self) -> u32 {
        self.header.dest
    }

    /// Frame id.
    #[must_use]
    pub fn frame_id(&self) -> u64 {
        self.header.frame_id
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether the frame carries record type `R`.
    #[must_use]
    pub fn is<R: Record>(&self) -> bool {
        self.header.msg_type == R::TAG
    }

    /// Decodes the payload as `R`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::DeserializationError`] if the tag does not
    /// match or the payload cannot be decoded.
    pub fn data<R: Record>(&self) -> Result<R, JournalError> {
        if self.header.msg_type != R::TAG {
            return Err(JournalError::DeserializationError {
                msg_type: self.header.msg_type,
                message: format!("expected {} ({})", R::TYPE_NAME, R::TAG),
            });
        }
        R::decode(&self.payload)
    }
}
