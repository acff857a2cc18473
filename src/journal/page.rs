//! Fixed-size, memory-mapped page files.
//!
//! # On-Disk Page Format (little-endian)
//!
//! ```text
//! [4 bytes: magic][4 bytes: version][4 bytes: page_size]
//! [4 bytes: frame_header_length][8 bytes: begin_time_ns][8 bytes: reserved]
//! [frames ...]
//! ```
//!
//! The writer maps a page read-write; readers map it read-only and see the
//! writer's stores through the shared mapping. The magic is stored last so
//! a reader never trusts a half-initialised header.
//!
//! Pages are named `{dest:08x}.{page_id}.journal`. Page ids start at 1.

use super::error::{JournalError, io_error};
use super::frame::{FRAME_HEADER_LENGTH, FrameHeader, load_frame_length, store_frame_length};
use memmap2::{Mmap, MmapMut};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::trace;

/// Size of the page header in bytes.
pub const PAGE_HEADER_LENGTH: usize = 32;

/// Magic number identifying a page file ("JBPG").
pub const PAGE_MAGIC: u32 = 0x4742_504A;

/// Page format version.
pub const PAGE_VERSION: u32 = 1;

/// Id of the first page of every journal.
pub const FIRST_PAGE_ID: u32 = 1;

/// Decoded page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Format version.
    pub version: u32,
    /// Page size in bytes.
    pub page_size: u32,
    /// Frame header length the page was written with.
    pub frame_header_length: u32,
    /// Generation time of the first frame the page was created for.
    pub begin_time: i64,
}

impl PageHeader {
    fn read(data: &[u8]) -> Option<Self> {
        let b = data.get(..PAGE_HEADER_LENGTH)?;
        Some(Self {
            version: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            page_size: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            frame_header_length: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
            begin_time: i64::from_le_bytes([b[16], b[17], b[18], b[19], b[20], b[21], b[22], b[23]]),
        })
    }
}

/// State of one frame slot as seen by a reader.
#[derive(Debug)]
pub(crate) enum Slot {
    /// Nothing published at this offset yet.
    Empty,
    /// A complete, checksum-verified frame.
    Ready(FrameHeader),
    /// A published frame whose header or payload is inconsistent.
    Corrupt(JournalError),
}

/// Reads the slot at `offset` of a mapped page.
pub(crate) fn read_slot(data: &[u8], offset: usize) -> Slot {
    let header_end = match offset.checked_add(FRAME_HEADER_LENGTH) {
        Some(end) if end <= data.len() => end,
        _ => return Slot::Empty,
    };
    let frame_length = match load_frame_length(data, offset) {
        Some(0) | None => return Slot::Empty,
        Some(len) => len,
    };
    let Some(header) = FrameHeader::read_body(frame_length, &data[offset..header_end]) else {
        return Slot::Empty;
    };

    let expected_length = FRAME_HEADER_LENGTH.checked_add(header.payload_length as usize);
    let frame_end = offset.checked_add(frame_length as usize);
    let (Some(expected_length), Some(frame_end)) = (expected_length, frame_end) else {
        return Slot::Corrupt(bad_header(offset, "length overflow"));
    };
    if expected_length != frame_length as usize {
        return Slot::Corrupt(bad_header(offset, "frame_length disagrees with payload_length"));
    }
    if frame_end > data.len() {
        return Slot::Corrupt(bad_header(offset, "frame extends beyond page"));
    }

    let computed = crc32fast::hash(&data[header_end..frame_end]);
    if computed != header.checksum {
        return Slot::Corrupt(JournalError::CorruptFrame {
            frame_id: header.frame_id,
            expected_crc: header.checksum,
            actual_crc: computed,
        });
    }
    Slot::Ready(header)
}

fn bad_header(offset: usize, message: &str) -> JournalError {
    JournalError::InvalidPageHeader {
        path: PathBuf::new(),
        message: format!("frame at offset {offset}: {message}"),
    }
}

// ─── Writable pages ─────────────────────────────────────────────────────────

/// The page a writer is currently appending to.
pub(crate) struct WritablePage {
    mmap: MmapMut,
    page_id: u32,
    page_size: usize,
    /// Offset of the next frame slot.
    write_pos: usize,
    /// Index the next frame will get within this page.
    frame_index: u32,
    /// Header of the last published frame, if any.
    last_header: Option<FrameHeader>,
    path: PathBuf,
}

impl WritablePage {
    /// Creates and maps a new page file, pre-allocated to `page_size`.
    pub(crate) fn create(
        path: &Path,
        page_id: u32,
        page_size: usize,
        begin_time: i64,
    ) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| io_error(e, path))?;

        file.set_len(page_size as u64).map_err(|e| io_error(e, path))?;

        // SAFETY: one writer per (location, dest) journal; no other process
        // truncates or writes this file while the mapping is alive.
        let mut mmap = unsafe { MmapMut::map_mut(&file).map_err(|e| io_error(e, path))? };

        let page_size_field =
            u32::try_from(page_size).map_err(|_| JournalError::FrameTooLarge {
                frame_bytes: page_size,
                page_size: u32::MAX as usize,
            })?;
        mmap[4..8].copy_from_slice(&PAGE_VERSION.to_le_bytes());
        mmap[8..12].copy_from_slice(&page_size_field.to_le_bytes());
        mmap[12..16].copy_from_slice(&(FRAME_HEADER_LENGTH as u32).to_le_bytes());
        mmap[16..24].copy_from_slice(&begin_time.to_le_bytes());
        // SAFETY: the mapping base is page-aligned and at least 4 bytes long.
        let magic = unsafe { AtomicU32::from_ptr(mmap.as_mut_ptr().cast::<u32>()) };
        magic.store(PAGE_MAGIC.to_le(), Ordering::Release);

        trace!(path = %path.display(), page_id, begin_time, "page created");

        Ok(Self {
            mmap,
            page_id,
            page_size,
            write_pos: PAGE_HEADER_LENGTH,
            frame_index: 0,
            last_header: None,
            path: path.to_path_buf(),
        })
    }

    /// Maps an existing page file for appending.
    ///
    /// Scans published frames to find the write position.
    pub(crate) fn open_existing(path: &Path, page_id: u32) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| io_error(e, path))?;

        // SAFETY: one writer per (location, dest) journal; no other process
        // truncates or writes this file while the mapping is alive.
        let mmap = unsafe { MmapMut::map_mut(&file).map_err(|e| io_error(e, path))? };

        let magic = mmap
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        if magic != Some(PAGE_MAGIC) {
            return Err(JournalError::InvalidPageHeader {
                path: path.to_path_buf(),
                message: "bad magic".to_string(),
            });
        }
        let page_size = mmap.len();

        let mut write_pos = PAGE_HEADER_LENGTH;
        let mut frame_index = 0u32;
        let mut last_header = None;
        while let Slot::Ready(header) = read_slot(&mmap, write_pos) {
            write_pos = write_pos.saturating_add(crate::utils::align8(header.frame_length as usize));
            frame_index = frame_index.saturating_add(1);
            last_header = Some(header);
        }

        Ok(Self {
            mmap,
            page_id,
            page_size,
            write_pos,
            frame_index,
            last_header,
            path: path.to_path_buf(),
        })
    }

    /// Bytes left after the write position.
    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.page_size.saturating_sub(self.write_pos)
    }

    pub(crate) fn page_id(&self) -> u32 {
        self.page_id
    }

    /// Mapped length of the page file.
    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn write_pos(&self) -> usize {
        self.write_pos
    }

    pub(crate) fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub(crate) fn last_header(&self) -> Option<&FrameHeader> {
        self.last_header.as_ref()
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Mutable view of `len` bytes at `offset`, if in bounds.
    pub(crate) fn slice_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let end = offset.checked_add(len)?;
        self.mmap.get_mut(offset..end)
    }

    /// Publishes the frame at the write position and advances past it.
    ///
    /// The header body and payload must already be in place.
    pub(crate) fn publish(&mut self, header: FrameHeader) {
        let offset = self.write_pos;
        // SAFETY: `offset` is 8-byte aligned within a page-aligned mapping
        // and the caller reserved at least a frame header at `offset`.
        unsafe { store_frame_length(self.mmap.as_mut_ptr().add(offset), header.frame_length) };
        self.write_pos = offset.saturating_add(crate::utils::align8(header.frame_length as usize));
        self.frame_index = self.frame_index.saturating_add(1);
        self.last_header = Some(header);
    }

    /// Schedules the dirty range for write-back without blocking.
    pub(crate) fn flush_async(&self) -> Result<(), JournalError> {
        self.mmap.flush_async().map_err(|e| io_error(e, &self.path))
    }
}

impl std::fmt::Debug for WritablePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritablePage")
            .field("path", &self.path)
            .field("page_id", &self.page_id)
            .field("write_pos", &self.write_pos)
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

// ─── Readable pages ─────────────────────────────────────────────────────────

/// Read-only view of one page file.
pub(crate) struct ReadablePage {
    mmap: Mmap,
    page_id: u32,
    header: PageHeader,
}

impl ReadablePage {
    /// Maps a page for reading.
    ///
    /// Returns `Ok(None)` when the file does not exist yet or its header
    /// has not been published.
    pub(crate) fn open(path: &Path, page_id: u32) -> Result<Option<Self>, JournalError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(e, path)),
        };
        let len = file.metadata().map_err(|e| io_error(e, path))?.len();
        if len < PAGE_HEADER_LENGTH as u64 {
            return Ok(None);
        }

        // SAFETY: read-only mapping; the single writer only appends and
        // never truncates a page once it has been sized.
        let mmap = unsafe { Mmap::map(&file).map_err(|e| io_error(e, path))? };

        match load_frame_length(&mmap, 0) {
            Some(PAGE_MAGIC) => {}
            Some(0) | None => return Ok(None),
            Some(other) => {
                return Err(JournalError::InvalidPageHeader {
                    path: path.to_path_buf(),
                    message: format!("bad magic {other:#010x}"),
                });
            }
        }
        let header = PageHeader::read(&mmap).ok_or_else(|| JournalError::InvalidPageHeader {
            path: path.to_path_buf(),
            message: "truncated header".to_string(),
        })?;

        Ok(Some(Self {
            mmap,
            page_id,
            header,
        }))
    }

    pub(crate) fn page_id(&self) -> u32 {
        self.page_id
    }

    pub(crate) fn header(&self) -> &PageHeader {
        &self.header
    }

    pub(crate) fn slot(&self, offset: usize) -> Slot {
        read_slot(&self.mmap, offset)
    }

    /// Payload bytes of a frame previously returned by [`Self::slot`].
    pub(crate) fn payload(&self, offset: usize, header: &FrameHeader) -> &[u8] {
        let start = offset.saturating_add(FRAME_HEADER_LENGTH);
        let end = start.saturating_add(header.payload_length as usize);
        self.mmap.get(start..end).unwrap_or_default()
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// File name of one page.
#[must_use]
pub fn page_file_name(dest: u32, page_id: u32) -> String {
    format!("{dest:08x}.{page_id}.journal")
}

/// Path of one page inside a journal directory.
#[must_use]
pub fn page_path(dir: &Path, dest: u32, page_id: u32) -> PathBuf {
    dir.join(page_file_name(dest, page_id))
}

/// Parses `{dest:08x}.{page_id}.journal`.
pub(crate) fn parse_page_file_name(name: &str) -> Option<(u32, u32)> {
    let stem = name.strip_suffix(".journal")?;
    let (dest, page) = stem.split_once('.')?;
    if dest.len() != 8 {
        return None;
    }
    let dest = u32::from_str_radix(dest, 16).ok()?;
    let page = page.parse::<u32>().ok()?;
    Some((dest, page))
}

/// Sorted page ids of the `dest` journal in `dir`.
///
/// A missing directory yields an empty list.
pub fn list_page_ids(dir: &Path, dest: u32) -> Result<Vec<u32>, JournalError> {
    let mut ids = Vec::new();
    for (file_dest, page_id) in list_page_files(dir)? {
        if file_dest == dest {
            ids.push(page_id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Every `(dest, page_id)` pair present in `dir`.
pub(crate) fn list_page_files(dir: &Path) -> Result<Vec<(u32, u32)>, JournalError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(e, dir)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error(e, dir))?;
        let name = entry.file_name();
        if let Some(parsed) = parse_page_file_name(&name.to_string_lossy()) {
            files.push(parsed);
        }
    }
    Ok(files)
}
