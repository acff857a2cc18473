//! Single-owner append cursor into one `(location, dest)` journal.
//!
//! A [`Writer`] reserves a slot with [`Writer::open_frame`], lets the caller
//! fill the payload in place, and publishes it with [`Writer::close_frame`].
//! Publishing stores the frame length last with Release ordering, so a
//! reader that observes a non-zero length also observes the whole frame.
//!
//! When a frame would not fit in the current page, the writer creates the
//! next page, then closes the current one with a page-end marker frame. One
//! header's worth of space is always kept free for that marker.

use super::error::{JournalError, io_error};
use super::frame::{FRAME_HEADER_LENGTH, Frame, FrameHeader, make_frame_id};
use super::location::Location;
use super::locator::{Layout, Locator};
use super::page::{FIRST_PAGE_ID, PAGE_HEADER_LENGTH, WritablePage};
use crate::notify::Publisher;
use crate::types::{MARK_TAG, PAGE_END_TAG, Record};
use crate::utils::{align8, now_in_nano};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Fields of the frame between `open_frame` and `close_frame`.
#[derive(Debug, Clone, Copy)]
struct PendingFrame {
    gen_time: i64,
    trigger_time: i64,
    msg_type: i32,
    source: u32,
    dest: u32,
    reserved: usize,
}

/// Exclusive writer of one `(location, dest)` journal.
pub struct Writer {
    location: Arc<Location>,
    dest: u32,
    locator: Arc<Locator>,
    page_size: usize,
    page: WritablePage,
    pending: Option<PendingFrame>,
    last_frame_id: u64,
    publisher: Option<Arc<dyn Publisher>>,
}

impl Writer {
    /// Opens the journal of `location` for `dest`.
    ///
    /// Creates page 1 if the journal is empty; otherwise resumes after the
    /// last complete frame of the latest page.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the journal directory cannot be created,
    /// a page cannot be mapped, or the page to resume was created with
    /// another page size.
    pub fn open(
        locator: Arc<Locator>,
        location: Arc<Location>,
        dest: u32,
        page_size: usize,
    ) -> Result<Self, JournalError> {
        if page_size < PAGE_HEADER_LENGTH + 2 * FRAME_HEADER_LENGTH {
            return Err(JournalError::FrameTooLarge {
                frame_bytes: 2 * FRAME_HEADER_LENGTH,
                page_size,
            });
        }
        locator.ensure_dir(&location, Layout::Journal)?;

        let page_ids = locator.list_page_ids(&location, dest)?;
        let (page, last_frame_id) = match page_ids.last() {
            Some(&latest) => {
                let path = locator.page_path(&location, dest, latest);
                let page = WritablePage::open_existing(&path, latest)?;
                match page.last_header().copied() {
                    Some(last) if last.msg_type == PAGE_END_TAG => {
                        let next_id = latest.saturating_add(1);
                        let next_path = locator.page_path(&location, dest, next_id);
                        let next = WritablePage::create(&next_path, next_id, page_size, last.gen_time)?;
                        (next, last.frame_id)
                    }
                    Some(last) => (check_page_size(page, page_size)?, last.frame_id),
                    // Rotated right before a crash: ids continue from the previous page.
                    None => {
                        let resumed = last_frame_id_before(&locator, &location, dest, &page_ids)?;
                        (check_page_size(page, page_size)?, resumed)
                    }
                }
            }
            None => {
                let path = locator.page_path(&location, dest, FIRST_PAGE_ID);
                (WritablePage::create(&path, FIRST_PAGE_ID, page_size, now_in_nano())?, 0)
            }
        };

        debug!(
            location = %location.uname,
            dest = format_args!("{dest:08x}"),
            page_id = page.page_id(),
            write_pos = page.write_pos(),
            "writer opened"
        );

        Ok(Self {
            location,
            dest,
            locator,
            page_size,
            page,
            pending: None,
            last_frame_id,
            publisher: None,
        })
    }

    /// Notifies `publisher` after every closed frame.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// The owning location.
    #[must_use]
    pub fn location(&self) -> &Arc<Location> {
        &self.location
    }

    /// The destination uid.
    #[must_use]
    pub fn dest(&self) -> u32 {
        self.dest
    }

    /// Id of the last published frame, or `0` before the first write.
    #[must_use]
    pub fn current_frame_uid(&self) -> u64 {
        self.last_frame_id
    }

    /// Id of the page currently being appended to.
    #[must_use]
    pub fn current_page_id(&self) -> u32 {
        self.page.page_id()
    }

    /// Reserves a frame of up to `size` payload bytes and returns the
    /// payload buffer.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::FrameAlreadyOpen`] if a frame is pending,
    /// [`JournalError::FrameTooLarge`] if the frame cannot fit in a page.
    pub fn open_frame(
        &mut self,
        trigger_time: i64,
        msg_type: i32,
        size: usize,
    ) -> Result<&mut [u8], JournalError> {
        let source = self.location.uid;
        let dest = self.dest;
        self.open_frame_with(now_in_nano(), trigger_time, msg_type, size, source, dest)
    }

    fn open_frame_with(
        &mut self,
        gen_time: i64,
        trigger_time: i64,
        msg_type: i32,
        size: usize,
        source: u32,
        dest: u32,
    ) -> Result<&mut [u8], JournalError> {
        if self.pending.is_some() {
            return Err(JournalError::FrameAlreadyOpen);
        }
        let needed = align8(FRAME_HEADER_LENGTH.saturating_add(size));
        let capacity = self.page_size.saturating_sub(PAGE_HEADER_LENGTH + FRAME_HEADER_LENGTH);
        if needed > capacity || size > u32::MAX as usize {
            return Err(JournalError::FrameTooLarge {
                frame_bytes: needed,
                page_size: self.page_size,
            });
        }
        if self.page.remaining() < needed.saturating_add(FRAME_HEADER_LENGTH) {
            self.rotate(gen_time)?;
        }

        self.pending = Some(PendingFrame {
            gen_time,
            trigger_time,
            msg_type,
            source,
            dest,
            reserved: size,
        });
        let offset = self.page.write_pos().saturating_add(FRAME_HEADER_LENGTH);
        let path = self.page.path().to_path_buf();
        self.page
            .slice_mut(offset, size)
            .ok_or_else(|| JournalError::Io {
                message: "frame slot out of bounds".to_string(),
                path: Some(path),
            })
    }

    /// Publishes the open frame with `data_length` payload bytes.
    ///
    /// Returns the frame id.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NoOpenFrame`] without a pending frame, or
    /// [`JournalError::FrameOverrun`] if `data_length` exceeds the
    /// reserved size.
    pub fn close_frame(&mut self, data_length: usize) -> Result<u64, JournalError> {
        let pending = self.pending.ok_or(JournalError::NoOpenFrame)?;
        if data_length > pending.reserved {
            return Err(JournalError::FrameOverrun {
                reserved: pending.reserved,
                requested: data_length,
            });
        }
        self.pending = None;

        let offset = self.page.write_pos();
        let frame_length = FRAME_HEADER_LENGTH + data_length;
        let frame_id = make_frame_id(self.page.page_id(), self.page.frame_index());
        let path = self.page.path().to_path_buf();
        let slot = self
            .page
            .slice_mut(offset, frame_length)
            .ok_or_else(|| JournalError::Io {
                message: "frame slot out of bounds".to_string(),
                path: Some(path),
            })?;
        let header = FrameHeader {
            frame_length: frame_length as u32,
            payload_length: data_length as u32,
            gen_time: pending.gen_time,
            trigger_time: pending.trigger_time,
            msg_type: pending.msg_type,
            source: pending.source,
            dest: pending.dest,
            checksum: crc32fast::hash(&slot[FRAME_HEADER_LENGTH..]),
            frame_id,
        };
        header.write_body(slot);
        self.page.publish(header);
        self.last_frame_id = frame_id;

        trace!(
            location = %self.location.uname,
            msg_type = header.msg_type,
            frame_id,
            "frame closed"
        );
        #[cfg(feature = "metrics")]
        metrics::counter!("journalbus_frames_written").increment(1);

        if let Some(publisher) = &self.publisher
            && let Err(e) = publisher.notify()
        {
            warn!(location = %self.location.uname, error = %e, "write notification failed");
        }
        Ok(frame_id)
    }

    /// Appends `record` with the current time as generation time.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the record cannot be encoded or written.
    pub fn write<R: Record>(&mut self, trigger_time: i64, record: &R) -> Result<u64, JournalError> {
        let payload = record.encode()?;
        self.write_raw(now_in_nano(), trigger_time, R::TAG, &payload, self.location.uid, self.dest)
    }

    /// Appends `record` with an explicit generation time.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the record cannot be encoded or written.
    pub fn write_at<R: Record>(
        &mut self,
        gen_time: i64,
        trigger_time: i64,
        record: &R,
    ) -> Result<u64, JournalError> {
        let payload = record.encode()?;
        self.write_raw(gen_time, trigger_time, R::TAG, &payload, self.location.uid, self.dest)
    }

    /// Appends `record` with overridden header source and dest.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the record cannot be encoded or written.
    pub fn write_as<R: Record>(
        &mut self,
        trigger_time: i64,
        record: &R,
        source: u32,
        dest: u32,
    ) -> Result<u64, JournalError> {
        let payload = record.encode()?;
        self.write_raw(now_in_nano(), trigger_time, R::TAG, &payload, source, dest)
    }

    /// Appends an already-encoded payload with every header field explicit.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the frame cannot be written.
    pub fn write_raw(
        &mut self,
        gen_time: i64,
        trigger_time: i64,
        msg_type: i32,
        payload: &[u8],
        source: u32,
        dest: u32,
    ) -> Result<u64, JournalError> {
        let buf = self.open_frame_with(gen_time, trigger_time, msg_type, payload.len(), source, dest)?;
        buf.copy_from_slice(payload);
        self.close_frame(payload.len())
    }

    /// Appends raw payload bytes under `msg_type`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the frame cannot be written.
    pub fn write_bytes(
        &mut self,
        trigger_time: i64,
        msg_type: i32,
        bytes: &[u8],
    ) -> Result<u64, JournalError> {
        self.write_raw(now_in_nano(), trigger_time, msg_type, bytes, self.location.uid, self.dest)
    }

    /// Appends a copy of `frame`, preserving its times, tag, source and dest.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the frame cannot be written.
    pub fn copy_frame(&mut self, frame: &Frame) -> Result<u64, JournalError> {
        let header = frame.header();
        self.write_raw(
            header.gen_time,
            header.trigger_time,
            header.msg_type,
            frame.payload(),
            header.source,
            header.dest,
        )
    }

    /// Appends a zero-payload heartbeat frame.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the frame cannot be written.
    pub fn mark(&mut self, trigger_time: i64, msg_type: i32) -> Result<u64, JournalError> {
        self.mark_at(now_in_nano(), trigger_time, msg_type)
    }

    /// Appends a zero-payload heartbeat frame with an explicit generation
    /// time.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the frame cannot be written.
    pub fn mark_at(&mut self, gen_time: i64, trigger_time: i64, msg_type: i32) -> Result<u64, JournalError> {
        self.write_raw(gen_time, trigger_time, msg_type, &[], self.location.uid, self.dest)
    }

    /// Appends a heartbeat with the default mark tag.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the frame cannot be written.
    pub fn heartbeat(&mut self) -> Result<u64, JournalError> {
        let now = now_in_nano();
        self.mark_at(now, now, MARK_TAG)
    }

    /// Moves to the next page, closing the current one with a page-end
    /// marker after the next page exists.
    fn rotate(&mut self, gen_time: i64) -> Result<(), JournalError> {
        let next_id = self.page.page_id().saturating_add(1);
        let next_path = self.locator.page_path(&self.location, self.dest, next_id);
        let next = WritablePage::create(&next_path, next_id, self.page_size, gen_time)?;

        let offset = self.page.write_pos();
        let frame_id = make_frame_id(self.page.page_id(), self.page.frame_index());
        let header = FrameHeader {
            frame_length: FRAME_HEADER_LENGTH as u32,
            payload_length: 0,
            gen_time,
            trigger_time: gen_time,
            msg_type: PAGE_END_TAG,
            source: self.location.uid,
            dest: self.dest,
            checksum: crc32fast::hash(&[]),
            frame_id,
        };
        let path = self.page.path().to_path_buf();
        let slot = self
            .page
            .slice_mut(offset, FRAME_HEADER_LENGTH)
            .ok_or_else(|| io_error(std::io::Error::other("no room for page end"), &path))?;
        header.write_body(slot);
        self.page.publish(header);
        self.page.flush_async()?;

        debug!(
            location = %self.location.uname,
            dest = format_args!("{:08x}", self.dest),
            page_id = next_id,
            "page rotated"
        );
        self.page = next;
        Ok(())
    }
}

/// Builds a system-unique instruction id from the writer's last frame id,
/// the instruction's dest and the requesting client.
#[must_use]
pub fn make_instruction_uid(writer: &Writer, dest: u32, client_id: u32) -> u64 {
    (u64::from(client_id ^ dest) << 32) | (writer.current_frame_uid() & 0xFFFF_FFFF) | 0x8000_0000
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("location", &self.location.uname)
            .field("dest", &self.dest)
            .field("page", &self.page)
            .field("last_frame_id", &self.last_frame_id)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

/// Rejects resuming a page whose mapped length differs from `page_size`.
fn check_page_size(page: WritablePage, page_size: usize) -> Result<WritablePage, JournalError> {
    if page.page_size() != page_size {
        return Err(JournalError::InvalidPageHeader {
            path: page.path().to_path_buf(),
            message: format!("page size {} does not match configured {page_size}", page.page_size()),
        });
    }
    Ok(page)
}

/// Frame id of the last frame written before the latest page.
fn last_frame_id_before(
    locator: &Locator,
    location: &Location,
    dest: u32,
    page_ids: &[u32],
) -> Result<u64, JournalError> {
    let earlier = page_ids.len().saturating_sub(1);
    for &page_id in page_ids.iter().take(earlier).rev() {
        let path = locator.page_path(location, dest, page_id);
        let page = WritablePage::open_existing(&path, page_id)?;
        if let Some(last) = page.last_header() {
            return Ok(last.frame_id);
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::location::{Category, Mode};
    use crate::types::Deregister;

    fn setup(page_size: usize) -> (tempfile::TempDir, Writer) {
        let dir = tempfile::tempdir().expect("tempdir");
        let locator = Arc::new(Locator::new(dir.path()));
        let location = Arc::new(Location::new(Mode::Live, Category::Strategy, "demo", "w"));
        let writer = Writer::open(locator, location, 0, page_size).expect("open");
        (dir, writer)
    }

    #[test]
    fn test_frame_ids_strictly_increase() {
        let (_dir, mut writer) = setup(64 * 1024);
        assert_eq!(writer.current_frame_uid(), 0);
        let mut last = 0;
        for i in 0..50u32 {
            let id = writer.write(0, &Deregister { location_uid: i }).expect("write");
            assert!(id > last);
            assert_eq!(writer.current_frame_uid(), id);
            last = id;
        }
    }

    #[test]
    fn test_rotation_creates_next_page() {
        let (dir, mut writer) = setup(1024);
        let mut previous = 0;
        for i in 0..64u32 {
            let id = writer.write(0, &Deregister { location_uid: i }).unwrap_or_default();
            assert!(id > previous);
            previous = id;
        }
        assert!(writer.current_page_id() > FIRST_PAGE_ID);
        let locator = Locator::new(dir.path());
        let pages = locator.list_page_ids(writer.location(), 0).unwrap_or_default();
        assert_eq!(pages.last().copied(), Some(writer.current_page_id()));
    }

    #[test]
    fn test_open_close_protocol() {
        let (_dir, mut writer) = setup(4096);
        assert!(matches!(writer.close_frame(0), Err(JournalError::NoOpenFrame)));
        let buf = writer.open_frame(5, 42, 8);
        assert!(buf.is_ok());
        if let Ok(buf) = buf {
            buf.copy_from_slice(b"12345678");
        }
        assert!(matches!(
            writer.open_frame(5, 42, 8),
            Err(JournalError::FrameAlreadyOpen)
        ));
        assert!(matches!(
            writer.close_frame(9),
            Err(JournalError::FrameOverrun { .. })
        ));
        assert!(writer.close_frame(4).is_ok());
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let (_dir, mut writer) = setup(1024);
        let big = vec![0u8; 2048];
        assert!(matches!(
            writer.write_bytes(0, 7, &big),
            Err(JournalError::FrameTooLarge { .. })
        ));
        assert!(writer.write_bytes(0, 7, b"small").is_ok());
    }

    #[test]
    fn test_reopen_resumes_frame_ids() {
        let (dir, mut writer) = setup(4096);
        for i in 0..3u32 {
            writer.write(0, &Deregister { location_uid: i }).expect("write");
        }
        let last = writer.current_frame_uid();
        let location = Arc::clone(writer.location());
        drop(writer);

        let locator = Arc::new(Locator::new(dir.path()));
        let mut reopened = Writer::open(locator, location, 0, 4096).expect("reopen");
        assert_eq!(reopened.current_frame_uid(), last);
        let next = reopened.mark(0, MARK_TAG).expect("mark");
        assert!(next > last);
    }

    #[test]
    fn test_reopen_on_empty_rotated_page() {
        let (dir, mut writer) = setup(4096);
        for i in 0..3u32 {
            writer.write(0, &Deregister { location_uid: i }).expect("write");
        }
        let last = writer.current_frame_uid();
        let location = Arc::clone(writer.location());
        drop(writer);

        let locator = Arc::new(Locator::new(dir.path()));
        let next_id = FIRST_PAGE_ID + 1;
        let path = locator.page_path(&location, 0, next_id);
        WritablePage::create(&path, next_id, 4096, now_in_nano()).expect("empty page");

        let mut reopened = Writer::open(locator, location, 0, 4096).expect("reopen");
        assert_eq!(reopened.current_page_id(), next_id);
        assert_eq!(reopened.current_frame_uid(), last);
        let next = reopened.mark(0, MARK_TAG).expect("mark");
        assert!(next > last);
    }

    #[test]
    fn test_reopen_rejects_other_page_size() {
        let (dir, mut writer) = setup(4096);
        writer.mark(0, MARK_TAG).expect("mark");
        let location = Arc::clone(writer.location());
        drop(writer);

        let locator = Arc::new(Locator::new(dir.path()));
        assert!(matches!(
            Writer::open(locator, location, 0, 8192),
            Err(JournalError::InvalidPageHeader { .. })
        ));
    }

    #[test]
    fn test_instruction_uid_layout() {
        let (_dir, mut writer) = setup(4096);
        assert!(writer.mark(0, MARK_TAG).is_ok());
        let frame_uid = writer.current_frame_uid();
        let uid = make_instruction_uid(&writer, 0x10, 0x01);
        assert_eq!(uid >> 32, 0x11);
        assert_eq!(uid & 0x7FFF_FFFF, frame_uid & 0x7FFF_FFFF);
        assert_ne!(uid & 0x8000_0000, 0);
    }
}
