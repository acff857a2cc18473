//! Joinable, time-ordered reader over many journals.
//!
//! A [`Reader`] holds one cursor per joined `(location, dest)` journal and
//! merges them: [`Reader::next`] returns the unread frame with the smallest
//! generation time, breaking ties by join order and then by frame id. It
//! never blocks; when no journal has a complete frame it returns `None`.
//!
//! Page-end markers are consumed internally. A missing page file, an
//! unpublished slot or a frame failing its checksum all read as "no data
//! yet"; a corrupt frame is logged once per cursor.

use super::error::JournalError;
use super::frame::{Frame, FrameHeader};
use super::location::Location;
use super::locator::Locator;
use super::page::{FIRST_PAGE_ID, PAGE_HEADER_LENGTH, ReadablePage, Slot};
use crate::types::PAGE_END_TAG;
use crate::utils::align8;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read position in one journal.
struct Cursor {
    locator: Arc<Locator>,
    location: Arc<Location>,
    dest: u32,
    join_seq: u64,
    from_time: i64,
    page_id: u32,
    page: Option<ReadablePage>,
    offset: usize,
    /// Verified header of the frame at `offset`, if already probed.
    current: Option<FrameHeader>,
    corrupt_logged: bool,
}

impl Cursor {
    fn new(
        locator: Arc<Locator>,
        location: Arc<Location>,
        dest: u32,
        from_time: i64,
        join_seq: u64,
    ) -> Result<Self, JournalError> {
        let page_id = find_page_id(&locator, &location, dest, from_time)?;
        Ok(Self {
            locator,
            location,
            dest,
            join_seq,
            from_time,
            page_id,
            page: None,
            offset: PAGE_HEADER_LENGTH,
            current: None,
            corrupt_logged: false,
        })
    }

    /// Repositions at the first frame with `gen_time >= from_time`.
    fn seek(&mut self, from_time: i64) -> Result<(), JournalError> {
        self.page_id = find_page_id(&self.locator, &self.location, self.dest, from_time)?;
        self.from_time = from_time;
        self.page = None;
        self.offset = PAGE_HEADER_LENGTH;
        self.current = None;
        Ok(())
    }

    /// Header of the next readable frame, skipping page ends and frames
    /// older than `from_time`.
    fn peek(&mut self) -> Option<FrameHeader> {
        if let Some(header) = self.current {
            return Some(header);
        }
        loop {
            if self.page.is_none() {
                let path = self.locator.page_path(&self.location, self.dest, self.page_id);
                match ReadablePage::open(&path, self.page_id) {
                    Ok(Some(page)) => self.page = Some(page),
                    Ok(None) => return None,
                    Err(e) => {
                        self.log_corrupt(&e);
                        return None;
                    }
                }
            }
            let page = self.page.as_ref()?;
            match page.slot(self.offset) {
                Slot::Empty => return None,
                Slot::Corrupt(e) => {
                    self.log_corrupt(&e);
                    return None;
                }
                Slot::Ready(header) if header.msg_type == PAGE_END_TAG => {
                    self.page_id = page.page_id().saturating_add(1);
                    self.page = None;
                    self.offset = PAGE_HEADER_LENGTH;
                }
                Slot::Ready(header) if header.gen_time < self.from_time => {
                    self.offset = self.offset.saturating_add(align8(header.frame_length as usize));
                }
                Slot::Ready(header) => {
                    self.corrupt_logged = false;
                    self.current = Some(header);
                    return Some(header);
                }
            }
        }
    }

    /// Copies out the peeked frame.
    fn frame(&self) -> Option<Frame> {
        let header = self.current?;
        let page = self.page.as_ref()?;
        let payload = Bytes::copy_from_slice(page.payload(self.offset, &header));
        Some(Frame::new(header, payload))
    }

    fn advance(&mut self) {
        if let Some(header) = self.current.take() {
            self.offset = self.offset.saturating_add(align8(header.frame_length as usize));
        }
    }

    fn log_corrupt(&mut self, error: &JournalError) {
        if !self.corrupt_logged {
            warn!(
                location = %self.location.uname,
                dest = format_args!("{:08x}", self.dest),
                page_id = self.page_id,
                offset = self.offset,
                error = %error,
                "unreadable frame, waiting"
            );
            self.corrupt_logged = true;
        }
    }
}

/// Picks the last page whose begin time is at or before `from_time`, or the
/// first page if every page begins later.
fn find_page_id(locator: &Locator, location: &Location, dest: u32, from_time: i64) -> Result<u32, JournalError> {
    let page_ids = locator.list_page_ids(location, dest)?;
    let mut chosen = page_ids.first().copied().unwrap_or(FIRST_PAGE_ID);
    for page_id in page_ids {
        let path = locator.page_path(location, dest, page_id);
        match ReadablePage::open(&path, page_id)? {
            Some(page) if page.header().begin_time <= from_time => chosen = page_id,
            _ => break,
        }
    }
    Ok(chosen)
}

/// K-way merging reader.
pub struct Reader {
    locator: Arc<Locator>,
    cursors: Vec<Cursor>,
    next_join_seq: u64,
}

impl Reader {
    /// Creates a reader with no joined journals.
    pub fn new(locator: Arc<Locator>) -> Self {
        Self {
            locator,
            cursors: Vec::new(),
            next_join_seq: 0,
        }
    }

    /// The locator used to resolve page paths.
    #[must_use]
    pub fn locator(&self) -> &Arc<Locator> {
        &self.locator
    }

    /// Joins the `(location, dest)` journal from `from_time`.
    ///
    /// Joining an already joined journal is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if the journal directory cannot be read.
    pub fn join(&mut self, location: Arc<Location>, dest: u32, from_time: i64) -> Result<(), JournalError> {
        let locator = Arc::clone(&self.locator);
        self.join_with(locator, location, dest, from_time)
    }

    /// Joins a journal stored under another root.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if the journal directory cannot be read.
    pub fn join_with(
        &mut self,
        locator: Arc<Locator>,
        location: Arc<Location>,
        dest: u32,
        from_time: i64,
    ) -> Result<(), JournalError> {
        let duplicate = self.cursors.iter().any(|c| {
            c.location.uid == location.uid && c.dest == dest && c.locator.root() == locator.root()
        });
        if duplicate {
            debug!(location = %location.uname, dest = format_args!("{dest:08x}"), "already joined");
            return Ok(());
        }
        let join_seq = self.next_join_seq;
        self.next_join_seq = self.next_join_seq.saturating_add(1);
        debug!(location = %location.uname, dest = format_args!("{dest:08x}"), from_time, "join");
        let cursor = Cursor::new(locator, location, dest, from_time, join_seq)?;
        self.cursors.push(cursor);
        Ok(())
    }

    /// Whether the `(location_uid, dest)` journal is joined.
    #[must_use]
    pub fn is_joined(&self, location_uid: u32, dest: u32) -> bool {
        self.cursors
            .iter()
            .any(|c| c.location.uid == location_uid && c.dest == dest)
    }

    /// Stops reading every journal written by `location_uid`.
    pub fn disjoin(&mut self, location_uid: u32) {
        self.cursors.retain(|c| c.location.uid != location_uid);
    }

    /// Stops reading the `(source, dest)` journal.
    pub fn disjoin_channel(&mut self, source: u32, dest: u32) {
        self.cursors
            .retain(|c| !(c.location.uid == source && c.dest == dest));
    }

    /// Number of joined journals.
    #[must_use]
    pub fn joined_count(&self) -> usize {
        self.cursors.len()
    }

    /// Repositions every cursor at `from_time`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if a journal directory cannot be read.
    pub fn seek_to_time(&mut self, from_time: i64) -> Result<(), JournalError> {
        for cursor in &mut self.cursors {
            cursor.seek(from_time)?;
        }
        Ok(())
    }

    /// Whether any joined journal has a complete unread frame.
    pub fn data_available(&mut self) -> bool {
        self.select().is_some()
    }

    /// Index of the cursor holding the next frame in merge order.
    fn select(&mut self) -> Option<usize> {
        let mut best: Option<(usize, (i64, u64, u64))> = None;
        for (index, cursor) in self.cursors.iter_mut().enumerate() {
            if let Some(header) = cursor.peek() {
                let key = (header.gen_time, cursor.join_seq, header.frame_id);
                if best.is_none_or(|(_, best_key)| key < best_key) {
                    best = Some((index, key));
                }
            }
        }
        best.map(|(index, _)| index)
    }

    /// The next frame in merge order without consuming it.
    pub fn current_frame(&mut self) -> Option<Frame> {
        let index = self.select()?;
        self.cursors.get(index)?.frame()
    }

    /// Consumes and returns the next frame in merge order.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Frame> {
        self.next_with_origin().map(|(frame, _, _)| frame)
    }

    /// Like [`Reader::next`], also returning the journal the frame was read
    /// from as `(location, dest)`.
    pub fn next_with_origin(&mut self) -> Option<(Frame, Arc<Location>, u32)> {
        let index = self.select()?;
        let cursor = self.cursors.get_mut(index)?;
        let frame = cursor.frame()?;
        cursor.advance();
        #[cfg(feature = "metrics")]
        metrics::counter!("journalbus_frames_read").increment(1);
        Some((frame, Arc::clone(&cursor.location), cursor.dest))
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<(String, u32)> = self
            .cursors
            .iter()
            .map(|c| (c.location.uname.clone(), c.dest))
            .collect();
        f.debug_struct("Reader")
            .field("root", &self.locator.root())
            .field("joined", &joined)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::location::{Category, Mode};
    use crate::journal::writer::Writer;
    use crate::types::{Deregister, MARK_TAG, Record};

    struct Fixture {
        _dir: tempfile::TempDir,
        locator: Arc<Locator>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let locator = Arc::new(Locator::new(dir.path()));
        Fixture { _dir: dir, locator }
    }

    fn writer(fx: &Fixture, name: &str, dest: u32, page_size: usize) -> Writer {
        let location = Arc::new(Location::new(Mode::Live, Category::Strategy, "test", name));
        Writer::open(Arc::clone(&fx.locator), location, dest, page_size).expect("writer")
    }

    #[test]
    fn test_empty_reader_has_no_data() {
        let fx = fixture();
        let mut reader = Reader::new(Arc::clone(&fx.locator));
        assert!(!reader.data_available());
        assert!(reader.next().is_none());

        let ghost = Arc::new(Location::new(Mode::Live, Category::Md, "none", "ghost"));
        assert!(reader.join(ghost, 0, 0).is_ok());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_seek_from_time_skips_older_frames() {
        let fx = fixture();
        let mut w = writer(&fx, "w", 7, 4096);
        for t in [100, 200, 300] {
            assert!(w.write_at(t, t, &Deregister { location_uid: t as u32 }).is_ok());
        }
        let mut reader = Reader::new(Arc::clone(&fx.locator));
        assert!(reader.join(Arc::clone(w.location()), 7, 150).is_ok());

        let first = reader.next();
        let second = reader.next();
        assert_eq!(first.as_ref().map(Frame::trigger_time), Some(200));
        assert_eq!(second.as_ref().map(Frame::trigger_time), Some(300));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_merge_orders_by_gen_time_then_join_order() {
        let fx = fixture();
        let mut a = writer(&fx, "a", 0, 4096);
        let mut b = writer(&fx, "b", 0, 4096);
        assert!(a.mark_at(10, 0, MARK_TAG).is_ok());
        assert!(b.mark_at(5, 0, MARK_TAG).is_ok());
        assert!(b.mark_at(10, 0, MARK_TAG).is_ok());
        assert!(a.mark_at(20, 0, MARK_TAG).is_ok());

        let mut reader = Reader::new(Arc::clone(&fx.locator));
        assert!(reader.join(Arc::clone(a.location()), 0, 0).is_ok());
        assert!(reader.join(Arc::clone(b.location()), 0, 0).is_ok());

        let order: Vec<(i64, u32)> = std::iter::from_fn(|| reader.next())
            .map(|f| (f.gen_time(), f.source()))
            .collect();
        let ua = a.location().uid;
        let ub = b.location().uid;
        assert_eq!(order, vec![(5, ub), (10, ua), (10, ub), (20, ua)]);
    }

    #[test]
    fn test_live_append_becomes_visible() {
        let fx = fixture();
        let mut w = writer(&fx, "live", 0, 4096);
        let mut reader = Reader::new(Arc::clone(&fx.locator));
        assert!(reader.join(Arc::clone(w.location()), 0, 0).is_ok());
        assert!(reader.next().is_none());

        assert!(w.write(1, &Deregister { location_uid: 9 }).is_ok());
        let frame = reader.next().expect("frame");
        assert!(frame.is::<Deregister>());
        assert_eq!(frame.data::<Deregister>().ok(), Some(Deregister { location_uid: 9 }));
        assert_eq!(frame.msg_type(), Deregister::TAG);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_reads_across_page_rotation() {
        let fx = fixture();
        let mut w = writer(&fx, "rot", 0, 1024);
        for i in 0..100u32 {
            assert!(w.write_at(i64::from(i), 0, &Deregister { location_uid: i }).is_ok());
        }
        assert!(w.current_page_id() > FIRST_PAGE_ID);

        let mut reader = Reader::new(Arc::clone(&fx.locator));
        assert!(reader.join(Arc::clone(w.location()), 0, 0).is_ok());
        let uids: Vec<u32> = std::iter::from_fn(|| reader.next())
            .filter_map(|f| f.data::<Deregister>().ok())
            .map(|d| d.location_uid)
            .collect();
        assert_eq!(uids, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_disjoin_excludes_future_frames() {
        let fx = fixture();
        let mut a = writer(&fx, "a", 0, 4096);
        let mut b = writer(&fx, "b", 0, 4096);
        let mut reader = Reader::new(Arc::clone(&fx.locator));
        assert!(reader.join(Arc::clone(a.location()), 0, 0).is_ok());
        assert!(reader.join(Arc::clone(b.location()), 0, 0).is_ok());
        assert!(reader.join(Arc::clone(b.location()), 0, 0).is_ok());
        assert_eq!(reader.joined_count(), 2);

        assert!(a.mark_at(1, 0, MARK_TAG).is_ok());
        assert!(b.mark_at(2, 0, MARK_TAG).is_ok());
        assert_eq!(reader.next().map(|f| f.gen_time()), Some(1));
        reader.disjoin(b.location().uid);
        assert!(reader.next().is_none());
        assert!(!reader.is_joined(b.location().uid, 0));

        reader.disjoin_channel(a.location().uid, 0);
        assert_eq!(reader.joined_count(), 0);
    }

    #[test]
    fn test_seek_to_time_rewinds() {
        let fx = fixture();
        let mut w = writer(&fx, "seek", 0, 4096);
        for t in [10, 20, 30] {
            assert!(w.mark_at(t, t, MARK_TAG).is_ok());
        }
        let mut reader = Reader::new(Arc::clone(&fx.locator));
        assert!(reader.join(Arc::clone(w.location()), 0, 0).is_ok());
        while reader.next().is_some() {}
        assert!(reader.seek_to_time(20).is_ok());
        assert_eq!(reader.current_frame().map(|f| f.gen_time()), Some(20));
        assert_eq!(reader.next().map(|f| f.gen_time()), Some(20));
        assert_eq!(reader.next().map(|f| f.gen_time()), Some(30));
    }
}
