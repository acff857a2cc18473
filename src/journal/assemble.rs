//! Offline, time-bounded merge over many journals.
//!
//! An [`Assemble`] is a lazy, finite iterator of frames in generation-time
//! order. It is built either from location patterns over one or more roots
//! ([`Assemble::matching`]) or from an explicit location and
//! [`AssembleMode`] ([`Assemble::for_location`]). Assembles compose:
//! `a + b` merges both by generation time and `a.then(b)` yields all of `a`
//! before any of `b`. [`Assemble::restart`] rewinds to the beginning.
//!
//! ```rust,no_run
//! use journalbus::journal::{Assemble, Locator, Mode};
//! use std::sync::Arc;
//!
//! let locator = Arc::new(Locator::new("/var/journals"));
//! let mut assemble = Assemble::matching(&[locator], Mode::Live, "md", "*", "*")?;
//! let headers = assemble.read_headers();
//! # Ok::<(), journalbus::journal::JournalError>(())
//! ```

use super::error::JournalError;
use super::frame::{Frame, FrameHeader};
use super::location::{Location, Mode};
use super::locator::{Locator, WILDCARD};
use super::reader::Reader;
use super::writer::Writer;
use crate::types::Record;
use std::collections::HashMap;
use std::ops::Add;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which journals of a location an explicit assemble reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssembleMode {
    /// Only the `(location, dest)` journal.
    Channel,
    /// Every journal the location writes.
    Write,
    /// Every journal other locations write to the location.
    Read,
    /// Both [`AssembleMode::Write`] and [`AssembleMode::Read`].
    All,
}

/// One journal to read.
#[derive(Debug, Clone)]
struct Source {
    locator: Arc<Locator>,
    location: Arc<Location>,
    dest: u32,
    from_time: i64,
}

/// Sources merged through one reader.
struct Leaf {
    sources: Vec<Source>,
    end_time: Option<i64>,
    reader: Option<Reader>,
    exhausted: bool,
}

impl Leaf {
    fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            end_time: None,
            reader: None,
            exhausted: false,
        }
    }

    fn build_reader(&self) -> Option<Reader> {
        let first = self.sources.first()?;
        let mut reader = Reader::new(Arc::clone(&first.locator));
        for source in &self.sources {
            if let Err(e) = reader.join_with(
                Arc::clone(&source.locator),
                Arc::clone(&source.location),
                source.dest,
                source.from_time,
            ) {
                warn!(location = %source.location.uname, dest = source.dest, error = %e, "assemble skipped journal");
            }
        }
        Some(reader)
    }

    fn next(&mut self) -> Option<Assembled> {
        if self.exhausted {
            return None;
        }
        if self.reader.is_none() {
            self.reader = self.build_reader();
        }
        let next = self.reader.as_mut().and_then(Reader::next_with_origin);
        match next {
            Some((frame, _, _)) if self.end_time.is_some_and(|end| frame.gen_time() > end) => {
                self.exhausted = true;
                None
            }
            Some((frame, location, dest)) => Some(Assembled {
                frame,
                location,
                dest,
            }),
            None => {
                self.exhausted = true;
                None
            }
        }
    }

    fn restart(&mut self) {
        self.reader = None;
        self.exhausted = false;
    }
}

enum Node {
    Leaf(Leaf),
    /// Children merged by generation time; each keeps one buffered frame.
    Union(Vec<(Assemble, Option<Assembled>)>),
    /// Children read one after another.
    Chain(Vec<Assemble>, usize),
}

/// A frame together with the journal it was read from.
#[derive(Debug, Clone)]
pub struct Assembled {
    /// The frame.
    pub frame: Frame,
    /// Location owning the journal.
    pub location: Arc<Location>,
    /// Destination of the journal.
    pub dest: u32,
}

/// Lazy, restartable, time-ordered merge of journals.
pub struct Assemble {
    node: Node,
}

impl Assemble {
    /// Journals of every location matching the patterns under any of
    /// `locators`. Each pattern is an exact value or `"*"`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if a root cannot be scanned.
    pub fn matching(
        locators: &[Arc<Locator>],
        mode: Mode,
        category: &str,
        group: &str,
        name: &str,
    ) -> Result<Self, JournalError> {
        let mut sources = Vec::new();
        for locator in locators {
            for location in locator.list_locations(category, group, name, mode.as_str())? {
                let location = Arc::new(location);
                for dest in locator.list_location_dest(&location)? {
                    sources.push(Source {
                        locator: Arc::clone(locator),
                        location: Arc::clone(&location),
                        dest,
                        from_time: 0,
                    });
                }
            }
        }
        debug!(journals = sources.len(), category, group, name, "assemble matched");
        Ok(Self::from_sources(sources))
    }

    /// Journals related to `location` selected by `mode`, from `from_time`.
    ///
    /// `dest` is only used by [`AssembleMode::Channel`].
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if the root cannot be scanned.
    pub fn for_location(
        locator: &Arc<Locator>,
        location: &Arc<Location>,
        dest: u32,
        mode: AssembleMode,
        from_time: i64,
    ) -> Result<Self, JournalError> {
        let source = |loc: &Arc<Location>, dest: u32| Source {
            locator: Arc::clone(locator),
            location: Arc::clone(loc),
            dest,
            from_time,
        };
        let mut sources = Vec::new();
        if mode == AssembleMode::Channel {
            sources.push(source(location, dest));
        }
        if matches!(mode, AssembleMode::Write | AssembleMode::All) {
            for d in locator.list_location_dest(location)? {
                sources.push(source(location, d));
            }
        }
        if matches!(mode, AssembleMode::Read | AssembleMode::All) {
            let mode_name = location.mode.as_str();
            for other in locator.list_locations(WILDCARD, WILDCARD, WILDCARD, mode_name)? {
                if other.uid == location.uid {
                    continue;
                }
                if locator.list_location_dest(&other)?.contains(&location.uid) {
                    sources.push(source(&Arc::new(other), location.uid));
                }
            }
        }
        Ok(Self::from_sources(sources))
    }

    fn from_sources(sources: Vec<Source>) -> Self {
        Self {
            node: Node::Leaf(Leaf::new(sources)),
        }
    }

    /// Stops after the last frame with `gen_time <= end_time`.
    #[must_use]
    pub fn with_end_time(mut self, end_time: i64) -> Self {
        self.set_end_time(end_time);
        self
    }

    fn set_end_time(&mut self, end_time: i64) {
        match &mut self.node {
            Node::Leaf(leaf) => leaf.end_time = Some(end_time),
            Node::Union(children) => {
                for (child, _) in children {
                    child.set_end_time(end_time);
                }
            }
            Node::Chain(children, _) => {
                for child in children {
                    child.set_end_time(end_time);
                }
            }
        }
    }

    /// Yields every frame of `self`, then every frame of `next`.
    #[must_use]
    pub fn then(self, next: Assemble) -> Self {
        Self {
            node: Node::Chain(vec![self, next], 0),
        }
    }

    /// Rewinds to the first frame.
    pub fn restart(&mut self) {
        match &mut self.node {
            Node::Leaf(leaf) => leaf.restart(),
            Node::Union(children) => {
                for (child, head) in children {
                    child.restart();
                    *head = None;
                }
            }
            Node::Chain(children, current) => {
                for child in children.iter_mut() {
                    child.restart();
                }
                *current = 0;
            }
        }
    }

    /// Next frame with its origin journal.
    pub fn next_assembled(&mut self) -> Option<Assembled> {
        match &mut self.node {
            Node::Leaf(leaf) => leaf.next(),
            Node::Union(children) => {
                let mut best: Option<(usize, i64)> = None;
                for (index, (child, head)) in children.iter_mut().enumerate() {
                    if head.is_none() {
                        *head = child.next_assembled();
                    }
                    if let Some(item) = head
                        && best.is_none_or(|(_, t)| item.frame.gen_time() < t)
                    {
                        best = Some((index, item.frame.gen_time()));
                    }
                }
                let (index, _) = best?;
                children.get_mut(index).and_then(|(_, head)| head.take())
            }
            Node::Chain(children, current) => {
                while let Some(child) = children.get_mut(*current) {
                    if let Some(item) = child.next_assembled() {
                        return Some(item);
                    }
                    *current = current.saturating_add(1);
                }
                None
            }
        }
    }

    /// Headers of every remaining frame.
    pub fn read_headers(&mut self) -> Vec<FrameHeader> {
        self.map(|frame| *frame.header()).collect()
    }

    /// Every remaining frame with its payload.
    pub fn read_bytes(&mut self) -> Vec<Frame> {
        self.collect()
    }

    /// Every remaining frame of type `R`, decoded.
    ///
    /// Frames of other types are skipped; undecodable frames are logged and
    /// skipped.
    pub fn read_all<R: Record>(&mut self) -> Vec<(FrameHeader, R)> {
        let mut records = Vec::new();
        for frame in self.by_ref() {
            if !frame.is::<R>() {
                continue;
            }
            match frame.data::<R>() {
                Ok(record) => records.push((*frame.header(), record)),
                Err(e) => warn!(frame_id = frame.frame_id(), error = %e, "skipping undecodable frame"),
            }
        }
        records
    }

    /// Feeds every remaining frame to `sink`, returning how many it took.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the sink.
    pub fn drain_into(&mut self, sink: &mut dyn Sink) -> Result<usize, JournalError> {
        let mut count = 0usize;
        while let Some(item) = self.next_assembled() {
            sink.put(&item)?;
            count = count.saturating_add(1);
        }
        Ok(count)
    }
}

impl Iterator for Assemble {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.next_assembled().map(|item| item.frame)
    }
}

impl Add for Assemble {
    type Output = Assemble;

    /// Merges two assembles by generation time.
    fn add(self, other: Assemble) -> Assemble {
        match (self.node, other.node) {
            (Node::Leaf(mut a), Node::Leaf(b)) if a.end_time == b.end_time => {
                a.sources.extend(b.sources);
                a.restart();
                Assemble { node: Node::Leaf(a) }
            }
            (a, b) => Assemble {
                node: Node::Union(vec![(Assemble { node: a }, None), (Assemble { node: b }, None)]),
            },
        }
    }
}

impl std::fmt::Debug for Assemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Node::Leaf(leaf) => f
                .debug_struct("Assemble")
                .field("journals", &leaf.sources.len())
                .field("end_time", &leaf.end_time)
                .finish(),
            Node::Union(children) => f.debug_tuple("Union").field(&children.len()).finish(),
            Node::Chain(children, current) => f
                .debug_struct("Chain")
                .field("parts", &children.len())
                .field("current", current)
                .finish(),
        }
    }
}

// ─── Sinks ──────────────────────────────────────────────────────────────────

/// Destination of [`Assemble::drain_into`].
pub trait Sink {
    /// Accepts one frame.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the frame cannot be stored.
    fn put(&mut self, item: &Assembled) -> Result<(), JournalError>;
}

/// Discards frames, counting them.
#[derive(Debug, Default)]
pub struct NullSink {
    count: usize,
}

impl NullSink {
    /// Frames received so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }
}

impl Sink for NullSink {
    fn put(&mut self, _item: &Assembled) -> Result<(), JournalError> {
        self.count = self.count.saturating_add(1);
        Ok(())
    }
}

/// Copies frames into the same `(location, dest)` journal under another
/// root, preserving every header field except the frame id.
pub struct CopySink {
    locator: Arc<Locator>,
    page_size: usize,
    writers: HashMap<(u32, u32), Writer>,
}

impl CopySink {
    /// Creates a sink writing below `locator`.
    pub fn new(locator: Arc<Locator>, page_size: usize) -> Self {
        Self {
            locator,
            page_size,
            writers: HashMap::new(),
        }
    }

    /// Number of journals written so far.
    #[must_use]
    pub fn journal_count(&self) -> usize {
        self.writers.len()
    }
}

impl Sink for CopySink {
    fn put(&mut self, item: &Assembled) -> Result<(), JournalError> {
        let key = (item.location.uid, item.dest);
        if !self.writers.contains_key(&key) {
            let writer = Writer::open(
                Arc::clone(&self.locator),
                Arc::clone(&item.location),
                item.dest,
                self.page_size,
            )?;
            self.writers.insert(key, writer);
        }
        match self.writers.get_mut(&key) {
            Some(writer) => writer.copy_frame(&item.frame).map(|_| ()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for CopySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopySink")
            .field("root", &self.locator.root())
            .field("journals", &self.writers.len())
            .finish()
    }
}
