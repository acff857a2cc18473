//! Per-process state shared by every handler of one event loop.

use crate::config::BusConfig;
use crate::error::BusError;
use crate::journal::{Location, LocationRegistry, Locator, PUBLIC_DEST, Reader, Writer};
use crate::notify::Publisher;
use crate::types::TypeRegistry;
use crate::utils::now_in_nano;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Everything one process owns: its home location, the location table,
/// its reader and its writers keyed by dest uid.
///
/// Handlers borrow it mutably from the event loop; nothing in it is shared
/// across threads.
pub struct ProcessContext {
    config: BusConfig,
    locator: Arc<Locator>,
    home: Arc<Location>,
    master_uid: u32,
    cached_uid: u32,
    locations: LocationRegistry,
    reader: Reader,
    writers: HashMap<u32, Writer>,
    channels: BTreeSet<(u32, u32)>,
    publisher: Option<Arc<dyn Publisher>>,
    now: i64,
    trading_day: Option<i64>,
    registered: bool,
    cached_ready: bool,
}

impl ProcessContext {
    /// Creates the context of `home`.
    ///
    /// The home, master and cache daemon locations of the home's mode are
    /// registered up front.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] for an invalid configuration, or
    /// [`BusError::Journal`] on a uid collision among the system locations.
    pub fn new(locator: Arc<Locator>, home: Location, config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;
        let mode = home.mode;
        let mut locations = LocationRegistry::new();
        let master = locations.register(Location::master(mode))?;
        let cached = locations.register(Location::cached(mode))?;
        let home = locations.register(home)?;
        Ok(Self {
            config,
            reader: Reader::new(Arc::clone(&locator)),
            locator,
            home,
            master_uid: master.uid,
            cached_uid: cached.uid,
            locations,
            writers: HashMap::new(),
            channels: BTreeSet::new(),
            publisher: None,
            now: now_in_nano(),
            trading_day: None,
            registered: false,
            cached_ready: false,
        })
    }

    /// Attaches `publisher` to every writer opened from now on.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn locator(&self) -> &Arc<Locator> {
        &self.locator
    }

    pub fn home(&self) -> &Arc<Location> {
        &self.home
    }

    pub fn home_uid(&self) -> u32 {
        self.home.uid
    }

    /// Uid of the master of the home's mode.
    pub fn master_uid(&self) -> u32 {
        self.master_uid
    }

    /// Uid of the cache daemon of the home's mode.
    pub fn cached_uid(&self) -> u32 {
        self.cached_uid
    }

    pub fn registry(&self) -> &'static TypeRegistry {
        TypeRegistry::global()
    }

    // ─── Locations ──────────────────────────────────────────────────────────

    pub fn locations(&self) -> &LocationRegistry {
        &self.locations
    }

    /// Registers `location`, returning the shared instance.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Journal`] on a uid collision.
    pub fn add_location(&mut self, location: Location) -> Result<Arc<Location>, BusError> {
        Ok(self.locations.register(location)?)
    }

    /// Looks up a location by uid.
    pub fn location(&self, uid: u32) -> Option<Arc<Location>> {
        self.locations.get(uid).cloned()
    }

    // ─── Reading ────────────────────────────────────────────────────────────

    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut Reader {
        &mut self.reader
    }

    /// Joins the journal `uid` writes for `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownLocation`] if `uid` is not registered, or
    /// [`BusError::Journal`] if the journal cannot be listed.
    pub fn join(&mut self, uid: u32, dest: u32, from_time: i64) -> Result<(), BusError> {
        let location = self.location(uid).ok_or(BusError::UnknownLocation { uid })?;
        self.reader.join(location, dest, from_time)?;
        Ok(())
    }

    // ─── Writing ────────────────────────────────────────────────────────────

    /// Whether writing to `dest` needs no channel: the public journal, the
    /// system locations, or any dest when home is a system location.
    pub fn is_trusted_dest(&self, dest: u32) -> bool {
        dest == PUBLIC_DEST
            || dest == self.master_uid
            || dest == self.cached_uid
            || self.home.is_system()
    }

    /// Whether a writer to `dest` is open or may be opened.
    pub fn may_write(&self, dest: u32) -> bool {
        self.writers.contains_key(&dest) || self.is_trusted_dest(dest)
    }

    pub fn has_writer(&self, dest: u32) -> bool {
        self.writers.contains_key(&dest)
    }

    /// Dests with an open writer.
    pub fn writer_dests(&self) -> impl Iterator<Item = u32> + '_ {
        self.writers.keys().copied()
    }

    /// Opens the writer to `dest` without checking authorization.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Journal`] if the journal cannot be mapped.
    pub fn open_writer(&mut self, dest: u32) -> Result<&mut Writer, BusError> {
        match self.writers.entry(dest) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let mut writer = Writer::open(
                    Arc::clone(&self.locator),
                    Arc::clone(&self.home),
                    dest,
                    self.config.page_size,
                )?;
                if self.config.should_notify()
                    && let Some(publisher) = &self.publisher
                {
                    writer = writer.with_publisher(Arc::clone(publisher));
                }
                debug!(home = %self.home.uname, dest = format_args!("{dest:08x}"), "writer ready");
                Ok(entry.insert(writer))
            }
        }
    }

    /// The writer to `dest`, opened on demand for trusted dests.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ChannelNotAuthorized`] if no channel to `dest`
    /// has been authorized, or [`BusError::Journal`] if the journal cannot
    /// be mapped.
    pub fn writer(&mut self, dest: u32) -> Result<&mut Writer, BusError> {
        if !self.may_write(dest) {
            return Err(BusError::ChannelNotAuthorized {
                source_uid: self.home.uid,
                dest_uid: dest,
            });
        }
        self.open_writer(dest)
    }

    /// Drops the writer to `dest`. Returns whether one was open.
    pub fn close_writer(&mut self, dest: u32) -> bool {
        self.writers.remove(&dest).is_some()
    }

    // ─── Channels ───────────────────────────────────────────────────────────

    /// Records an authorized channel.
    pub fn add_channel(&mut self, source: u32, dest: u32) -> bool {
        self.channels.insert((source, dest))
    }

    pub fn has_channel(&self, source: u32, dest: u32) -> bool {
        self.channels.contains(&(source, dest))
    }

    /// Forgets every channel with `uid` at either end.
    pub fn remove_channels_of(&mut self, uid: u32) -> usize {
        let before = self.channels.len();
        self.channels.retain(|&(source, dest)| source != uid && dest != uid);
        before - self.channels.len()
    }

    // ─── Clock and session flags ────────────────────────────────────────────

    /// Time of the current loop step.
    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn set_now(&mut self, now: i64) {
        self.now = now;
    }

    pub fn trading_day(&self) -> Option<i64> {
        self.trading_day
    }

    pub fn set_trading_day(&mut self, timestamp: i64) {
        self.trading_day = Some(timestamp);
    }

    /// Whether the master has acknowledged this process's registration.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    /// Whether the cache daemon finished replaying to this process.
    pub fn is_cached_ready(&self) -> bool {
        self.cached_ready
    }

    pub fn set_cached_ready(&mut self, ready: bool) {
        self.cached_ready = ready;
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("home", &self.home.uname)
            .field("locations", &self.locations.len())
            .field("joined", &self.reader.joined_count())
            .field("writers", &self.writers.len())
            .field("registered", &self.registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{Category, Mode};

    fn context(home: Location) -> (tempfile::TempDir, ProcessContext) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = BusConfig::default().with_page_size(64 * 1024);
        let ctx = ProcessContext::new(Arc::new(Locator::new(dir.path())), home, config).expect("context");
        (dir, ctx)
    }

    #[test]
    fn test_strategy_needs_channel_for_peer_writes() {
        let (_dir, mut ctx) = context(Location::new(Mode::Live, Category::Strategy, "demo", "alpha"));
        let peer = Location::new(Mode::Live, Category::Td, "sim", "acct");
        let peer_uid = peer.uid;
        assert!(ctx.add_location(peer).is_ok());

        assert!(!ctx.may_write(peer_uid));
        assert!(matches!(
            ctx.writer(peer_uid),
            Err(BusError::ChannelNotAuthorized { .. })
        ));
        assert!(ctx.may_write(PUBLIC_DEST));
        let master = ctx.master_uid();
        assert!(ctx.writer(master).is_ok());

        assert!(ctx.open_writer(peer_uid).is_ok());
        assert!(ctx.writer(peer_uid).is_ok());
        assert!(ctx.close_writer(peer_uid));
        assert!(!ctx.has_writer(peer_uid));
    }

    #[test]
    fn test_system_home_is_trusted() {
        let (_dir, ctx) = context(Location::cached(Mode::Live));
        assert!(ctx.may_write(0x1234_5678));
        assert_eq!(ctx.home_uid(), ctx.cached_uid());
        assert_eq!(ctx.locations().len(), 2);
    }

    #[test]
    fn test_join_requires_known_location() {
        let (_dir, mut ctx) = context(Location::new(Mode::Live, Category::Md, "sim", "feed"));
        assert!(matches!(ctx.join(42, PUBLIC_DEST, 0), Err(BusError::UnknownLocation { uid: 42 })));
        let master = ctx.master_uid();
        assert!(ctx.join(master, PUBLIC_DEST, 0).is_ok());
        assert_eq!(ctx.reader().joined_count(), 1);
    }

    #[test]
    fn test_channel_bookkeeping() {
        let (_dir, mut ctx) = context(Location::new(Mode::Live, Category::Strategy, "demo", "beta"));
        assert!(ctx.add_channel(1, 2));
        assert!(!ctx.add_channel(1, 2));
        assert!(ctx.add_channel(3, 1));
        assert!(ctx.add_channel(3, 4));
        assert_eq!(ctx.remove_channels_of(1), 2);
        assert!(ctx.has_channel(3, 4));
    }
}
