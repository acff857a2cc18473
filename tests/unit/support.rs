//! Shared fixtures: one master, an optional cache daemon and any number of
//! plain apprentices stepped round-robin in the test thread.

use journalbus::cache::CacheD;
use journalbus::journal::{Category, Frame, Location, Locator, Mode, Reader};
use journalbus::practice::{Apprentice, Master};
use journalbus::{BusConfig, Writer};
use std::sync::Arc;

pub const PAGE_SIZE: usize = 64 * 1024;

pub struct Bus {
    pub _dir: tempfile::TempDir,
    pub locator: Arc<Locator>,
    pub config: BusConfig,
    pub master: Master,
}

impl Bus {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let locator = Arc::new(Locator::new(dir.path()));
        // Tick on every step so the master discovers journals immediately.
        let config = BusConfig::default()
            .with_page_size(PAGE_SIZE)
            .with_interval_ns(1)
            .with_store_volume(16);
        let master = Master::new(Arc::clone(&locator), Mode::Live, config.clone()).expect("master");
        Self {
            _dir: dir,
            locator,
            config,
            master,
        }
    }

    pub fn apprentice(&self, category: Category, name: &str) -> Apprentice<()> {
        let location = Location::new(Mode::Live, category, "test", name);
        let mut app = Apprentice::new(Arc::clone(&self.locator), location, self.config.clone(), ())
            .expect("apprentice");
        app.start().expect("start");
        app
    }

    pub fn cached(&self) -> Apprentice<CacheD> {
        let mut cached =
            CacheD::open(Arc::clone(&self.locator), Mode::Live, self.config.clone()).expect("cached");
        cached.start().expect("start cached");
        cached
    }

    /// Steps every process `rounds` times.
    pub fn settle(
        &mut self,
        mut cached: Option<&mut Apprentice<CacheD>>,
        apps: &mut [&mut Apprentice<()>],
        rounds: usize,
    ) {
        for _ in 0..rounds {
            self.master.step();
            if let Some(cached) = cached.as_deref_mut() {
                cached.step();
            }
            for app in apps.iter_mut() {
                app.step();
            }
        }
    }

    /// Every frame of the `(location, dest)` journal, from the start.
    pub fn frames(&self, location: &Location, dest: u32) -> Vec<Frame> {
        let mut reader = Reader::new(Arc::clone(&self.locator));
        reader
            .join(Arc::new(location.clone()), dest, 0)
            .expect("join");
        std::iter::from_fn(|| reader.next()).collect()
    }

    pub fn master_location(&self) -> Location {
        Location::master(Mode::Live)
    }
}

pub fn writer(locator: &Arc<Locator>, name: &str, dest: u32, page_size: usize) -> Writer {
    let location = Arc::new(Location::new(Mode::Live, Category::Strategy, "test", name));
    Writer::open(Arc::clone(locator), location, dest, page_size).expect("writer")
}
