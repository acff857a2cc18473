//! Actor identities.
//!
//! A [`Location`] names one actor by `(mode, category, group, name)`. Its
//! `uname` is the stable string `category/group/name/mode` and its `uid`
//! is a 32-bit hash of that string. Every other component refers to
//! locations by uid and resolves them through a [`LocationRegistry`].

use super::error::JournalError;
use crate::utils::hash_str_32;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Destination uid of the public journal every reader may join.
pub const PUBLIC_DEST: u32 = 0;

/// Execution mode of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Live trading.
    Live,
    /// Data collection.
    Data,
    /// Replay of recorded journals.
    Replay,
    /// Backtesting.
    Backtest,
}

/// Functional category of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Market-data gateway.
    Md,
    /// Trading gateway.
    Td,
    /// Strategy.
    Strategy,
    /// System service (master, cache daemon, ...).
    System,
}

impl Mode {
    /// All modes, in declaration order.
    pub const ALL: [Mode; 4] = [Mode::Live, Mode::Data, Mode::Replay, Mode::Backtest];

    /// Lowercase name used in paths and unames.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Data => "data",
            Mode::Replay => "replay",
            Mode::Backtest => "backtest",
        }
    }
}

impl Category {
    /// All categories, in declaration order.
    pub const ALL: [Category; 4] = [
        Category::Md,
        Category::Td,
        Category::Strategy,
        Category::System,
    ];

    /// Lowercase name used in paths and unames.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Md => "md",
            Category::Td => "td",
            Category::Strategy => "strategy",
            Category::System => "system",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown mode '{s}'"))
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

/// Identity of one actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Execution mode.
    pub mode: Mode,
    /// Functional category.
    pub category: Category,
    /// Group, e.g. the broker or account family.
    pub group: String,
    /// Name within the group.
    pub name: String,
    /// `category/group/name/mode`.
    pub uname: String,
    /// 32-bit hash of `uname`.
    pub uid: u32,
}

impl Location {
    /// Creates a location and derives its uname and uid.
    pub fn new(mode: Mode, category: Category, group: &str, name: &str) -> Self {
        let uname = format!("{category}/{group}/{name}/{mode}");
        let uid = hash_str_32(&uname);
        Self {
            mode,
            category,
            group: group.to_string(),
            name: name.to_string(),
            uname,
            uid,
        }
    }

    /// The master coordinator for `mode`.
    #[must_use]
    pub fn master(mode: Mode) -> Self {
        Self::new(mode, Category::System, "master", "master")
    }

    /// The cache daemon for `mode`.
    #[must_use]
    pub fn cached(mode: Mode) -> Self {
        Self::new(mode, Category::System, "service", "cached")
    }

    /// Whether this is a system-category location.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.category == Category::System
    }

    /// Whether `uname` and `uid` agree with the other fields.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let expected = Location::new(self.mode, self.category, &self.group, &self.name);
        expected.uname == self.uname && expected.uid == self.uid
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uname)
    }
}

/// Lookup table from uid to shared location.
///
/// Registration checks for uid collisions between distinct unames.
#[derive(Debug, Default, Clone)]
pub struct LocationRegistry {
    locations: HashMap<u32, Arc<Location>>,
}

impl LocationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `location`, returning the shared handle.
    ///
    /// Registering the same uname twice returns the existing handle.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::UidCollision`] if a different uname already
    /// owns the same uid.
    pub fn register(&mut self, location: Location) -> Result<Arc<Location>, JournalError> {
        if let Some(existing) = self.locations.get(&location.uid) {
            if existing.uname != location.uname {
                return Err(JournalError::UidCollision {
                    uid: location.uid,
                    existing: existing.uname.clone(),
                    incoming: location.uname,
                });
            }
            return Ok(Arc::clone(existing));
        }
        let shared = Arc::new(location);
        self.locations.insert(shared.uid, Arc::clone(&shared));
        Ok(shared)
    }

    /// Looks up a location by uid.
    #[must_use]
    pub fn get(&self, uid: u32) -> Option<&Arc<Location>> {
        self.locations.get(&uid)
    }

    /// Whether `uid` is known.
    #[must_use]
    pub fn contains(&self, uid: u32) -> bool {
        self.locations.contains_key(&uid)
    }

    /// Readable name for logs; falls back to the hex uid.
    #[must_use]
    pub fn uname_of(&self, uid: u32) -> String {
        self.locations
            .get(&uid)
            .map_or_else(|| format!("{uid:08x}"), |l| l.uname.clone())
    }

    /// Removes a location.
    pub fn remove(&mut self, uid: u32) -> Option<Arc<Location>> {
        self.locations.remove(&uid)
    }

    /// Number of known locations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Iterates over all locations in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Location>> {
        self.locations.values()
    }
}
