//! Filesystem layout of journals, profiles and logs.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<category>/<group>/<name>/<layout>/<mode>/<file>
//! ```
//!
//! Journal pages live in the `journal` layout and are named
//! `{dest:08x}.{page_id}.journal`.

use super::error::{JournalError, io_error};
use super::location::{Category, Location, Mode};
use super::page;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Wildcard accepted by [`Locator::list_locations`].
pub const WILDCARD: &str = "*";

/// Kind of file a location owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Journal pages.
    Journal,
    /// Profile store files.
    Profile,
    /// Log files.
    Log,
    /// Index files.
    Index,
}

impl Layout {
    /// Directory name of the layout.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Journal => "journal",
            Layout::Profile => "profile",
            Layout::Log => "log",
            Layout::Index => "index",
        }
    }

    /// File extension of the layout.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Layout::Journal => "journal",
            Layout::Profile => "json",
            Layout::Log => "log",
            Layout::Index => "idx",
        }
    }
}

/// Maps locations to paths below one root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    root: PathBuf,
}

impl Locator {
    /// Creates a locator rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Creates a locator from `JOURNALBUS_HOME`, falling back to `fallback`.
    pub fn from_env<P: AsRef<Path>>(fallback: P) -> Self {
        Self::new(crate::config::resolve_home(fallback.as_ref()))
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `layout` files for `location`.
    #[must_use]
    pub fn layout_dir(&self, location: &Location, layout: Layout) -> PathBuf {
        self.root
            .join(location.category.as_str())
            .join(&location.group)
            .join(&location.name)
            .join(layout.as_str())
            .join(location.mode.as_str())
    }

    /// Path of file `name` in the `layout` directory of `location`.
    #[must_use]
    pub fn layout_file(&self, location: &Location, layout: Layout, name: &str) -> PathBuf {
        self.layout_dir(location, layout)
            .join(format!("{name}.{}", layout.extension()))
    }

    /// Creates the `layout` directory of `location` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if the directory cannot be created.
    pub fn ensure_dir(&self, location: &Location, layout: Layout) -> Result<PathBuf, JournalError> {
        let dir = self.layout_dir(location, layout);
        fs::create_dir_all(&dir).map_err(|e| io_error(e, &dir))?;
        Ok(dir)
    }

    /// Path of one journal page.
    #[must_use]
    pub fn page_path(&self, location: &Location, dest: u32, page_id: u32) -> PathBuf {
        page::page_path(&self.layout_dir(location, Layout::Journal), dest, page_id)
    }

    /// Sorted page ids of the `(location, dest)` journal.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if the journal directory exists but
    /// cannot be read.
    pub fn list_page_ids(&self, location: &Location, dest: u32) -> Result<Vec<u32>, JournalError> {
        page::list_page_ids(&self.layout_dir(location, Layout::Journal), dest)
    }

    /// Sorted, deduplicated journal dests written by `location`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if the journal directory exists but
    /// cannot be read.
    pub fn list_location_dest(&self, location: &Location) -> Result<Vec<u32>, JournalError> {
        let dir = self.layout_dir(location, Layout::Journal);
        let mut dests: Vec<u32> = page::list_page_files(&dir)?
            .into_iter()
            .map(|(dest, _)| dest)
            .collect();
        dests.sort_unstable();
        dests.dedup();
        Ok(dests)
    }

    /// Locations with a journal directory matching the given patterns.
    ///
    /// Each of `category`, `group`, `name` and `mode` is either an exact
    /// value or [`WILDCARD`]. Unknown category or mode directories are
    /// ignored. Results are sorted by uname.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if a directory cannot be read.
    pub fn list_locations(
        &self,
        category: &str,
        group: &str,
        name: &str,
        mode: &str,
    ) -> Result<Vec<Location>, JournalError> {
        let mut found = Vec::new();
        for category_name in list_dir_names(&self.root)? {
            let Ok(parsed_category) = category_name.parse::<Category>() else {
                continue;
            };
            if !matches_pattern(category, &category_name) {
                continue;
            }
            let category_dir = self.root.join(&category_name);
            for group_name in list_dir_names(&category_dir)? {
                if !matches_pattern(group, &group_name) {
                    continue;
                }
                let group_dir = category_dir.join(&group_name);
                for location_name in list_dir_names(&group_dir)? {
                    if !matches_pattern(name, &location_name) {
                        continue;
                    }
                    let journal_dir = group_dir
                        .join(&location_name)
                        .join(Layout::Journal.as_str());
                    for mode_name in list_dir_names(&journal_dir)? {
                        if !matches_pattern(mode, &mode_name) {
                            continue;
                        }
                        if let Ok(parsed_mode) = mode_name.parse::<Mode>() {
                            found.push(Location::new(
                                parsed_mode,
                                parsed_category,
                                &group_name,
                                &location_name,
                            ));
                        }
                    }
                }
            }
        }
        found.sort_by(|a, b| a.uname.cmp(&b.uname));
        Ok(found)
    }
}

fn matches_pattern(pattern: &str, value: &str) -> bool {
    pattern == WILDCARD || pattern == value
}

/// Names of the subdirectories of `dir`; empty if `dir` does not exist.
fn list_dir_names(dir: &Path) -> Result<Vec<String>, JournalError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(e, dir)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error(e, dir))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
