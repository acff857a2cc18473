//! Durable store of reference-data records.
//!
//! Every profile record type ([`ProfileRecord`]) is kept in one JSON file,
//! `<dir>/<TypeName>.json`, mapping primary keys to records. The file wraps
//! the entries in a versioned package carrying a SHA-256 checksum; writes go
//! to a temporary file that is then renamed over the old one.
//!
//! The store is independent of the journal: it is read and written in place
//! and survives restarts.

use crate::journal::location::{Category, Location, Mode};
use crate::journal::locator::{Layout, Locator};
use crate::types::{ProfileRecord, Record, RecordDescriptor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Format version of profile files.
pub const PROFILE_FORMAT_VERSION: u32 = 1;

/// Errors raised by the profile store.
#[derive(Debug)]
#[non_exhaustive]
pub enum ProfileError {
    /// A profile file could not be read or written.
    Io {
        /// The underlying I/O error message.
        message: String,
        /// The file path involved.
        path: PathBuf,
    },

    /// A record could not be serialized.
    SerializationError {
        /// Underlying error message.
        message: String,
    },

    /// A profile file or record could not be deserialized.
    DeserializationError {
        /// Underlying error message.
        message: String,
    },

    /// A profile file failed its integrity check.
    ChecksumMismatch {
        /// Checksum stored in the file.
        expected: String,
        /// Checksum computed from the entries.
        actual: String,
    },

    /// A profile file was written by an unsupported format version.
    UnsupportedVersion {
        /// Version found in the file.
        found: u32,
    },

    /// The record type is not a profile type.
    NotProfileType {
        /// The type name.
        type_name: String,
    },
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileError::Io { message, path } => {
                write!(f, "profile I/O error at {}: {message}", path.display())
            }
            ProfileError::SerializationError { message } => {
                write!(f, "profile serialization error: {message}")
            }
            ProfileError::DeserializationError { message } => {
                write!(f, "profile deserialization error: {message}")
            }
            ProfileError::ChecksumMismatch { expected, actual } => {
                write!(f, "profile checksum mismatch: expected {expected}, got {actual}")
            }
            ProfileError::UnsupportedVersion { found } => {
                write!(
                    f,
                    "unsupported profile version {found} (expected {PROFILE_FORMAT_VERSION})"
                )
            }
            ProfileError::NotProfileType { type_name } => {
                write!(f, "{type_name} is not a profile record type")
            }
        }
    }
}

impl std::error::Error for ProfileError {}

fn io_error(err: std::io::Error, path: &Path) -> ProfileError {
    ProfileError::Io {
        message: err.to_string(),
        path: path.to_path_buf(),
    }
}

/// On-disk wrapper of one record type's entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfilePackage {
    version: u32,
    type_name: String,
    entries: BTreeMap<String, serde_json::Value>,
    checksum: String,
}

impl ProfilePackage {
    fn new(type_name: &str, entries: BTreeMap<String, serde_json::Value>) -> Result<Self, ProfileError> {
        let checksum = compute_checksum(&entries)?;
        Ok(Self {
            version: PROFILE_FORMAT_VERSION,
            type_name: type_name.to_string(),
            entries,
            checksum,
        })
    }

    fn validate(&self) -> Result<(), ProfileError> {
        if self.version != PROFILE_FORMAT_VERSION {
            return Err(ProfileError::UnsupportedVersion {
                found: self.version,
            });
        }
        let computed = compute_checksum(&self.entries)?;
        if computed != self.checksum {
            return Err(ProfileError::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual: computed,
            });
        }
        Ok(())
    }
}

fn compute_checksum(entries: &BTreeMap<String, serde_json::Value>) -> Result<String, ProfileError> {
    let payload = serde_json::to_vec(entries).map_err(|e| ProfileError::SerializationError {
        message: e.to_string(),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

/// Location owning the profile store files.
#[must_use]
pub fn profile_location() -> Location {
    Location::new(Mode::Live, Category::System, "etc", "profile")
}

/// Keyed CRUD store of profile records.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    /// Opens the store in the profile layout of the root.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Io`] if the directory cannot be created.
    pub fn open(locator: &Locator) -> Result<Self, ProfileError> {
        Self::at(locator.layout_dir(&profile_location(), Layout::Profile))
    }

    /// Opens the store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Io`] if the directory cannot be created.
    pub fn at<P: AsRef<Path>>(dir: P) -> Result<Self, ProfileError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_error(e, &dir))?;
        Ok(Self { dir })
    }

    /// Directory holding the profile files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, type_name: &str) -> PathBuf {
        self.dir.join(format!("{type_name}.json"))
    }

    fn load(&self, type_name: &str) -> Result<BTreeMap<String, serde_json::Value>, ProfileError> {
        let path = self.file_path(type_name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(io_error(e, &path)),
        };
        let package: ProfilePackage =
            serde_json::from_str(&text).map_err(|e| ProfileError::DeserializationError {
                message: format!("{}: {e}", path.display()),
            })?;
        package.validate()?;
        Ok(package.entries)
    }

    fn save(&self, type_name: &str, entries: BTreeMap<String, serde_json::Value>) -> Result<(), ProfileError> {
        let path = self.file_path(type_name);
        let tmp = self.dir.join(format!(".{type_name}.json.tmp"));
        let package = ProfilePackage::new(type_name, entries)?;
        let text = serde_json::to_string_pretty(&package).map_err(|e| ProfileError::SerializationError {
            message: e.to_string(),
        })?;
        fs::write(&tmp, text).map_err(|e| io_error(e, &tmp))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(e, &path))?;
        debug!(type_name, path = %path.display(), "profile saved");
        Ok(())
    }

    /// Inserts or replaces `record`.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if the file cannot be read or written.
    pub fn set<R: ProfileRecord>(&self, record: &R) -> Result<(), ProfileError> {
        let value = serde_json::to_value(record).map_err(|e| ProfileError::SerializationError {
            message: e.to_string(),
        })?;
        let mut entries = self.load(R::TYPE_NAME)?;
        entries.insert(record.primary_key(), value);
        self.save(R::TYPE_NAME, entries)
    }

    /// Looks up a record by primary key.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if the file cannot be read or the stored
    /// entry cannot be decoded.
    pub fn get<R: ProfileRecord>(&self, key: &str) -> Result<Option<R>, ProfileError> {
        let entries = self.load(R::TYPE_NAME)?;
        entries
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| ProfileError::DeserializationError {
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// Every record of type `R`, in primary-key order.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if the file cannot be read or an entry
    /// cannot be decoded.
    pub fn get_all<R: ProfileRecord>(&self) -> Result<Vec<R>, ProfileError> {
        self.load(R::TYPE_NAME)?
            .into_values()
            .map(|value| {
                serde_json::from_value(value).map_err(|e| ProfileError::DeserializationError {
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// Removes a record, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if the file cannot be read or written.
    pub fn remove<R: ProfileRecord>(&self, key: &str) -> Result<bool, ProfileError> {
        let mut entries = self.load(R::TYPE_NAME)?;
        let existed = entries.remove(key).is_some();
        if existed {
            self.save(R::TYPE_NAME, entries)?;
        }
        Ok(existed)
    }

    /// Inserts or replaces an encoded record of the type `descriptor`
    /// describes.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::NotProfileType`] for non-profile types, or
    /// another [`ProfileError`] if the payload or file is invalid.
    pub fn put_raw(&self, descriptor: &RecordDescriptor, payload: &[u8]) -> Result<(), ProfileError> {
        let key = descriptor
            .profile_key(payload)
            .ok_or_else(|| ProfileError::NotProfileType {
                type_name: descriptor.type_name.to_string(),
            })?
            .map_err(|e| ProfileError::DeserializationError {
                message: e.to_string(),
            })?;
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| ProfileError::DeserializationError {
                message: e.to_string(),
            })?;
        let mut entries = self.load(descriptor.type_name)?;
        entries.insert(key, value);
        self.save(descriptor.type_name, entries)
    }

    /// Every record of the type `descriptor` describes, encoded as payloads.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if the file cannot be read.
    pub fn get_all_raw(&self, descriptor: &RecordDescriptor) -> Result<Vec<Vec<u8>>, ProfileError> {
        self.load(descriptor.type_name)?
            .values()
            .map(|value| {
                serde_json::to_vec(value).map_err(|e| ProfileError::SerializationError {
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// [`ProfileStore::get_all_raw`], retried up to `limit` times.
    ///
    /// Returns `None` after logging if every attempt fails.
    pub fn get_all_with_retry(&self, descriptor: &RecordDescriptor, limit: u32) -> Option<Vec<Vec<u8>>> {
        let attempts = limit.max(1);
        for attempt in 1..=attempts {
            match self.get_all_raw(descriptor) {
                Ok(payloads) => return Some(payloads),
                Err(e) => warn!(
                    type_name = descriptor.type_name,
                    attempt,
                    max = attempts,
                    error = %e,
                    "profile read failed, retrying"
                ),
            }
        }
        error!(type_name = descriptor.type_name, "profile read failed after all retries, skipping");
        None
    }
}

/// Type check used by callers holding a typed record.
#[must_use]
pub fn is_profile_type<R: Record>() -> bool {
    R::KIND.contains(crate::types::RecordKind::PROFILE)
}
