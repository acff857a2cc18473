/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 14/10/26
******************************************************************************/

//! Time and hashing helpers shared by every journal component.

use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds in one second.
pub const NANOSECONDS_PER_SECOND: i64 = 1_000_000_000;

/// Nanoseconds in one hour.
pub const NANOSECONDS_PER_HOUR: i64 = 3_600 * NANOSECONDS_PER_SECOND;

/// Nanoseconds in one day.
pub const NANOSECONDS_PER_DAY: i64 = 24 * NANOSECONDS_PER_HOUR;

/// Current wall-clock time in nanoseconds since the Unix epoch.
///
/// Saturates at `i64::MAX` and falls back to `0` if the system clock is set
/// before the epoch.
#[must_use]
pub fn now_in_nano() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// 32-bit hash of a string, used to derive location uids.
#[must_use]
#[inline]
pub fn hash_str_32(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

/// Round `len` up to the next multiple of 8.
#[inline]
pub(crate) fn align8(len: usize) -> usize {
    len.saturating_add(7) & !7
}
