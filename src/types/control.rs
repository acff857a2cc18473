//! Protocol records exchanged through the master.

use super::{ProfileRecord, Record, RecordKind};
use crate::journal::location::Location;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

impl Record for Location {
    const TAG: i32 = 10010;
    const TYPE_NAME: &'static str = "Location";
    const KIND: RecordKind = RecordKind::CONTROL.union(RecordKind::PROFILE);

    fn instance_key(&self) -> u64 {
        u64::from(self.uid)
    }
}

impl ProfileRecord for Location {
    fn primary_key(&self) -> String {
        self.uname.clone()
    }
}

/// Announces that an actor has started a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    /// The registering location; carries its uid.
    pub location: Location,
    /// Unique id of this session.
    pub session_id: Uuid,
    /// OS process id of the actor.
    pub pid: u32,
    /// Registration time in nanoseconds.
    pub checkin_time: i64,
}

impl Register {
    /// Uid of the registering location.
    #[must_use]
    pub fn location_uid(&self) -> u32 {
        self.location.uid
    }
}

impl Record for Register {
    const TAG: i32 = 10011;
    const TYPE_NAME: &'static str = "Register";
    const KIND: RecordKind = RecordKind::CONTROL;
}

/// Announces that an actor has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deregister {
    /// Uid being retired.
    pub location_uid: u32,
}

impl Record for Deregister {
    const TAG: i32 = 10012;
    const TYPE_NAME: &'static str = "Deregister";
    const KIND: RecordKind = RecordKind::CONTROL;
}

/// Asks the master to authorize `source_id` writing to `dest_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRequest {
    /// Writer side of the channel.
    pub source_id: u32,
    /// Reader side of the channel.
    pub dest_id: u32,
}

impl Record for ChannelRequest {
    const TAG: i32 = 10021;
    const TYPE_NAME: &'static str = "ChannelRequest";
    const KIND: RecordKind = RecordKind::CONTROL;
}

/// Authorization for `source_id` to write to `dest_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    /// Writer side of the channel.
    pub source_id: u32,
    /// Reader side of the channel.
    pub dest_id: u32,
}

impl Record for Channel {
    const TAG: i32 = 10022;
    const TYPE_NAME: &'static str = "Channel";
    const KIND: RecordKind = RecordKind::CONTROL;

    fn instance_key(&self) -> u64 {
        (u64::from(self.source_id) << 32) | u64::from(self.dest_id)
    }
}

/// Asks the cache daemon to replay cached state to the sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCached {}

impl Record for RequestCached {
    const TAG: i32 = 10030;
    const TYPE_NAME: &'static str = "RequestCached";
    const KIND: RecordKind = RecordKind::CONTROL;
}

/// Acknowledges that cached state was replayed to `dest_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCachedDone {
    /// The consumer that was caught up.
    pub dest_id: u32,
}

impl Record for RequestCachedDone {
    const TAG: i32 = 10031;
    const TYPE_NAME: &'static str = "RequestCachedDone";
    const KIND: RecordKind = RecordKind::CONTROL;
}

/// Tells the cache daemon to drop cached entries of one record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheReset {
    /// Tag of the record type being reset.
    pub msg_type: i32,
}

impl Record for CacheReset {
    const TAG: i32 = 10032;
    const TYPE_NAME: &'static str = "CacheReset";
    const KIND: RecordKind = RecordKind::CONTROL;
}

/// Announces the start of a new trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingDay {
    /// Start of the trading day in nanoseconds.
    pub timestamp: i64,
}

impl Record for TradingDay {
    const TAG: i32 = 10040;
    const TYPE_NAME: &'static str = "TradingDay";
    const KIND: RecordKind = RecordKind::CONTROL;
}
