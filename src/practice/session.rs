//! Actor liveness and channel negotiation state machines kept by the
//! master.

use crate::error::BusError;
use crate::journal::Location;
use crate::types::{Channel, ChannelRequest, Register};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Liveness of one uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Never registered.
    Unknown,
    /// Has a live session.
    Registered,
    /// Last session ended.
    Deregistered,
}

/// One live registration.
#[derive(Debug, Clone)]
pub struct Session {
    pub location: Arc<Location>,
    pub session_id: Uuid,
    pub pid: u32,
    pub checkin_time: i64,
}

impl Session {
    /// The `Register` record announcing this session.
    #[must_use]
    pub fn to_register(&self) -> Register {
        Register {
            location: (*self.location).clone(),
            session_id: self.session_id,
            pid: self.pid,
            checkin_time: self.checkin_time,
        }
    }
}

/// Unknown → Registered → Deregistered (→ Registered) per uid.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    sessions: BTreeMap<u32, Session>,
    retired: BTreeSet<u32>,
}

impl LivenessTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a registration.
    ///
    /// Returns `false` if the same session was already registered; a new
    /// session for a registered uid replaces the old one.
    pub fn register(&mut self, register: &Register, location: Arc<Location>) -> bool {
        let uid = location.uid;
        if self
            .sessions
            .get(&uid)
            .is_some_and(|s| s.session_id == register.session_id)
        {
            debug!(location = %location.uname, "duplicate registration");
            return false;
        }
        self.retired.remove(&uid);
        info!(location = %location.uname, session = %register.session_id, pid = register.pid, "registered");
        self.sessions.insert(
            uid,
            Session {
                location,
                session_id: register.session_id,
                pid: register.pid,
                checkin_time: register.checkin_time,
            },
        );
        true
    }

    /// Ends the session of `uid`. Returns `None` if it had none.
    pub fn deregister(&mut self, uid: u32) -> Option<Session> {
        let session = self.sessions.remove(&uid)?;
        self.retired.insert(uid);
        info!(location = %session.location.uname, "deregistered");
        Some(session)
    }

    /// Liveness of `uid`.
    #[must_use]
    pub fn state(&self, uid: u32) -> Liveness {
        if self.sessions.contains_key(&uid) {
            Liveness::Registered
        } else if self.retired.contains(&uid) {
            Liveness::Deregistered
        } else {
            Liveness::Unknown
        }
    }

    /// Whether `uid` has a live session.
    #[must_use]
    pub fn is_registered(&self, uid: u32) -> bool {
        self.sessions.contains_key(&uid)
    }

    /// Live session of `uid`.
    #[must_use]
    pub fn session(&self, uid: u32) -> Option<&Session> {
        self.sessions.get(&uid)
    }

    /// Live sessions by uid.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Negotiation state of one `(source, dest)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unrequested,
    /// One endpoint has asked.
    Requested,
    Authorized,
}

/// Authorizes a channel once both of its endpoints have requested it.
#[derive(Debug, Default)]
pub struct ChannelNegotiator {
    requested: BTreeMap<(u32, u32), BTreeSet<u32>>,
    authorized: BTreeSet<(u32, u32)>,
}

impl ChannelNegotiator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `requester`'s request for the channel.
    ///
    /// Returns the authorization the first time both endpoints have asked,
    /// `None` otherwise, including for repeats after authorization.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidInstruction`] if `requester` is neither
    /// endpoint.
    pub fn request(&mut self, request: ChannelRequest, requester: u32) -> Result<Option<Channel>, BusError> {
        let pair = (request.source_id, request.dest_id);
        if requester != pair.0 && requester != pair.1 {
            return Err(BusError::InvalidInstruction(format!(
                "{requester:08x} cannot request channel {:08x} -> {:08x}",
                pair.0, pair.1
            )));
        }
        if self.authorized.contains(&pair) {
            return Ok(None);
        }
        let askers = self.requested.entry(pair).or_default();
        askers.insert(requester);
        if !(askers.contains(&pair.0) && askers.contains(&pair.1)) {
            return Ok(None);
        }
        self.requested.remove(&pair);
        self.authorized.insert(pair);
        info!(
            source = format_args!("{:08x}", pair.0),
            dest = format_args!("{:08x}", pair.1),
            "channel authorized"
        );
        #[cfg(feature = "metrics")]
        metrics::counter!("journalbus_channels_authorized").increment(1);
        Ok(Some(Channel {
            source_id: pair.0,
            dest_id: pair.1,
        }))
    }

    /// Negotiation state of the `(source, dest)` channel.
    #[must_use]
    pub fn state(&self, source: u32, dest: u32) -> ChannelState {
        if self.authorized.contains(&(source, dest)) {
            ChannelState::Authorized
        } else if self.requested.contains_key(&(source, dest)) {
            ChannelState::Requested
        } else {
            ChannelState::Unrequested
        }
    }

    /// Drops requests and authorizations with `uid` at either end. Returns
    /// how many authorizations were dropped.
    pub fn clear(&mut self, uid: u32) -> usize {
        self.requested
            .retain(|&(source, dest), _| source != uid && dest != uid);
        let before = self.authorized.len();
        self.authorized
            .retain(|&(source, dest)| source != uid && dest != uid);
        before - self.authorized.len()
    }

    /// Authorized channels, ascending by `(source, dest)`.
    pub fn authorized(&self) -> impl Iterator<Item = Channel> + '_ {
        self.authorized.iter().map(|&(source_id, dest_id)| Channel { source_id, dest_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{Category, Mode};

    fn register(location: &Location, session_id: Uuid) -> Register {
        Register {
            location: location.clone(),
            session_id,
            pid: 1,
            checkin_time: 0,
        }
    }

    #[test]
    fn test_liveness_transitions() {
        let location = Arc::new(Location::new(Mode::Live, Category::Td, "sim", "acct"));
        let uid = location.uid;
        let mut tracker = LivenessTracker::new();
        assert_eq!(tracker.state(uid), Liveness::Unknown);

        let first = Uuid::new_v4();
        assert!(tracker.register(&register(&location, first), Arc::clone(&location)));
        assert!(!tracker.register(&register(&location, first), Arc::clone(&location)));
        assert_eq!(tracker.state(uid), Liveness::Registered);

        assert!(tracker.deregister(uid).is_some());
        assert!(tracker.deregister(uid).is_none());
        assert_eq!(tracker.state(uid), Liveness::Deregistered);

        assert!(tracker.register(&register(&location, Uuid::new_v4()), Arc::clone(&location)));
        assert_eq!(tracker.state(uid), Liveness::Registered);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_channel_needs_both_ends_in_either_order() {
        for order in [[1u32, 2u32], [2, 1]] {
            let mut negotiator = ChannelNegotiator::new();
            let request = ChannelRequest {
                source_id: 1,
                dest_id: 2,
            };
            let first = negotiator.request(request, order[0]);
            assert!(matches!(first, Ok(None)));
            assert_eq!(negotiator.state(1, 2), ChannelState::Requested);

            let second = negotiator.request(request, order[1]);
            assert!(matches!(second, Ok(Some(Channel { source_id: 1, dest_id: 2 }))));
            assert_eq!(negotiator.state(1, 2), ChannelState::Authorized);

            assert!(matches!(negotiator.request(request, order[0]), Ok(None)));
            assert!(matches!(negotiator.request(request, order[1]), Ok(None)));
            assert_eq!(negotiator.authorized().count(), 1);
        }
    }

    #[test]
    fn test_outsider_request_is_rejected() {
        let mut negotiator = ChannelNegotiator::new();
        let request = ChannelRequest {
            source_id: 1,
            dest_id: 2,
        };
        assert!(matches!(
            negotiator.request(request, 3),
            Err(BusError::InvalidInstruction(_))
        ));
        assert_eq!(negotiator.state(1, 2), ChannelState::Unrequested);
    }

    #[test]
    fn test_clear_drops_pending_and_authorized() {
        let mut negotiator = ChannelNegotiator::new();
        let ab = ChannelRequest {
            source_id: 1,
            dest_id: 2,
        };
        let ac = ChannelRequest {
            source_id: 1,
            dest_id: 3,
        };
        assert!(negotiator.request(ab, 1).is_ok());
        assert!(negotiator.request(ab, 2).is_ok());
        assert!(negotiator.request(ac, 3).is_ok());
        assert_eq!(negotiator.clear(1), 1);
        assert_eq!(negotiator.state(1, 2), ChannelState::Unrequested);
        assert_eq!(negotiator.state(1, 3), ChannelState::Unrequested);
        assert!(matches!(negotiator.request(ab, 1), Ok(None)));
    }
}
