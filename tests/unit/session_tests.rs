#[cfg(test)]
mod tests_session {
    use crate::support::Bus;
    use journalbus::BusError;
    use journalbus::journal::{Category, PUBLIC_DEST};
    use journalbus::practice::{ChannelState, Liveness};
    use journalbus::types::{Channel, Quote, Register};

    const ROUNDS: usize = 8;

    fn quote(price: f64) -> Quote {
        Quote {
            instrument_id: "rb2501".to_string(),
            exchange_id: "SHFE".to_string(),
            last_price: price,
            bid_price: price - 1.0,
            ask_price: price + 1.0,
            volume: 1,
            data_time: 0,
        }
    }

    #[test]
    fn master_acknowledges_registration() {
        let mut bus = Bus::new();
        let mut alpha = bus.apprentice(Category::Strategy, "alpha");
        assert!(!alpha.is_registered());

        bus.settle(None, &mut [&mut alpha], ROUNDS);

        assert!(alpha.is_registered());
        let uid = alpha.home_uid();
        assert_eq!(bus.master.state().liveness().state(uid), Liveness::Registered);
        assert!(bus.master.ctx().locations().contains(uid));
        assert!(alpha.ctx().trading_day().is_some());

        let announced = bus
            .frames(&bus.master_location(), PUBLIC_DEST)
            .iter()
            .filter_map(|f| f.data::<Register>().ok())
            .filter(|r| r.location.uid == uid)
            .count();
        assert_eq!(announced, 1);
    }

    #[test]
    fn late_joiner_learns_existing_sessions() {
        let mut bus = Bus::new();
        let mut alpha = bus.apprentice(Category::Strategy, "alpha");
        bus.settle(None, &mut [&mut alpha], ROUNDS);

        let mut beta = bus.apprentice(Category::Strategy, "beta");
        bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);

        assert!(beta.is_registered());
        assert!(beta.ctx().locations().contains(alpha.home_uid()));
        assert!(alpha.ctx().locations().contains(beta.home_uid()));
    }

    fn negotiate(source_first: bool) {
        let mut bus = Bus::new();
        let mut alpha = bus.apprentice(Category::Strategy, "alpha");
        let mut beta = bus.apprentice(Category::Strategy, "beta");
        bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);
        let (a, b) = (alpha.home_uid(), beta.home_uid());

        assert!(matches!(
            alpha.write(b, &quote(1.0)),
            Err(BusError::ChannelNotAuthorized { .. })
        ));
        assert!(!alpha.write_when_authorized(b, quote(3500.0)).expect("defer"));

        if source_first {
            alpha.connect(b).expect("connect");
            bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);
            assert_eq!(bus.master.state().channels().state(a, b), ChannelState::Requested);
            beta.accept(a).expect("accept");
        } else {
            beta.accept(a).expect("accept");
            bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);
            assert_eq!(bus.master.state().channels().state(a, b), ChannelState::Requested);
            alpha.connect(b).expect("connect");
        }
        bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);

        assert_eq!(bus.master.state().channels().state(a, b), ChannelState::Authorized);
        assert!(alpha.ctx().has_writer(b));
        assert!(beta.ctx().reader().is_joined(a, b));

        // A repeated request is not authorized twice.
        alpha.connect(b).expect("connect again");
        bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);
        let channels = bus
            .frames(&bus.master_location(), PUBLIC_DEST)
            .iter()
            .filter_map(|f| f.data::<Channel>().ok())
            .filter(|c| c.source_id == a && c.dest_id == b)
            .count();
        assert_eq!(channels, 1);

        let delivered: Vec<Quote> = bus
            .frames(alpha.ctx().home(), b)
            .iter()
            .filter_map(|f| f.data::<Quote>().ok())
            .collect();
        assert_eq!(delivered, vec![quote(3500.0)]);
    }

    #[test]
    fn channel_authorized_once_source_first() {
        negotiate(true);
    }

    #[test]
    fn channel_authorized_once_dest_first() {
        negotiate(false);
    }

    #[test]
    fn request_channel_must_involve_home() {
        let bus = Bus::new();
        let mut alpha = bus.apprentice(Category::Strategy, "alpha");
        assert!(matches!(
            alpha.request_channel(1, 2),
            Err(BusError::InvalidInstruction(_))
        ));
    }

    #[test]
    fn deregister_clears_session_and_channels() {
        let mut bus = Bus::new();
        let mut alpha = bus.apprentice(Category::Strategy, "alpha");
        let mut beta = bus.apprentice(Category::Strategy, "beta");
        bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);
        let (a, b) = (alpha.home_uid(), beta.home_uid());
        alpha.connect(b).expect("connect");
        beta.accept(a).expect("accept");
        bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);
        assert!(beta.ctx().reader().is_joined(a, b));

        alpha.stop().expect("stop");
        // Stopping twice writes nothing more.
        alpha.stop().expect("stop again");
        bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);

        assert_eq!(bus.master.state().liveness().state(a), Liveness::Deregistered);
        assert_eq!(bus.master.state().channels().state(a, b), ChannelState::Unrequested);
        assert!(!alpha.is_registered());
        assert!(!beta.ctx().reader().is_joined(a, b));
        assert!(!beta.ctx().has_channel(a, b));
        assert_eq!(bus.master.state().liveness().state(b), Liveness::Registered);
    }

    #[test]
    fn interact_status_reports_registration() {
        let mut bus = Bus::new();
        let mut alpha = bus.apprentice(Category::Strategy, "alpha");
        bus.settle(None, &mut [&mut alpha], ROUNDS);
        let status = alpha.interact("status").expect("status");
        assert!(status.contains("registered=true"));
    }

    #[test]
    fn new_session_drops_channels_of_the_old_one() {
        let mut bus = Bus::new();
        let mut alpha = bus.apprentice(Category::Strategy, "alpha");
        let mut beta = bus.apprentice(Category::Strategy, "beta");
        bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);
        let (a, b) = (alpha.home_uid(), beta.home_uid());
        alpha.connect(b).expect("connect");
        beta.accept(a).expect("accept");
        bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);
        assert_eq!(bus.master.state().channels().state(a, b), ChannelState::Authorized);
        let old_session = alpha.session_id();

        // Restarted without deregistering.
        drop(alpha);
        let mut alpha = bus.apprentice(Category::Strategy, "alpha");
        assert_ne!(alpha.session_id(), old_session);
        bus.settle(None, &mut [&mut alpha, &mut beta], ROUNDS);

        let session = bus.master.state().liveness().session(a).map(|s| s.session_id);
        assert_eq!(session, Some(alpha.session_id()));
        assert!(alpha.is_registered());
        assert_eq!(bus.master.state().channels().state(a, b), ChannelState::Unrequested);
        assert!(!bus.master.ctx().has_channel(a, b));
        assert_eq!(bus.master.state().liveness().state(b), Liveness::Registered);
    }
}
