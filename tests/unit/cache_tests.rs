#[cfg(test)]
mod tests_cache {
    use crate::support::Bus;
    use journalbus::cache::StateKey;
    use journalbus::journal::{Category, Location, Mode, PUBLIC_DEST};
    use journalbus::types::{Asset, Direction, Position, Record, RequestCachedDone};

    const ROUNDS: usize = 8;

    fn position(instrument: &str, volume: u64) -> Position {
        Position {
            instrument_id: instrument.to_string(),
            exchange_id: "SHFE".to_string(),
            direction: Direction::Long,
            volume,
            avg_open_price: 3500.0,
            update_time: 0,
        }
    }

    fn asset(holder_uid: u32, avail: f64) -> Asset {
        Asset {
            holder_uid,
            avail,
            margin: 0.0,
            update_time: 0,
        }
    }

    #[test]
    fn cache_daemon_arms_shift_for_trading_gateway() {
        let mut bus = Bus::new();
        let mut cached = bus.cached();
        let mut td = bus.apprentice(Category::Td, "sim");
        let mut strategy = bus.apprentice(Category::Strategy, "alpha");
        bus.settle(Some(&mut cached), &mut [&mut td, &mut strategy], ROUNDS);

        assert!(cached.is_registered());
        assert!(cached.reactor().is_live(td.home_uid()));
        assert!(cached.reactor().is_live(strategy.home_uid()));
        assert!(cached.reactor().shift(td.home_uid()).is_some());
        assert!(cached.reactor().shift(strategy.home_uid()).is_none());
        assert!(cached.ctx().reader().is_joined(td.home_uid(), PUBLIC_DEST));
        assert!(cached.ctx().reader().is_joined(strategy.home_uid(), cached.home_uid()));
    }

    #[test]
    fn request_cached_replays_in_update_order_then_acknowledges() {
        let mut bus = Bus::new();
        let mut cached = bus.cached();
        let mut td = bus.apprentice(Category::Td, "sim");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);
        let uid = td.home_uid();

        td.write(PUBLIC_DEST, &position("rb2501", 2)).expect("position");
        td.write(PUBLIC_DEST, &asset(uid, 1000.0)).expect("asset");
        // A newer value for the same position replaces the older one.
        td.write(PUBLIC_DEST, &position("rb2501", 3)).expect("position");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);
        assert_eq!(cached.reactor().shift(uid).map(|s| s.len()), Some(2));

        td.request_cached().expect("request");
        assert!(!td.ctx().is_cached_ready());
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);

        assert!(td.ctx().is_cached_ready());
        assert!(cached.reactor().shift(uid).is_some_and(|s| s.is_empty()));
        assert_eq!(cached.reactor().pending_requests().count(), 0);

        let replay = bus.frames(&Location::cached(Mode::Live), uid);
        let states: Vec<i32> = replay
            .iter()
            .map(|f| f.msg_type())
            .filter(|&t| t == Position::TAG || t == Asset::TAG)
            .collect();
        assert_eq!(states, vec![Asset::TAG, Position::TAG]);
        let replayed: Option<Position> = replay.iter().find_map(|f| f.data::<Position>().ok());
        assert_eq!(replayed.map(|p| p.volume), Some(3));

        let done = bus
            .frames(&bus.master_location(), PUBLIC_DEST)
            .iter()
            .filter_map(|f| f.data::<RequestCachedDone>().ok())
            .filter(|d| d.dest_id == uid)
            .count();
        assert_eq!(done, 1);
    }

    #[test]
    fn request_cached_orders_by_update_time() {
        let mut bus = Bus::new();
        let mut cached = bus.cached();
        let mut td = bus.apprentice(Category::Td, "sim");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);
        let uid = td.home_uid();

        td.write(PUBLIC_DEST, &position("cu2502", 1)).expect("position");
        td.write(PUBLIC_DEST, &asset(uid, 50.0)).expect("asset");
        td.request_cached().expect("request");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);

        let states: Vec<i32> = bus
            .frames(&Location::cached(Mode::Live), uid)
            .iter()
            .map(|f| f.msg_type())
            .filter(|&t| t == Position::TAG || t == Asset::TAG)
            .collect();
        assert_eq!(states, vec![Position::TAG, Asset::TAG]);
        assert!(td.ctx().is_cached_ready());
    }

    #[test]
    fn request_from_unregistered_location_is_ignored() {
        let mut bus = Bus::new();
        let mut cached = bus.cached();
        bus.settle(Some(&mut cached), &mut [], ROUNDS);

        // Never started, so the master and the daemon do not know it.
        let mut stranger = journalbus::practice::Apprentice::new(
            std::sync::Arc::clone(&bus.locator),
            Location::new(Mode::Live, Category::Strategy, "test", "stranger"),
            bus.config.clone(),
            (),
        )
        .expect("apprentice");
        stranger.request_cached().expect("request");
        bus.settle(Some(&mut cached), &mut [&mut stranger], ROUNDS);

        assert!(!stranger.ctx().is_cached_ready());
        assert_eq!(cached.reactor().pending_requests().count(), 0);
    }

    #[test]
    fn cache_reset_drops_entries_for_the_type() {
        let mut bus = Bus::new();
        let mut cached = bus.cached();
        let mut td = bus.apprentice(Category::Td, "sim");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);
        let uid = td.home_uid();

        td.write(PUBLIC_DEST, &position("rb2501", 1)).expect("position");
        td.write(PUBLIC_DEST, &position("cu2502", 1)).expect("position");
        td.write(PUBLIC_DEST, &asset(uid, 10.0)).expect("asset");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);
        assert_eq!(cached.reactor().shift(uid).map(|s| s.len()), Some(3));

        td.reset_cache(PUBLIC_DEST, Position::TAG).expect("reset");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);

        let shift = cached.reactor().shift(uid).expect("shift");
        assert_eq!(shift.len(), 1);
        assert_eq!(shift.bank().type_len(Position::TAG), 0);
        assert_eq!(shift.bank().type_len(Asset::TAG), 1);
    }

    #[test]
    fn deregistration_releases_the_shift() {
        let mut bus = Bus::new();
        let mut cached = bus.cached();
        let mut td = bus.apprentice(Category::Td, "sim");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);
        let uid = td.home_uid();
        td.write(PUBLIC_DEST, &position("rb2501", 1)).expect("position");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);
        assert!(cached.reactor().shift(uid).is_some());

        td.stop().expect("stop");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);

        assert!(!cached.reactor().is_live(uid));
        assert!(cached.reactor().shift(uid).is_none());
        assert!(!cached.ctx().reader().is_joined(uid, PUBLIC_DEST));
    }

    #[test]
    fn cache_reset_supersedes_counterpart_entries() {
        let mut bus = Bus::new();
        let mut cached = bus.cached();
        let mut td = bus.apprentice(Category::Td, "sim");
        let mut strategy = bus.apprentice(Category::Strategy, "alpha");
        bus.settle(Some(&mut cached), &mut [&mut td, &mut strategy], ROUNDS);
        let (t, s) = (td.home_uid(), strategy.home_uid());

        strategy.connect(t).expect("connect");
        td.accept(s).expect("accept");
        td.connect(s).expect("connect");
        strategy.accept(t).expect("accept");
        bus.settle(Some(&mut cached), &mut [&mut td, &mut strategy], ROUNDS);
        assert!(cached.ctx().reader().is_joined(s, t));
        assert!(cached.ctx().reader().is_joined(t, s));

        let held = position("rb2501", 4);
        strategy.write(t, &held).expect("position");
        bus.settle(Some(&mut cached), &mut [&mut td, &mut strategy], ROUNDS);
        let key = StateKey::new(s, t, held.instance_key());
        assert!(cached.reactor().shift(s).is_some_and(|shift| shift.bank().contains(Position::TAG, &key)));

        td.reset_cache(s, Position::TAG).expect("reset");
        bus.settle(Some(&mut cached), &mut [&mut td, &mut strategy], ROUNDS);
        let shift = cached.reactor().shift(s).expect("shift");
        assert!(shift.bank().is_superseded(Position::TAG, &key));

        strategy.request_cached().expect("request");
        bus.settle(Some(&mut cached), &mut [&mut td, &mut strategy], ROUNDS);
        assert!(strategy.ctx().is_cached_ready());
        assert!(cached.reactor().shift(s).is_some_and(|shift| shift.is_empty()));
        let replayed = bus
            .frames(&Location::cached(Mode::Live), s)
            .iter()
            .filter(|f| f.msg_type() == Position::TAG)
            .count();
        assert_eq!(replayed, 0);
    }

    #[test]
    fn requests_after_deregistration_have_no_effect() {
        let mut bus = Bus::new();
        let mut cached = bus.cached();
        let mut gone = bus.apprentice(Category::Td, "sim");
        let mut other = bus.apprentice(Category::Td, "alt");
        bus.settle(Some(&mut cached), &mut [&mut gone, &mut other], ROUNDS);
        let (a, b) = (gone.home_uid(), other.home_uid());
        gone.write(PUBLIC_DEST, &position("rb2501", 1)).expect("position");
        other.write(PUBLIC_DEST, &position("rb2501", 2)).expect("position");
        bus.settle(Some(&mut cached), &mut [&mut gone, &mut other], ROUNDS);
        assert_eq!(cached.reactor().shift(b).map(|s| s.len()), Some(1));

        gone.stop().expect("stop");
        bus.settle(Some(&mut cached), &mut [&mut gone, &mut other], ROUNDS);
        assert!(cached.reactor().shift(a).is_none());

        // Trusted dests stay writable after stopping.
        gone.reset_cache(PUBLIC_DEST, Position::TAG).expect("reset");
        gone.request_cached().expect("request");
        bus.settle(Some(&mut cached), &mut [&mut gone, &mut other], ROUNDS);

        assert!(!cached.reactor().is_live(a));
        assert!(cached.reactor().shift(a).is_none());
        assert_eq!(cached.reactor().pending_requests().count(), 0);
        assert_eq!(cached.reactor().feed_len(), 0);
        assert_eq!(cached.reactor().shift(b).map(|s| s.len()), Some(1));
        assert!(!gone.ctx().is_cached_ready());
        let done = bus
            .frames(&bus.master_location(), PUBLIC_DEST)
            .iter()
            .filter_map(|f| f.data::<RequestCachedDone>().ok())
            .filter(|d| d.dest_id == a)
            .count();
        assert_eq!(done, 0);
    }
}
