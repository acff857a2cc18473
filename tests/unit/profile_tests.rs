#[cfg(test)]
mod tests_profile {
    use crate::support::Bus;
    use journalbus::journal::{Category, Location, Mode};
    use journalbus::profile::{ProfileError, ProfileStore};
    use journalbus::types::{Commission, Instrument, Record};

    const ROUNDS: usize = 8;

    fn instrument(id: &str) -> Instrument {
        Instrument {
            instrument_id: id.to_string(),
            exchange_id: "SHFE".to_string(),
            contract_multiplier: 10,
            price_tick: 1.0,
        }
    }

    #[test]
    fn stored_profiles_are_sent_on_bootstrap() {
        let bus = Bus::new();
        let store = ProfileStore::open(&bus.locator).expect("store");
        store.set(&instrument("rb2501")).expect("set");
        store.set(&instrument("cu2502")).expect("set");

        let mut bus = bus;
        let mut cached = bus.cached();
        let mut td = bus.apprentice(Category::Td, "sim");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);
        td.request_cached().expect("request");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);

        assert!(td.ctx().is_cached_ready());
        let mut sent: Vec<String> = bus
            .frames(&Location::cached(Mode::Live), td.home_uid())
            .iter()
            .filter(|f| f.msg_type() == Instrument::TAG)
            .filter_map(|f| f.data::<Instrument>().ok())
            .map(|i| i.instrument_id)
            .collect();
        sent.sort();
        assert_eq!(sent, vec!["cu2502".to_string(), "rb2501".to_string()]);
    }

    #[test]
    fn announced_locations_are_persisted() {
        let mut bus = Bus::new();
        let mut cached = bus.cached();
        let mut td = bus.apprentice(Category::Td, "sim");
        bus.settle(Some(&mut cached), &mut [&mut td], ROUNDS);

        let store = ProfileStore::open(&bus.locator).expect("store");
        let uname = td.ctx().home().uname.clone();
        let stored = store.get::<Location>(&uname).expect("get");
        assert_eq!(stored.map(|l| l.uid), Some(td.home_uid()));
        assert_eq!(cached.reactor().profile_len(), 0);
    }

    #[test]
    fn tampered_profile_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::at(dir.path()).expect("store");
        store.set(&instrument("rb2501")).expect("set");

        let path = dir.path().join(format!("{}.json", Instrument::TYPE_NAME));
        let text = std::fs::read_to_string(&path).expect("read");
        std::fs::write(&path, text.replace("rb2501", "rb2599")).expect("write");

        assert!(matches!(
            store.get_all::<Instrument>(),
            Err(ProfileError::ChecksumMismatch { .. })
        ));
        assert!(store.get_all::<Commission>().expect("empty").is_empty());
    }
}
