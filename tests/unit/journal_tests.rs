#[cfg(test)]
mod tests_journal {
    use crate::support::writer;
    use journalbus::journal::{Assemble, AssembleMode, Frame, Locator, Reader, make_frame_id};
    use journalbus::types::{Deregister, Record};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn locator() -> (tempfile::TempDir, Arc<Locator>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let locator = Arc::new(Locator::new(dir.path()));
        (dir, locator)
    }

    #[test]
    fn reader_from_time_sees_only_later_frames() {
        let (_dir, locator) = locator();
        let mut w = writer(&locator, "w", 42, 64 * 1024);
        for t in [100i64, 200, 300] {
            w.write_at(t, t, &Deregister { location_uid: t as u32 })
                .expect("write");
        }

        let mut reader = Reader::new(Arc::clone(&locator));
        reader.join(Arc::clone(w.location()), 42, 150).expect("join");
        let times: Vec<i64> = std::iter::from_fn(|| reader.next())
            .map(|f| f.trigger_time())
            .collect();
        assert_eq!(times, vec![200, 300]);

        // Seeking back replays the whole journal.
        reader.seek_to_time(0).expect("seek");
        assert_eq!(std::iter::from_fn(|| reader.next()).count(), 3);
    }

    #[test]
    fn current_frame_uid_tracks_writes_and_reopen() {
        let (_dir, locator) = locator();
        let mut w = writer(&locator, "ids", 0, 64 * 1024);
        assert_eq!(w.current_frame_uid(), 0);
        for i in 0..5u32 {
            let id = w.write_at(i64::from(i), 0, &Deregister { location_uid: i }).expect("write");
            assert_eq!(id, w.current_frame_uid());
        }
        let first_page = w.current_page_id();
        assert_eq!(w.current_frame_uid(), make_frame_id(first_page, 4));
        drop(w);

        let mut reopened = writer(&locator, "ids", 0, 64 * 1024);
        assert_eq!(reopened.current_frame_uid(), make_frame_id(first_page, 4));
        let next = reopened
            .write_at(10, 0, &Deregister { location_uid: 9 })
            .expect("write");
        assert_eq!(next, make_frame_id(first_page, 5));
    }

    #[test]
    fn frames_span_pages_without_loss() {
        let (_dir, locator) = locator();
        let mut w = writer(&locator, "pages", 0, 1024);
        let first_page = w.current_page_id();
        for i in 0..60u32 {
            w.write_at(i64::from(i), 0, &Deregister { location_uid: i }).expect("write");
        }
        assert!(w.current_page_id() > first_page);

        let mut reader = Reader::new(Arc::clone(&locator));
        reader.join(Arc::clone(w.location()), 0, 0).expect("join");
        let uids: Vec<u32> = std::iter::from_fn(|| reader.next())
            .filter_map(|f| f.data::<Deregister>().ok())
            .map(|d| d.location_uid)
            .collect();
        assert_eq!(uids, (0..60).collect::<Vec<_>>());
    }

    #[test]
    fn assemble_for_location_merges_written_journals() {
        let (_dir, locator) = locator();
        let mut a = writer(&locator, "multi", 1, 64 * 1024);
        let mut b = writer(&locator, "multi", 2, 64 * 1024);
        a.write_at(30, 0, &Deregister { location_uid: 3 }).expect("write");
        b.write_at(10, 0, &Deregister { location_uid: 1 }).expect("write");
        a.write_at(20, 0, &Deregister { location_uid: 2 }).expect("write");

        let location = Arc::clone(a.location());
        let mut assembled =
            Assemble::for_location(&locator, &location, 0, AssembleMode::Write, 0).expect("assemble");
        let times: Vec<i64> = assembled.read_bytes().iter().map(Frame::gen_time).collect();
        assert_eq!(times, vec![10, 20, 30]);
    }

    fn journal_times() -> impl Strategy<Value = Vec<Vec<i64>>> {
        prop::collection::vec(prop::collection::vec(0i64..50, 0..40), 1..4).prop_map(|mut journals| {
            for times in &mut journals {
                times.sort_unstable();
            }
            journals
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn merge_delivers_every_frame_once_in_order(journals in journal_times()) {
            let (_dir, locator) = locator();
            let mut reader = Reader::new(Arc::clone(&locator));
            let mut expected = Vec::new();
            for (index, times) in journals.iter().enumerate() {
                let mut w = writer(&locator, &format!("p{index}"), 0, 1024);
                for (seq, &t) in times.iter().enumerate() {
                    let marker = ((index as u32) << 16) | seq as u32;
                    w.write_at(t, 0, &Deregister { location_uid: marker }).expect("write");
                    expected.push((t, index, seq, marker));
                }
                reader.join(Arc::clone(w.location()), 0, 0).expect("join");
            }
            expected.sort_unstable();

            let seen: Vec<(i64, u32)> = std::iter::from_fn(|| reader.next())
                .filter(|f| f.msg_type() == Deregister::TAG)
                .map(|f| (f.gen_time(), f.data::<Deregister>().map(|d| d.location_uid).unwrap_or(u32::MAX)))
                .collect();
            let wanted: Vec<(i64, u32)> = expected.iter().map(|&(t, _, _, m)| (t, m)).collect();
            prop_assert_eq!(seen, wanted);
        }
    }
}
