// demos/src/bin/journal_roundtrip.rs
//
// Appends quotes to two market-data journals and reads them back merged in
// generation-time order, then assembles the same journals historically.
//
// Functions demonstrated:
// - `Writer::write_at()`: append with an explicit generation time
// - `Reader::join()` / `Reader::next()`: time-ordered merge of live journals
// - `Reader::seek_to_time()`: restart reading from a point in time
// - `Assemble::matching()`: pattern-based historical merge
//
// Run this demo with:
//   cargo run --bin journal_roundtrip
//   (from the demos directory)

use journalbus::prelude::*;
use std::sync::Arc;
use tracing::info;

fn main() -> Result<(), BusError> {
    tracing_subscriber::fmt::init();
    info!("Journal Roundtrip Demo");

    let root = std::env::temp_dir().join(format!("journalbus-demo-{}", uuid::Uuid::new_v4()));
    let locator = Arc::new(Locator::new(&root));
    let config = BusConfig::low_latency();
    info!(root = %root.display(), page_size = config.page_size, "journal root");

    let feeds = write_feeds(&locator, config.page_size)?;
    read_merged(&locator, &feeds)?;
    assemble_history(&locator)?;

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

fn quote(instrument: &str, price: f64, time: i64) -> Quote {
    Quote {
        instrument_id: instrument.to_string(),
        exchange_id: "SHFE".to_string(),
        last_price: price,
        bid_price: price - 1.0,
        ask_price: price + 1.0,
        volume: 1,
        data_time: time,
    }
}

fn write_feeds(locator: &Arc<Locator>, page_size: usize) -> Result<Vec<Arc<Location>>, BusError> {
    info!("\n=== Writing ===");
    let mut feeds = Vec::new();
    for (name, instrument, offset) in [("shfe", "rb2501", 0), ("dce", "i2501", 5)] {
        let location = Arc::new(Location::new(Mode::Live, Category::Md, "sim", name));
        let mut writer = Writer::open(Arc::clone(locator), Arc::clone(&location), PUBLIC_DEST, page_size)?;
        for step in 0..5i64 {
            let time = 1_000 + step * 10 + offset;
            let id = writer.write_at(time, time, &quote(instrument, 3500.0 + step as f64, time))?;
            info!(location = %location.uname, time, frame_id = format_args!("{id:#x}"), "written");
        }
        feeds.push(location);
    }
    Ok(feeds)
}

fn read_merged(locator: &Arc<Locator>, feeds: &[Arc<Location>]) -> Result<(), BusError> {
    info!("\n=== Merged read ===");
    let mut reader = Reader::new(Arc::clone(locator));
    for location in feeds {
        reader.join(Arc::clone(location), PUBLIC_DEST, 0)?;
    }
    while let Some(frame) = reader.next() {
        let quote: Quote = frame.data()?;
        info!(gen_time = frame.gen_time(), instrument = %quote.instrument_id, price = quote.last_price);
    }

    info!("\n=== Seek to 1025 ===");
    reader.seek_to_time(1_025)?;
    let remaining = std::iter::from_fn(|| reader.next()).count();
    info!(remaining, "frames at or after 1025");
    Ok(())
}

fn assemble_history(locator: &Arc<Locator>) -> Result<(), BusError> {
    info!("\n=== Assemble md/*/* ===");
    let mut assembled = Assemble::matching(&[Arc::clone(locator)], Mode::Live, "md", "*", "*")?
        .with_end_time(1_020);
    for (header, quote) in assembled.read_all::<Quote>() {
        info!(gen_time = header.gen_time, instrument = %quote.instrument_id, "assembled");
    }
    Ok(())
}
