// demos/src/bin/cache_replay.rs
//
// Runs a master, the cache daemon and a trading gateway in one thread. The
// gateway publishes positions and an asset, asks the daemon for its cached
// state and receives the latest value of each, in update-time order.
//
// Functions demonstrated:
// - `Master::new()` / `CacheD::open()` / `Apprentice::start()`
// - `Apprentice::write()`: publish state on the public journal
// - `Apprentice::request_cached()`: ask for a replay
// - `Apprentice::interact()`: text commands against a running apprentice
//
// Run this demo with:
//   cargo run --bin cache_replay
//   (from the demos directory)

use journalbus::prelude::*;
use journalbus::types::Direction;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const ROUNDS: usize = 10;

fn main() -> Result<(), BusError> {
    tracing_subscriber::fmt::init();
    info!("Cache Replay Demo");

    let root = std::env::temp_dir().join(format!("journalbus-demo-{}", uuid::Uuid::new_v4()));
    let locator = Arc::new(Locator::new(&root));
    let config = BusConfig::default()
        .with_page_size(1 << 20)
        .with_interval_ns(1_000_000);

    let mut master = Master::new(Arc::clone(&locator), Mode::Live, config.clone())?;
    let mut cached = CacheD::open(Arc::clone(&locator), Mode::Live, config.clone())?;
    let mut td = Apprentice::new(
        Arc::clone(&locator),
        Location::new(Mode::Live, Category::Td, "sim", "account"),
        config,
        (),
    )?;
    cached.start()?;
    td.start()?;

    let mut pump = |cached: &mut Apprentice<CacheD>, td: &mut Apprentice<()>| {
        for _ in 0..ROUNDS {
            master.step();
            cached.step();
            td.step();
            std::thread::sleep(Duration::from_millis(2));
        }
    };

    info!("\n=== Registration ===");
    pump(&mut cached, &mut td);
    info!(status = %td.interact("status")?);

    info!("\n=== Publishing state ===");
    let uid = td.home_uid();
    for (volume, instrument) in [(1, "rb2501"), (2, "cu2502"), (5, "rb2501")] {
        td.write(PUBLIC_DEST, &position(instrument, volume))?;
    }
    td.write(
        PUBLIC_DEST,
        &Asset {
            holder_uid: uid,
            avail: 100_000.0,
            margin: 12_000.0,
            update_time: 0,
        },
    )?;
    pump(&mut cached, &mut td);
    let held = cached.reactor().shift(uid).map_or(0, CacheShift::len);
    info!(held, "entries cached for the gateway");

    info!("\n=== Replay ===");
    td.request_cached()?;
    pump(&mut cached, &mut td);
    info!(cached_ready = td.ctx().is_cached_ready(), "replay finished");

    let mut reader = Reader::new(Arc::clone(&locator));
    reader.join(Arc::new(Location::cached(Mode::Live)), uid, 0)?;
    while let Some(frame) = reader.next() {
        if let Ok(position) = frame.data::<Position>() {
            info!(instrument = %position.instrument_id, volume = position.volume, "replayed position");
        } else if let Ok(asset) = frame.data::<Asset>() {
            info!(avail = asset.avail, "replayed asset");
        }
    }

    td.stop()?;
    cached.stop()?;
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

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
