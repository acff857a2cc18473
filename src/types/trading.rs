//! Market, trading and reference-data records.

use super::{ProfileRecord, Record, RecordKind, hash_key};
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Long exposure.
    Long,
    /// Short exposure.
    Short,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted by the gateway, not yet acknowledged.
    Pending,
    /// Resting at the venue.
    Submitted,
    /// Partially filled.
    PartialFilled,
    /// Fully filled.
    Filled,
    /// Cancelled.
    Cancelled,
    /// Rejected.
    Error,
}

/// Top-of-book market data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Instrument code.
    pub instrument_id: String,
    /// Exchange code.
    pub exchange_id: String,
    /// Last traded price.
    pub last_price: f64,
    /// Best bid.
    pub bid_price: f64,
    /// Best ask.
    pub ask_price: f64,
    /// Cumulative volume.
    pub volume: u64,
    /// Exchange timestamp in nanoseconds.
    pub data_time: i64,
}

impl Record for Quote {
    const TAG: i32 = 101;
    const TYPE_NAME: &'static str = "Quote";
    const KIND: RecordKind = RecordKind::MARKET;

    fn instance_key(&self) -> u64 {
        hash_key(&[&self.exchange_id, &self.instrument_id])
    }
}

/// An order instruction sent to a trading gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInput {
    /// System-unique order id.
    pub order_id: u64,
    /// Instrument code.
    pub instrument_id: String,
    /// Exchange code.
    pub exchange_id: String,
    /// Limit price.
    pub limit_price: f64,
    /// Quantity.
    pub volume: u64,
    /// Side.
    pub side: Side,
}

impl Record for OrderInput {
    const TAG: i32 = 201;
    const TYPE_NAME: &'static str = "OrderInput";
    const KIND: RecordKind = RecordKind::TRADING;

    fn instance_key(&self) -> u64 {
        self.order_id
    }
}

/// State of an order as reported by a trading gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// System-unique order id.
    pub order_id: u64,
    /// Instrument code.
    pub instrument_id: String,
    /// Exchange code.
    pub exchange_id: String,
    /// Limit price.
    pub limit_price: f64,
    /// Original quantity.
    pub volume: u64,
    /// Quantity not yet filled.
    pub volume_left: u64,
    /// Side.
    pub side: Side,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Last update time in nanoseconds.
    pub update_time: i64,
}

impl Record for Order {
    const TAG: i32 = 203;
    const TYPE_NAME: &'static str = "Order";
    const KIND: RecordKind = RecordKind::TRADING.union(RecordKind::STATE);

    fn instance_key(&self) -> u64 {
        self.order_id
    }
}

/// A fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Gateway-unique trade id.
    pub trade_id: u64,
    /// Order the fill belongs to.
    pub order_id: u64,
    /// Instrument code.
    pub instrument_id: String,
    /// Exchange code.
    pub exchange_id: String,
    /// Fill price.
    pub price: f64,
    /// Fill quantity.
    pub volume: u64,
    /// Side.
    pub side: Side,
    /// Fill time in nanoseconds.
    pub trade_time: i64,
}

impl Record for Trade {
    const TAG: i32 = 204;
    const TYPE_NAME: &'static str = "Trade";
    const KIND: RecordKind = RecordKind::TRADING.union(RecordKind::STATE);

    fn instance_key(&self) -> u64 {
        self.trade_id
    }
}

/// Net holding in one instrument and direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument code.
    pub instrument_id: String,
    /// Exchange code.
    pub exchange_id: String,
    /// Direction.
    pub direction: Direction,
    /// Quantity held.
    pub volume: u64,
    /// Average entry price.
    pub avg_open_price: f64,
    /// Last update time in nanoseconds.
    pub update_time: i64,
}

impl Record for Position {
    const TAG: i32 = 205;
    const TYPE_NAME: &'static str = "Position";
    const KIND: RecordKind = RecordKind::TRADING.union(RecordKind::STATE);

    fn instance_key(&self) -> u64 {
        hash_key(&[&self.exchange_id, &self.instrument_id, self.direction.as_str()])
    }
}

/// Account balance summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Uid of the account holder.
    pub holder_uid: u32,
    /// Available cash.
    pub avail: f64,
    /// Margin in use.
    pub margin: f64,
    /// Last update time in nanoseconds.
    pub update_time: i64,
}

impl Record for Asset {
    const TAG: i32 = 206;
    const TYPE_NAME: &'static str = "Asset";
    const KIND: RecordKind = RecordKind::TRADING.union(RecordKind::STATE);

    fn instance_key(&self) -> u64 {
        u64::from(self.holder_uid)
    }
}

/// Reference data of one tradable instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Instrument code.
    pub instrument_id: String,
    /// Exchange code.
    pub exchange_id: String,
    /// Contract multiplier.
    pub contract_multiplier: u32,
    /// Minimum price increment.
    pub price_tick: f64,
}

impl Record for Instrument {
    const TAG: i32 = 209;
    const TYPE_NAME: &'static str = "Instrument";
    const KIND: RecordKind = RecordKind::PROFILE.union(RecordKind::MARKET);

    fn instance_key(&self) -> u64 {
        hash_key(&[&self.exchange_id, &self.instrument_id])
    }
}

impl ProfileRecord for Instrument {
    fn primary_key(&self) -> String {
        format!("{}.{}", self.exchange_id, self.instrument_id)
    }
}

/// Commission schedule of one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    /// Product code.
    pub product_id: String,
    /// Exchange code.
    pub exchange_id: String,
    /// Rate charged on opening.
    pub open_ratio: f64,
    /// Rate charged on closing.
    pub close_ratio: f64,
    /// Minimum fee per fill.
    pub min_commission: f64,
}

impl Record for Commission {
    const TAG: i32 = 211;
    const TYPE_NAME: &'static str = "Commission";
    const KIND: RecordKind = RecordKind::PROFILE;

    fn instance_key(&self) -> u64 {
        hash_key(&[&self.exchange_id, &self.product_id])
    }
}

impl ProfileRecord for Commission {
    fn primary_key(&self) -> String {
        format!("{}.{}", self.exchange_id, self.product_id)
    }
}
