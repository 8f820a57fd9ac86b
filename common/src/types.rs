// Portfolio domain types shared between the aggregator and its consumers.
// Field names mirror the upstream FIX client's JSON (camelCase on the wire).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Tolerance for floating-point quantity comparisons.
pub const QTY_EPSILON: f64 = 1e-9;

/// The logical pub/sub channels the aggregator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Positions,
    Executions,
    Orders,
    MarketData,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Positions,
        ChannelKind::Executions,
        ChannelKind::Orders,
        ChannelKind::MarketData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Positions => "positions",
            ChannelKind::Executions => "executions",
            ChannelKind::Orders => "orders",
            ChannelKind::MarketData => "marketdata",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        }
    }

    /// Terminal orders can no longer change quantity.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-symbol position with derived valuation fields.
///
/// `market_value` and `unrealized_pnl` are always recomputed locally from
/// `quantity`, `avg_cost` and `current_price`; wire values for them are
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub avg_cost: f64,
    #[serde(default)]
    pub current_price: f64,
    #[serde(default)]
    pub market_value: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub realized_pnl: f64,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl Position {
    pub fn new(symbol: &str, last_updated: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity: 0.0,
            avg_cost: 0.0,
            current_price: 0.0,
            market_value: 0.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            last_updated,
        }
    }

    /// Recompute the derived valuation fields. Signed: a short position has
    /// negative market value and inverted P&L.
    pub fn recompute(&mut self) {
        self.market_value = self.quantity * self.current_price;
        self.unrealized_pnl = (self.current_price - self.avg_cost) * self.quantity;
    }
}

/// A working or terminal order keyed by client order id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub cl_ord_id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(default)]
    pub order_type: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub filled_quantity: f64,
    #[serde(default)]
    pub leaves_quantity: f64,
    pub status: OrderStatus,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

/// An immutable execution report (fill). `exec_id` is the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub exec_id: String,
    pub cl_ord_id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(default)]
    pub exec_type: String,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub last_quantity: f64,
    #[serde(default)]
    pub cum_quantity: Option<f64>,
    #[serde(default)]
    pub leaves_quantity: Option<f64>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Latest quote for a symbol. `bid`/`ask` accept the upstream's
/// `bidPrice`/`askPrice` spellings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketTick {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub change: Option<f64>,
    #[serde(default)]
    pub change_percent: Option<f64>,
    #[serde(default, alias = "bidPrice")]
    pub bid: Option<f64>,
    #[serde(default, alias = "askPrice")]
    pub ask: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Incremental position event; absent fields leave the stored record alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub symbol: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub avg_cost: Option<f64>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Full order state as published on the orders channel. `status` may be
/// omitted, in which case the event type implies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub cl_ord_id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(default)]
    pub order_type: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub filled_quantity: f64,
    #[serde(default)]
    pub leaves_quantity: Option<f64>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A decoded portfolio event, tagged the way the wire envelope tags it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PortfolioEvent {
    #[serde(rename = "POSITION_UPDATE")]
    PositionUpdate(PositionUpdate),
    #[serde(rename = "EXECUTION")]
    Execution(ExecutionReport),
    #[serde(rename = "ORDER_NEW")]
    OrderNew(OrderUpdate),
    #[serde(rename = "ORDER_PARTIALLY_FILLED")]
    OrderPartiallyFilled(OrderUpdate),
    #[serde(rename = "ORDER_FILLED")]
    OrderFilled(OrderUpdate),
    #[serde(rename = "ORDER_CANCELLED")]
    OrderCancelled(OrderUpdate),
    #[serde(rename = "ORDER_REJECTED")]
    OrderRejected(OrderUpdate),
    #[serde(rename = "MARKET_DATA")]
    MarketData(MarketTick),
}

impl PortfolioEvent {
    /// Wire name of the event type, for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            PortfolioEvent::PositionUpdate(_) => "POSITION_UPDATE",
            PortfolioEvent::Execution(_) => "EXECUTION",
            PortfolioEvent::OrderNew(_) => "ORDER_NEW",
            PortfolioEvent::OrderPartiallyFilled(_) => "ORDER_PARTIALLY_FILLED",
            PortfolioEvent::OrderFilled(_) => "ORDER_FILLED",
            PortfolioEvent::OrderCancelled(_) => "ORDER_CANCELLED",
            PortfolioEvent::OrderRejected(_) => "ORDER_REJECTED",
            PortfolioEvent::MarketData(_) => "MARKET_DATA",
        }
    }

    /// The entity key the event addresses (symbol, exec id or order id).
    pub fn key(&self) -> &str {
        match self {
            PortfolioEvent::PositionUpdate(p) => &p.symbol,
            PortfolioEvent::Execution(e) => &e.exec_id,
            PortfolioEvent::OrderNew(o)
            | PortfolioEvent::OrderPartiallyFilled(o)
            | PortfolioEvent::OrderFilled(o)
            | PortfolioEvent::OrderCancelled(o)
            | PortfolioEvent::OrderRejected(o) => &o.cl_ord_id,
            PortfolioEvent::MarketData(t) => &t.symbol,
        }
    }
}

/// Everything the REST bootstrap returns, ready to seed the store.
/// Executions are ordered newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeedState {
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
    pub executions: Vec<ExecutionReport>,
    pub market_data: Vec<MarketTick>,
}

/// An immutable, internally consistent copy of the portfolio at one instant.
///
/// Consumers render from a snapshot and pick up the next one on the next
/// publisher tick; they must not hold one as live state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub sequence: u64,
    pub healthy: bool,
    pub positions: HashMap<String, Position>,
    pub orders: HashMap<String, Order>,
    /// Newest first, bounded to the configured tail.
    pub executions: Vec<ExecutionReport>,
    pub market_data: HashMap<String, MarketTick>,
    pub last_update: Option<DateTime<Utc>>,
    pub captured_at: DateTime<Utc>,
    /// Human-readable recent activity, newest first.
    pub activity: Vec<String>,
}

impl PortfolioSnapshot {
    pub fn total_market_value(&self) -> f64 {
        self.positions.values().map(|p| p.market_value).sum()
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions
            .values()
            .filter(|p| p.quantity.abs() > QTY_EPSILON)
            .count()
    }
}
