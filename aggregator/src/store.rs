// Portfolio state store: one writer task applies events, readers take
// consistent snapshots.
//
// State is sharded by what events touch. Market data recomputes position
// valuations, so positions and ticks share a lock; executions mutate order
// quantities, so orders and the execution tail share the other. Seeding swaps
// both shards while holding both write locks, which is the only place the
// locks nest (always market before trading, same as the snapshot path).

use blotter_common::{
    ExecutionReport, MarketTick, MetricsCollector, Order, OrderStatus, OrderUpdate,
    PortfolioEvent, PortfolioSnapshot, Position, PositionUpdate, SeedState, QTY_EPSILON,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::health::HealthRegistry;

const ACTIVITY_LOG_CAPACITY: usize = 50;

/// What happened to one applied event. `Stale` and `Duplicate` are routine
/// under out-of-order, at-least-once delivery, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Stale,
    Duplicate,
    Buffered,
}

#[derive(Debug, Default)]
struct MarketShard {
    positions: HashMap<String, Position>,
    ticks: HashMap<String, MarketTick>,
    last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct TradingShard {
    orders: HashMap<String, Order>,
    /// Newest first, bounded to `execution_tail`.
    executions: VecDeque<ExecutionReport>,
    /// Exec ids currently in the tail; duplicates within the tail are dropped.
    seen_exec_ids: HashSet<String>,
    last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct PreSeedBuffer {
    events: VecDeque<PortfolioEvent>,
    dropped: u64,
}

pub struct PortfolioStore {
    market: RwLock<MarketShard>,
    trading: RwLock<TradingShard>,
    /// Holds events that arrive before the first seed. Also serializes
    /// seeding against the seeded-flag check in `apply`.
    preseed: Mutex<PreSeedBuffer>,
    seeded: AtomicBool,
    sequence: AtomicU64,
    activity: Mutex<VecDeque<String>>,
    health: Arc<HealthRegistry>,
    metrics: Arc<MetricsCollector>,
    execution_tail: usize,
    preseed_capacity: usize,
}

impl PortfolioStore {
    pub fn new(
        health: Arc<HealthRegistry>,
        metrics: Arc<MetricsCollector>,
        execution_tail: usize,
        preseed_capacity: usize,
    ) -> Self {
        Self {
            market: RwLock::new(MarketShard::default()),
            trading: RwLock::new(TradingShard::default()),
            preseed: Mutex::new(PreSeedBuffer::default()),
            seeded: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            activity: Mutex::new(VecDeque::with_capacity(ACTIVITY_LOG_CAPACITY)),
            health,
            metrics,
            execution_tail,
            preseed_capacity,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded.load(Ordering::Acquire)
    }

    /// Events currently parked in the pre-seed buffer.
    pub fn pending_events(&self) -> usize {
        self.preseed.lock().events.len()
    }

    /// Applies one event, or buffers it if no seed has landed yet.
    ///
    /// Events carrying a timestamp older than the stored record's are ignored
    /// as stale; re-delivered executions are ignored as duplicates.
    pub fn apply(&self, event: PortfolioEvent) -> ApplyOutcome {
        if !self.seeded.load(Ordering::Acquire) {
            let mut gate = self.preseed.lock();
            // Re-check under the lock: a seed may have completed while we
            // waited, and its replay must not race with new buffering.
            if !self.seeded.load(Ordering::Acquire) {
                return self.buffer_pre_seed(&mut gate, event);
            }
        }
        self.apply_now(event)
    }

    fn buffer_pre_seed(&self, gate: &mut PreSeedBuffer, event: PortfolioEvent) -> ApplyOutcome {
        if gate.events.len() >= self.preseed_capacity {
            gate.events.pop_front();
            gate.dropped += 1;
            self.health.mark_data_loss();
            self.metrics.record_buffer_overflow();
            warn!(
                dropped = gate.dropped,
                capacity = self.preseed_capacity,
                "pre-seed buffer full, dropping oldest event"
            );
        }
        gate.events.push_back(event);
        self.metrics.record_event_buffered();
        ApplyOutcome::Buffered
    }

    fn apply_now(&self, event: PortfolioEvent) -> ApplyOutcome {
        let kind = event.kind();
        let outcome = match event {
            PortfolioEvent::PositionUpdate(update) => self.apply_position(update),
            PortfolioEvent::Execution(report) => self.apply_execution(report),
            PortfolioEvent::OrderNew(order) => self.apply_order(order, OrderStatus::New),
            PortfolioEvent::OrderPartiallyFilled(order) => {
                self.apply_order(order, OrderStatus::PartiallyFilled)
            }
            PortfolioEvent::OrderFilled(order) => self.apply_order(order, OrderStatus::Filled),
            PortfolioEvent::OrderCancelled(order) => {
                self.apply_order(order, OrderStatus::Cancelled)
            }
            PortfolioEvent::OrderRejected(order) => {
                self.apply_order(order, OrderStatus::Rejected)
            }
            PortfolioEvent::MarketData(tick) => self.apply_market_data(tick),
        };
        match outcome {
            ApplyOutcome::Applied => self.metrics.record_event_applied(kind),
            ApplyOutcome::Stale => self.metrics.record_event_stale(kind),
            ApplyOutcome::Duplicate => self.metrics.record_event_duplicate(kind),
            ApplyOutcome::Buffered => {}
        }
        outcome
    }

    fn apply_position(&self, update: PositionUpdate) -> ApplyOutcome {
        let ts = update.timestamp.unwrap_or_else(Utc::now);
        let mut market = self.market.write();
        if let Some(existing) = market.positions.get(&update.symbol) {
            if ts < existing.last_updated {
                return ApplyOutcome::Stale;
            }
        }
        let position = market
            .positions
            .entry(update.symbol.clone())
            .or_insert_with(|| Position::new(&update.symbol, ts));
        if let Some(quantity) = update.quantity {
            position.quantity = quantity;
        }
        if let Some(avg_cost) = update.avg_cost {
            position.avg_cost = avg_cost;
        }
        if let Some(current_price) = update.current_price {
            position.current_price = current_price;
        }
        if let Some(realized_pnl) = update.realized_pnl {
            position.realized_pnl = realized_pnl;
        }
        position.recompute();
        position.last_updated = ts;
        let line = format!(
            "position {}: qty {:.0} @ {:.2}",
            position.symbol, position.quantity, position.current_price
        );
        market.last_update = Some(ts);
        drop(market);
        self.push_activity(line);
        ApplyOutcome::Applied
    }

    fn apply_market_data(&self, tick: MarketTick) -> ApplyOutcome {
        let mut market = self.market.write();
        if let Some(existing) = market.ticks.get(&tick.symbol) {
            if tick.timestamp < existing.timestamp {
                return ApplyOutcome::Stale;
            }
        }
        let symbol = tick.symbol.clone();
        let price = tick.price;
        let ts = tick.timestamp;
        market.ticks.insert(symbol.clone(), tick);
        // A price move revalues the position on the spot. The watermark only
        // moves forward so a tick cannot re-open the door for older updates.
        let line = match market.positions.get_mut(&symbol) {
            Some(position) => {
                position.current_price = price;
                position.recompute();
                position.last_updated = ts.max(position.last_updated);
                format!(
                    "tick {} @ {:.2}, unrealized {:.2}",
                    symbol, price, position.unrealized_pnl
                )
            }
            None => format!("tick {} @ {:.2}", symbol, price),
        };
        market.last_update = Some(ts);
        drop(market);
        self.push_activity(line);
        ApplyOutcome::Applied
    }

    fn apply_execution(&self, report: ExecutionReport) -> ApplyOutcome {
        let mut trading = self.trading.write();
        if trading.seen_exec_ids.contains(&report.exec_id) {
            return ApplyOutcome::Duplicate;
        }
        // Executions never change order status; the orders channel owns that.
        // They may refresh the referenced order's fill quantities, without
        // advancing its watermark, so a later order event still wins.
        if let Some(order) = trading.orders.get_mut(&report.cl_ord_id) {
            if !order.status.is_terminal() {
                if let Some(cum) = report.cum_quantity {
                    order.filled_quantity = cum;
                    order.leaves_quantity = report
                        .leaves_quantity
                        .unwrap_or_else(|| (order.quantity - cum).max(0.0));
                } else if let Some(leaves) = report.leaves_quantity {
                    order.leaves_quantity = leaves;
                }
            }
        }
        let ts = report.timestamp;
        let line = format!(
            "execution {}: {} {:.0} {} @ {:.2}",
            report.exec_id, report.side, report.last_quantity, report.symbol, report.last_price
        );
        trading.seen_exec_ids.insert(report.exec_id.clone());
        trading.executions.push_front(report);
        if trading.executions.len() > self.execution_tail {
            // Retire the evicted id too, so dedup memory stays bounded.
            if let Some(evicted) = trading.executions.pop_back() {
                trading.seen_exec_ids.remove(&evicted.exec_id);
            }
        }
        trading.last_update = Some(ts);
        drop(trading);
        self.push_activity(line);
        ApplyOutcome::Applied
    }

    fn apply_order(&self, update: OrderUpdate, implied_status: OrderStatus) -> ApplyOutcome {
        let ts = update.timestamp.unwrap_or_else(Utc::now);
        let mut trading = self.trading.write();
        if let Some(existing) = trading.orders.get(&update.cl_ord_id) {
            if ts < existing.last_updated {
                return ApplyOutcome::Stale;
            }
        }
        let status = update.status.unwrap_or(implied_status);
        let leaves_quantity = update
            .leaves_quantity
            .unwrap_or_else(|| (update.quantity - update.filled_quantity).max(0.0));
        if update.filled_quantity + leaves_quantity > update.quantity + QTY_EPSILON {
            warn!(
                cl_ord_id = %update.cl_ord_id,
                quantity = update.quantity,
                filled = update.filled_quantity,
                leaves = leaves_quantity,
                "order quantities inconsistent, storing as received"
            );
        }
        let order = Order {
            cl_ord_id: update.cl_ord_id,
            symbol: update.symbol,
            side: update.side,
            order_type: update.order_type,
            quantity: update.quantity,
            price: update.price,
            filled_quantity: update.filled_quantity,
            leaves_quantity,
            status,
            last_updated: ts,
        };
        let line = format!(
            "order {}: {} {} {:.0}/{:.0} {}",
            order.cl_ord_id,
            order.side,
            order.symbol,
            order.filled_quantity,
            order.quantity,
            order.status
        );
        trading.orders.insert(order.cl_ord_id.clone(), order);
        trading.last_update = Some(ts);
        drop(trading);
        self.push_activity(line);
        ApplyOutcome::Applied
    }

    /// Replaces the whole portfolio with `seed`, then replays any events that
    /// were buffered while unseeded, in arrival order.
    ///
    /// Also serves as a full resync: a later seed supersedes everything,
    /// including the data-loss flag.
    pub fn seed(&self, seed: SeedState) {
        let position_count = seed.positions.len();
        let order_count = seed.orders.len();
        let execution_count = seed.executions.len();
        let tick_count = seed.market_data.len();

        let mut gate = self.preseed.lock();
        let now = Utc::now();
        {
            // Both shard locks held so readers never see a half-seeded store.
            let mut market = self.market.write();
            let mut trading = self.trading.write();

            let mut fresh_market = MarketShard::default();
            for tick in seed.market_data {
                fresh_market.ticks.insert(tick.symbol.clone(), tick);
            }
            // Rows keep their own timestamps so buffered live events are not
            // spuriously stale against the seed.
            for mut position in seed.positions {
                if let Some(tick) = fresh_market.ticks.get(&position.symbol) {
                    position.current_price = tick.price;
                }
                position.recompute();
                fresh_market.positions.insert(position.symbol.clone(), position);
            }
            fresh_market.last_update = Some(now);

            let mut fresh_trading = TradingShard::default();
            for order in seed.orders {
                fresh_trading.orders.insert(order.cl_ord_id.clone(), order);
            }
            for report in seed.executions.into_iter().take(self.execution_tail) {
                fresh_trading.seen_exec_ids.insert(report.exec_id.clone());
                fresh_trading.executions.push_back(report);
            }
            fresh_trading.last_update = Some(now);

            *market = fresh_market;
            *trading = fresh_trading;
        }

        let buffered: Vec<PortfolioEvent> = gate.events.drain(..).collect();
        let replayed = buffered.len();
        let dropped = gate.dropped;
        gate.dropped = 0;
        for event in buffered {
            self.apply_now(event);
        }
        self.seeded.store(true, Ordering::Release);
        self.health.clear_data_loss();
        drop(gate);

        self.metrics
            .record_seed(position_count, order_count, execution_count);
        self.push_activity(format!(
            "seeded {position_count} positions, {order_count} orders, {execution_count} executions"
        ));
        info!(
            positions = position_count,
            orders = order_count,
            executions = execution_count,
            ticks = tick_count,
            replayed,
            dropped,
            "store seeded"
        );
    }

    /// Captures an internally consistent copy of the whole portfolio.
    /// Sequences are unique and increase with each call.
    pub fn snapshot(&self) -> PortfolioSnapshot {
        let market = self.market.read();
        let trading = self.trading.read();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        PortfolioSnapshot {
            sequence,
            healthy: self.health.is_healthy(),
            positions: market.positions.clone(),
            orders: trading.orders.clone(),
            executions: trading.executions.iter().cloned().collect(),
            market_data: market.ticks.clone(),
            last_update: market.last_update.max(trading.last_update),
            captured_at: Utc::now(),
            activity: self.activity.lock().iter().cloned().collect(),
        }
    }

    fn push_activity(&self, line: String) {
        let mut log = self.activity.lock();
        if log.len() >= ACTIVITY_LOG_CAPACITY {
            log.pop_back();
        }
        log.push_front(format!("[{}] {}", Utc::now().format("%H:%M:%S"), line));
    }
}

/// The single writer: drains the subscriber queue into the store until
/// shutdown, then applies whatever is already queued and exits.
pub async fn run_apply_loop(
    store: Arc<PortfolioStore>,
    mut events_rx: mpsc::Receiver<PortfolioEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("apply loop started");
    loop {
        tokio::select! {
            maybe_event = events_rx.recv() => match maybe_event {
                Some(event) => apply_one(&store, event),
                None => {
                    info!("event queue closed, apply loop exiting");
                    return;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    while let Ok(event) = events_rx.try_recv() {
        apply_one(&store, event);
    }
    info!("apply loop stopped");
}

fn apply_one(store: &PortfolioStore, event: PortfolioEvent) {
    let kind = event.kind();
    let outcome = store.apply(event);
    debug!(kind, outcome = ?outcome, "event processed");
}
