// End-to-end aggregator flow over a scripted in-process transport: subscribe,
// decode, buffer or apply, seed, publish, reconnect.

use async_trait::async_trait;
use blotter_aggregator::{
    run_apply_loop, spawn_subscribers, ChannelState, ChannelTransport, HealthRegistry,
    PortfolioStore, SnapshotPublisher,
};
use blotter_common::{
    BlotterConfig, MetricsCollector, OrderStatus, PortfolioEvent, Position, Result, SeedState,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

enum Script {
    /// Yield these payloads, then end the stream (forces a reconnect).
    Stream(Vec<String>),
    /// Yield these payloads, then stay open.
    StreamThenHold(Vec<String>),
}

/// Per-channel scripted transport. Subscribing polls for the next script
/// entry, so tests can script a channel after the subscriber has started.
struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
        })
    }

    fn script(&self, channel: &str, steps: Vec<Script>) {
        self.scripts
            .lock()
            .entry(channel.to_string())
            .or_default()
            .extend(steps);
    }

    fn hold_quiet(&self, channels: &[&str]) {
        for channel in channels {
            self.script(channel, vec![Script::StreamThenHold(Vec::new())]);
        }
    }
}

#[async_trait]
impl ChannelTransport for ScriptedTransport {
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>> {
        loop {
            let next = self
                .scripts
                .lock()
                .get_mut(channel)
                .and_then(|queue| queue.pop_front());
            match next {
                Some(Script::Stream(payloads)) => return Ok(stream::iter(payloads).boxed()),
                Some(Script::StreamThenHold(payloads)) => {
                    return Ok(stream::iter(payloads).chain(stream::pending()).boxed())
                }
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    }
}

struct Harness {
    transport: Arc<ScriptedTransport>,
    store: Arc<PortfolioStore>,
    health: Arc<HealthRegistry>,
    shutdown_tx: watch::Sender<bool>,
}

impl Harness {
    fn config() -> BlotterConfig {
        BlotterConfig {
            reconnect_initial_ms: 20,
            reconnect_max_ms: 40,
            connect_timeout_ms: 500,
            refresh_interval_ms: 10,
            ..BlotterConfig::default()
        }
    }

    /// Starts subscribers for all four channels plus the apply loop.
    fn start(transport: Arc<ScriptedTransport>) -> Harness {
        Self::start_with(transport, Self::config())
    }

    fn start_with(transport: Arc<ScriptedTransport>, config: BlotterConfig) -> Harness {
        let metrics = Arc::new(MetricsCollector::new());
        let health = Arc::new(HealthRegistry::new());
        let store = Arc::new(PortfolioStore::new(
            health.clone(),
            metrics.clone(),
            config.execution_tail,
            config.preseed_buffer_size,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_size);
        spawn_subscribers(
            transport.clone(),
            &config,
            events_tx,
            health.clone(),
            metrics,
            shutdown_rx.clone(),
        );
        tokio::spawn(run_apply_loop(store.clone(), events_rx, shutdown_rx));
        Harness {
            transport,
            store,
            health,
            shutdown_tx,
        }
    }

    fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn position_payload(symbol: &str, quantity: f64, avg_cost: f64, at: &str) -> String {
    format!(
        r#"{{"type":"POSITION_UPDATE","data":{{"symbol":"{symbol}","quantity":{quantity},"avgCost":{avg_cost},"timestamp":"{at}"}}}}"#
    )
}

fn tick_payload(symbol: &str, price: f64, at: &str) -> String {
    format!(
        r#"{{"type":"MARKET_DATA","data":{{"symbol":"{symbol}","price":{price},"timestamp":"{at}"}}}}"#
    )
}

fn order_payload(event_type: &str, cl_ord_id: &str, quantity: f64, filled: f64, at: &str) -> String {
    format!(
        r#"{{"type":"{event_type}","data":{{"clOrdId":"{cl_ord_id}","symbol":"AAPL","side":"BUY","orderType":"LIMIT","quantity":{quantity},"price":150.25,"filledQuantity":{filled},"timestamp":"{at}"}}}}"#
    )
}

fn execution_payload(exec_id: &str, cl_ord_id: &str, cum: f64, at: &str) -> String {
    format!(
        r#"{{"type":"EXECUTION","data":{{"execId":"{exec_id}","clOrdId":"{cl_ord_id}","symbol":"AAPL","side":"BUY","lastPrice":150.3,"lastQuantity":10.0,"cumQuantity":{cum},"timestamp":"{at}"}}}}"#
    )
}

// Event timestamps sit a little ahead of the seed rows (which are stamped at
// construction time) so staleness filtering never kicks in by accident.
fn ts_in(secs: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::seconds(secs)).to_rfc3339()
}

fn seed_position(symbol: &str, quantity: f64, avg_cost: f64) -> Position {
    let mut position = Position::new(symbol, chrono::Utc::now());
    position.quantity = quantity;
    position.avg_cost = avg_cost;
    position.current_price = avg_cost;
    position
}

#[tokio::test]
async fn seeded_position_revalued_by_live_tick() {
    let transport = ScriptedTransport::new();
    transport.hold_quiet(&["positions:updates", "executions:updates", "orders:updates"]);
    transport.script(
        "marketdata:updates",
        vec![Script::StreamThenHold(vec![tick_payload(
            "AAPL",
            155.0,
            &ts_in(2),
        )])],
    );

    let harness = Harness::start(transport);
    harness.store.seed(SeedState {
        positions: vec![seed_position("AAPL", 100.0, 150.25)],
        ..SeedState::default()
    });

    let store = harness.store.clone();
    wait_until("tick applied to seeded position", move || {
        let snapshot = store.snapshot();
        snapshot
            .positions
            .get("AAPL")
            .map(|p| (p.market_value - 15_500.0).abs() < 1e-9)
            .unwrap_or(false)
    })
    .await;

    let snapshot = harness.store.snapshot();
    let position = &snapshot.positions["AAPL"];
    assert!((position.unrealized_pnl - 475.0).abs() < 1e-9);
    assert_eq!(snapshot.market_data["AAPL"].price, 155.0);
    harness.stop();
}

#[tokio::test]
async fn events_before_seed_are_replayed_on_top_of_it() {
    let transport = ScriptedTransport::new();
    transport.hold_quiet(&["executions:updates", "orders:updates"]);
    transport.script(
        "positions:updates",
        vec![Script::StreamThenHold(vec![position_payload(
            "AAPL",
            40.0,
            151.0,
            &ts_in(1),
        )])],
    );
    transport.script(
        "marketdata:updates",
        vec![Script::StreamThenHold(vec![tick_payload(
            "AAPL",
            155.0,
            &ts_in(2),
        )])],
    );

    let harness = Harness::start(transport);

    // Both events land in the pre-seed buffer; nothing is applied yet.
    let store = harness.store.clone();
    wait_until("events buffered before seed", move || {
        store.pending_events() == 2
    })
    .await;
    assert!(!harness.store.is_seeded());
    assert!(harness.store.snapshot().positions.is_empty());

    harness.store.seed(SeedState {
        positions: vec![seed_position("AAPL", 100.0, 150.25)],
        ..SeedState::default()
    });

    // The seed landed first, then the buffered update and the tick.
    let snapshot = harness.store.snapshot();
    let position = &snapshot.positions["AAPL"];
    assert_eq!(position.quantity, 40.0);
    assert_eq!(position.avg_cost, 151.0);
    assert_eq!(position.current_price, 155.0);
    assert!((position.market_value - 6_200.0).abs() < 1e-9);
    assert_eq!(harness.store.pending_events(), 0);
    harness.stop();
}

#[tokio::test]
async fn stream_drop_degrades_health_until_resubscribed() {
    let transport = ScriptedTransport::new();
    transport.hold_quiet(&["positions:updates", "executions:updates", "orders:updates"]);
    // First subscription yields one tick then drops; the retry holds.
    transport.script(
        "marketdata:updates",
        vec![
            Script::Stream(vec![tick_payload("AAPL", 154.0, &ts_in(1))]),
            Script::StreamThenHold(vec![tick_payload("AAPL", 155.5, &ts_in(2))]),
        ],
    );

    // Wide backoff so the degraded window spans several publisher ticks.
    let config = BlotterConfig {
        reconnect_initial_ms: 100,
        reconnect_max_ms: 200,
        ..Harness::config()
    };
    let harness = Harness::start_with(transport, config);
    harness.store.seed(SeedState::default());

    let (publisher, mut snapshots) = SnapshotPublisher::new(
        harness.store.clone(),
        Duration::from_millis(10),
        Arc::new(MetricsCollector::new()),
    );
    let (pub_shutdown_tx, pub_shutdown_rx) = watch::channel(false);
    tokio::spawn(publisher.run(pub_shutdown_rx));

    let mut saw_degraded = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("feed never recovered with the second tick");
        }
        snapshots.changed().await.unwrap();
        let snapshot = snapshots.borrow().clone().unwrap();
        if !snapshot.healthy {
            saw_degraded = true;
        }
        let recovered = snapshot
            .market_data
            .get("AAPL")
            .map(|tick| tick.price == 155.5)
            .unwrap_or(false);
        if recovered && snapshot.healthy {
            break;
        }
    }
    assert!(saw_degraded, "reconnect gap never showed as degraded");
    assert_eq!(
        harness.health.state("marketdata:updates"),
        Some(ChannelState::Listening)
    );

    let _ = pub_shutdown_tx.send(true);
    harness.stop();
}

#[tokio::test]
async fn all_topics_merge_into_one_consistent_snapshot() {
    let transport = ScriptedTransport::new();
    transport.script(
        "positions:updates",
        vec![Script::StreamThenHold(vec![position_payload(
            "AAPL",
            100.0,
            150.25,
            &ts_in(1),
        )])],
    );
    transport.script(
        "orders:updates",
        vec![Script::StreamThenHold(vec![order_payload(
            "ORDER_NEW",
            "ORD-1",
            100.0,
            0.0,
            &ts_in(1),
        )])],
    );
    transport.script(
        "marketdata:updates",
        vec![Script::StreamThenHold(vec![tick_payload(
            "AAPL",
            155.0,
            &ts_in(2),
        )])],
    );

    let harness = Harness::start(transport);
    harness.store.seed(SeedState::default());

    // Hold back the execution until the order is in, then let it refresh the
    // order's fill quantities.
    let store = harness.store.clone();
    wait_until("order applied", move || {
        store.snapshot().orders.contains_key("ORD-1")
    })
    .await;
    harness.transport.script(
        "executions:updates",
        vec![Script::StreamThenHold(vec![execution_payload(
            "E-1",
            "ORD-1",
            40.0,
            &ts_in(3),
        )])],
    );

    let store = harness.store.clone();
    wait_until("all topics merged and feed healthy", move || {
        let snapshot = store.snapshot();
        snapshot.executions.len() == 1 && snapshot.healthy
    })
    .await;

    let snapshot = harness.store.snapshot();
    let position = &snapshot.positions["AAPL"];
    assert!((position.market_value - 15_500.0).abs() < 1e-9);
    assert!((position.unrealized_pnl - 475.0).abs() < 1e-9);

    let order = &snapshot.orders["ORD-1"];
    assert_eq!(order.status, OrderStatus::New);
    assert_eq!(order.filled_quantity, 40.0);
    assert_eq!(order.leaves_quantity, 60.0);

    assert_eq!(snapshot.executions[0].exec_id, "E-1");
    assert!(snapshot.healthy);
    harness.stop();
}

#[tokio::test]
async fn garbage_payloads_do_not_stall_a_topic() {
    let transport = ScriptedTransport::new();
    transport.hold_quiet(&["positions:updates", "executions:updates", "orders:updates"]);
    transport.script(
        "marketdata:updates",
        vec![Script::StreamThenHold(vec![
            "not json at all".to_string(),
            r#"{"type":"MARKET_DATA","data":{"symbol":"AAPL","price":"broken"}}"#.to_string(),
            r#"{"type":"POSITION_UPDATE","data":{"symbol":"AAPL"}}"#.to_string(),
            tick_payload("AAPL", 155.0, &ts_in(2)),
        ])],
    );

    let harness = Harness::start(transport);
    harness.store.seed(SeedState::default());

    let store = harness.store.clone();
    wait_until("valid tick applied after garbage", move || {
        store
            .snapshot()
            .market_data
            .get("AAPL")
            .map(|tick| tick.price == 155.0)
            .unwrap_or(false)
    })
    .await;

    // Only the valid tick made it into state.
    let snapshot = harness.store.snapshot();
    assert!(snapshot.positions.is_empty());
    assert_eq!(snapshot.market_data.len(), 1);
    harness.stop();
}

#[tokio::test]
async fn decoded_events_round_trip_the_envelope_shape() {
    // The envelope produced by serializing an event is accepted back by the
    // pipeline, which pins the wire contract.
    let tick = tick_payload("AAPL", 155.0, "2024-03-01T10:00:02Z");
    let event: PortfolioEvent = serde_json::from_str(&tick).unwrap();
    assert_eq!(event.kind(), "MARKET_DATA");
    let encoded = serde_json::to_string(&event).unwrap();
    assert!(encoded.contains(r#""type":"MARKET_DATA""#));
    assert!(encoded.contains(r#""symbol":"AAPL""#));
}
