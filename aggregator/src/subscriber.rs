// One subscriber task per channel. Each owns its connection, decodes off the
// shared apply queue's critical path, and reconnects with backoff on any
// transport failure. A timeout is just another transport failure.

use async_trait::async_trait;
use blotter_common::{
    BackoffPolicy, BlotterConfig, ChannelKind, MetricsCollector, PortfolioEvent, Result,
};
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::decode::decode;
use crate::health::{ChannelState, HealthRegistry};
use crate::store::PortfolioStore;

/// Anything that can yield an ordered stream of raw payloads for a named
/// channel. The stream ending, or `subscribe` failing, means the transport
/// dropped and the subscriber should reconnect.
#[async_trait]
pub trait ChannelTransport: Send + Sync + 'static {
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>>;
}

/// Redis pub/sub transport. Each subscription gets its own connection, so one
/// slow or broken channel cannot stall the others.
pub struct RedisTransport {
    client: redis::Client,
}

impl RedisTransport {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChannelTransport for RedisTransport {
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>> {
        let connection = self.client.get_async_connection().await?;
        let mut pubsub = connection.into_pubsub();
        pubsub.subscribe(channel).await?;
        let stream = pubsub.into_on_message().filter_map(|message| async move {
            match message.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!("discarding non-text pub/sub payload: {e}");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Subscription state machine for a single channel.
pub struct ChannelSubscriber<T: ChannelTransport> {
    kind: ChannelKind,
    channel: String,
    transport: Arc<T>,
    events_tx: mpsc::Sender<PortfolioEvent>,
    health: Arc<HealthRegistry>,
    backoff: BackoffPolicy,
    connect_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl<T: ChannelTransport> ChannelSubscriber<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: ChannelKind,
        channel: String,
        transport: Arc<T>,
        events_tx: mpsc::Sender<PortfolioEvent>,
        health: Arc<HealthRegistry>,
        backoff: BackoffPolicy,
        connect_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        health.register(&channel);
        Self {
            kind,
            channel,
            transport,
            events_tx,
            health,
            backoff,
            connect_timeout,
            metrics,
        }
    }

    /// Runs until shutdown: subscribe, listen, and on any failure back off
    /// and resubscribe. Decoded events go to the apply queue in receipt order.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(channel = %self.channel, "subscriber starting");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.health.set_state(&self.channel, ChannelState::Subscribing);
            let subscribed = tokio::select! {
                result = timeout(self.connect_timeout, self.transport.subscribe(&self.channel)) => {
                    match result {
                        Ok(Ok(stream)) => Some(stream),
                        Ok(Err(e)) => {
                            warn!(channel = %self.channel, "subscribe failed: {e}");
                            None
                        }
                        Err(_) => {
                            warn!(
                                channel = %self.channel,
                                timeout_ms = self.connect_timeout.as_millis() as u64,
                                "subscribe timed out"
                            );
                            None
                        }
                    }
                }
                _ = shutdown.changed() => break,
            };

            if let Some(stream) = subscribed {
                self.backoff.reset();
                self.health.set_state(&self.channel, ChannelState::Listening);
                if !self.listen(stream, &mut shutdown).await {
                    break;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            self.health.set_state(&self.channel, ChannelState::Reconnecting);
            self.metrics.record_reconnect(&self.channel);
            let delay = self.backoff.next_delay();
            debug!(
                channel = %self.channel,
                delay_ms = delay.as_millis() as u64,
                "backing off before resubscribe"
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        self.health.set_state(&self.channel, ChannelState::Shutdown);
        info!(channel = %self.channel, "subscriber stopped");
    }

    /// Pumps one live stream. Returns true when the stream ended and the
    /// subscriber should reconnect, false when it should stop for good.
    async fn listen(
        &self,
        mut stream: BoxStream<'static, String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            tokio::select! {
                maybe_payload = stream.next() => match maybe_payload {
                    Some(payload) => {
                        if !self.dispatch(payload).await {
                            return false;
                        }
                    }
                    None => {
                        warn!(channel = %self.channel, "subscription stream ended");
                        return true;
                    }
                },
                _ = shutdown.changed() => return false,
            }
        }
    }

    /// Decode failures drop the payload and keep listening; only a closed
    /// apply queue stops the subscriber.
    async fn dispatch(&self, payload: String) -> bool {
        match decode(self.kind, &payload) {
            Ok(event) => {
                if self.events_tx.send(event).await.is_err() {
                    warn!(channel = %self.channel, "apply queue closed, stopping subscriber");
                    return false;
                }
                true
            }
            Err(e) => {
                self.metrics
                    .record_decode_error(self.kind.as_str(), e.reason.as_str());
                warn!(channel = %self.channel, "dropping payload: {e}");
                true
            }
        }
    }
}

/// Spawns one subscriber task per configured channel, all feeding the same
/// apply queue.
pub fn spawn_subscribers<T: ChannelTransport>(
    transport: Arc<T>,
    config: &BlotterConfig,
    events_tx: mpsc::Sender<PortfolioEvent>,
    health: Arc<HealthRegistry>,
    metrics: Arc<MetricsCollector>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    ChannelKind::ALL
        .iter()
        .map(|kind| {
            let subscriber = ChannelSubscriber::new(
                *kind,
                config.channels.name(*kind).to_string(),
                transport.clone(),
                events_tx.clone(),
                health.clone(),
                BackoffPolicy::from_millis(config.reconnect_initial_ms, config.reconnect_max_ms),
                Duration::from_millis(config.connect_timeout_ms),
                metrics.clone(),
            );
            tokio::spawn(subscriber.run(shutdown.clone()))
        })
        .collect()
}

/// Wires the full ingest pipeline: subscriber tasks plus the apply loop.
pub fn spawn_ingest<T: ChannelTransport>(
    transport: Arc<T>,
    config: &BlotterConfig,
    store: Arc<PortfolioStore>,
    health: Arc<HealthRegistry>,
    metrics: Arc<MetricsCollector>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let (events_tx, events_rx) = mpsc::channel(config.event_queue_size);
    let mut tasks = spawn_subscribers(
        transport,
        config,
        events_tx,
        health,
        metrics,
        shutdown.clone(),
    );
    tasks.push(tokio::spawn(crate::store::run_apply_loop(
        store, events_rx, shutdown,
    )));
    tasks
}
