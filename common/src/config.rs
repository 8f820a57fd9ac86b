// Environment-driven configuration. Defaults match the standard deployment
// (local Redis, FIX client REST on 8081, 1s refresh).

use crate::types::ChannelKind;
use std::str::FromStr;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_or_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Redis channel names, one per topic.
#[derive(Debug, Clone)]
pub struct ChannelNames {
    pub positions: String,
    pub executions: String,
    pub orders: String,
    pub market_data: String,
}

impl ChannelNames {
    pub fn name(&self, kind: ChannelKind) -> &str {
        match kind {
            ChannelKind::Positions => &self.positions,
            ChannelKind::Executions => &self.executions,
            ChannelKind::Orders => &self.orders,
            ChannelKind::MarketData => &self.market_data,
        }
    }
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            positions: "positions:updates".to_string(),
            executions: "executions:updates".to_string(),
            orders: "orders:updates".to_string(),
            market_data: "marketdata:updates".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlotterConfig {
    pub redis_url: String,
    /// Base URL of the FIX client REST API used for the bootstrap seed.
    pub bootstrap_base_url: String,
    pub channels: ChannelNames,
    /// Snapshot publisher cadence.
    pub refresh_interval_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub connect_timeout_ms: u64,
    /// Capacity of the subscriber -> apply loop queue.
    pub event_queue_size: usize,
    /// Capacity of the pre-seed holding buffer.
    pub preseed_buffer_size: usize,
    /// How many recent executions the store retains.
    pub execution_tail: usize,
    pub bootstrap_timeout_ms: u64,
    pub bootstrap_attempts: u32,
    pub bootstrap_execution_limit: usize,
    /// Start from an empty portfolio when the bootstrap source is down.
    pub allow_empty_seed: bool,
    pub shutdown_grace_ms: u64,
}

impl Default for BlotterConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            bootstrap_base_url: "http://localhost:8081".to_string(),
            channels: ChannelNames::default(),
            refresh_interval_ms: 1000,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            connect_timeout_ms: 5000,
            event_queue_size: 1024,
            preseed_buffer_size: 1024,
            execution_tail: 100,
            bootstrap_timeout_ms: 5000,
            bootstrap_attempts: 3,
            bootstrap_execution_limit: 50,
            allow_empty_seed: false,
            shutdown_grace_ms: 3000,
        }
    }
}

impl BlotterConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env_or_str("REDIS_URL", &defaults.redis_url),
            bootstrap_base_url: env_or_str("FIX_CLIENT_URL", &defaults.bootstrap_base_url),
            channels: ChannelNames {
                positions: env_or_str("CHANNEL_POSITIONS", &defaults.channels.positions),
                executions: env_or_str("CHANNEL_EXECUTIONS", &defaults.channels.executions),
                orders: env_or_str("CHANNEL_ORDERS", &defaults.channels.orders),
                market_data: env_or_str("CHANNEL_MARKET_DATA", &defaults.channels.market_data),
            },
            refresh_interval_ms: env_or("REFRESH_INTERVAL_MS", defaults.refresh_interval_ms),
            reconnect_initial_ms: env_or("RECONNECT_INITIAL_MS", defaults.reconnect_initial_ms),
            reconnect_max_ms: env_or("RECONNECT_MAX_MS", defaults.reconnect_max_ms),
            connect_timeout_ms: env_or("CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms),
            event_queue_size: env_or("EVENT_QUEUE_SIZE", defaults.event_queue_size),
            preseed_buffer_size: env_or("PRESEED_BUFFER_SIZE", defaults.preseed_buffer_size),
            execution_tail: env_or("EXECUTION_TAIL", defaults.execution_tail),
            bootstrap_timeout_ms: env_or("BOOTSTRAP_TIMEOUT_MS", defaults.bootstrap_timeout_ms),
            bootstrap_attempts: env_or("BOOTSTRAP_ATTEMPTS", defaults.bootstrap_attempts),
            bootstrap_execution_limit: env_or(
                "BOOTSTRAP_EXECUTION_LIMIT",
                defaults.bootstrap_execution_limit,
            ),
            allow_empty_seed: env_or("ALLOW_EMPTY_SEED", defaults.allow_empty_seed),
            shutdown_grace_ms: env_or("SHUTDOWN_GRACE_MS", defaults.shutdown_grace_ms),
        }
    }
}
