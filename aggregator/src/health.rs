// Subscription health registry feeding the snapshot `healthy` flag.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Lifecycle of one channel subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Subscribing,
    Listening,
    Reconnecting,
    Shutdown,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Subscribing => "subscribing",
            ChannelState::Listening => "listening",
            ChannelState::Reconnecting => "reconnecting",
            ChannelState::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks every subscription's state plus a sticky data-loss flag.
///
/// The aggregate is healthy only when all registered channels are listening
/// and no unrecovered data loss has occurred. The loss flag is cleared by the
/// next full seed, which supersedes whatever was dropped.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    channels: DashMap<String, ChannelState>,
    lossy: AtomicBool,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: &str) {
        self.channels
            .insert(channel.to_string(), ChannelState::Disconnected);
    }

    pub fn set_state(&self, channel: &str, state: ChannelState) {
        let previous = self.channels.insert(channel.to_string(), state);
        if previous == Some(state) {
            return;
        }
        match state {
            ChannelState::Listening => info!(channel, "subscription listening"),
            ChannelState::Reconnecting => warn!(channel, "subscription lost, reconnecting"),
            _ => debug!(channel, state = state.as_str(), "subscription state changed"),
        }
    }

    pub fn state(&self, channel: &str) -> Option<ChannelState> {
        self.channels.get(channel).map(|entry| *entry.value())
    }

    /// Records that buffered events were dropped. Sticky until
    /// [`HealthRegistry::clear_data_loss`].
    pub fn mark_data_loss(&self) {
        if !self.lossy.swap(true, Ordering::Relaxed) {
            warn!("event loss recorded, snapshots degraded until the next full seed");
        }
    }

    pub fn clear_data_loss(&self) {
        if self.lossy.swap(false, Ordering::Relaxed) {
            info!("data loss flag cleared by full seed");
        }
    }

    pub fn data_loss(&self) -> bool {
        self.lossy.load(Ordering::Relaxed)
    }

    pub fn is_healthy(&self) -> bool {
        if self.data_loss() || self.channels.is_empty() {
            return false;
        }
        self.channels
            .iter()
            .all(|entry| *entry.value() == ChannelState::Listening)
    }
}
