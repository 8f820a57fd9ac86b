// Portfolio blotter aggregator: unordered pub/sub events in, internally
// consistent snapshots out.
//
// Data flow:
//   Redis pub/sub -> ChannelSubscriber (decode) -> apply queue -> PortfolioStore
//   REST bootstrap -> PortfolioStore::seed
//   SnapshotPublisher -> watch channel -> consumers

pub mod bootstrap;
pub mod decode;
pub mod health;
pub mod publisher;
pub mod store;
pub mod subscriber;

pub use bootstrap::BootstrapLoader;
pub use health::{ChannelState, HealthRegistry};
pub use publisher::{SnapshotPublisher, SnapshotReceiver};
pub use store::{run_apply_loop, ApplyOutcome, PortfolioStore};
pub use subscriber::{
    spawn_ingest, spawn_subscribers, ChannelSubscriber, ChannelTransport, RedisTransport,
};
