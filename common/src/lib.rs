// Shared types and utilities for the portfolio blotter services

pub mod backoff;
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use backoff::{retry_with_backoff, BackoffPolicy};
pub use config::{BlotterConfig, ChannelNames};
pub use error::{BlotterError, DecodeError, DecodeReason, Result};
pub use metrics::MetricsCollector;
pub use types::*;
