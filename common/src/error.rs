// Error types for the portfolio blotter services

use crate::types::ChannelKind;
use std::fmt;
use thiserror::Error;

/// Why a payload was rejected by the decoder. The reason is a metrics label,
/// so variants map to stable snake_case names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeReason {
    MalformedJson,
    UnknownType,
    MissingField,
    TypeMismatch,
}

impl DecodeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeReason::MalformedJson => "malformed_json",
            DecodeReason::UnknownType => "unknown_type",
            DecodeReason::MissingField => "missing_field",
            DecodeReason::TypeMismatch => "type_mismatch",
        }
    }
}

impl fmt::Display for DecodeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload that could not be turned into a [`crate::PortfolioEvent`].
/// Decode failures drop the payload; they never tear down the subscription.
#[derive(Debug, Clone, Error)]
#[error("cannot decode {channel} payload ({reason}): {detail}")]
pub struct DecodeError {
    pub channel: ChannelKind,
    pub reason: DecodeReason,
    pub detail: String,
}

impl DecodeError {
    pub fn new(channel: ChannelKind, reason: DecodeReason, detail: impl Into<String>) -> Self {
        Self {
            channel,
            reason,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BlotterError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
}

pub type Result<T> = std::result::Result<T, BlotterError>;
