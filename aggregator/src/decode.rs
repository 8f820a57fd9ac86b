// Envelope decoding for inbound pub/sub payloads.
//
// Wire format is `{"type": "<EVENT_TYPE>", "data": {...}}`. Some upstream
// publishers json-encode twice, so a payload that parses to a JSON string is
// unwrapped once before the envelope is read.

use blotter_common::{ChannelKind, DecodeError, DecodeReason, PortfolioEvent};
use serde::de::DeserializeOwned;
use serde_json::Value;

const KNOWN_TYPES: [&str; 8] = [
    "POSITION_UPDATE",
    "EXECUTION",
    "ORDER_NEW",
    "ORDER_PARTIALLY_FILLED",
    "ORDER_FILLED",
    "ORDER_CANCELLED",
    "ORDER_REJECTED",
    "MARKET_DATA",
];

/// Event types each channel is allowed to carry. Anything else on the channel
/// is dropped as misrouted rather than applied.
fn admitted_types(channel: ChannelKind) -> &'static [&'static str] {
    match channel {
        ChannelKind::Positions => &["POSITION_UPDATE"],
        ChannelKind::Executions => &["EXECUTION"],
        ChannelKind::Orders => &[
            "ORDER_NEW",
            "ORDER_PARTIALLY_FILLED",
            "ORDER_FILLED",
            "ORDER_CANCELLED",
            "ORDER_REJECTED",
        ],
        ChannelKind::MarketData => &["MARKET_DATA"],
    }
}

/// Decodes one raw payload from `channel` into a [`PortfolioEvent`].
///
/// Failures carry a [`DecodeReason`] precise enough to alert on: broken JSON,
/// an unknown or misrouted event type, a missing required field, or a field of
/// the wrong type.
pub fn decode(channel: ChannelKind, payload: &str) -> Result<PortfolioEvent, DecodeError> {
    let mut value: Value = serde_json::from_str(payload)
        .map_err(|e| DecodeError::new(channel, DecodeReason::MalformedJson, e.to_string()))?;

    // Double-encoded payload: a JSON string whose contents are the envelope.
    if let Value::String(inner) = &value {
        value = serde_json::from_str(inner)
            .map_err(|e| DecodeError::new(channel, DecodeReason::MalformedJson, e.to_string()))?;
    }

    let Value::Object(mut envelope) = value else {
        return Err(DecodeError::new(
            channel,
            DecodeReason::TypeMismatch,
            "envelope is not a JSON object",
        ));
    };

    let event_type = match envelope.remove("type") {
        Some(Value::String(s)) => s,
        Some(_) => {
            return Err(DecodeError::new(
                channel,
                DecodeReason::TypeMismatch,
                "`type` is not a string",
            ))
        }
        None => {
            return Err(DecodeError::new(
                channel,
                DecodeReason::MissingField,
                "missing field `type`",
            ))
        }
    };

    if !KNOWN_TYPES.contains(&event_type.as_str()) {
        return Err(DecodeError::new(
            channel,
            DecodeReason::UnknownType,
            format!("unrecognized event type `{event_type}`"),
        ));
    }
    if !admitted_types(channel).contains(&event_type.as_str()) {
        return Err(DecodeError::new(
            channel,
            DecodeReason::UnknownType,
            format!("event type `{event_type}` not admitted on {channel} channel"),
        ));
    }

    let data = match envelope.remove("data") {
        Some(data @ Value::Object(_)) => data,
        Some(_) => {
            return Err(DecodeError::new(
                channel,
                DecodeReason::TypeMismatch,
                "`data` is not a JSON object",
            ))
        }
        None => {
            return Err(DecodeError::new(
                channel,
                DecodeReason::MissingField,
                "missing field `data`",
            ))
        }
    };

    let event = match event_type.as_str() {
        "POSITION_UPDATE" => PortfolioEvent::PositionUpdate(payload_from(channel, data)?),
        "EXECUTION" => PortfolioEvent::Execution(payload_from(channel, data)?),
        "ORDER_NEW" => PortfolioEvent::OrderNew(payload_from(channel, data)?),
        "ORDER_PARTIALLY_FILLED" => {
            PortfolioEvent::OrderPartiallyFilled(payload_from(channel, data)?)
        }
        "ORDER_FILLED" => PortfolioEvent::OrderFilled(payload_from(channel, data)?),
        "ORDER_CANCELLED" => PortfolioEvent::OrderCancelled(payload_from(channel, data)?),
        "ORDER_REJECTED" => PortfolioEvent::OrderRejected(payload_from(channel, data)?),
        "MARKET_DATA" => PortfolioEvent::MarketData(payload_from(channel, data)?),
        // KNOWN_TYPES and the match arms above cover the same set.
        other => {
            return Err(DecodeError::new(
                channel,
                DecodeReason::UnknownType,
                format!("unrecognized event type `{other}`"),
            ))
        }
    };
    Ok(event)
}

fn payload_from<T: DeserializeOwned>(
    channel: ChannelKind,
    data: Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|e| {
        let detail = e.to_string();
        let reason = if detail.starts_with("missing field") {
            DecodeReason::MissingField
        } else {
            DecodeReason::TypeMismatch
        };
        DecodeError::new(channel, reason, detail)
    })
}
