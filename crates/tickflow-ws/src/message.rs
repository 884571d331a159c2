//! WebSocket message types.
//!
//! Every inbound text frame is decoded once, at the connection boundary, into
//! an [`InboundFrame`]. Frames that cannot be decoded become
//! [`InboundFrame::Malformed`] instead of an error so the read loop never
//! stops on bad input.

use crate::error::WsResult;
use crate::subscription::SubscriptionKind;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tickflow_core::{
    BuyReceipt, ContractId, ContractRequest, ContractType, DurationUnit, Settlement, TradeOutcome,
};

// ============================================================================
// Outbound requests
// ============================================================================

/// Outgoing request to the venue.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WsRequest {
    /// `{"ticks": "R_100", "subscribe": 1}`
    Ticks {
        ticks: String,
        subscribe: u8,
        req_id: u64,
    },
    /// `{"balance": 1, "subscribe": 1}`
    Balance {
        balance: u8,
        subscribe: u8,
        req_id: u64,
    },
    /// `{"proposal_open_contract": 1, "subscribe": 1}`
    Portfolio {
        proposal_open_contract: u8,
        subscribe: u8,
        req_id: u64,
    },
    /// `{"forget": "<stream id>"}`
    Forget { forget: String },
    /// `{"ping": 1}`
    Ping { ping: u8 },
    /// `{"buy": 1, "price": 10, "parameters": {...}}`
    Buy {
        buy: u8,
        #[serde(with = "rust_decimal::serde::float")]
        price: Decimal,
        parameters: BuyParameters,
        req_id: u64,
    },
}

/// Contract parameters of a buy request.
#[derive(Debug, Clone, Serialize)]
pub struct BuyParameters {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub basis: String,
    pub contract_type: ContractType,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barrier: Option<String>,
}

impl WsRequest {
    /// Create a subscribe request for a subscription kind.
    pub fn subscribe(kind: &SubscriptionKind, req_id: u64) -> Self {
        match kind {
            SubscriptionKind::Ticks(symbol) => Self::Ticks {
                ticks: symbol.clone(),
                subscribe: 1,
                req_id,
            },
            SubscriptionKind::Balance => Self::Balance {
                balance: 1,
                subscribe: 1,
                req_id,
            },
            SubscriptionKind::Portfolio => Self::Portfolio {
                proposal_open_contract: 1,
                subscribe: 1,
                req_id,
            },
        }
    }

    /// Create a forget (unsubscribe) request for a venue stream id.
    pub fn forget(stream_id: impl Into<String>) -> Self {
        Self::Forget {
            forget: stream_id.into(),
        }
    }

    /// Create a ping request.
    pub fn ping() -> Self {
        Self::Ping { ping: 1 }
    }

    /// Create a buy request for a contract placement.
    ///
    /// The stake is used both as the contract amount and as the maximum
    /// accepted price.
    pub fn buy(request: &ContractRequest, req_id: u64) -> Self {
        Self::Buy {
            buy: 1,
            price: request.stake,
            parameters: BuyParameters {
                amount: request.stake,
                basis: "stake".to_string(),
                contract_type: request.contract_type,
                currency: request.currency.clone(),
                duration: request.duration,
                duration_unit: request.duration_unit,
                symbol: request.symbol.clone(),
                barrier: request.barrier.map(|b| b.to_string()),
            },
            req_id,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Inbound payloads
// ============================================================================

/// Tick stream payload (`msg_type: "tick"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickPayload {
    pub symbol: String,
    pub quote: Decimal,
    pub epoch: i64,
    /// Display precision of the quote.
    #[serde(default)]
    pub pip_size: Option<u32>,
}

/// Balance stream payload (`msg_type: "balance"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalancePayload {
    pub balance: Decimal,
    pub currency: String,
    #[serde(default)]
    pub loginid: Option<String>,
}

/// Contract lifecycle status reported by the portfolio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Open,
    Won,
    Lost,
    Sold,
    #[serde(other)]
    Unknown,
}

/// Open-contract stream payload (`msg_type: "proposal_open_contract"`).
///
/// The venue sends an empty object when no contract is open, so every field
/// is optional.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ContractPayload {
    #[serde(default)]
    pub contract_id: Option<ContractId>,
    #[serde(default)]
    pub status: Option<ContractStatus>,
    #[serde(default)]
    pub profit: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_sold: bool,
    #[serde(default)]
    pub buy_price: Option<Decimal>,
    #[serde(default)]
    pub entry_spot: Option<Decimal>,
    #[serde(default)]
    pub exit_tick: Option<Decimal>,
    #[serde(default)]
    pub underlying: Option<String>,
    #[serde(default)]
    pub contract_type: Option<String>,
    #[serde(default)]
    pub sell_time: Option<i64>,
}

impl ContractPayload {
    /// Whether the contract has reached a final state.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            Some(ContractStatus::Won | ContractStatus::Lost | ContractStatus::Sold)
        ) || self.is_sold
    }

    /// Build a settlement if this update is final.
    ///
    /// `won`/`lost` map directly; a plain `sold` is classified by the sign
    /// of the profit.
    pub fn settlement(&self) -> Option<Settlement> {
        if !self.is_settled() {
            return None;
        }
        let contract_id = self.contract_id.clone()?;
        let profit = self.profit?;
        let outcome = match self.status {
            Some(ContractStatus::Won) => TradeOutcome::Win,
            Some(ContractStatus::Lost) => TradeOutcome::Loss,
            _ if profit > Decimal::ZERO => TradeOutcome::Win,
            _ => TradeOutcome::Loss,
        };
        let settled_at = self
            .sell_time
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .unwrap_or_else(Utc::now);

        Some(Settlement {
            contract_id,
            profit,
            outcome,
            entry_price: self.entry_spot,
            exit_price: self.exit_tick,
            settled_at,
        })
    }
}

/// Buy receipt payload (`msg_type: "buy"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuyPayload {
    pub contract_id: ContractId,
    pub buy_price: Decimal,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub longcode: Option<String>,
}

impl BuyPayload {
    pub fn receipt(&self) -> BuyReceipt {
        BuyReceipt {
            contract_id: self.contract_id.clone(),
            buy_price: self.buy_price,
            start_time: self
                .start_time
                .and_then(|t| Utc.timestamp_opt(t, 0).single()),
        }
    }
}

/// Venue error body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

// ============================================================================
// Inbound frames
// ============================================================================

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Tick {
        tick: TickPayload,
        stream_id: Option<String>,
    },
    Balance {
        balance: BalancePayload,
        stream_id: Option<String>,
    },
    Contract {
        contract: ContractPayload,
        stream_id: Option<String>,
    },
    Buy {
        buy: BuyPayload,
        req_id: Option<u64>,
    },
    /// Heartbeat reply.
    Pong,
    /// Acknowledgement of a forget request.
    ForgetAck,
    Error {
        error: ApiError,
        msg_type: Option<String>,
        req_id: Option<u64>,
    },
    /// Well-formed frame of a type this client does not handle.
    Unrecognized { msg_type: String },
    /// Frame that could not be decoded.
    Malformed { reason: String },
}

impl InboundFrame {
    /// Short label for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tick { .. } => "tick",
            Self::Balance { .. } => "balance",
            Self::Contract { .. } => "contract",
            Self::Buy { .. } => "buy",
            Self::Pong => "pong",
            Self::ForgetAck => "forget",
            Self::Error { .. } => "error",
            Self::Unrecognized { .. } => "unrecognized",
            Self::Malformed { .. } => "malformed",
        }
    }

    /// Subscription kind and venue stream id carried by a stream frame.
    pub fn stream_binding(&self) -> Option<(SubscriptionKind, &str)> {
        match self {
            Self::Tick {
                tick,
                stream_id: Some(id),
            } => Some((SubscriptionKind::Ticks(tick.symbol.clone()), id.as_str())),
            Self::Balance {
                stream_id: Some(id),
                ..
            } => Some((SubscriptionKind::Balance, id.as_str())),
            Self::Contract {
                stream_id: Some(id),
                ..
            } => Some((SubscriptionKind::Portfolio, id.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    msg_type: Option<String>,
    #[serde(default)]
    req_id: Option<u64>,
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    subscription: Option<StreamRef>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

/// Decode a raw text frame.
pub fn decode_frame(text: &str) -> InboundFrame {
    match try_decode(text) {
        Ok(frame) => frame,
        Err(reason) => InboundFrame::Malformed { reason },
    }
}

fn try_decode(text: &str) -> Result<InboundFrame, String> {
    let mut envelope: Envelope = serde_json::from_str(text).map_err(|e| e.to_string())?;

    if let Some(error) = envelope.error {
        return Ok(InboundFrame::Error {
            error,
            msg_type: envelope.msg_type,
            req_id: envelope.req_id,
        });
    }

    let msg_type = envelope
        .msg_type
        .take()
        .ok_or_else(|| "missing msg_type".to_string())?;
    let stream_id = envelope.subscription.map(|s| s.id);

    let frame = match msg_type.as_str() {
        "tick" => InboundFrame::Tick {
            tick: take_payload(&mut envelope.rest, "tick")?,
            stream_id,
        },
        "balance" => InboundFrame::Balance {
            balance: take_payload(&mut envelope.rest, "balance")?,
            stream_id,
        },
        "proposal_open_contract" => InboundFrame::Contract {
            contract: take_payload(&mut envelope.rest, "proposal_open_contract")?,
            stream_id,
        },
        "buy" => InboundFrame::Buy {
            buy: take_payload(&mut envelope.rest, "buy")?,
            req_id: envelope.req_id,
        },
        "ping" => InboundFrame::Pong,
        "forget" | "forget_all" => InboundFrame::ForgetAck,
        _ => InboundFrame::Unrecognized { msg_type },
    };

    Ok(frame)
}

fn take_payload<T: DeserializeOwned>(
    rest: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<T, String> {
    let value = rest
        .remove(key)
        .ok_or_else(|| format!("missing {key} payload"))?;
    serde_json::from_value(value).map_err(|e| format!("invalid {key} payload: {e}"))
}

/// Accept `0`/`1` as well as `true`/`false`.
fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(u64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
    })
}
