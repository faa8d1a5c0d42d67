//! Typed progress events carried by the intent stream.
//!
//! Each SSE `data:` payload is one JSON object discriminated by `type`.
//! Decoding is exhaustive: an unknown `type` is a decode error, which the
//! consumer records and skips without ending the stream.

use serde::{Deserialize, Deserializer, Serialize};

use crate::model::PreparedTransaction;

/// One decoded event from the intent progress stream.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// Backend accepted the stream and announced how much work there is.
    Connected {
        total_tokens: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        intent_id: Option<String>,
    },
    /// One work item finished successfully.
    TokenReady {
        processed_tokens: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_tokens: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<serde_json::Value>,
    },
    /// One work item failed; the stream itself continues.
    TokenFailed {
        processed_tokens: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_tokens: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// All work finished and produced the transactions to submit.
    Complete {
        transactions: Vec<PreparedTransaction>,
        #[serde(skip_serializing_if = "Option::is_none")]
        processed_tokens: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_tokens: Option<u64>,
    },
    /// The stream is done and carries no further payload.
    StreamComplete,
    /// The backend gave up on the intent.
    Error { error: String },
}

/// Every field any event may carry, read straight off the JSON object.
///
/// Decoding through a flat struct avoids serde's buffered tagged-enum path,
/// which cannot hand exact wide integers to [`crate::model::Quantity`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    total_tokens: Option<u64>,
    processed_tokens: Option<u64>,
    intent_id: Option<String>,
    token: Option<serde_json::Value>,
    error: Option<String>,
    #[serde(default)]
    transactions: Vec<PreparedTransaction>,
}

fn required<T>(value: Option<T>, kind: &str, field: &str) -> Result<T, String> {
    value.ok_or_else(|| format!("missing field `{field}` in {kind} event"))
}

impl TryFrom<WireEvent> for StreamEvent {
    type Error = String;

    fn try_from(wire: WireEvent) -> Result<Self, String> {
        let WireEvent {
            kind,
            total_tokens,
            processed_tokens,
            intent_id,
            token,
            error,
            transactions,
        } = wire;
        match kind.as_str() {
            "connected" => Ok(Self::Connected {
                total_tokens: required(total_tokens, &kind, "totalTokens")?,
                intent_id,
            }),
            "token_ready" => Ok(Self::TokenReady {
                processed_tokens: required(processed_tokens, &kind, "processedTokens")?,
                total_tokens,
                token,
            }),
            "token_failed" => Ok(Self::TokenFailed {
                processed_tokens: required(processed_tokens, &kind, "processedTokens")?,
                total_tokens,
                token,
                error,
            }),
            "complete" => Ok(Self::Complete {
                transactions,
                processed_tokens,
                total_tokens,
            }),
            "stream_complete" => Ok(Self::StreamComplete),
            "error" => Ok(Self::Error {
                error: required(error, &kind, "error")?,
            }),
            other => Err(format!("unknown event type {other:?}")),
        }
    }
}

impl<'de> Deserialize<'de> for StreamEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEvent::deserialize(deserializer)?;
        Self::try_from(wire).map_err(serde::de::Error::custom)
    }
}

impl StreamEvent {
    /// Decodes one SSE `data:` payload.
    pub fn decode(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Wire name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::TokenReady { .. } => "token_ready",
            Self::TokenFailed { .. } => "token_failed",
            Self::Complete { .. } => "complete",
            Self::StreamComplete => "stream_complete",
            Self::Error { .. } => "error",
        }
    }

    /// Returns true if no further events are expected after this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::StreamComplete | Self::Error { .. }
        )
    }
}

/// A decoded event together with the transport id it arrived under.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedEvent {
    pub transport_event_id: Option<String>,
    pub event: StreamEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_progress_variants() {
        let connected = StreamEvent::decode(r#"{"type":"connected","totalTokens":10}"#)
            .expect("connected");
        assert_eq!(
            connected,
            StreamEvent::Connected {
                total_tokens: 10,
                intent_id: None
            }
        );

        let ready = StreamEvent::decode(
            r#"{"type":"token_ready","processedTokens":4,"token":{"symbol":"USDC"}}"#,
        )
        .expect("ready");
        assert!(matches!(
            ready,
            StreamEvent::TokenReady {
                processed_tokens: 4,
                total_tokens: None,
                ..
            }
        ));

        let failed = StreamEvent::decode(
            r#"{"type":"token_failed","processedTokens":5,"error":"no route"}"#,
        )
        .expect("failed");
        assert_eq!(failed.kind(), "token_failed");
        assert!(!failed.is_terminal());
    }

    #[test]
    fn decodes_complete_with_transactions() {
        let event = StreamEvent::decode(
            r#"{"type":"complete","transactions":[{"to":"0x1111111254eeb25477b68fb85ed929f73a960582","data":"0x","chainId":1}]}"#,
        )
        .expect("complete");
        match event {
            StreamEvent::Complete { transactions, .. } => {
                assert_eq!(transactions.len(), 1);
                assert_eq!(transactions[0].chain_id(), Some(1));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn terminal_variants() {
        assert!(
            StreamEvent::decode(r#"{"type":"stream_complete"}"#)
                .expect("decode")
                .is_terminal()
        );
        assert!(
            StreamEvent::decode(r#"{"type":"error","error":"backend down"}"#)
                .expect("decode")
                .is_terminal()
        );
    }

    #[test]
    fn complete_keeps_wei_amounts_wider_than_u64() {
        let event = StreamEvent::decode(
            r#"{"type":"complete","processedTokens":3,"transactions":[{"to":"0x1111111254eeb25477b68fb85ed929f73a960582","data":"0x","value":100000000000000000000,"gas":21000}]}"#,
        )
        .expect("complete");
        let (transactions, processed_tokens) = match event {
            StreamEvent::Complete {
                transactions,
                processed_tokens,
                ..
            } => (transactions, processed_tokens),
            other => panic!("unexpected event {other:?}"),
        };
        assert_eq!(processed_tokens, Some(3));
        assert_eq!(
            transactions[0].value().map(|q| q.value()),
            Some(primitive_types::U256::exp10(20))
        );
        assert_eq!(transactions[0].gas(), Some(21_000_u64.into()));
    }

    #[test]
    fn unknown_type_and_malformed_json_are_decode_errors() {
        assert!(StreamEvent::decode(r#"{"type":"heartbeat"}"#).is_err());
        assert!(StreamEvent::decode("{not json").is_err());
        assert!(StreamEvent::decode(r#"{"type":"connected"}"#).is_err());
    }
}
