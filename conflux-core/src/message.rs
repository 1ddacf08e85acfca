//! Records as they flow in from the log. Every record is one of three kinds:
//! a committed transaction, a resolved-timestamp watermark, or a membership
//! announcement. The decoder is a pure function over the log payload; the
//! emitters guarantee the encoding, so a record that fails to decode is a
//! programmer bug and aborts the consumer.

use bytes::Bytes;
use serde::Deserialize;

use crate::{Error, Result};

/// Position of a record in the log, assigned at ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCoordinate {
    pub partition: i32,
    pub offset: i64,
}

/// A committed transaction emitted at logical time `ts`.
/// NOTE: It is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Commit timestamp, a hybrid-logical-clock value.
    pub ts: u64,
    /// The CDC node that published this transaction.
    pub emitter: String,
    /// Opaque payload, forwarded to the sink untouched.
    pub payload: Bytes,
}

/// An emitter's assertion that it has published every transaction with
/// `t <= ts` on all partitions it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTs {
    pub ts: u64,
    pub emitter: String,
}

/// Announcement of the current active emitter set. `expected_signals` copies
/// of the same announcement arrive at this consumer, one per claimed
/// partition group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipUpdate {
    pub emitters: Vec<String>,
    pub expected_signals: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Txn(Transaction),
    Watermark(ResolvedTs),
    Meta(MembershipUpdate),
}

// Wire envelope. The payload of a txn record is an arbitrary JSON document
// produced upstream; it is re-serialized into bytes so the sink never
// depends on the wire encoding.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Envelope {
    Txn {
        ts: u64,
        emitter: String,
        payload: serde_json::Value,
    },
    Watermark {
        ts: u64,
        emitter: String,
    },
    Meta {
        emitters: Vec<String>,
        expected_signals: u32,
    },
}

impl Record {
    /// Decodes one log payload. Deterministic, no I/O.
    pub fn decode(payload: &[u8]) -> Result<Record> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| Error::Decode(format!("Malformed record: {e}")))?;

        Ok(match envelope {
            Envelope::Txn {
                ts,
                emitter,
                payload,
            } => {
                let payload = serde_json::to_vec(&payload)
                    .map_err(|e| Error::Decode(format!("Re-encoding txn payload: {e}")))?;
                Record::Txn(Transaction {
                    ts,
                    emitter,
                    payload: payload.into(),
                })
            }
            Envelope::Watermark { ts, emitter } => Record::Watermark(ResolvedTs { ts, emitter }),
            Envelope::Meta {
                emitters,
                expected_signals,
            } => Record::Meta(MembershipUpdate {
                emitters,
                expected_signals,
            }),
        })
    }

    /// Record kind as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Txn(_) => "txn",
            Record::Watermark(_) => "watermark",
            Record::Meta(_) => "meta",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_txn() {
        let payload = br#"{"kind":"txn","ts":42,"emitter":"cdc-1","payload":{"table":"t","rows":[1,2]}}"#;
        let record = Record::decode(payload).expect("should decode");
        let Record::Txn(txn) = record else {
            panic!("expected a txn record");
        };
        assert_eq!(txn.ts, 42);
        assert_eq!(txn.emitter, "cdc-1");
        let doc: serde_json::Value =
            serde_json::from_slice(&txn.payload).expect("payload should stay valid JSON");
        assert_eq!(doc["table"], "t");
    }

    #[test]
    fn test_decode_watermark() {
        let payload = br#"{"kind":"watermark","ts":100,"emitter":"cdc-2"}"#;
        let record = Record::decode(payload).expect("should decode");
        assert_eq!(
            record,
            Record::Watermark(ResolvedTs {
                ts: 100,
                emitter: "cdc-2".to_string()
            })
        );
        assert_eq!(record.kind(), "watermark");
    }

    #[test]
    fn test_decode_meta() {
        let payload = br#"{"kind":"meta","emitters":["cdc-1","cdc-2"],"expected_signals":3}"#;
        let record = Record::decode(payload).expect("should decode");
        assert_eq!(
            record,
            Record::Meta(MembershipUpdate {
                emitters: vec!["cdc-1".to_string(), "cdc-2".to_string()],
                expected_signals: 3,
            })
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Record::decode(b"not json").is_err());
        assert!(Record::decode(br#"{"kind":"unknown","ts":1}"#).is_err());
        assert!(Record::decode(br#"{"kind":"txn","ts":"not-a-number"}"#).is_err());
    }
}
