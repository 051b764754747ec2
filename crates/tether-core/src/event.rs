//! # State Updates and Action Events
//!
//! Every observable change flowing through the system is an [`EventRecord`]:
//! a strictly increasing id, the component it belongs to, and a payload of
//! exactly two fields, `new` and `old`.
//!
//! ## Wire Encoding
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Event Wire Encoding                                │
//! │                                                                         │
//! │  One event = key=value lines, one pair per line:                        │
//! │                                                                         │
//! │      id=42                                                              │
//! │      path=lamp/brightness                                               │
//! │      kind=range_state                                                   │
//! │      ts=2024-05-01T12:00:00+00:00                                       │
//! │      new=0.750000                                                       │
//! │      old=0.500000                                                       │
//! │                                                                         │
//! │  VALUE ENCODING                                                         │
//! │  ──────────────                                                         │
//! │  booleans  "true" / "false"                                             │
//! │  numerics  fixed-point, exactly 6 decimal digits                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::component::ComponentKind;
use crate::error::{CoreError, CoreResult};

// =============================================================================
// Payload
// =============================================================================

/// Kind-specific `new`/`old` payload of a state update or action event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Boolean transition.
    Bool { new: bool, old: bool },
    /// Numeric-range transition.
    Range { new: f64, old: f64 },
}

impl EventPayload {
    /// Encodes the `new` field for the wire.
    pub fn encode_new(&self) -> String {
        match self {
            EventPayload::Bool { new, .. } => encode_bool(*new),
            EventPayload::Range { new, .. } => encode_number(*new),
        }
    }

    /// Encodes the `old` field for the wire.
    pub fn encode_old(&self) -> String {
        match self {
            EventPayload::Bool { old, .. } => encode_bool(*old),
            EventPayload::Range { old, .. } => encode_number(*old),
        }
    }

    /// Decodes a payload for the given component kind from its encoded
    /// `new`/`old` fields.
    pub fn decode(kind: ComponentKind, new: &str, old: &str) -> CoreResult<Self> {
        if kind.is_boolean() {
            Ok(EventPayload::Bool {
                new: decode_bool(new)?,
                old: decode_bool(old)?,
            })
        } else if kind.is_range() {
            Ok(EventPayload::Range {
                new: decode_number(new)?,
                old: decode_number(old)?,
            })
        } else {
            Err(CoreError::PayloadMismatch {
                kind: kind.to_string(),
                detail: "container components carry no payload".to_string(),
            })
        }
    }
}

// =============================================================================
// Value Codec
// =============================================================================

fn encode_bool(value: bool) -> String {
    (if value { "true" } else { "false" }).to_string()
}

fn decode_bool(token: &str) -> CoreResult<bool> {
    match token {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(CoreError::InvalidPayload(format!(
            "expected 'true' or 'false', got '{}'",
            other
        ))),
    }
}

/// Numerics travel as fixed-point strings with 6 decimal digits.
fn encode_number(value: f64) -> String {
    format!("{:.6}", value)
}

fn decode_number(token: &str) -> CoreResult<f64> {
    token
        .parse::<f64>()
        .map_err(|e| CoreError::InvalidPayload(format!("bad number '{}': {}", token, e)))
}

// =============================================================================
// Event Record
// =============================================================================

/// A registered state update or action event.
///
/// Ids are assigned exactly once at registration and are strictly
/// increasing; they are never reused, which is what makes overlapping
/// re-uploads after a crash safe to deduplicate downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Strictly increasing id, assigned at registration.
    pub id: i64,

    /// Slash-separated component path.
    pub component_path: String,

    /// Component kind the payload belongs to.
    pub component_kind: ComponentKind,

    /// When the event was registered.
    pub timestamp: DateTime<Utc>,

    /// The `new`/`old` transition.
    pub payload: EventPayload,
}

impl EventRecord {
    /// Renders the event as its `key=value` wire lines.
    pub fn to_wire_lines(&self) -> String {
        format!(
            "id={}\npath={}\nkind={}\nts={}\nnew={}\nold={}",
            self.id,
            self.component_path,
            self.component_kind,
            self.timestamp.to_rfc3339(),
            self.payload.encode_new(),
            self.payload.encode_old()
        )
    }

    /// Parses an event from its `key=value` wire lines.
    pub fn from_wire_lines(text: &str) -> CoreResult<Self> {
        let mut id = None;
        let mut path = None;
        let mut kind = None;
        let mut ts = None;
        let mut new = None;
        let mut old = None;

        for line in text.lines() {
            let (key, value) = line.split_once('=').ok_or_else(|| {
                CoreError::InvalidPayload(format!("line without '=': '{}'", line))
            })?;
            match key {
                "id" => {
                    id = Some(value.parse::<i64>().map_err(|e| {
                        CoreError::InvalidPayload(format!("bad id '{}': {}", value, e))
                    })?)
                }
                "path" => path = Some(value.to_string()),
                "kind" => kind = Some(value.parse::<ComponentKind>()?),
                "ts" => {
                    ts = Some(
                        DateTime::parse_from_rfc3339(value)
                            .map_err(|e| {
                                CoreError::InvalidPayload(format!("bad timestamp: {}", e))
                            })?
                            .with_timezone(&Utc),
                    )
                }
                "new" => new = Some(value.to_string()),
                "old" => old = Some(value.to_string()),
                // Unknown keys are ignored for forward compatibility.
                _ => {}
            }
        }

        let kind = kind.ok_or_else(|| CoreError::InvalidPayload("missing 'kind'".into()))?;
        let new = new.ok_or_else(|| CoreError::InvalidPayload("missing 'new'".into()))?;
        let old = old.ok_or_else(|| CoreError::InvalidPayload("missing 'old'".into()))?;

        Ok(EventRecord {
            id: id.ok_or_else(|| CoreError::InvalidPayload("missing 'id'".into()))?,
            component_path: path
                .ok_or_else(|| CoreError::InvalidPayload("missing 'path'".into()))?,
            component_kind: kind,
            timestamp: ts.ok_or_else(|| CoreError::InvalidPayload("missing 'ts'".into()))?,
            payload: EventPayload::decode(kind, &new, &old)?,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(id: i64, payload: EventPayload, kind: ComponentKind) -> EventRecord {
        EventRecord {
            id,
            component_path: "lamp/brightness".to_string(),
            component_kind: kind,
            timestamp: "2024-05-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap(),
            payload,
        }
    }

    #[test]
    fn test_bool_round_trip() {
        let event = sample_event(
            7,
            EventPayload::Bool {
                new: true,
                old: false,
            },
            ComponentKind::BooleanState,
        );

        let wire = event.to_wire_lines();
        assert!(wire.contains("new=true"));
        assert!(wire.contains("old=false"));

        let parsed = EventRecord::from_wire_lines(&wire).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_numeric_round_trip_is_exact_to_six_decimals() {
        let event = sample_event(
            8,
            EventPayload::Range {
                new: 0.123456,
                old: 99.000001,
            },
            ComponentKind::RangeState,
        );

        let wire = event.to_wire_lines();
        assert!(wire.contains("new=0.123456"));
        assert!(wire.contains("old=99.000001"));

        let parsed = EventRecord::from_wire_lines(&wire).unwrap();
        // Re-encoding must reproduce the identical fixed-point strings.
        assert_eq!(parsed.payload.encode_new(), event.payload.encode_new());
        assert_eq!(parsed.payload.encode_old(), event.payload.encode_old());
    }

    #[test]
    fn test_numeric_encoding_pads_to_six_digits() {
        let payload = EventPayload::Range { new: 1.5, old: 2.0 };
        assert_eq!(payload.encode_new(), "1.500000");
        assert_eq!(payload.encode_old(), "2.000000");
    }

    #[test]
    fn test_container_payload_is_rejected() {
        let err = EventPayload::decode(ComponentKind::Container, "true", "false").unwrap_err();
        assert!(matches!(err, CoreError::PayloadMismatch { .. }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(EventPayload::decode(ComponentKind::BooleanState, "yes", "false").is_err());
        assert!(EventPayload::decode(ComponentKind::RangeState, "abc", "1.0").is_err());
        assert!(EventRecord::from_wire_lines("id=1\npath=x").is_err());
    }
}
