//! # Wire Protocol Messages
//!
//! Message types exchanged between peers, sessions, and gateways.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Wire Protocol Messages                             │
//! │                                                                         │
//! │  HANDSHAKE FLOW                                                        │
//! │  ──────────────                                                        │
//! │  CLIENT ───► Hello { service, user, instance, scope, version }         │
//! │  SERVER ◄─── Welcome { objectId, serverTime }                          │
//! │         or   Reject { code, reason }                                   │
//! │                                                                         │
//! │  STATE / ACTION EVENTS                                                 │
//! │  ─────────────────────                                                 │
//! │  Either ◄──► Event { id, path, kind, ts, new, old }                    │
//! │                                                                         │
//! │  PERMISSION RESYNC (server → session, filtered per session)            │
//! │  ──────────────────────────────────────────────────────────            │
//! │  SERVER ───► Permissions { granted, record* }                          │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  Both   ◄──► Ping { ts } / Pong { ts }                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! One message per frame; a frame body is `key=value` lines. The first
//! line is the discriminator `msg=<type>`:
//! ```text
//! msg=hello
//! service=srv-1
//! user=usr-1
//! instance=inst-1
//! scope=only_local
//! version=1
//! ```

use tether_core::{ConnScope, EventRecord, PermissionLevel, PermissionRecord, PROTOCOL_VERSION};

use crate::error::{LinkError, LinkResult};

// =============================================================================
// Reject Codes
// =============================================================================

/// Reject code for credential rejection.
pub const REJECT_AUTH: &str = "auth";

/// Reject code for a second connection on an already-connected identity.
pub const REJECT_DUPLICATE_SESSION: &str = "duplicate_session";

/// Reject code for protocol version mismatch.
pub const REJECT_VERSION: &str = "version";

// =============================================================================
// Main Message Enum
// =============================================================================

/// All wire protocol messages.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Initial message from a connecting client.
    Hello {
        service_id: String,
        user_id: String,
        instance_id: String,
        scope: ConnScope,
        version: u32,
    },

    /// Successful handshake response.
    Welcome {
        object_id: String,
        server_time: String,
    },

    /// Handshake refusal.
    Reject { code: String, reason: String },

    /// A state update or action event.
    Event(EventRecord),

    /// A session's filtered view of the permission set after a mutation.
    Permissions {
        granted: PermissionLevel,
        records: Vec<PermissionRecord>,
    },

    /// Keepalive request.
    Ping { ts: String },

    /// Keepalive response.
    Pong { ts: String },
}

impl WireMessage {
    /// Returns the message type name as a string (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "hello",
            WireMessage::Welcome { .. } => "welcome",
            WireMessage::Reject { .. } => "reject",
            WireMessage::Event(_) => "event",
            WireMessage::Permissions { .. } => "permissions",
            WireMessage::Ping { .. } => "ping",
            WireMessage::Pong { .. } => "pong",
        }
    }

    /// Creates a Hello message with the current protocol version.
    pub fn hello(service_id: &str, user_id: &str, instance_id: &str, scope: ConnScope) -> Self {
        WireMessage::Hello {
            service_id: service_id.to_string(),
            user_id: user_id.to_string(),
            instance_id: instance_id.to_string(),
            scope,
            version: PROTOCOL_VERSION,
        }
    }

    /// Creates a Reject message.
    pub fn reject(code: &str, reason: &str) -> Self {
        WireMessage::Reject {
            code: code.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a Ping with the current time.
    pub fn ping() -> Self {
        WireMessage::Ping {
            ts: chrono::Utc::now().to_rfc3339(),
        }
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Renders the message body (without the frame delimiter).
    pub fn encode(&self) -> String {
        match self {
            WireMessage::Hello {
                service_id,
                user_id,
                instance_id,
                scope,
                version,
            } => format!(
                "msg=hello\nservice={}\nuser={}\ninstance={}\nscope={}\nversion={}",
                service_id, user_id, instance_id, scope, version
            ),
            WireMessage::Welcome {
                object_id,
                server_time,
            } => format!("msg=welcome\nobject={}\ntime={}", object_id, server_time),
            WireMessage::Reject { code, reason } => {
                format!("msg=reject\ncode={}\nreason={}", code, reason)
            }
            WireMessage::Event(event) => format!("msg=event\n{}", event.to_wire_lines()),
            WireMessage::Permissions { granted, records } => {
                let mut body = format!("msg=permissions\ngranted={}", granted);
                for record in records {
                    body.push_str("\nrecord=");
                    body.push_str(&record.to_line());
                }
                body
            }
            WireMessage::Ping { ts } => format!("msg=ping\nts={}", ts),
            WireMessage::Pong { ts } => format!("msg=pong\nts={}", ts),
        }
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    /// Parses a message body.
    pub fn decode(body: &str) -> LinkResult<Self> {
        let mut lines = body.lines();
        let first = lines
            .next()
            .ok_or_else(|| LinkError::Request("empty message".to_string()))?;
        let kind = first
            .strip_prefix("msg=")
            .ok_or_else(|| LinkError::Request(format!("missing 'msg=' discriminator: '{}'", first)))?;

        let rest: Vec<&str> = lines.collect();

        match kind {
            "hello" => {
                let fields = parse_fields(&rest)?;
                Ok(WireMessage::Hello {
                    service_id: require(&fields, "service")?,
                    user_id: require(&fields, "user")?,
                    instance_id: require(&fields, "instance")?,
                    scope: require(&fields, "scope")?
                        .parse()
                        .map_err(|e: tether_core::CoreError| LinkError::Request(e.to_string()))?,
                    version: require(&fields, "version")?
                        .parse()
                        .map_err(|e| LinkError::Request(format!("bad version: {}", e)))?,
                })
            }
            "welcome" => {
                let fields = parse_fields(&rest)?;
                Ok(WireMessage::Welcome {
                    object_id: require(&fields, "object")?,
                    server_time: require(&fields, "time")?,
                })
            }
            "reject" => {
                let fields = parse_fields(&rest)?;
                Ok(WireMessage::Reject {
                    code: require(&fields, "code")?,
                    reason: require(&fields, "reason")?,
                })
            }
            "event" => {
                let event = EventRecord::from_wire_lines(&rest.join("\n"))
                    .map_err(|e| LinkError::Request(e.to_string()))?;
                Ok(WireMessage::Event(event))
            }
            "permissions" => {
                let mut granted = None;
                let mut records = Vec::new();
                for line in &rest {
                    if let Some(value) = line.strip_prefix("granted=") {
                        granted = Some(value.parse().map_err(|e: tether_core::CoreError| {
                            LinkError::Request(e.to_string())
                        })?);
                    } else if let Some(value) = line.strip_prefix("record=") {
                        records.push(
                            PermissionRecord::from_line(value)
                                .map_err(|e| LinkError::Request(e.to_string()))?,
                        );
                    }
                }
                Ok(WireMessage::Permissions {
                    granted: granted
                        .ok_or_else(|| LinkError::Request("missing 'granted'".to_string()))?,
                    records,
                })
            }
            "ping" => {
                let fields = parse_fields(&rest)?;
                Ok(WireMessage::Ping {
                    ts: require(&fields, "ts")?,
                })
            }
            "pong" => {
                let fields = parse_fields(&rest)?;
                Ok(WireMessage::Pong {
                    ts: require(&fields, "ts")?,
                })
            }
            other => Err(LinkError::Request(format!("unknown message type '{}'", other))),
        }
    }
}

fn parse_fields<'a>(lines: &[&'a str]) -> LinkResult<Vec<(&'a str, &'a str)>> {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            line.split_once('=')
                .ok_or_else(|| LinkError::Request(format!("line without '=': '{}'", line)))
        })
        .collect()
}

fn require(fields: &[(&str, &str)], key: &str) -> LinkResult<String> {
    fields
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
        .ok_or_else(|| LinkError::Request(format!("missing '{}'", key)))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{ComponentKind, EventPayload, ServiceSelector, UserSelector};

    #[test]
    fn test_hello_round_trip() {
        let hello = WireMessage::hello("srv-1", "usr-1", "inst-1", ConnScope::OnlyLocal);
        let body = hello.encode();
        assert!(body.starts_with("msg=hello\n"));

        let parsed = WireMessage::decode(&body).unwrap();
        assert_eq!(parsed, hello);
    }

    #[test]
    fn test_event_round_trip() {
        let event = EventRecord {
            id: 12,
            component_path: "lamp/brightness".to_string(),
            component_kind: ComponentKind::RangeState,
            timestamp: "2024-05-01T12:00:00Z".parse().unwrap(),
            payload: EventPayload::Range {
                new: 0.75,
                old: 0.5,
            },
        };

        let body = WireMessage::Event(event.clone()).encode();
        assert!(body.contains("new=0.750000"));

        let parsed = WireMessage::decode(&body).unwrap();
        assert_eq!(parsed, WireMessage::Event(event));
    }

    #[test]
    fn test_permissions_round_trip() {
        let record = PermissionRecord::new(
            "obj-1",
            ServiceSelector::All,
            UserSelector::Exact("usr-1".into()),
            PermissionLevel::Status,
            ConnScope::OnlyLocal,
        );
        let msg = WireMessage::Permissions {
            granted: PermissionLevel::Status,
            records: vec![record],
        };

        let parsed = WireMessage::decode(&msg.encode()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_reject_round_trip() {
        let msg = WireMessage::reject(REJECT_DUPLICATE_SESSION, "identity already connected");
        let parsed = WireMessage::decode(&msg.encode()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_decode_rejects_malformed_bodies() {
        assert!(WireMessage::decode("").is_err());
        assert!(WireMessage::decode("hello=world").is_err());
        assert!(WireMessage::decode("msg=mystery").is_err());
        assert!(WireMessage::decode("msg=hello\nservice=x").is_err());
    }

    #[test]
    fn test_ping_pong() {
        let ping = WireMessage::ping();
        let body = ping.encode();
        assert!(body.starts_with("msg=ping"));
        let parsed = WireMessage::decode(&body).unwrap();
        assert_eq!(parsed.type_name(), "ping");
    }
}
