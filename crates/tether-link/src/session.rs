//! # Service Sessions
//!
//! A session is one (service, user, instance) identity connected to the
//! object, locally or through the cloud. At most one *live* session exists
//! per exact identity triple; the same service+user with a different
//! instance id is an independent, simultaneously valid session.
//!
//! Disconnected sessions keep their record for statistics until process
//! restart.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use tether_core::{
    service_permission, AccessRequest, ConnScope, PermissionLevel, PermissionRecord,
};

use crate::error::{LinkError, LinkResult};
use crate::framing::Framing;
use crate::protocol::WireMessage;

// =============================================================================
// Session Identity
// =============================================================================

/// The logical identity of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Requesting service.
    pub service_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Service instance (one user may run several instances).
    pub instance_id: String,
}

impl SessionKey {
    /// Creates a session key.
    pub fn new(service_id: &str, user_id: &str, instance_id: &str) -> Self {
        SessionKey {
            service_id: service_id.to_string(),
            user_id: user_id.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.service_id, self.user_id, self.instance_id)
    }
}

// =============================================================================
// Session Record
// =============================================================================

/// One session's bookkeeping record.
#[derive(Debug, Clone)]
pub struct Session {
    /// Logical identity.
    pub key: SessionKey,
    /// Channel scope this session connected on.
    pub scope: ConnScope,
    /// Permission level granted at handshake / last resync.
    pub granted: PermissionLevel,
    /// Connection id (UUID v4), unique per physical connection.
    pub connection_id: String,
    /// When the session connected.
    pub connected_at: DateTime<Utc>,
    /// When the session disconnected (`None` while live).
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates a live session record.
    pub fn new(key: SessionKey, scope: ConnScope, granted: PermissionLevel) -> Self {
        Session {
            key,
            scope,
            granted,
            connection_id: uuid::Uuid::new_v4().to_string(),
            connected_at: Utc::now(),
            disconnected_at: None,
        }
    }
}

/// A live session plus its delivery channel and framing.
struct SessionSlot {
    session: Session,
    outgoing: mpsc::Sender<WireMessage>,
    framing: Framing,
}

// =============================================================================
// Registry Stats
// =============================================================================

/// Snapshot of the registry for status queries.
#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    /// Currently connected sessions.
    pub active: usize,
    /// Disconnected session records retained since startup.
    pub retained: usize,
}

// =============================================================================
// Session Registry
// =============================================================================

/// All sessions connected to one object, shared by the session server and
/// the permission engine.
pub struct SessionRegistry {
    active: RwLock<HashMap<SessionKey, SessionSlot>>,
    past: RwLock<Vec<Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        SessionRegistry {
            active: RwLock::new(HashMap::new()),
            past: RwLock::new(Vec::new()),
        }
    }

    /// Registers a live session. A second connection with the exact same
    /// identity triple while one is connected is refused.
    pub async fn register(
        &self,
        session: Session,
        outgoing: mpsc::Sender<WireMessage>,
        framing: Framing,
    ) -> LinkResult<()> {
        let mut active = self.active.write().await;

        if active.contains_key(&session.key) {
            warn!(session = %session.key, "Refusing duplicate session");
            return Err(LinkError::DuplicateSession {
                service_id: session.key.service_id.clone(),
                user_id: session.key.user_id.clone(),
                instance_id: session.key.instance_id.clone(),
            });
        }

        info!(session = %session.key, scope = %session.scope, "Session connected");
        active.insert(
            session.key.clone(),
            SessionSlot {
                session,
                outgoing,
                framing,
            },
        );
        Ok(())
    }

    /// Removes a live session, retaining its record for statistics.
    pub async fn disconnect(&self, key: &SessionKey) {
        let slot = self.active.write().await.remove(key);
        if let Some(mut slot) = slot {
            slot.session.disconnected_at = Some(Utc::now());
            info!(session = %key, "Session disconnected");
            self.past.write().await.push(slot.session);
        }
    }

    /// Number of currently connected sessions.
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Registry statistics.
    pub async fn stats(&self) -> SessionStats {
        SessionStats {
            active: self.active.read().await.len(),
            retained: self.past.read().await.len(),
        }
    }

    /// Returns a snapshot of the live session records.
    pub async fn active_sessions(&self) -> Vec<Session> {
        self.active
            .read()
            .await
            .values()
            .map(|slot| slot.session.clone())
            .collect()
    }

    /// Fans a freshly mutated permission set out to every connected
    /// session, filtered per session by the new rules, and updates each
    /// session's granted level. Delivery is non-blocking queuing: a
    /// session with a full queue is skipped with a warning, never awaited.
    pub async fn fan_out_permissions(
        &self,
        records: &[PermissionRecord],
        owner: Option<&str>,
    ) -> usize {
        let mut active = self.active.write().await;
        let mut notified = 0usize;

        for slot in active.values_mut() {
            let request = AccessRequest {
                service_id: &slot.session.key.service_id,
                user_id: &slot.session.key.user_id,
                channel: slot.session.scope,
            };
            let granted = service_permission(records, owner, request);
            slot.session.granted = granted;

            let visible: Vec<PermissionRecord> = records
                .iter()
                .filter(|r| r.service.matches(&slot.session.key.service_id))
                .filter(|r| r.user.matches(&slot.session.key.user_id, owner))
                .filter(|r| {
                    !(r.scope == ConnScope::OnlyLocal
                        && slot.session.scope == ConnScope::LocalAndCloud)
                })
                .cloned()
                .collect();

            let message = WireMessage::Permissions {
                granted,
                records: visible,
            };

            match slot.outgoing.try_send(message) {
                Ok(()) => notified += 1,
                Err(e) => {
                    warn!(session = %slot.session.key, error = %e, "Permission fan-out skipped session");
                }
            }
        }

        debug!(notified, "Permission set fanned out");
        notified
    }

    /// Fans a state/action event out to every session currently granted at
    /// least Status.
    pub async fn fan_out_event(&self, event: &tether_core::EventRecord) -> usize {
        let active = self.active.read().await;
        let mut notified = 0usize;

        for slot in active.values() {
            if slot.session.granted < PermissionLevel::Status {
                continue;
            }
            if slot
                .outgoing
                .try_send(WireMessage::Event(event.clone()))
                .is_ok()
            {
                notified += 1;
            }
        }

        notified
    }

    /// Applies the server's update-if-matching-old-default framing policy:
    /// sessions still on `old` move to `new`, every other session keeps
    /// its explicitly chosen framing.
    pub async fn update_framing_matching(&self, old: &Framing, new: &Framing) -> usize {
        let mut active = self.active.write().await;
        let mut updated = 0usize;

        for slot in active.values_mut() {
            if slot.framing == *old {
                slot.framing = new.clone();
                updated += 1;
            }
        }

        debug!(updated, "Session framing defaults updated");
        updated
    }

    /// Returns the framing currently assigned to a live session.
    pub async fn session_framing(&self, key: &SessionKey) -> Option<Framing> {
        self.active.read().await.get(key).map(|s| s.framing.clone())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{ServiceSelector, UserSelector};

    fn session(service: &str, user: &str, instance: &str, scope: ConnScope) -> Session {
        Session::new(SessionKey::new(service, user, instance), scope, PermissionLevel::None)
    }

    fn channel() -> (mpsc::Sender<WireMessage>, mpsc::Receiver<WireMessage>) {
        mpsc::channel(8)
    }

    // Scenario: the second connection with an identical triple is refused;
    // the active count stays 1.
    #[tokio::test]
    async fn test_duplicate_identity_is_refused() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        registry
            .register(
                session("srv", "usr", "inst", ConnScope::OnlyLocal),
                tx1,
                Framing::default(),
            )
            .await
            .unwrap();

        let err = registry
            .register(
                session("srv", "usr", "inst", ConnScope::OnlyLocal),
                tx2,
                Framing::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LinkError::DuplicateSession { .. }));
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_identity_different_instance_is_independent() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        registry
            .register(
                session("srv", "usr", "inst-a", ConnScope::OnlyLocal),
                tx1,
                Framing::default(),
            )
            .await
            .unwrap();
        registry
            .register(
                session("srv", "usr", "inst-b", ConnScope::OnlyLocal),
                tx2,
                Framing::default(),
            )
            .await
            .unwrap();

        assert_eq!(registry.active_count().await, 2);
    }

    #[tokio::test]
    async fn test_disconnected_session_record_is_retained() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        let key = SessionKey::new("srv", "usr", "inst");

        registry
            .register(
                session("srv", "usr", "inst", ConnScope::OnlyLocal),
                tx,
                Framing::default(),
            )
            .await
            .unwrap();
        registry.disconnect(&key).await;

        let stats = registry.stats().await;
        assert_eq!(stats.active, 0);
        assert_eq!(stats.retained, 1);

        // The identity may reconnect after disconnecting.
        let (tx2, _rx2) = channel();
        registry
            .register(
                session("srv", "usr", "inst", ConnScope::OnlyLocal),
                tx2,
                Framing::default(),
            )
            .await
            .unwrap();
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_fan_out_filters_per_session() {
        let registry = SessionRegistry::new();
        let (local_tx, mut local_rx) = channel();
        let (cloud_tx, mut cloud_rx) = channel();

        registry
            .register(
                session("srv", "usr", "local", ConnScope::OnlyLocal),
                local_tx,
                Framing::default(),
            )
            .await
            .unwrap();
        registry
            .register(
                session("srv", "usr", "cloud", ConnScope::LocalAndCloud),
                cloud_tx,
                Framing::default(),
            )
            .await
            .unwrap();

        // One blanket local-only Status grant.
        let records = vec![PermissionRecord::new(
            "obj-1",
            ServiceSelector::All,
            UserSelector::All,
            PermissionLevel::Status,
            ConnScope::OnlyLocal,
        )];

        let notified = registry.fan_out_permissions(&records, Some("owner")).await;
        assert_eq!(notified, 2);

        // The local session sees the grant.
        match local_rx.recv().await.unwrap() {
            WireMessage::Permissions { granted, records } => {
                assert_eq!(granted, PermissionLevel::Status);
                assert_eq!(records.len(), 1);
            }
            other => panic!("unexpected message {:?}", other),
        }

        // The cloud session gets an empty view and None.
        match cloud_rx.recv().await.unwrap() {
            WireMessage::Permissions { granted, records } => {
                assert_eq!(granted, PermissionLevel::None);
                assert!(records.is_empty());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_framing_update_only_touches_matching_sessions() {
        let registry = SessionRegistry::new();
        let default = Framing::default();
        let custom = Framing::new(crate::framing::Charset::Latin1, b"||").unwrap();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        registry
            .register(
                session("srv", "usr", "a", ConnScope::OnlyLocal),
                tx1,
                default.clone(),
            )
            .await
            .unwrap();
        registry
            .register(
                session("srv", "usr", "b", ConnScope::OnlyLocal),
                tx2,
                custom.clone(),
            )
            .await
            .unwrap();

        let new_default = Framing::new(crate::framing::Charset::Utf8, b"\n\n").unwrap();
        let updated = registry.update_framing_matching(&default, &new_default).await;
        assert_eq!(updated, 1);

        let key_b = SessionKey::new("srv", "usr", "b");
        assert_eq!(registry.session_framing(&key_b).await.unwrap(), custom);
    }
}
