//! # Permission Engine
//!
//! Evaluates and mutates the object's access rules.
//!
//! ## Mutation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Permission Mutation                                  │
//! │                                                                         │
//! │  add / update / remove                                                  │
//! │       │                                                                 │
//! │       ▼  (runs synchronously on the caller's task)                      │
//! │  1. Build the replacement record list (update = remove-old + add-new)   │
//! │  2. Persist the list wholesale (temp file + rename)                     │
//! │  3. Fan the new set out to every connected session, each filtered       │
//! │     by the new rules (non-blocking queuing, no remote-ack wait)         │
//! │  4. Emit an audit record                                                │
//! │                                                                         │
//! │  The record list is the sole authority for access decisions; the        │
//! │  cloud client's resync callback replays step 3 after every reconnect.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use tether_core::{
    check_permission, service_permission, AccessRequest, ConnScope, CoreError, PermissionLevel,
    PermissionRecord,
};
use tether_store::PermissionFileStore;

use crate::error::LinkResult;
use crate::session::SessionRegistry;

// =============================================================================
// Audit Records
// =============================================================================

/// What a permission mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// A record was added.
    Add,
    /// A record was replaced (remove-old + add-new).
    Update,
    /// A record was removed.
    Remove,
    /// The full set was re-sent to sessions without mutation.
    Resync,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::Add => write!(f, "add"),
            AuditAction::Update => write!(f, "update"),
            AuditAction::Remove => write!(f, "remove"),
            AuditAction::Resync => write!(f, "resync"),
        }
    }
}

/// One entry of the permission audit trail, retained until restart.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Audit entry id (UUID v4).
    pub id: String,
    /// What happened.
    pub action: AuditAction,
    /// Size of the record list after the mutation.
    pub record_count: usize,
    /// Sessions notified by the fan-out.
    pub notified: usize,
    /// When it happened.
    pub at: DateTime<Utc>,
}

// =============================================================================
// Permission Engine
// =============================================================================

/// The object's permission authority: evaluation, mutation, fan-out.
pub struct PermissionEngine {
    object_id: String,
    owner: RwLock<Option<String>>,
    records: RwLock<Vec<PermissionRecord>>,
    store: PermissionFileStore,
    registry: Arc<SessionRegistry>,
    audit: StdMutex<Vec<AuditRecord>>,
}

impl PermissionEngine {
    /// Creates the engine, loading persisted records (with stale-identity
    /// rewrite handled by the store).
    pub fn new(
        object_id: &str,
        owner: Option<String>,
        store: PermissionFileStore,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let records = store.load();
        info!(
            object_id,
            records = records.len(),
            "Permission engine initialized"
        );

        PermissionEngine {
            object_id: object_id.to_string(),
            owner: RwLock::new(owner),
            records: RwLock::new(records),
            store,
            registry,
            audit: StdMutex::new(Vec::new()),
        }
    }

    /// Object this engine guards.
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Returns the highest level granted to the requester.
    pub async fn permission_for(
        &self,
        service_id: &str,
        user_id: &str,
        channel: ConnScope,
    ) -> PermissionLevel {
        let records = self.records.read().await;
        let owner = self.owner.read().await;
        service_permission(
            &records,
            owner.as_deref(),
            AccessRequest {
                service_id,
                user_id,
                channel,
            },
        )
    }

    /// Guards an action request: the requester must hold at least
    /// Actions on this channel.
    pub async fn authorize_action(
        &self,
        service_id: &str,
        user_id: &str,
        channel: ConnScope,
    ) -> LinkResult<()> {
        if self
            .check(service_id, user_id, channel, PermissionLevel::Actions)
            .await
        {
            Ok(())
        } else {
            Err(crate::error::LinkError::PermissionDenied {
                service_id: service_id.to_string(),
                user_id: user_id.to_string(),
                required: PermissionLevel::Actions,
            })
        }
    }

    /// Returns true iff the requester is granted at least `min`.
    pub async fn check(
        &self,
        service_id: &str,
        user_id: &str,
        channel: ConnScope,
        min: PermissionLevel,
    ) -> bool {
        let records = self.records.read().await;
        let owner = self.owner.read().await;
        check_permission(
            &records,
            owner.as_deref(),
            AccessRequest {
                service_id,
                user_id,
                channel,
            },
            min,
        )
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Adds a record and commits the replacement list.
    pub async fn add(&self, record: PermissionRecord) -> LinkResult<()> {
        let mut next = self.records.read().await.clone();
        next.push(record);
        self.commit(next, AuditAction::Add).await
    }

    /// Replaces the record with `record_id` by `replacement`, modeled as
    /// remove-old + add-new to keep the audit trail simple.
    pub async fn update(&self, record_id: &str, replacement: PermissionRecord) -> LinkResult<()> {
        let current = self.records.read().await.clone();
        if !current.iter().any(|r| r.id == record_id) {
            return Err(CoreError::InvalidPermissionRecord(format!(
                "unknown record id '{}'",
                record_id
            ))
            .into());
        }

        let mut next: Vec<PermissionRecord> =
            current.into_iter().filter(|r| r.id != record_id).collect();
        next.push(replacement);
        self.commit(next, AuditAction::Update).await
    }

    /// Removes the record with `record_id` and commits.
    pub async fn remove(&self, record_id: &str) -> LinkResult<()> {
        let current = self.records.read().await.clone();
        if !current.iter().any(|r| r.id == record_id) {
            return Err(CoreError::InvalidPermissionRecord(format!(
                "unknown record id '{}'",
                record_id
            ))
            .into());
        }

        let next: Vec<PermissionRecord> =
            current.into_iter().filter(|r| r.id != record_id).collect();
        self.commit(next, AuditAction::Remove).await
    }

    /// Assigns or clears the object's owner and resyncs sessions (OWNER
    /// wildcard records resolve differently now).
    pub async fn set_owner(&self, owner: Option<String>) -> LinkResult<()> {
        {
            let mut current = self.owner.write().await;
            if *current == owner {
                return Ok(());
            }
            info!(object_id = %self.object_id, owner = ?owner, "Object owner changed");
            *current = owner;
        }
        self.resync_all().await;
        Ok(())
    }

    /// Returns the current owner.
    pub async fn owner(&self) -> Option<String> {
        self.owner.read().await.clone()
    }

    /// Re-sends the current permission set to every connected session.
    /// Invoked by the cloud client's resync callback after reconnects.
    pub async fn resync_all(&self) -> usize {
        let records = self.records.read().await.clone();
        let owner = self.owner.read().await.clone();
        let notified = self
            .registry
            .fan_out_permissions(&records, owner.as_deref())
            .await;
        self.push_audit(AuditAction::Resync, records.len(), notified);
        notified
    }

    /// Snapshot of the current record list.
    pub async fn records(&self) -> Vec<PermissionRecord> {
        self.records.read().await.clone()
    }

    /// Snapshot of the audit trail.
    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.audit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Replaces the list wholesale: persist, fan out, audit.
    async fn commit(&self, next: Vec<PermissionRecord>, action: AuditAction) -> LinkResult<()> {
        self.store.save(&next)?;

        let owner = self.owner.read().await.clone();
        let notified = self
            .registry
            .fan_out_permissions(&next, owner.as_deref())
            .await;

        let count = next.len();
        *self.records.write().await = next;

        self.push_audit(action, count, notified);
        debug!(action = %action, records = count, notified, "Permission list committed");
        Ok(())
    }

    fn push_audit(&self, action: AuditAction, record_count: usize, notified: usize) {
        let record = AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            record_count,
            notified,
            at: Utc::now(),
        };
        info!(
            audit_id = %record.id,
            action = %action,
            records = record_count,
            notified,
            "Permission audit"
        );
        self.audit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
