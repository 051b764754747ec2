//! # Permission Model
//!
//! Per-object access rules and their pure evaluation.
//!
//! ## Evaluation Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Permission Evaluation                               │
//! │                                                                         │
//! │  AccessRequest { service, user, channel }                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  1. Bootstrap: object has no owner?  ──────────▶  CoOwner (open access) │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. Match: user equals record.user                                      │
//! │            OR record.user == All                                        │
//! │            OR (record.user == Owner AND requester is current owner)     │
//! │            AND service equals record.service OR record.service == All   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  3. Scope filter: drop OnlyLocal records when the requesting            │
//! │     channel is LocalAndCloud (local grants never reach the cloud)       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  4. Result = MAX level among remaining matches (default: None)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Record Line Format
//! Records serialize as newline-delimited lines of
//! `id,objectId,serviceId,userId,level,scope,updatedAt` with the wildcard
//! tokens `ALL` (service/user) and `OWNER` (user only).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Permission Level
// =============================================================================

/// Ordered access level granted by a permission record.
///
/// The derived ordering is load-bearing: `None < Status < Actions < CoOwner`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// No access at all.
    #[default]
    None,
    /// May observe state updates.
    Status,
    /// May observe state and issue actions.
    Actions,
    /// Full control, including permission management.
    CoOwner,
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionLevel::None => write!(f, "none"),
            PermissionLevel::Status => write!(f, "status"),
            PermissionLevel::Actions => write!(f, "actions"),
            PermissionLevel::CoOwner => write!(f, "coowner"),
        }
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(PermissionLevel::None),
            "status" => Ok(PermissionLevel::Status),
            "actions" => Ok(PermissionLevel::Actions),
            "coowner" | "co-owner" => Ok(PermissionLevel::CoOwner),
            other => Err(CoreError::InvalidPermissionLevel(other.to_string())),
        }
    }
}

// =============================================================================
// Connection Scope
// =============================================================================

/// Whether a grant (or a session) applies to the local channel only, or to
/// both local and cloud channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnScope {
    /// Grant/session is valid only for direct local connections.
    OnlyLocal,
    /// Grant/session is valid for local and cloud-brokered connections.
    LocalAndCloud,
}

impl std::fmt::Display for ConnScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnScope::OnlyLocal => write!(f, "only_local"),
            ConnScope::LocalAndCloud => write!(f, "local_and_cloud"),
        }
    }
}

impl std::str::FromStr for ConnScope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "only_local" | "local" => Ok(ConnScope::OnlyLocal),
            "local_and_cloud" | "cloud" => Ok(ConnScope::LocalAndCloud),
            other => Err(CoreError::InvalidConnScope(other.to_string())),
        }
    }
}

// =============================================================================
// Selectors
// =============================================================================

/// Service selector of a permission record: an exact service id or the
/// `ALL` wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceSelector {
    /// Matches exactly one service id.
    Exact(String),
    /// Matches every service.
    All,
}

impl ServiceSelector {
    /// Returns true if this selector matches the given service id.
    pub fn matches(&self, service_id: &str) -> bool {
        match self {
            ServiceSelector::Exact(id) => id == service_id,
            ServiceSelector::All => true,
        }
    }

    fn to_token(&self) -> &str {
        match self {
            ServiceSelector::Exact(id) => id,
            ServiceSelector::All => "ALL",
        }
    }

    fn from_token(token: &str) -> Self {
        if token == "ALL" {
            ServiceSelector::All
        } else {
            ServiceSelector::Exact(token.to_string())
        }
    }
}

/// User selector of a permission record: an exact user id, the `ALL`
/// wildcard, or the `OWNER` wildcard resolved against the object's current
/// owner at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSelector {
    /// Matches exactly one user id.
    Exact(String),
    /// Matches every user.
    All,
    /// Matches the object's current owner.
    Owner,
}

impl UserSelector {
    /// Returns true if this selector matches the given user, resolving the
    /// `Owner` wildcard against the object's current owner.
    pub fn matches(&self, user_id: &str, owner: Option<&str>) -> bool {
        match self {
            UserSelector::Exact(id) => id == user_id,
            UserSelector::All => true,
            UserSelector::Owner => owner == Some(user_id),
        }
    }

    fn to_token(&self) -> &str {
        match self {
            UserSelector::Exact(id) => id,
            UserSelector::All => "ALL",
            UserSelector::Owner => "OWNER",
        }
    }

    fn from_token(token: &str) -> Self {
        match token {
            "ALL" => UserSelector::All,
            "OWNER" => UserSelector::Owner,
            other => UserSelector::Exact(other.to_string()),
        }
    }
}

// =============================================================================
// Permission Record
// =============================================================================

/// A single per-object access rule.
///
/// Records are immutable once created: mutation of the object's rule set
/// replaces records wholesale (delete + insert), never edits fields in
/// place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    /// Record id (UUID v4).
    pub id: String,

    /// Object this rule belongs to.
    pub object_id: String,

    /// Service selector (exact id or ALL).
    pub service: ServiceSelector,

    /// User selector (exact id, ALL, or OWNER).
    pub user: UserSelector,

    /// Granted access level.
    pub level: PermissionLevel,

    /// Channel scope this grant applies to.
    pub scope: ConnScope,

    /// When this record was created/replaced.
    pub updated_at: DateTime<Utc>,
}

impl PermissionRecord {
    /// Creates a new record with a fresh id and the current timestamp.
    pub fn new(
        object_id: &str,
        service: ServiceSelector,
        user: UserSelector,
        level: PermissionLevel,
        scope: ConnScope,
    ) -> Self {
        PermissionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            object_id: object_id.to_string(),
            service,
            user,
            level,
            scope,
            updated_at: Utc::now(),
        }
    }

    /// Renders this record as one line of the newline-delimited wire/file
    /// format: `id,objectId,serviceId,userId,level,scope,updatedAt`.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.id,
            self.object_id,
            self.service.to_token(),
            self.user.to_token(),
            self.level,
            self.scope,
            self.updated_at.to_rfc3339()
        )
    }

    /// Parses one record line. Ids must not contain commas.
    pub fn from_line(line: &str) -> CoreResult<Self> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 7 {
            return Err(CoreError::InvalidPermissionRecord(format!(
                "expected 7 fields, got {}",
                fields.len()
            )));
        }

        let updated_at = DateTime::parse_from_rfc3339(fields[6])
            .map_err(|e| CoreError::InvalidPermissionRecord(format!("bad timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(PermissionRecord {
            id: fields[0].to_string(),
            object_id: fields[1].to_string(),
            service: ServiceSelector::from_token(fields[2]),
            user: UserSelector::from_token(fields[3]),
            level: fields[4].parse()?,
            scope: fields[5].parse()?,
            updated_at,
        })
    }
}

// =============================================================================
// Access Request
// =============================================================================

/// The identity and channel asking for access.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    /// Requesting service id.
    pub service_id: &'a str,
    /// Requesting user id.
    pub user_id: &'a str,
    /// Channel the request arrives on.
    pub channel: ConnScope,
}

// =============================================================================
// Evaluation
// =============================================================================

/// Returns the highest access level the record list grants the requester.
///
/// The record list is the sole authority for access decisions. When the
/// object has no owner assigned yet, every request passes at `CoOwner`
/// (open access pre-claim).
pub fn service_permission(
    records: &[PermissionRecord],
    owner: Option<&str>,
    request: AccessRequest<'_>,
) -> PermissionLevel {
    if owner.is_none() {
        return PermissionLevel::CoOwner;
    }

    records
        .iter()
        .filter(|r| r.service.matches(request.service_id))
        .filter(|r| r.user.matches(request.user_id, owner))
        // Local-only grants never extend to the cloud channel.
        .filter(|r| {
            !(r.scope == ConnScope::OnlyLocal && request.channel == ConnScope::LocalAndCloud)
        })
        .map(|r| r.level)
        .max()
        .unwrap_or(PermissionLevel::None)
}

/// Returns true iff the record list grants at least `min` to the requester.
pub fn check_permission(
    records: &[PermissionRecord],
    owner: Option<&str>,
    request: AccessRequest<'_>,
    min: PermissionLevel,
) -> bool {
    service_permission(records, owner, request) >= min
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        service: ServiceSelector,
        user: UserSelector,
        level: PermissionLevel,
        scope: ConnScope,
    ) -> PermissionRecord {
        PermissionRecord::new("obj-1", service, user, level, scope)
    }

    fn request(service: &'static str, user: &'static str, channel: ConnScope) -> AccessRequest<'static> {
        AccessRequest {
            service_id: service,
            user_id: user,
            channel,
        }
    }

    #[test]
    fn test_level_ordering() {
        assert!(PermissionLevel::None < PermissionLevel::Status);
        assert!(PermissionLevel::Status < PermissionLevel::Actions);
        assert!(PermissionLevel::Actions < PermissionLevel::CoOwner);
    }

    #[test]
    fn test_exact_match() {
        let records = vec![record(
            ServiceSelector::Exact("srv-a".into()),
            UserSelector::Exact("usr-a".into()),
            PermissionLevel::Actions,
            ConnScope::LocalAndCloud,
        )];

        let level = service_permission(
            &records,
            Some("owner-1"),
            request("srv-a", "usr-a", ConnScope::OnlyLocal),
        );
        assert_eq!(level, PermissionLevel::Actions);

        let level = service_permission(
            &records,
            Some("owner-1"),
            request("srv-b", "usr-a", ConnScope::OnlyLocal),
        );
        assert_eq!(level, PermissionLevel::None);
    }

    #[test]
    fn test_owner_wildcard_resolves_to_current_owner() {
        let records = vec![record(
            ServiceSelector::All,
            UserSelector::Owner,
            PermissionLevel::CoOwner,
            ConnScope::LocalAndCloud,
        )];

        let as_owner = request("srv-a", "owner-1", ConnScope::LocalAndCloud);
        let as_other = request("srv-a", "usr-b", ConnScope::LocalAndCloud);

        assert_eq!(
            service_permission(&records, Some("owner-1"), as_owner),
            PermissionLevel::CoOwner
        );
        assert_eq!(
            service_permission(&records, Some("owner-1"), as_other),
            PermissionLevel::None
        );
    }

    #[test]
    fn test_highest_matching_level_wins() {
        let records = vec![
            record(
                ServiceSelector::All,
                UserSelector::All,
                PermissionLevel::Status,
                ConnScope::LocalAndCloud,
            ),
            record(
                ServiceSelector::Exact("srv-a".into()),
                UserSelector::Exact("usr-a".into()),
                PermissionLevel::Actions,
                ConnScope::LocalAndCloud,
            ),
        ];

        let level = service_permission(
            &records,
            Some("owner-1"),
            request("srv-a", "usr-a", ConnScope::LocalAndCloud),
        );
        assert_eq!(level, PermissionLevel::Actions);
    }

    // Scenario D: no owner assigned yet means open access at CoOwner level.
    #[test]
    fn test_no_owner_bootstrap_grants_coowner() {
        let records: Vec<PermissionRecord> = Vec::new();

        for channel in [ConnScope::OnlyLocal, ConnScope::LocalAndCloud] {
            let req = request("any-srv", "any-usr", channel);
            assert!(check_permission(
                &records,
                None,
                req,
                PermissionLevel::CoOwner
            ));
        }
    }

    // Scenario E: a local-only blanket grant yields None on the cloud channel.
    #[test]
    fn test_local_only_grant_does_not_reach_cloud() {
        let records = vec![record(
            ServiceSelector::All,
            UserSelector::All,
            PermissionLevel::Status,
            ConnScope::OnlyLocal,
        )];

        let cloud = request("srv-a", "usr-a", ConnScope::LocalAndCloud);
        assert_eq!(
            service_permission(&records, Some("owner-1"), cloud),
            PermissionLevel::None
        );

        // The same grant does apply on the local channel.
        let local = request("srv-a", "usr-a", ConnScope::OnlyLocal);
        assert_eq!(
            service_permission(&records, Some("owner-1"), local),
            PermissionLevel::Status
        );
    }

    // Property: check_permission(min) is true iff service_permission >= min.
    #[test]
    fn test_check_is_consistent_with_get() {
        let records = vec![
            record(
                ServiceSelector::All,
                UserSelector::All,
                PermissionLevel::Status,
                ConnScope::LocalAndCloud,
            ),
            record(
                ServiceSelector::Exact("srv-a".into()),
                UserSelector::Owner,
                PermissionLevel::CoOwner,
                ConnScope::OnlyLocal,
            ),
        ];

        let levels = [
            PermissionLevel::None,
            PermissionLevel::Status,
            PermissionLevel::Actions,
            PermissionLevel::CoOwner,
        ];

        for service in ["srv-a", "srv-b"] {
            for user in ["owner-1", "usr-b"] {
                for channel in [ConnScope::OnlyLocal, ConnScope::LocalAndCloud] {
                    let req = request("", "", channel);
                    let req = AccessRequest {
                        service_id: service,
                        user_id: user,
                        ..req
                    };
                    let granted = service_permission(&records, Some("owner-1"), req);
                    for min in levels {
                        assert_eq!(
                            check_permission(&records, Some("owner-1"), req, min),
                            granted >= min
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_record_line_round_trip() {
        let rec = record(
            ServiceSelector::Exact("srv-a".into()),
            UserSelector::Owner,
            PermissionLevel::Actions,
            ConnScope::OnlyLocal,
        );

        let line = rec.to_line();
        let parsed = PermissionRecord::from_line(&line).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn test_record_line_rejects_malformed_input() {
        assert!(PermissionRecord::from_line("too,few,fields").is_err());
        assert!(PermissionRecord::from_line(
            "id,obj,ALL,ALL,mystery,only_local,2024-01-01T00:00:00Z"
        )
        .is_err());
    }
}
