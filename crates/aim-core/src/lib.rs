//! Core domain model for the Asset Inventory Mirror.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "aim-core";

/// Assignment target carried on an external asset record.
///
/// The external service discriminates with a free-form `type` string; anything
/// that is not a user or a department (locations, retired links) collapses to
/// `Unassigned` so downstream resolution stays an exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignedTo {
    User { id: i64, name: Option<String> },
    Department { name: Option<String> },
    Unassigned,
}

/// Mirrored asset row, keyed by the external service's stable id.
///
/// `department` and `assigned_user_name` are derived during resolution, never
/// read back from a previously persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub name: String,
    pub tag: String,
    pub serial: Option<String>,
    pub model: Option<String>,
    pub model_no: Option<String>,
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub department: Option<String>,
    pub assigned_user_name: Option<String>,
    pub status: Option<String>,
    pub status_type: Option<String>,
    pub warranty_months: Option<i64>,
    pub warranty_expires: Option<NaiveDate>,
    pub created_at: Option<NaiveDateTime>,
}

/// Mirrored user row, keyed by the external service's stable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// `"{first} {last}"` trimmed; the join key the dashboard matches
    /// against `Asset::assigned_user_name`.
    pub display_name: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub department_id: Option<i64>,
    pub department_name: Option<String>,
    pub location_id: Option<i64>,
    pub assets_count: i64,
    pub license_count: i64,
}

/// Which sync operation a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Users,
    Assets,
    All,
}

impl SyncKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Assets => "assets",
            Self::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "users" => Some(Self::Users),
            "assets" => Some(Self::Assets),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable lifecycle of one sync kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Final outcome recorded against a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Partial,
    Failure,
}

impl SyncOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// Per-run record counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub fetched: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub errored: u64,
}

impl SyncCounts {
    /// Fold another batch's counters into this one (used by `all` runs).
    pub fn absorb(&mut self, other: SyncCounts) {
        self.fetched += other.fetched;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.errored += other.errored;
    }

    pub fn outcome(self) -> SyncOutcome {
        if self.errored == 0 {
            SyncOutcome::Success
        } else {
            SyncOutcome::Partial
        }
    }
}

/// One execution of a sync operation; append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub kind: SyncKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<SyncOutcome>,
    pub counts: SyncCounts,
}
