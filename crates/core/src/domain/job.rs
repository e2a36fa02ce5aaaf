use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::call::CallResult;
use crate::domain::context::ContextBundleId;
use crate::domain::lead::LeadRef;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Dialing,
    InProgress,
    Completed,
    Failed,
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dialing => "dialing",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "dialing" => Some(Self::Dialing),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Transitions a caller may request. `Expired` is never reachable this way:
    /// only the registry sweep assigns it.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Dialing)
                | (Self::Dialing, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::Pending, Self::Failed)
                | (Self::Dialing, Self::Failed)
        )
    }
}

/// Opaque reference returned by the telephony collaborator once a dial was accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchHandle {
    pub room_name: String,
    pub dispatch_id: Option<String>,
}

/// Ephemeral record of one call attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallJob {
    pub id: JobId,
    pub lead: LeadRef,
    pub context_bundle_id: ContextBundleId,
    pub context_path: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub dispatch: Option<DispatchHandle>,
    pub result: Option<CallResult>,
    pub error: Option<String>,
}

impl CallJob {
    /// `None` when `created_at + ttl` falls outside the representable range.
    pub fn expires_at(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        self.created_at.checked_add_signed(ttl)
    }

    pub fn seconds_until_expiry(&self, ttl: Duration, now: DateTime<Utc>) -> f64 {
        match self.expires_at(ttl) {
            Some(expires_at) => (expires_at - now).num_milliseconds() as f64 / 1000.0,
            None => f64::MAX,
        }
    }
}
