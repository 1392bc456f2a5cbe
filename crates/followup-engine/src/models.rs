//! Domain types shared by the scheduler, cancellation policy, and processor.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four valid (business_days_after, followup_number) pairings. No
/// other pairing is valid — invariant 1 of the spec.
pub const FOLLOWUP_SCHEDULE: [(i32, i32); 4] = [(3, 1), (7, 2), (10, 3), (180, 4)];

/// The long-term followup that survives a prospect reply.
pub const LONG_TERM_BUSINESS_DAYS: i32 = 180;

/// Status of an outbound email draft. Only `Sent` is relevant to the
/// engine; the others are recorded for completeness since the wire
/// contract carries an open-ended `status` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Drafting,
    Sent,
    Cancelled,
    #[serde(other)]
    Other,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Drafting => "drafting",
            DraftStatus::Sent => "sent",
            DraftStatus::Cancelled => "cancelled",
            DraftStatus::Other => "other",
        }
    }
}

impl FromStr for DraftStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "drafting" => DraftStatus::Drafting,
            "sent" => DraftStatus::Sent,
            "cancelled" => DraftStatus::Cancelled,
            _ => DraftStatus::Other,
        })
    }
}

/// An outbound email record. The engine only reads drafts and writes two
/// fields back: `followup_ids` and `followups_scheduled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub status: DraftStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub recipient: String,
    pub x_external_id: String,
    pub version_group_id: String,
    pub followup_number: i32,
    pub has_reply: bool,
    pub initial_draft_id: Option<String>,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
    pub original_subject: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub followup_ids: Vec<String>,
    pub followups_scheduled: bool,
    pub no_followup: bool,
    pub created_at: DateTime<Utc>,
}

impl Draft {
    /// Invariant 5 of the spec: `followups_scheduled` is exactly
    /// equivalent to `followup_ids` being non-empty.
    pub fn followups_scheduled_invariant_holds(&self) -> bool {
        self.followups_scheduled != self.followup_ids.is_empty()
    }
}

/// Lifecycle state of a scheduled followup task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupStatus {
    Scheduled,
    Done,
    Failed,
    Cancelled,
}

impl FollowupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowupStatus::Scheduled => "scheduled",
            FollowupStatus::Done => "done",
            FollowupStatus::Failed => "failed",
            FollowupStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for FollowupStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(FollowupStatus::Scheduled),
            "done" => Ok(FollowupStatus::Done),
            "failed" => Ok(FollowupStatus::Failed),
            "cancelled" => Ok(FollowupStatus::Cancelled),
            other => Err(anyhow::anyhow!("invalid followup status: {other}")),
        }
    }
}

/// A scheduled followup task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupTask {
    pub id: Uuid,
    pub draft_id: String,
    pub followup_number: i32,
    pub business_days_after: i32,
    pub scheduled_for: DateTime<Utc>,
    pub status: FollowupStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub cancellation_reason: Option<String>,
    pub draft_id_created: Option<String>,
}

impl FollowupTask {
    pub fn is_long_term(&self) -> bool {
        self.business_days_after == LONG_TERM_BUSINESS_DAYS
    }
}

/// A prior email in the same conversation, contributed to the composer's
/// email history (spec §4.4.d).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailHistoryEntry {
    pub subject: String,
    pub body: String,
}
