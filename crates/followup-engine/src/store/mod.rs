//! Durable, queryable persistence of drafts and followup tasks.
//!
//! The `FollowupStore` trait is the seam between the engine's services and
//! whatever backs the two "collections" named in the spec (`drafts`,
//! `followups`). Production wiring uses [`postgres::PostgresStore`]; tests
//! use [`memory::InMemoryStore`] so the scheduler/cancellation/processor
//! logic can be exercised without a live database, the way the teacher
//! substitutes a fake `Messenger` in its own tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Draft, EmailHistoryEntry, FollowupStatus, FollowupTask};

/// A followup row to be inserted as part of a scheduling batch. `id` is
/// assigned by the caller so the scheduler can report task ids before the
/// insert returns.
#[derive(Debug, Clone)]
pub struct NewFollowupTask {
    pub id: Uuid,
    pub draft_id: String,
    pub followup_number: i32,
    pub business_days_after: i32,
    pub scheduled_for: DateTime<Utc>,
}

/// Fields written when a task leaves `scheduled` (or, for the manual
/// "mark done" override, any non-terminal/terminal state).
#[derive(Debug, Clone, Default)]
pub struct TaskTransition {
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub draft_id_created: Option<String>,
}

#[async_trait]
pub trait FollowupStore: Send + Sync {
    async fn get_draft(&self, draft_id: &str) -> anyhow::Result<Option<Draft>>;

    /// The two fields the engine is allowed to write back onto a draft.
    async fn update_draft_followup_fields(
        &self,
        draft_id: &str,
        followup_ids: Vec<String>,
        followups_scheduled: bool,
    ) -> anyhow::Result<()>;

    /// Initial (`followup_number = 0`), sent, non-opted-out drafts with no
    /// existing followup tasks — the source for `schedule_all_sent_drafts`.
    async fn get_sent_drafts_without_followups(&self) -> anyhow::Result<Vec<Draft>>;

    /// Insert a batch of tasks atomically and return the persisted rows.
    async fn insert_followup_batch(
        &self,
        tasks: Vec<NewFollowupTask>,
    ) -> anyhow::Result<Vec<FollowupTask>>;

    async fn get_tasks_for_draft(&self, draft_id: &str) -> anyhow::Result<Vec<FollowupTask>>;

    async fn get_task(&self, task_id: Uuid) -> anyhow::Result<Option<FollowupTask>>;

    /// Tasks with `status = scheduled` and `scheduled_for <= now`.
    async fn get_due_tasks(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<FollowupTask>>;

    async fn get_failed_tasks(&self) -> anyhow::Result<Vec<FollowupTask>>;

    /// Compare-and-set: transitions `task_id` from `expected` to `target`,
    /// applying `fields`. Returns `true` iff the row was actually updated
    /// (i.e. it was still in `expected` at the time of the write) — the
    /// primitive that makes two overlapping ticks safe to run concurrently
    /// without double-invoking the composer.
    async fn transition_task(
        &self,
        task_id: Uuid,
        expected: FollowupStatus,
        target: FollowupStatus,
        fields: TaskTransition,
    ) -> anyhow::Result<bool>;

    /// Prior sent drafts sharing `x_external_id` with
    /// `followup_number < before_followup_number`, ordered ascending.
    async fn get_prior_followup_drafts(
        &self,
        x_external_id: &str,
        before_followup_number: i32,
    ) -> anyhow::Result<Vec<EmailHistoryEntry>>;

    // --- Repair operation primitives (§4.6) ---

    async fn get_drafts_with_tasks_but_empty_followup_ids(&self) -> anyhow::Result<Vec<Draft>>;

    async fn get_drafts_missing_scheduled_flag(&self) -> anyhow::Result<Vec<Draft>>;

    async fn shift_task(&self, task_id: Uuid, new_scheduled_for: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Marks each listed task `done` (operator override of invariant 4).
    /// Returns (updated ids, not-found ids).
    async fn mark_tasks_done(&self, task_ids: &[Uuid]) -> anyhow::Result<(Vec<Uuid>, Vec<Uuid>)>;
}
