//! Operator-driven repair operations for invariant drift observed in
//! production (spec §4.6): syncing `followup_ids` onto drafts that have
//! tasks but an empty array, backfilling a missing `followups_scheduled`
//! flag, shifting a task's `scheduled_for`, and manually marking tasks
//! done. All four are idempotent; "mark done" is the one explicit
//! operator override of the terminal-state rule.
//!
//! Mounted under `/admin/*` rather than the steady-state top-level routes
//! (see DESIGN.md) — these are maintenance tools, not part of the engine's
//! steady-state contract.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::business_days::add_business_days;
use crate::error::{FollowupError, Result};
use crate::store::FollowupStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTaskIdsSummary {
    pub drafts_updated: usize,
    pub draft_ids: Vec<String>,
}

/// Finds drafts that have tasks but an empty `followup_ids`, and
/// populates the field from their current task set.
pub async fn sync_task_ids_to_draft(store: &dyn FollowupStore) -> Result<SyncTaskIdsSummary> {
    let drafts = store.get_drafts_with_tasks_but_empty_followup_ids().await?;
    let mut draft_ids = Vec::with_capacity(drafts.len());

    for draft in &drafts {
        let tasks = store.get_tasks_for_draft(&draft.id).await?;
        if tasks.is_empty() {
            continue;
        }
        let ids: Vec<String> = tasks.iter().map(|t| t.id.to_string()).collect();
        store.update_draft_followup_fields(&draft.id, ids, draft.followups_scheduled).await?;
        draft_ids.push(draft.id.clone());
    }

    tracing::info!(drafts_updated = draft_ids.len(), "synced task ids to draft");

    Ok(SyncTaskIdsSummary {
        drafts_updated: draft_ids.len(),
        draft_ids,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetScheduledFlagSummary {
    pub drafts_updated: usize,
    pub draft_ids: Vec<String>,
}

/// Backfills `followups_scheduled = true` for drafts that have a non-empty
/// `followup_ids` but a stale unset flag (invariant 4 drift).
pub async fn set_missing_followups_scheduled_flag(store: &dyn FollowupStore) -> Result<SetScheduledFlagSummary> {
    let drafts = store.get_drafts_missing_scheduled_flag().await?;
    let mut draft_ids = Vec::with_capacity(drafts.len());

    for draft in &drafts {
        store
            .update_draft_followup_fields(&draft.id, draft.followup_ids.clone(), true)
            .await?;
        draft_ids.push(draft.id.clone());
    }

    tracing::info!(drafts_updated = draft_ids.len(), "set missing followups_scheduled flag");

    Ok(SetScheduledFlagSummary {
        drafts_updated: draft_ids.len(),
        draft_ids,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShiftFollowupsRequest {
    pub followup_ids: Vec<Uuid>,
    pub days_shift: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftResult {
    pub task_id: Uuid,
    pub shifted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftFollowupsSummary {
    pub shifted: usize,
    pub skipped: usize,
    pub results: Vec<ShiftResult>,
}

/// Shifts each listed task's `scheduled_for` by `days_shift` business days
/// (positive or negative) relative to its current value. Only tasks still
/// `scheduled` are eligible; anything else is skipped, not erred.
pub async fn shift_followups(store: &dyn FollowupStore, request: ShiftFollowupsRequest) -> Result<ShiftFollowupsSummary> {
    if request.followup_ids.is_empty() {
        return Err(FollowupError::Validation("followup_ids must not be empty".to_string()));
    }

    let mut results = Vec::with_capacity(request.followup_ids.len());
    let mut shifted = 0;
    let mut skipped = 0;

    for task_id in request.followup_ids {
        let task = match store.get_task(task_id).await? {
            Some(t) => t,
            None => {
                skipped += 1;
                results.push(ShiftResult {
                    task_id,
                    shifted: false,
                    error: Some("task not found".to_string()),
                });
                continue;
            }
        };

        let new_scheduled_for = add_business_days(task.scheduled_for, request.days_shift);
        let ok = store.shift_task(task_id, new_scheduled_for).await?;
        if ok {
            shifted += 1;
        } else {
            skipped += 1;
        }
        results.push(ShiftResult {
            task_id,
            shifted: ok,
            error: if ok { None } else { Some("task is not in scheduled state".to_string()) },
        });
    }

    tracing::info!(shifted, skipped, "shifted followup tasks");

    Ok(ShiftFollowupsSummary { shifted, skipped, results })
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkFollowupsDoneRequest {
    pub followup_ids: Vec<Uuid>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkFollowupsDoneSummary {
    pub updated: Vec<Uuid>,
    pub not_found: Vec<Uuid>,
    pub errors: Vec<String>,
}

/// Operator override of invariant 4's terminal-state rule: forces each
/// listed task into `done` regardless of its current status, e.g. when a
/// followup was produced through another path and the engine's state
/// needs to catch up.
pub async fn mark_followups_done(store: &dyn FollowupStore, request: MarkFollowupsDoneRequest) -> Result<MarkFollowupsDoneSummary> {
    if request.followup_ids.is_empty() {
        return Err(FollowupError::Validation("followup_ids must not be empty".to_string()));
    }

    let (updated, not_found) = store.mark_tasks_done(&request.followup_ids).await?;

    if let Some(reason) = &request.reason {
        tracing::info!(reason, updated_count = updated.len(), "marked followups done");
    } else {
        tracing::info!(updated_count = updated.len(), "marked followups done");
    }

    let errors = not_found.iter().map(|id| format!("task not found: {id}")).collect();

    Ok(MarkFollowupsDoneSummary { updated, not_found, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Draft, DraftStatus, FollowupStatus, FollowupTask};
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;

    fn draft_with(id: &str, followup_ids: Vec<String>, followups_scheduled: bool) -> Draft {
        Draft {
            id: id.to_string(),
            status: DraftStatus::Sent,
            sent_at: Some(Utc::now()),
            recipient: "a@example.com".to_string(),
            x_external_id: "lead-1".to_string(),
            version_group_id: "vg-1".to_string(),
            followup_number: 0,
            has_reply: false,
            initial_draft_id: None,
            thread_id: None,
            message_id: None,
            original_subject: None,
            subject: None,
            body: None,
            followup_ids,
            followups_scheduled,
            no_followup: false,
            created_at: Utc::now(),
        }
    }

    fn task_for(draft_id: &str, status: FollowupStatus) -> FollowupTask {
        FollowupTask {
            id: Uuid::new_v4(),
            draft_id: draft_id.to_string(),
            followup_number: 1,
            business_days_after: 3,
            scheduled_for: Utc::now(),
            status,
            created_at: Utc::now(),
            processed_at: None,
            cancelled_at: None,
            error_message: None,
            cancellation_reason: None,
            draft_id_created: None,
        }
    }

    #[tokio::test]
    async fn sync_task_ids_populates_empty_followup_ids() {
        let store = InMemoryStore::new();
        store.seed_draft(draft_with("d1", vec![], false));
        store.seed_task(task_for("d1", FollowupStatus::Scheduled));

        let summary = sync_task_ids_to_draft(&store).await.unwrap();
        assert_eq!(summary.drafts_updated, 1);

        let draft = store.get_draft("d1").await.unwrap().unwrap();
        assert_eq!(draft.followup_ids.len(), 1);
    }

    #[tokio::test]
    async fn set_missing_scheduled_flag_backfills_true() {
        let store = InMemoryStore::new();
        store.seed_draft(draft_with("d1", vec!["x".to_string()], false));

        let summary = set_missing_followups_scheduled_flag(&store).await.unwrap();
        assert_eq!(summary.drafts_updated, 1);

        let draft = store.get_draft("d1").await.unwrap().unwrap();
        assert!(draft.followups_scheduled);
    }

    #[tokio::test]
    async fn shift_followups_moves_scheduled_for_forward() {
        let store = InMemoryStore::new();
        let task = task_for("d1", FollowupStatus::Scheduled);
        let task_id = task.id;
        let original = task.scheduled_for;
        store.seed_task(task);

        let summary = shift_followups(&store, ShiftFollowupsRequest { followup_ids: vec![task_id], days_shift: 2 })
            .await
            .unwrap();
        assert_eq!(summary.shifted, 1);
        assert_eq!(summary.skipped, 0);

        let updated = store.get_task(task_id).await.unwrap().unwrap();
        assert!(updated.scheduled_for > original);
    }

    #[tokio::test]
    async fn shift_followups_skips_non_scheduled_tasks() {
        let store = InMemoryStore::new();
        let task = task_for("d1", FollowupStatus::Done);
        let task_id = task.id;
        store.seed_task(task);

        let summary = shift_followups(&store, ShiftFollowupsRequest { followup_ids: vec![task_id], days_shift: 2 })
            .await
            .unwrap();
        assert_eq!(summary.shifted, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn shift_followups_rejects_empty_request() {
        let store = InMemoryStore::new();
        let err = shift_followups(&store, ShiftFollowupsRequest { followup_ids: vec![], days_shift: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, FollowupError::Validation(_)));
    }

    #[tokio::test]
    async fn mark_followups_done_overrides_any_status() {
        let store = InMemoryStore::new();
        let task = task_for("d1", FollowupStatus::Failed);
        let task_id = task.id;
        store.seed_task(task);

        let summary = mark_followups_done(
            &store,
            MarkFollowupsDoneRequest { followup_ids: vec![task_id], reason: Some("manual catch-up".to_string()) },
        )
        .await
        .unwrap();
        assert_eq!(summary.updated, vec![task_id]);
        assert!(summary.not_found.is_empty());

        let updated = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(updated.status, FollowupStatus::Done);
    }

    #[tokio::test]
    async fn mark_followups_done_reports_not_found() {
        let store = InMemoryStore::new();
        let missing_id = Uuid::new_v4();

        let summary = mark_followups_done(&store, MarkFollowupsDoneRequest { followup_ids: vec![missing_id], reason: None })
            .await
            .unwrap();
        assert!(summary.updated.is_empty());
        assert_eq!(summary.not_found, vec![missing_id]);
        assert_eq!(summary.errors.len(), 1);
    }
}
