//! Materializes the followup schedule for a sent draft.
//!
//! On a sent-draft event, turns the fixed `{3,7,10,180}` business-day
//! offsets into four persisted tasks in one atomic batch, then writes the
//! resulting task ids back onto the draft.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::business_days::add_business_days;
use crate::error::{FollowupError, Result};
use crate::models::{DraftStatus, FOLLOWUP_SCHEDULE};
use crate::store::{FollowupStore, NewFollowupTask};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    pub scheduled_count: usize,
    pub task_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

impl ScheduleOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            scheduled_count: 0,
            task_ids: Vec::new(),
            skipped_reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkScheduleSummary {
    pub drafts_considered: usize,
    pub total_scheduled: usize,
    pub results: Vec<(String, ScheduleOutcome)>,
}

/// Materializes the four-task schedule for `draft_id`, validating in the
/// order the control API depends on: not-found and business-rule failures
/// short-circuit before any write.
pub async fn schedule_for_draft(store: &dyn FollowupStore, draft_id: &str) -> Result<ScheduleOutcome> {
    let span = tracing::info_span!("schedule_for_draft", draft_id);
    let _enter = span.enter();

    let draft = store
        .get_draft(draft_id)
        .await?
        .ok_or_else(|| FollowupError::DraftNotFound(draft_id.to_string()))?;

    if draft.status != DraftStatus::Sent {
        return Err(FollowupError::DraftNotSent(
            draft_id.to_string(),
            draft.status.as_str().to_string(),
        ));
    }

    let sent_at = draft
        .sent_at
        .ok_or_else(|| FollowupError::MissingSentAt(draft_id.to_string()))?;

    if draft.no_followup {
        tracing::info!("draft opted out of followups, skipping");
        return Ok(ScheduleOutcome::skipped("opted_out"));
    }
    if draft.followup_number != 0 {
        tracing::info!("draft is itself a followup, skipping");
        return Ok(ScheduleOutcome::skipped("not_an_initial_draft"));
    }

    let existing = store.get_tasks_for_draft(draft_id).await?;
    if !existing.is_empty() {
        tracing::info!(existing_count = existing.len(), "draft already scheduled");
        return Ok(ScheduleOutcome::skipped("already scheduled"));
    }

    let new_tasks: Vec<NewFollowupTask> = FOLLOWUP_SCHEDULE
        .iter()
        .map(|&(days, followup_number)| NewFollowupTask {
            id: Uuid::new_v4(),
            draft_id: draft_id.to_string(),
            followup_number,
            business_days_after: days,
            scheduled_for: add_business_days(sent_at, days as i64),
        })
        .collect();

    let inserted = store.insert_followup_batch(new_tasks).await?;
    let task_ids: Vec<Uuid> = inserted.iter().map(|t| t.id).collect();
    let followup_id_strings: Vec<String> = task_ids.iter().map(Uuid::to_string).collect();

    let mut scheduled_draft = draft.clone();
    scheduled_draft.followup_ids = followup_id_strings.clone();
    scheduled_draft.followups_scheduled = true;
    debug_assert!(
        scheduled_draft.followups_scheduled_invariant_holds(),
        "a freshly scheduled draft must satisfy invariant 5"
    );

    store
        .update_draft_followup_fields(draft_id, followup_id_strings, true)
        .await?;

    tracing::info!(scheduled_count = task_ids.len(), "scheduled followups for draft");

    Ok(ScheduleOutcome {
        scheduled_count: task_ids.len(),
        task_ids,
        skipped_reason: None,
    })
}

/// Iterates all eligible initial drafts and applies [`schedule_for_draft`]
/// to each, accumulating per-draft results. A per-draft error does not
/// abort the batch.
pub async fn schedule_all_sent_drafts(store: &dyn FollowupStore) -> Result<BulkScheduleSummary> {
    let drafts = store.get_sent_drafts_without_followups().await?;
    let mut results = Vec::with_capacity(drafts.len());
    let mut total_scheduled = 0;

    for draft in &drafts {
        match schedule_for_draft(store, &draft.id).await {
            Ok(outcome) => {
                total_scheduled += outcome.scheduled_count;
                results.push((draft.id.clone(), outcome));
            }
            Err(err) => {
                tracing::warn!(draft_id = %draft.id, error = %err, "failed to schedule draft in bulk run");
                results.push((draft.id.clone(), ScheduleOutcome::skipped(&err.to_string())));
            }
        }
    }

    Ok(BulkScheduleSummary {
        drafts_considered: drafts.len(),
        total_scheduled,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Draft;
    use crate::store::memory::InMemoryStore;
    use chrono::{TimeZone, Utc};

    fn sent_draft(id: &str) -> Draft {
        Draft {
            id: id.to_string(),
            status: DraftStatus::Sent,
            sent_at: Some(Utc.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap()),
            recipient: "prospect@example.com".to_string(),
            x_external_id: "lead-1".to_string(),
            version_group_id: "vg-1".to_string(),
            followup_number: 0,
            has_reply: false,
            initial_draft_id: None,
            thread_id: None,
            message_id: None,
            original_subject: Some("Intro".to_string()),
            subject: Some("Intro".to_string()),
            body: Some("Hello".to_string()),
            followup_ids: vec![],
            followups_scheduled: false,
            no_followup: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn happy_path_schedules_four_tasks() {
        let store = InMemoryStore::new();
        store.seed_draft(sent_draft("d1"));

        let outcome = schedule_for_draft(&store, "d1").await.unwrap();
        assert_eq!(outcome.scheduled_count, 4);
        assert_eq!(outcome.task_ids.len(), 4);

        let draft = store.get_draft("d1").await.unwrap().unwrap();
        assert!(draft.followups_scheduled);
        assert_eq!(draft.followup_ids.len(), 4);
    }

    #[tokio::test]
    async fn scheduling_is_idempotent() {
        let store = InMemoryStore::new();
        store.seed_draft(sent_draft("d1"));

        let first = schedule_for_draft(&store, "d1").await.unwrap();
        assert_eq!(first.scheduled_count, 4);

        let second = schedule_for_draft(&store, "d1").await.unwrap();
        assert_eq!(second.scheduled_count, 0);
        assert_eq!(second.skipped_reason.as_deref(), Some("already scheduled"));
    }

    #[tokio::test]
    async fn missing_draft_is_not_found() {
        let store = InMemoryStore::new();
        let err = schedule_for_draft(&store, "missing").await.unwrap_err();
        assert!(matches!(err, FollowupError::DraftNotFound(_)));
    }

    #[tokio::test]
    async fn unsent_draft_is_rejected() {
        let store = InMemoryStore::new();
        let mut draft = sent_draft("d1");
        draft.status = DraftStatus::Drafting;
        store.seed_draft(draft);

        let err = schedule_for_draft(&store, "d1").await.unwrap_err();
        assert!(matches!(err, FollowupError::DraftNotSent(_, _)));
    }

    #[tokio::test]
    async fn opted_out_draft_is_skipped_not_errored() {
        let store = InMemoryStore::new();
        let mut draft = sent_draft("d1");
        draft.no_followup = true;
        store.seed_draft(draft);

        let outcome = schedule_for_draft(&store, "d1").await.unwrap();
        assert_eq!(outcome.scheduled_count, 0);
        assert_eq!(outcome.skipped_reason.as_deref(), Some("opted_out"));
    }

    #[tokio::test]
    async fn followup_schedule_offsets_map_to_expected_numbers() {
        let store = InMemoryStore::new();
        store.seed_draft(sent_draft("d1"));
        let outcome = schedule_for_draft(&store, "d1").await.unwrap();

        let mut tasks = store.get_tasks_for_draft("d1").await.unwrap();
        tasks.sort_by_key(|t| t.followup_number);
        let pairs: Vec<(i32, i32)> = tasks.iter().map(|t| (t.business_days_after, t.followup_number)).collect();
        assert_eq!(pairs, vec![(3, 1), (7, 2), (10, 3), (180, 4)]);
        assert_eq!(outcome.scheduled_count, tasks.len());
    }
}
