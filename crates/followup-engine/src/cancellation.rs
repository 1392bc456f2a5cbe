//! Cancellation policy triggered by a prospect reply.
//!
//! Keeps the single long-term (180-business-day) task scheduled even after
//! a reply — a deliberate product decision to still attempt one delayed
//! re-engagement — and cancels every other pending task for the draft.

use serde::{Deserialize, Serialize};

use crate::error::{FollowupError, Result};
use crate::models::FollowupStatus;
use crate::store::{FollowupStore, TaskTransition};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CancellationOutcome {
    pub cancelled_count: usize,
    pub kept_count: usize,
}

pub const CANCELLATION_REASON: &str = "prospect_replied";

/// Cancels every `scheduled` task for `draft_id` except the long-term
/// (180-business-day) one. Idempotent: re-invoking on an already-cancelled
/// draft cancels nothing further.
pub async fn cancel_for_draft(store: &dyn FollowupStore, draft_id: &str) -> Result<CancellationOutcome> {
    let span = tracing::info_span!("cancel_for_draft", draft_id);
    let _enter = span.enter();

    if store.get_draft(draft_id).await?.is_none() {
        return Err(FollowupError::DraftNotFound(draft_id.to_string()));
    }

    let tasks = store.get_tasks_for_draft(draft_id).await?;
    let mut cancelled_count = 0;
    let mut kept_count = 0;

    for task in tasks.into_iter().filter(|t| t.status == FollowupStatus::Scheduled) {
        if task.is_long_term() {
            kept_count += 1;
            continue;
        }

        let transitioned = store
            .transition_task(
                task.id,
                FollowupStatus::Scheduled,
                FollowupStatus::Cancelled,
                TaskTransition {
                    cancellation_reason: Some(CANCELLATION_REASON.to_string()),
                    cancelled_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        if transitioned {
            cancelled_count += 1;
        }
    }

    tracing::info!(cancelled_count, kept_count, "applied cancellation policy");

    Ok(CancellationOutcome {
        cancelled_count,
        kept_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Draft, DraftStatus, FollowupTask};
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn draft_with_reply(id: &str) -> Draft {
        Draft {
            id: id.to_string(),
            status: DraftStatus::Sent,
            sent_at: Some(Utc::now()),
            recipient: "a@example.com".to_string(),
            x_external_id: "lead-1".to_string(),
            version_group_id: "vg-1".to_string(),
            followup_number: 0,
            has_reply: true,
            initial_draft_id: None,
            thread_id: None,
            message_id: None,
            original_subject: None,
            subject: None,
            body: None,
            followup_ids: vec![],
            followups_scheduled: true,
            no_followup: false,
            created_at: Utc::now(),
        }
    }

    fn scheduled_task(draft_id: &str, followup_number: i32, business_days_after: i32) -> FollowupTask {
        FollowupTask {
            id: Uuid::new_v4(),
            draft_id: draft_id.to_string(),
            followup_number,
            business_days_after,
            scheduled_for: Utc::now(),
            status: FollowupStatus::Scheduled,
            created_at: Utc::now(),
            processed_at: None,
            cancelled_at: None,
            error_message: None,
            cancellation_reason: None,
            draft_id_created: None,
        }
    }

    #[tokio::test]
    async fn reply_cancels_short_term_keeps_long_term() {
        let store = InMemoryStore::new();
        store.seed_draft(draft_with_reply("d1"));
        for &(days, n) in &[(3, 1), (7, 2), (10, 3), (180, 4)] {
            store.seed_task(scheduled_task("d1", n, days));
        }

        let outcome = cancel_for_draft(&store, "d1").await.unwrap();
        assert_eq!(outcome.cancelled_count, 3);
        assert_eq!(outcome.kept_count, 1);

        let tasks = store.get_tasks_for_draft("d1").await.unwrap();
        let long_term = tasks.iter().find(|t| t.business_days_after == 180).unwrap();
        assert_eq!(long_term.status, FollowupStatus::Scheduled);
        assert_eq!(
            tasks.iter().filter(|t| t.status == FollowupStatus::Cancelled).count(),
            3
        );
    }

    #[tokio::test]
    async fn cancellation_is_idempotent() {
        let store = InMemoryStore::new();
        store.seed_draft(draft_with_reply("d1"));
        store.seed_task(scheduled_task("d1", 1, 3));

        let first = cancel_for_draft(&store, "d1").await.unwrap();
        assert_eq!(first.cancelled_count, 1);

        let second = cancel_for_draft(&store, "d1").await.unwrap();
        assert_eq!(second.cancelled_count, 0);
        assert_eq!(second.kept_count, 0);
    }

    #[tokio::test]
    async fn missing_draft_is_not_found() {
        let store = InMemoryStore::new();
        let err = cancel_for_draft(&store, "missing").await.unwrap_err();
        assert!(matches!(err, FollowupError::DraftNotFound(_)));
    }
}
