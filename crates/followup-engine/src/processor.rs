//! The due-task processor: polls for ripe tasks, enriches each with fresh
//! CRM data and prior-email history, invokes the composer through the
//! resilience envelope, and advances state atomically.
//!
//! Grounded in `original_source/.../services/processor.py`'s
//! `process_followup`/`process_due_followups`, extended per spec §4.4 with
//! the CRM enrichment and reply double-check the original's simplified
//! exemplar skips, and in `services/retry.py`'s `RetryService` for the
//! shared processing core behind `/retry-failed-followups`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cancellation::CANCELLATION_REASON;
use crate::composer_client::{ComposerClient, ComposerRequest};
use crate::crm_client::CrmClient;
use crate::error::FollowupError;
use crate::models::FollowupStatus;
use crate::store::{FollowupStore, TaskTransition};

/// Outcome of processing a single task, the element type of every batch
/// endpoint's `results[]` (spec §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub draft_id: String,
    pub followup_number: i32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id_created: Option<String>,
}

/// Result of one processor tick or one retry-all-failed run (spec §6.1:
/// `{processed, success_count, failure_count, results[]}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<TaskOutcome>,
    /// True if a circuit-open condition truncated the batch before every
    /// due task was attempted (spec §7: "MAY abort the remainder of the
    /// tick"). The control API surfaces this as a 503.
    pub aborted: bool,
}

impl BatchOutcome {
    fn from_results(results: Vec<TaskOutcome>, aborted: bool) -> Self {
        let success_count = results.iter().filter(|r| r.status == "done" || r.status == "cancelled").count();
        let failure_count = results.len() - success_count;
        Self {
            processed: results.len(),
            success_count,
            failure_count,
            results,
            aborted,
        }
    }
}

pub struct Processor<'a> {
    pub store: &'a dyn FollowupStore,
    pub crm: &'a dyn CrmClient,
    pub composer: &'a dyn ComposerClient,
}

impl<'a> Processor<'a> {
    pub fn new(store: &'a dyn FollowupStore, crm: &'a dyn CrmClient, composer: &'a dyn ComposerClient) -> Self {
        Self { store, crm, composer }
    }

    /// Fetches tasks with `status=scheduled` and `scheduled_for <= now`
    /// (default: current UTC) and processes each sequentially. A
    /// circuit-open condition aborts the remainder of the tick (spec §7).
    pub async fn process_due_followups(&self, now: Option<chrono::DateTime<Utc>>) -> crate::error::Result<BatchOutcome> {
        let cutoff = now.unwrap_or_else(Utc::now);
        let tasks = self.store.get_due_tasks(cutoff).await?;

        tracing::info!(due_count = tasks.len(), cutoff = %cutoff, "processing due followups");

        let mut results = Vec::with_capacity(tasks.len());
        let mut aborted = false;

        for task in tasks {
            match self.process_one(task.clone()).await {
                Ok(outcome) => results.push(outcome),
                Err(FollowupError::CircuitOpen(name)) => {
                    tracing::warn!(circuit = name, "circuit open, aborting remainder of tick");
                    results.push(TaskOutcome {
                        task_id: task.id,
                        draft_id: task.draft_id,
                        followup_number: task.followup_number,
                        status: "failed".to_string(),
                        error: Some(format!("circuit breaker '{name}' is open")),
                        draft_id_created: None,
                    });
                    aborted = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(BatchOutcome::from_results(results, aborted))
    }

    /// Loads every `failed` task, CAS-transitions each back to
    /// `scheduled`, then re-runs the same per-task procedure. Mirrors the
    /// original's `RetryService.retry_all_failed` delegating to
    /// `ProcessorService.process_followup`.
    pub async fn retry_all_failed(&self) -> crate::error::Result<BatchOutcome> {
        let failed = self.store.get_failed_tasks().await?;
        let mut results = Vec::with_capacity(failed.len());
        let mut aborted = false;

        for mut task in failed {
            let reactivated = self
                .store
                .transition_task(task.id, FollowupStatus::Failed, FollowupStatus::Scheduled, TaskTransition::default())
                .await?;
            if !reactivated {
                continue;
            }
            task.status = FollowupStatus::Scheduled;

            match self.process_one(task.clone()).await {
                Ok(outcome) => results.push(outcome),
                Err(FollowupError::CircuitOpen(name)) => {
                    results.push(TaskOutcome {
                        task_id: task.id,
                        draft_id: task.draft_id,
                        followup_number: task.followup_number,
                        status: "failed".to_string(),
                        error: Some(format!("circuit breaker '{name}' is open")),
                        draft_id_created: None,
                    });
                    aborted = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(BatchOutcome::from_results(results, aborted))
    }

    /// The per-task procedure (spec §4.4 a-f). Infrastructure errors from
    /// the store propagate; everything else is absorbed into the task's
    /// terminal state and returned as a [`TaskOutcome`], except a
    /// composer-circuit-open condition, which propagates so the caller can
    /// decide whether to abort the batch.
    async fn process_one(&self, task: crate::models::FollowupTask) -> crate::error::Result<TaskOutcome> {
        let span = tracing::info_span!("process_one_task", task_id = %task.id, draft_id = %task.draft_id);
        let _enter = span.enter();

        // (a) Load the referenced draft.
        let draft = match self.store.get_draft(&task.draft_id).await? {
            Some(d) => d,
            None => {
                return self.finish(&task, FollowupStatus::Failed, TaskTransition {
                    processed_at: Some(Utc::now()),
                    error_message: Some("draft_not_found".to_string()),
                    ..Default::default()
                }).await;
            }
        };

        // (b) Double-check for a reply that raced the cancellation policy.
        if draft.has_reply {
            return self.finish(&task, FollowupStatus::Cancelled, TaskTransition {
                cancellation_reason: Some(CANCELLATION_REASON.to_string()),
                cancelled_at: Some(Utc::now()),
                ..Default::default()
            }).await;
        }

        // (c) Resolve the prospect's current CRM record.
        let lead = match self.crm.find_by_external_id(&draft.x_external_id).await {
            Ok(Some(lead)) if lead.is_valid() => lead,
            Ok(Some(_)) => {
                return self.finish(&task, FollowupStatus::Failed, TaskTransition {
                    processed_at: Some(Utc::now()),
                    error_message: Some("crm record missing required fields".to_string()),
                    ..Default::default()
                }).await;
            }
            Ok(None) => {
                return self.finish(&task, FollowupStatus::Failed, TaskTransition {
                    processed_at: Some(Utc::now()),
                    error_message: Some(format!("no crm record for x_external_id={}", draft.x_external_id)),
                    ..Default::default()
                }).await;
            }
            Err(FollowupError::CircuitOpen(name)) => return Err(FollowupError::CircuitOpen(name)),
            Err(e) => {
                return self.finish(&task, FollowupStatus::Failed, TaskTransition {
                    processed_at: Some(Utc::now()),
                    error_message: Some(e.to_string()),
                    ..Default::default()
                }).await;
            }
        };

        // (d) Collect prior-email history.
        let history = self
            .store
            .get_prior_followup_drafts(&draft.x_external_id, task.followup_number)
            .await?;

        // (e) Build the composer request.
        let request = ComposerRequest {
            x_external_id: draft.x_external_id.clone(),
            followup_number: task.followup_number,
            version_group_id: draft.version_group_id.clone(),
            recipient_email: lead.email,
            first_name: lead.first_name,
            last_name: lead.last_name,
            partner_name: lead.partner_name,
            website: lead.website,
            thread_id: draft.thread_id.clone(),
            message_id: draft.message_id.clone(),
            original_subject: draft.original_subject.clone(),
            email_history: history,
        };

        // (f) Invoke the composer through the resilience envelope.
        match self.composer.generate_followup(&request).await {
            Ok(draft_id_created) => {
                self.finish(&task, FollowupStatus::Done, TaskTransition {
                    processed_at: Some(Utc::now()),
                    draft_id_created: Some(draft_id_created),
                    ..Default::default()
                }).await
            }
            Err(FollowupError::CircuitOpen(name)) => Err(FollowupError::CircuitOpen(name)),
            Err(e) => {
                self.finish(&task, FollowupStatus::Failed, TaskTransition {
                    processed_at: Some(Utc::now()),
                    error_message: Some(e.to_string()),
                    ..Default::default()
                }).await
            }
        }
    }

    /// CAS-transitions `task` from `scheduled` to `target`, applying
    /// `fields`, and reports the outcome regardless of whether this caller
    /// won the race (a concurrent tick may have already finalized it).
    async fn finish(
        &self,
        task: &crate::models::FollowupTask,
        target: FollowupStatus,
        fields: TaskTransition,
    ) -> crate::error::Result<TaskOutcome> {
        let error = fields.error_message.clone();
        let draft_id_created = fields.draft_id_created.clone();
        self.store.transition_task(task.id, FollowupStatus::Scheduled, target, fields).await?;

        Ok(TaskOutcome {
            task_id: task.id,
            draft_id: task.draft_id.clone(),
            followup_number: task.followup_number,
            status: target.as_str().to_string(),
            error,
            draft_id_created,
        })
    }
}
