//! In-memory [`FollowupStore`] fake, used by service-level unit tests so
//! scheduler/cancellation/processor logic can be exercised without a live
//! database — the in-process analogue of the teacher's fake `Messenger`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Draft, EmailHistoryEntry, FollowupStatus, FollowupTask};

use super::{FollowupStore, NewFollowupTask, TaskTransition};

#[derive(Default)]
pub struct InMemoryStore {
    drafts: Mutex<HashMap<String, Draft>>,
    tasks: Mutex<HashMap<Uuid, FollowupTask>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_draft(&self, draft: Draft) {
        self.drafts.lock().unwrap().insert(draft.id.clone(), draft);
    }

    pub fn seed_task(&self, task: FollowupTask) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }
}

#[async_trait]
impl FollowupStore for InMemoryStore {
    async fn get_draft(&self, draft_id: &str) -> anyhow::Result<Option<Draft>> {
        Ok(self.drafts.lock().unwrap().get(draft_id).cloned())
    }

    async fn update_draft_followup_fields(
        &self,
        draft_id: &str,
        followup_ids: Vec<String>,
        followups_scheduled: bool,
    ) -> anyhow::Result<()> {
        let mut drafts = self.drafts.lock().unwrap();
        let draft = drafts
            .get_mut(draft_id)
            .ok_or_else(|| anyhow::anyhow!("draft not found: {draft_id}"))?;
        draft.followup_ids = followup_ids;
        draft.followups_scheduled = followups_scheduled;
        Ok(())
    }

    async fn get_sent_drafts_without_followups(&self) -> anyhow::Result<Vec<Draft>> {
        Ok(self
            .drafts
            .lock()
            .unwrap()
            .values()
            .filter(|d| {
                d.status == crate::models::DraftStatus::Sent
                    && d.followup_number == 0
                    && !d.no_followup
                    && !d.followups_scheduled
            })
            .cloned()
            .collect())
    }

    async fn insert_followup_batch(
        &self,
        new_tasks: Vec<NewFollowupTask>,
    ) -> anyhow::Result<Vec<FollowupTask>> {
        let mut tasks = self.tasks.lock().unwrap();
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(new_tasks.len());
        for t in new_tasks {
            let task = FollowupTask {
                id: t.id,
                draft_id: t.draft_id,
                followup_number: t.followup_number,
                business_days_after: t.business_days_after,
                scheduled_for: t.scheduled_for,
                status: FollowupStatus::Scheduled,
                created_at: now,
                processed_at: None,
                cancelled_at: None,
                error_message: None,
                cancellation_reason: None,
                draft_id_created: None,
            };
            tasks.insert(task.id, task.clone());
            inserted.push(task);
        }
        Ok(inserted)
    }

    async fn get_tasks_for_draft(&self, draft_id: &str) -> anyhow::Result<Vec<FollowupTask>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.draft_id == draft_id)
            .cloned()
            .collect())
    }

    async fn get_task(&self, task_id: Uuid) -> anyhow::Result<Option<FollowupTask>> {
        Ok(self.tasks.lock().unwrap().get(&task_id).cloned())
    }

    async fn get_due_tasks(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<FollowupTask>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.status == FollowupStatus::Scheduled && t.scheduled_for <= now)
            .cloned()
            .collect())
    }

    async fn get_failed_tasks(&self) -> anyhow::Result<Vec<FollowupTask>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.status == FollowupStatus::Failed)
            .cloned()
            .collect())
    }

    async fn transition_task(
        &self,
        task_id: Uuid,
        expected: FollowupStatus,
        target: FollowupStatus,
        fields: TaskTransition,
    ) -> anyhow::Result<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        if task.status != expected {
            return Ok(false);
        }
        task.status = target;
        task.processed_at = fields.processed_at;
        task.error_message = fields.error_message;
        task.cancellation_reason = fields.cancellation_reason;
        task.cancelled_at = fields.cancelled_at;
        task.draft_id_created = fields.draft_id_created;
        Ok(true)
    }

    async fn get_prior_followup_drafts(
        &self,
        x_external_id: &str,
        before_followup_number: i32,
    ) -> anyhow::Result<Vec<EmailHistoryEntry>> {
        let mut drafts: Vec<Draft> = self
            .drafts
            .lock()
            .unwrap()
            .values()
            .filter(|d| {
                d.x_external_id == x_external_id
                    && d.status == crate::models::DraftStatus::Sent
                    && d.followup_number < before_followup_number
            })
            .cloned()
            .collect();
        drafts.sort_by_key(|d| d.followup_number);
        Ok(drafts
            .into_iter()
            .map(|d| EmailHistoryEntry {
                subject: d.subject.unwrap_or_default(),
                body: d.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn get_drafts_with_tasks_but_empty_followup_ids(&self) -> anyhow::Result<Vec<Draft>> {
        let tasks = self.tasks.lock().unwrap();
        let drafts_with_tasks: std::collections::HashSet<&str> =
            tasks.values().map(|t| t.draft_id.as_str()).collect();
        Ok(self
            .drafts
            .lock()
            .unwrap()
            .values()
            .filter(|d| drafts_with_tasks.contains(d.id.as_str()) && d.followup_ids.is_empty())
            .cloned()
            .collect())
    }

    async fn get_drafts_missing_scheduled_flag(&self) -> anyhow::Result<Vec<Draft>> {
        Ok(self
            .drafts
            .lock()
            .unwrap()
            .values()
            .filter(|d| !d.followup_ids.is_empty() && !d.followups_scheduled)
            .cloned()
            .collect())
    }

    async fn shift_task(&self, task_id: Uuid, new_scheduled_for: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        if task.status != FollowupStatus::Scheduled {
            return Ok(false);
        }
        task.scheduled_for = new_scheduled_for;
        Ok(true)
    }

    async fn mark_tasks_done(&self, task_ids: &[Uuid]) -> anyhow::Result<(Vec<Uuid>, Vec<Uuid>)> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut updated = Vec::new();
        let mut not_found = Vec::new();
        let now = Utc::now();
        for id in task_ids {
            if let Some(task) = tasks.get_mut(id) {
                task.status = FollowupStatus::Done;
                task.processed_at = Some(now);
                updated.push(*id);
            } else {
                not_found.push(*id);
            }
        }
        Ok((updated, not_found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DraftStatus;

    fn sample_draft(id: &str) -> Draft {
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
            original_subject: Some("Hi".to_string()),
            subject: Some("Hi".to_string()),
            body: Some("Body".to_string()),
            followup_ids: vec![],
            followups_scheduled: false,
            no_followup: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn transition_task_is_compare_and_set() {
        let store = InMemoryStore::new();
        let task_id = Uuid::new_v4();
        store.seed_task(FollowupTask {
            id: task_id,
            draft_id: "d1".to_string(),
            followup_number: 1,
            business_days_after: 3,
            scheduled_for: Utc::now(),
            status: FollowupStatus::Scheduled,
            created_at: Utc::now(),
            processed_at: None,
            cancelled_at: None,
            error_message: None,
            cancellation_reason: None,
            draft_id_created: None,
        });

        let first = store
            .transition_task(
                task_id,
                FollowupStatus::Scheduled,
                FollowupStatus::Done,
                TaskTransition {
                    processed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(first);

        let second = store
            .transition_task(
                task_id,
                FollowupStatus::Scheduled,
                FollowupStatus::Done,
                TaskTransition::default(),
            )
            .await
            .unwrap();
        assert!(!second, "second caller racing the same tick must lose the compare-and-set");
    }

    #[tokio::test]
    async fn sent_drafts_without_followups_excludes_opted_out() {
        let store = InMemoryStore::new();
        let mut opted_out = sample_draft("d1");
        opted_out.no_followup = true;
        store.seed_draft(opted_out);
        store.seed_draft(sample_draft("d2"));

        let eligible = store.get_sent_drafts_without_followups().await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "d2");
    }
}
