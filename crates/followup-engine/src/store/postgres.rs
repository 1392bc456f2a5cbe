//! PostgreSQL-backed implementation of [`FollowupStore`] using Diesel.
//!
//! Diesel connections are blocking; each call is dispatched onto the
//! blocking thread pool via `tokio::task::spawn_blocking`, generalizing
//! the teacher's single `Mutex<PgConnection>` to an `r2d2` pool so
//! concurrent inbound control operations (spec §5) don't serialize on one
//! connection.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use uuid::Uuid;

use crate::models::{Draft, DraftStatus, EmailHistoryEntry, FollowupStatus, FollowupTask};
use crate::schema::{email_drafts, email_followups};

use super::{FollowupStore, NewFollowupTask, TaskTransition};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub fn build_pool(database_url: &str) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .build(manager)
        .context("failed to build Postgres connection pool")
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Queryable, Debug, Clone)]
struct DraftRow {
    id: String,
    status: String,
    sent_at: Option<DateTime<Utc>>,
    recipient: String,
    x_external_id: String,
    version_group_id: String,
    followup_number: i32,
    has_reply: bool,
    initial_draft_id: Option<String>,
    thread_id: Option<String>,
    message_id: Option<String>,
    original_subject: Option<String>,
    subject: Option<String>,
    body: Option<String>,
    followup_ids: Vec<String>,
    followups_scheduled: bool,
    no_followup: bool,
    created_at: DateTime<Utc>,
}

impl From<DraftRow> for Draft {
    fn from(row: DraftRow) -> Self {
        Draft {
            id: row.id,
            status: DraftStatus::from_str(&row.status).unwrap_or(DraftStatus::Other),
            sent_at: row.sent_at,
            recipient: row.recipient,
            x_external_id: row.x_external_id,
            version_group_id: row.version_group_id,
            followup_number: row.followup_number,
            has_reply: row.has_reply,
            initial_draft_id: row.initial_draft_id,
            thread_id: row.thread_id,
            message_id: row.message_id,
            original_subject: row.original_subject,
            subject: row.subject,
            body: row.body,
            followup_ids: row.followup_ids,
            followups_scheduled: row.followups_scheduled,
            no_followup: row.no_followup,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Debug, Clone)]
struct FollowupRow {
    id: Uuid,
    draft_id: String,
    followup_number: i32,
    business_days_after: i32,
    scheduled_for: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    cancellation_reason: Option<String>,
    draft_id_created: Option<String>,
}

impl TryFrom<FollowupRow> for FollowupTask {
    type Error = anyhow::Error;

    fn try_from(row: FollowupRow) -> Result<Self> {
        Ok(FollowupTask {
            id: row.id,
            draft_id: row.draft_id,
            followup_number: row.followup_number,
            business_days_after: row.business_days_after,
            scheduled_for: row.scheduled_for,
            status: FollowupStatus::from_str(&row.status)?,
            created_at: row.created_at,
            processed_at: row.processed_at,
            cancelled_at: row.cancelled_at,
            error_message: row.error_message,
            cancellation_reason: row.cancellation_reason,
            draft_id_created: row.draft_id_created,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = email_followups)]
struct NewFollowupRow {
    id: Uuid,
    draft_id: String,
    followup_number: i32,
    business_days_after: i32,
    scheduled_for: DateTime<Utc>,
    status: String,
}

macro_rules! blocking {
    ($pool:expr, $body:expr) => {{
        let pool = $pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("failed to get connection from pool")?;
            $body(&mut conn)
        })
        .await
        .context("blocking database task panicked")?
    }};
}

#[async_trait]
impl FollowupStore for PostgresStore {
    async fn get_draft(&self, draft_id: &str) -> Result<Option<Draft>> {
        let draft_id = draft_id.to_string();
        blocking!(self.pool, move |conn: &mut PgConnection| {
            let row = email_drafts::table
                .find(&draft_id)
                .select((
                    email_drafts::id,
                    email_drafts::status,
                    email_drafts::sent_at,
                    email_drafts::recipient,
                    email_drafts::x_external_id,
                    email_drafts::version_group_id,
                    email_drafts::followup_number,
                    email_drafts::has_reply,
                    email_drafts::initial_draft_id,
                    email_drafts::thread_id,
                    email_drafts::message_id,
                    email_drafts::original_subject,
                    email_drafts::subject,
                    email_drafts::body,
                    email_drafts::followup_ids,
                    email_drafts::followups_scheduled,
                    email_drafts::no_followup,
                    email_drafts::created_at,
                ))
                .first::<DraftRow>(conn)
                .optional()
                .context("failed to load draft")?;
            Ok(row.map(Draft::from))
        })
    }

    async fn update_draft_followup_fields(
        &self,
        draft_id: &str,
        followup_ids: Vec<String>,
        followups_scheduled: bool,
    ) -> Result<()> {
        let draft_id = draft_id.to_string();
        blocking!(self.pool, move |conn: &mut PgConnection| {
            diesel::update(email_drafts::table.find(&draft_id))
                .set((
                    email_drafts::followup_ids.eq(followup_ids),
                    email_drafts::followups_scheduled.eq(followups_scheduled),
                ))
                .execute(conn)
                .context("failed to update draft followup fields")?;
            Ok(())
        })
    }

    async fn get_sent_drafts_without_followups(&self) -> Result<Vec<Draft>> {
        blocking!(self.pool, move |conn: &mut PgConnection| {
            let rows = email_drafts::table
                .filter(email_drafts::status.eq("sent"))
                .filter(email_drafts::followup_number.eq(0))
                .filter(email_drafts::no_followup.eq(false))
                .filter(email_drafts::followups_scheduled.eq(false))
                .select((
                    email_drafts::id,
                    email_drafts::status,
                    email_drafts::sent_at,
                    email_drafts::recipient,
                    email_drafts::x_external_id,
                    email_drafts::version_group_id,
                    email_drafts::followup_number,
                    email_drafts::has_reply,
                    email_drafts::initial_draft_id,
                    email_drafts::thread_id,
                    email_drafts::message_id,
                    email_drafts::original_subject,
                    email_drafts::subject,
                    email_drafts::body,
                    email_drafts::followup_ids,
                    email_drafts::followups_scheduled,
                    email_drafts::no_followup,
                    email_drafts::created_at,
                ))
                .load::<DraftRow>(conn)
                .context("failed to load sent drafts")?;
            Ok(rows.into_iter().map(Draft::from).collect())
        })
    }

    async fn insert_followup_batch(&self, tasks: Vec<NewFollowupTask>) -> Result<Vec<FollowupTask>> {
        blocking!(self.pool, move |conn: &mut PgConnection| {
            conn.transaction(|conn| {
                let new_rows: Vec<NewFollowupRow> = tasks
                    .iter()
                    .map(|t| NewFollowupRow {
                        id: t.id,
                        draft_id: t.draft_id.clone(),
                        followup_number: t.followup_number,
                        business_days_after: t.business_days_after,
                        scheduled_for: t.scheduled_for,
                        status: FollowupStatus::Scheduled.as_str().to_string(),
                    })
                    .collect();

                diesel::insert_into(email_followups::table)
                    .values(&new_rows)
                    .execute(conn)?;

                let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
                let rows = email_followups::table
                    .filter(email_followups::id.eq_any(&ids))
                    .load::<FollowupRow>(conn)?;

                diesel::QueryResult::Ok(rows)
            })
            .context("failed to insert followup batch")?
            .into_iter()
            .map(FollowupTask::try_from)
            .collect()
        })
    }

    async fn get_tasks_for_draft(&self, draft_id: &str) -> Result<Vec<FollowupTask>> {
        let draft_id = draft_id.to_string();
        blocking!(self.pool, move |conn: &mut PgConnection| {
            let rows = email_followups::table
                .filter(email_followups::draft_id.eq(&draft_id))
                .load::<FollowupRow>(conn)
                .context("failed to load tasks for draft")?;
            rows.into_iter().map(FollowupTask::try_from).collect()
        })
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<FollowupTask>> {
        blocking!(self.pool, move |conn: &mut PgConnection| {
            let row = email_followups::table
                .find(task_id)
                .first::<FollowupRow>(conn)
                .optional()
                .context("failed to load task")?;
            row.map(FollowupTask::try_from).transpose()
        })
    }

    async fn get_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<FollowupTask>> {
        blocking!(self.pool, move |conn: &mut PgConnection| {
            let rows = email_followups::table
                .filter(email_followups::status.eq(FollowupStatus::Scheduled.as_str()))
                .filter(email_followups::scheduled_for.le(now))
                .load::<FollowupRow>(conn)
                .context("failed to load due tasks")?;
            rows.into_iter().map(FollowupTask::try_from).collect()
        })
    }

    async fn get_failed_tasks(&self) -> Result<Vec<FollowupTask>> {
        blocking!(self.pool, move |conn: &mut PgConnection| {
            let rows = email_followups::table
                .filter(email_followups::status.eq(FollowupStatus::Failed.as_str()))
                .load::<FollowupRow>(conn)
                .context("failed to load failed tasks")?;
            rows.into_iter().map(FollowupTask::try_from).collect()
        })
    }

    async fn transition_task(
        &self,
        task_id: Uuid,
        expected: FollowupStatus,
        target: FollowupStatus,
        fields: TaskTransition,
    ) -> Result<bool> {
        blocking!(self.pool, move |conn: &mut PgConnection| {
            let updated = diesel::update(
                email_followups::table
                    .filter(email_followups::id.eq(task_id))
                    .filter(email_followups::status.eq(expected.as_str())),
            )
            .set((
                email_followups::status.eq(target.as_str()),
                email_followups::processed_at.eq(fields.processed_at),
                email_followups::error_message.eq(fields.error_message),
                email_followups::cancellation_reason.eq(fields.cancellation_reason),
                email_followups::cancelled_at.eq(fields.cancelled_at),
                email_followups::draft_id_created.eq(fields.draft_id_created),
            ))
            .execute(conn)
            .context("failed to transition task")?;
            Ok(updated == 1)
        })
    }

    async fn get_prior_followup_drafts(
        &self,
        x_external_id: &str,
        before_followup_number: i32,
    ) -> Result<Vec<EmailHistoryEntry>> {
        let x_external_id = x_external_id.to_string();
        blocking!(self.pool, move |conn: &mut PgConnection| {
            let rows: Vec<(Option<String>, Option<String>)> = email_drafts::table
                .filter(email_drafts::x_external_id.eq(&x_external_id))
                .filter(email_drafts::status.eq("sent"))
                .filter(email_drafts::followup_number.lt(before_followup_number))
                .order(email_drafts::followup_number.asc())
                .select((email_drafts::subject, email_drafts::body))
                .load(conn)
                .context("failed to load prior followup drafts")?;
            Ok(rows
                .into_iter()
                .map(|(subject, body)| EmailHistoryEntry {
                    subject: subject.unwrap_or_default(),
                    body: body.unwrap_or_default(),
                })
                .collect())
        })
    }

    async fn get_drafts_with_tasks_but_empty_followup_ids(&self) -> Result<Vec<Draft>> {
        blocking!(self.pool, move |conn: &mut PgConnection| {
            use diesel::dsl::sql;
            use diesel::sql_types::Bool;

            let drafts_with_tasks: Vec<String> = email_followups::table
                .select(email_followups::draft_id)
                .distinct()
                .load(conn)
                .context("failed to list drafts with tasks")?;

            let rows = email_drafts::table
                .filter(email_drafts::id.eq_any(&drafts_with_tasks))
                .filter(sql::<Bool>("array_length(followup_ids, 1) IS NULL"))
                .select((
                    email_drafts::id,
                    email_drafts::status,
                    email_drafts::sent_at,
                    email_drafts::recipient,
                    email_drafts::x_external_id,
                    email_drafts::version_group_id,
                    email_drafts::followup_number,
                    email_drafts::has_reply,
                    email_drafts::initial_draft_id,
                    email_drafts::thread_id,
                    email_drafts::message_id,
                    email_drafts::original_subject,
                    email_drafts::subject,
                    email_drafts::body,
                    email_drafts::followup_ids,
                    email_drafts::followups_scheduled,
                    email_drafts::no_followup,
                    email_drafts::created_at,
                ))
                .load::<DraftRow>(conn)
                .context("failed to load drafts missing followup_ids")?;
            Ok(rows.into_iter().map(Draft::from).collect())
        })
    }

    async fn get_drafts_missing_scheduled_flag(&self) -> Result<Vec<Draft>> {
        blocking!(self.pool, move |conn: &mut PgConnection| {
            use diesel::dsl::sql;
            use diesel::sql_types::Bool;

            let rows = email_drafts::table
                .filter(sql::<Bool>("array_length(followup_ids, 1) IS NOT NULL"))
                .filter(email_drafts::followups_scheduled.eq(false))
                .select((
                    email_drafts::id,
                    email_drafts::status,
                    email_drafts::sent_at,
                    email_drafts::recipient,
                    email_drafts::x_external_id,
                    email_drafts::version_group_id,
                    email_drafts::followup_number,
                    email_drafts::has_reply,
                    email_drafts::initial_draft_id,
                    email_drafts::thread_id,
                    email_drafts::message_id,
                    email_drafts::original_subject,
                    email_drafts::subject,
                    email_drafts::body,
                    email_drafts::followup_ids,
                    email_drafts::followups_scheduled,
                    email_drafts::no_followup,
                    email_drafts::created_at,
                ))
                .load::<DraftRow>(conn)
                .context("failed to load drafts missing followups_scheduled flag")?;
            Ok(rows.into_iter().map(Draft::from).collect())
        })
    }

    async fn shift_task(&self, task_id: Uuid, new_scheduled_for: DateTime<Utc>) -> Result<bool> {
        blocking!(self.pool, move |conn: &mut PgConnection| {
            let updated = diesel::update(
                email_followups::table
                    .filter(email_followups::id.eq(task_id))
                    .filter(email_followups::status.eq(FollowupStatus::Scheduled.as_str())),
            )
            .set(email_followups::scheduled_for.eq(new_scheduled_for))
            .execute(conn)
            .context("failed to shift task")?;
            Ok(updated == 1)
        })
    }

    async fn mark_tasks_done(&self, task_ids: &[Uuid]) -> Result<(Vec<Uuid>, Vec<Uuid>)> {
        let task_ids = task_ids.to_vec();
        blocking!(self.pool, move |conn: &mut PgConnection| {
            let now = diesel::dsl::now.into_sql::<diesel::sql_types::Timestamptz>();
            let updated_ids: Vec<Uuid> = diesel::update(
                email_followups::table.filter(email_followups::id.eq_any(&task_ids)),
            )
            .set((
                email_followups::status.eq(FollowupStatus::Done.as_str()),
                email_followups::processed_at.eq(now.nullable()),
            ))
            .returning(email_followups::id)
            .get_results(conn)
            .context("failed to mark tasks done")?;

            let not_found: Vec<Uuid> = task_ids
                .iter()
                .filter(|id| !updated_ids.contains(id))
                .cloned()
                .collect();

            Ok((updated_ids, not_found))
        })
    }
}
