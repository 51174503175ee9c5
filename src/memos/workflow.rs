//! Memo operations as exposed over HTTP.
//!
//! Every state change runs in a transaction holding the memo row lock and
//! re-checks the source status and the actor under that lock. Notifications,
//! storage uploads and PDF rendering happen outside of it.

use chrono::{NaiveDateTime, SubsecRound, Utc};
use diesel::dsl::sql;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Text};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::artifact::{self, ArtifactContent};
use super::attachments;
use super::directory;
use super::distribution::{self, Distribution};
use super::error::{WorkflowError, WorkflowResult};
use super::policy::{self, Actor};
use super::seal::{self, DigitalSeal, RequestContext, SealApprover};
use super::sequence;
use super::status::{MemoStatus, Priority, Transition};
use super::thread;
use crate::models::{Department, Memo, MemoChangeset, NewMemo, User};
use crate::notify::{transition_notice, Audience};
use crate::schema::{memo_recipients, memos};
use crate::state::AppState;
use crate::storage::{self, PRESIGNED_URL_EXPIRY};

#[derive(Debug, Clone, Default)]
pub struct NewMemoInput {
    pub subject: String,
    pub body: String,
    pub priority: Option<Priority>,
    pub confidential: bool,
    pub approver_id: Option<Uuid>,
    pub recipient_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoChanges {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub priority: Option<Priority>,
    pub confidential: Option<bool>,
    pub approver_id: Option<Uuid>,
    pub recipient_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplyInput {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub include_all_recipients: bool,
    pub additional_recipients: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: &'static str,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepReport {
    fn completed(step: &'static str) -> Self {
        Self {
            step,
            outcome: StepOutcome::Completed,
            detail: None,
        }
    }

    fn failed(step: &'static str, detail: impl Into<String>) -> Self {
        Self {
            step,
            outcome: StepOutcome::Failed,
            detail: Some(detail.into()),
        }
    }

    fn skipped(step: &'static str, detail: impl Into<String>) -> Self {
        Self {
            step,
            outcome: StepOutcome::Skipped,
            detail: Some(detail.into()),
        }
    }
}

/// Result of the approval pipeline. The memo is approved whenever this is
/// returned; individual steps may still have failed.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalReport {
    pub memo_id: Uuid,
    pub status: MemoStatus,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SealVerification {
    pub memo_id: Uuid,
    pub correlative_number: Option<String>,
    pub subject: String,
    pub status: String,
    pub approver: SealApprover,
    pub sealed_at: String,
    pub content_intact: bool,
}

fn now_micros() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(6)
}

fn forbid<T>(result: Result<T, super::error::Denial>) -> WorkflowResult<T> {
    result.map_err(WorkflowError::Forbidden)
}

/// Tells the audience chosen for `previous -> memo.status` about the change.
/// Recipients are reached through distribution instead.
async fn notify_transition(state: &AppState, previous: MemoStatus, memo: &Memo) {
    let Ok(current) = policy::memo_status(memo) else {
        return;
    };
    let Some(notice) = transition_notice(previous, current, memo) else {
        return;
    };
    if !state.notifier.is_enabled() {
        return;
    }

    let target = match notice.audience {
        Audience::Approver => memo.approver_id,
        Audience::Author => Some(memo.author_id),
        Audience::Recipients => None,
    };
    let Some(target) = target else {
        return;
    };

    let email = match state.pooled() {
        Ok(mut conn) => directory::load_user(&mut conn, target)
            .ok()
            .and_then(|user| user.email),
        Err(err) => {
            warn!(memo_id = %memo.id, error = %err, "no connection to resolve notification target");
            None
        }
    };
    let Some(email) = email.filter(|email| !email.trim().is_empty()) else {
        warn!(memo_id = %memo.id, user_id = %target, "notification target has no email address");
        return;
    };

    if let Err(err) = state
        .notifier
        .send(&email, &notice.subject, &notice.body)
        .await
    {
        warn!(memo_id = %memo.id, error = %err, "transition notification failed");
    }
}

pub fn create(conn: &mut PgConnection, actor: &Actor, input: NewMemoInput) -> WorkflowResult<Memo> {
    forbid(policy::authorize_create(actor))?;
    policy::validate_recipient_count(input.recipient_ids.len())?;

    conn.transaction::<Memo, WorkflowError, _>(|conn| {
        let recipients = directory::ensure_users_exist(conn, &input.recipient_ids)?;
        policy::validate_recipient_count(recipients.len())?;
        let approver_id = match input.approver_id {
            Some(approver_id) => {
                directory::ensure_users_exist(conn, &[approver_id])?;
                Some(approver_id)
            }
            None => directory::department_director(conn, actor.department_id)?,
        };

        let memo = diesel::insert_into(memos::table)
            .values(&NewMemo {
                id: Uuid::new_v4(),
                subject: input.subject.trim().to_string(),
                body: input.body,
                priority: input.priority.unwrap_or_default().as_str().to_string(),
                confidential: input.confidential,
                status: MemoStatus::Draft.as_str().to_string(),
                author_id: actor.id,
                department_id: actor.department_id,
                approver_id,
                parent_id: None,
            })
            .get_result::<Memo>(conn)?;
        directory::replace_recipients(conn, memo.id, &recipients)?;

        info!(memo_id = %memo.id, author_id = %actor.id, "memo drafted");
        Ok(memo)
    })
}

pub fn update(
    conn: &mut PgConnection,
    actor: &Actor,
    memo_id: Uuid,
    changes: MemoChanges,
) -> WorkflowResult<Memo> {
    conn.transaction::<Memo, WorkflowError, _>(|conn| {
        let memo = directory::lock_memo(conn, memo_id)?;
        forbid(policy::authorize_edit(actor, &memo))?;
        let current = policy::memo_status(&memo)?;
        if !current.is_editable() {
            return Err(WorkflowError::NotEditable { current });
        }

        if let Some(approver_id) = changes.approver_id {
            directory::ensure_users_exist(conn, &[approver_id])?;
        }
        if let Some(ids) = &changes.recipient_ids {
            policy::validate_recipient_count(ids.len())?;
            let recipients = directory::ensure_users_exist(conn, ids)?;
            directory::replace_recipients(conn, memo_id, &recipients)?;
        }

        let changeset = MemoChangeset {
            subject: changes.subject.map(|subject| subject.trim().to_string()),
            body: changes.body,
            priority: changes.priority.map(|priority| priority.as_str().to_string()),
            confidential: changes.confidential,
            approver_id: changes.approver_id,
            updated_at: Some(Utc::now().naive_utc()),
        };
        Ok(diesel::update(memos::table.find(memo_id))
            .set(&changeset)
            .get_result::<Memo>(conn)?)
    })
}

/// Deletes a draft with its recipients and attachments.
pub async fn delete(state: &AppState, actor: &Actor, memo_id: Uuid) -> WorkflowResult<()> {
    let keys = {
        let mut conn = state.pooled()?;
        conn.transaction::<Vec<String>, WorkflowError, _>(|conn| {
            let memo = directory::lock_memo(conn, memo_id)?;
            forbid(policy::authorize_edit(actor, &memo))?;
            let current = policy::memo_status(&memo)?;
            if current != MemoStatus::Draft {
                return Err(WorkflowError::NotEditable { current });
            }
            let keys = attachments::stored_keys(conn, memo_id)?;
            diesel::delete(memos::table.find(memo_id)).execute(conn)?;
            Ok(keys)
        })?
    };
    attachments::purge_objects(state, keys).await;
    info!(memo_id = %memo_id, "draft deleted");
    Ok(())
}

pub async fn submit(state: &AppState, actor: &Actor, memo_id: Uuid) -> WorkflowResult<Memo> {
    let lock_timeout = state.config.sequence_lock_timeout;
    let (previous, memo) = {
        let mut conn = state.pooled()?;
        conn.transaction::<_, WorkflowError, _>(|conn| {
            let memo = directory::lock_memo(conn, memo_id)?;
            let previous = policy::ensure_source(Transition::Submit, &memo)?;
            forbid(policy::authorize(Transition::Submit, actor, &memo, &[]))?;
            let recipients = directory::recipient_ids(conn, memo_id)?;
            policy::validate_submission(&memo, recipients.len())?;

            let correlative_number = match (&memo.correlative_number, memo.department_id) {
                (None, Some(department_id)) => Some(
                    sequence::allocate(conn, department_id, None, None, lock_timeout)?
                        .to_string(),
                ),
                (existing, _) => existing.clone(),
            };

            let memo = diesel::update(memos::table.find(memo_id))
                .set((
                    memos::status.eq(MemoStatus::PendingApproval.as_str()),
                    memos::correlative_number.eq(&correlative_number),
                    memos::rejection_reason.eq(None::<String>),
                    memos::modification_comments.eq(None::<String>),
                    memos::updated_at.eq(Utc::now().naive_utc()),
                ))
                .get_result::<Memo>(conn)?;
            Ok((previous, memo))
        })?
    };

    info!(
        memo_id = %memo.id,
        correlative_number = memo.correlative_number.as_deref().unwrap_or("-"),
        "memo submitted for approval"
    );
    notify_transition(state, previous, &memo).await;
    Ok(memo)
}

struct ApprovalContext {
    memo: Memo,
    approver: User,
    approver_department: Option<Department>,
    author_name: String,
    recipient_names: Vec<String>,
    department_name: Option<String>,
}

fn load_approval_context(
    conn: &mut PgConnection,
    actor: &Actor,
    memo_id: Uuid,
) -> WorkflowResult<ApprovalContext> {
    let memo = directory::load_memo(conn, memo_id)?;
    policy::ensure_source(Transition::Approve, &memo)?;
    forbid(policy::authorize(Transition::Approve, actor, &memo, &[]))?;

    let approver = directory::load_user(conn, actor.id)?;
    let approver_department = match approver.department_id {
        Some(id) => directory::load_department(conn, id)?,
        None => None,
    };
    let author_name = directory::load_user(conn, memo.author_id)?
        .full_name()
        .to_string();
    let recipient_names = directory::recipients(conn, memo_id)?
        .iter()
        .map(|user| user.full_name().to_string())
        .collect();
    let department_name = match memo.department_id {
        Some(id) => directory::load_department(conn, id)?.map(|department| department.name),
        None => None,
    };

    Ok(ApprovalContext {
        memo,
        approver,
        approver_department,
        author_name,
        recipient_names,
        department_name,
    })
}

async fn render_and_store(
    state: &AppState,
    content: ArtifactContent,
    memo_id: Uuid,
    correlative_number: Option<&str>,
) -> Result<String, String> {
    let pdf = tokio::task::spawn_blocking(move || artifact::render(&content))
        .await
        .map_err(|err| format!("render task panicked: {err}"))??;

    let key = storage::signed_artifact_key(memo_id, correlative_number);
    let filename = format!("{}.pdf", correlative_number.unwrap_or("memo"));
    state
        .storage
        .put_object(
            &key,
            pdf,
            Some("application/pdf".to_string()),
            storage::attachment_disposition(&filename),
        )
        .await
        .map_err(|err| format!("{err:#}"))?;
    Ok(key)
}

/// Approves a pending memo and distributes it.
///
/// Seal, artifact and distribution are best effort and reported per step;
/// the approval itself stands once the status write commits.
pub async fn approve(
    state: &AppState,
    actor: &Actor,
    memo_id: Uuid,
    request: RequestContext,
) -> WorkflowResult<ApprovalReport> {
    let context = {
        let mut conn = state.pooled()?;
        load_approval_context(&mut conn, actor, memo_id)?
    };
    let mut steps = Vec::new();

    let approved_at = now_micros();
    let mut sealed_memo = context.memo.clone();
    sealed_memo.approved_at = Some(approved_at);

    let seal = match seal::build(
        &sealed_memo,
        Some(&context.approver),
        context.approver_department.as_ref(),
        Some(request),
    ) {
        Ok(seal) => {
            steps.push(StepReport::completed("seal"));
            Some(seal)
        }
        Err(err) => {
            warn!(memo_id = %memo_id, error = %err, "seal construction failed");
            steps.push(StepReport::failed("seal", err.to_string()));
            None
        }
    };
    let seal_value = match seal.as_ref().map(DigitalSeal::to_value).transpose() {
        Ok(value) => value,
        Err(err) => {
            warn!(memo_id = %memo_id, error = %err, "seal could not be serialized");
            None
        }
    };

    let artifact_key = match &seal {
        Some(seal) => {
            let content = ArtifactContent {
                correlative_number: sealed_memo.correlative_number.clone(),
                subject: sealed_memo.subject.clone(),
                body: sealed_memo.body.clone(),
                priority: sealed_memo.priority.clone(),
                confidential: sealed_memo.confidential,
                department: context.department_name.clone(),
                author: context.author_name.clone(),
                recipients: context.recipient_names.clone(),
                approved_at: approved_at.format("%Y-%m-%d %H:%M UTC").to_string(),
                seal: seal.clone(),
            };
            match render_and_store(
                state,
                content,
                memo_id,
                sealed_memo.correlative_number.as_deref(),
            )
            .await
            {
                Ok(key) => {
                    steps.push(StepReport::completed("artifact"));
                    Some(key)
                }
                Err(err) => {
                    error!(memo_id = %memo_id, error = %err, "signed artifact not produced");
                    steps.push(StepReport::failed("artifact", err));
                    None
                }
            }
        }
        None => {
            steps.push(StepReport::skipped("artifact", "memo has no seal"));
            None
        }
    };

    let written = {
        let mut conn = state.pooled()?;
        conn.transaction::<Memo, WorkflowError, _>(|conn| {
            let memo = directory::lock_memo(conn, memo_id)?;
            let current = policy::ensure_source(Transition::Approve, &memo)?;
            forbid(policy::authorize(Transition::Approve, actor, &memo, &[]))?;
            ensure_unchanged(&context.memo, &memo, current)?;
            Ok(diesel::update(memos::table.find(memo_id))
                .set((
                    memos::status.eq(MemoStatus::Approved.as_str()),
                    memos::approved_at.eq(approved_at),
                    memos::digital_seal.eq(&seal_value),
                    memos::signed_artifact_key.eq(&artifact_key),
                    memos::updated_at.eq(Utc::now().naive_utc()),
                ))
                .get_result::<Memo>(conn)?)
        })
    };
    let memo = match written {
        Ok(memo) => memo,
        Err(err) => {
            if let Some(key) = &artifact_key {
                if let Err(cleanup) = state.storage.delete_object(key).await {
                    warn!(key = %key, error = %cleanup, "failed to remove orphaned artifact");
                }
            }
            return Err(err);
        }
    };
    steps.push(StepReport::completed("approve"));
    info!(memo_id = %memo_id, approver_id = %actor.id, "memo approved");
    notify_transition(state, MemoStatus::PendingApproval, &memo).await;

    let (status, distribution) = match distribution::distribute(state, actor, memo_id).await {
        Ok(distribution) => {
            steps.push(StepReport::completed("distribute"));
            (MemoStatus::Distributed, Some(distribution))
        }
        Err(err) => {
            error!(memo_id = %memo_id, error = %err, "distribution after approval failed");
            steps.push(StepReport::failed("distribute", err.to_string()));
            (MemoStatus::Approved, None)
        }
    };

    Ok(ApprovalReport {
        memo_id,
        status,
        steps,
        distribution,
    })
}

pub async fn reject(
    state: &AppState,
    actor: &Actor,
    memo_id: Uuid,
    reason: Option<String>,
) -> WorkflowResult<Memo> {
    let reason = reason.unwrap_or_default().trim().to_string();
    let memo = {
        let mut conn = state.pooled()?;
        conn.transaction::<Memo, WorkflowError, _>(|conn| {
            let memo = directory::lock_memo(conn, memo_id)?;
            policy::ensure_source(Transition::Reject, &memo)?;
            forbid(policy::authorize(Transition::Reject, actor, &memo, &[]))?;
            Ok(diesel::update(memos::table.find(memo_id))
                .set((
                    memos::status.eq(MemoStatus::Rejected.as_str()),
                    memos::rejection_reason.eq(&reason),
                    memos::updated_at.eq(Utc::now().naive_utc()),
                ))
                .get_result::<Memo>(conn)?)
        })?
    };
    info!(memo_id = %memo_id, approver_id = %actor.id, "memo rejected");
    notify_transition(state, MemoStatus::PendingApproval, &memo).await;
    Ok(memo)
}

pub async fn request_modification(
    state: &AppState,
    actor: &Actor,
    memo_id: Uuid,
    comments: &str,
) -> WorkflowResult<Memo> {
    let memo = {
        let mut conn = state.pooled()?;
        conn.transaction::<Memo, WorkflowError, _>(|conn| {
            let memo = directory::lock_memo(conn, memo_id)?;
            policy::ensure_source(Transition::RequestModification, &memo)?;
            forbid(policy::authorize(
                Transition::RequestModification,
                actor,
                &memo,
                &[],
            ))?;
            let comments = policy::validate_modification_comments(comments)?;
            Ok(diesel::update(memos::table.find(memo_id))
                .set((
                    memos::status.eq(MemoStatus::ModificationRequested.as_str()),
                    memos::modification_comments.eq(&comments),
                    memos::updated_at.eq(Utc::now().naive_utc()),
                ))
                .get_result::<Memo>(conn)?)
        })?
    };
    info!(memo_id = %memo_id, approver_id = %actor.id, "modifications requested");
    notify_transition(state, MemoStatus::PendingApproval, &memo).await;
    Ok(memo)
}

/// Drafts a reply to a distributed memo on behalf of one of its recipients.
pub fn reply(
    conn: &mut PgConnection,
    actor: &Actor,
    parent_id: Uuid,
    input: ReplyInput,
) -> WorkflowResult<Memo> {
    conn.transaction::<Memo, WorkflowError, _>(|conn| {
        let parent = directory::lock_memo(conn, parent_id)?;
        policy::ensure_source(Transition::Reply, &parent)?;
        let parent_recipients = directory::recipient_ids(conn, parent_id)?;
        forbid(policy::authorize(
            Transition::Reply,
            actor,
            &parent,
            &parent_recipients,
        ))?;
        thread::validate_reply(conn, &parent, actor.id)?;

        let additional = directory::ensure_users_exist(conn, &input.additional_recipients)?;
        let recipients = thread::reply_recipients(
            parent.author_id,
            &parent_recipients,
            actor.id,
            input.include_all_recipients,
            &additional,
        );
        policy::validate_recipient_count(recipients.len())?;

        let subject = input
            .subject
            .map(|subject| subject.trim().to_string())
            .filter(|subject| !subject.is_empty())
            .unwrap_or_else(|| thread::default_reply_subject(&parent.subject));
        let body = match input.body.filter(|body| !body.trim().is_empty()) {
            Some(body) => body,
            None => {
                let parent_author = directory::load_user(conn, parent.author_id)?;
                thread::default_reply_body(&parent, parent_author.full_name())
            }
        };
        let approver_id = directory::department_director(
            conn,
            thread::reply_approver_department(actor.department_id, parent.department_id),
        )?;

        let reply = diesel::insert_into(memos::table)
            .values(&NewMemo {
                id: Uuid::new_v4(),
                subject,
                body,
                priority: parent.priority.clone(),
                confidential: parent.confidential,
                status: MemoStatus::Draft.as_str().to_string(),
                author_id: actor.id,
                department_id: parent.department_id,
                approver_id,
                parent_id: Some(parent.id),
            })
            .get_result::<Memo>(conn)?;
        directory::replace_recipients(conn, reply.id, &recipients)?;

        info!(memo_id = %reply.id, parent_id = %parent.id, "reply drafted");
        Ok(reply)
    })
}

/// Loads a memo the actor may read; anything else is reported as missing.
pub fn get(conn: &mut PgConnection, actor: &Actor, memo_id: Uuid) -> WorkflowResult<Memo> {
    let memo = directory::load_memo(conn, memo_id)?;
    let is_recipient = directory::recipient_ids(conn, memo_id)?.contains(&actor.id);
    if !policy::can_view(actor, &memo, is_recipient) {
        return Err(WorkflowError::NotFound("memo"));
    }
    Ok(memo)
}

pub fn list(
    conn: &mut PgConnection,
    actor: &Actor,
    status: Option<MemoStatus>,
) -> WorkflowResult<Vec<Memo>> {
    let mut ids: Vec<Uuid> = memos::table
        .filter(memos::author_id.eq(actor.id))
        .select(memos::id)
        .load(conn)?;

    if actor.role == super::Role::Director {
        ids.extend(
            memos::table
                .filter(memos::approver_id.eq(actor.id))
                .select(memos::id)
                .load::<Uuid>(conn)?,
        );
        if let Some(department_id) = actor.department_id {
            ids.extend(
                memos::table
                    .filter(memos::status.eq(MemoStatus::PendingApproval.as_str()))
                    .filter(memos::department_id.eq(department_id))
                    .select(memos::id)
                    .load::<Uuid>(conn)?,
            );
        }
    }

    ids.extend(
        memo_recipients::table
            .inner_join(memos::table)
            .filter(memo_recipients::user_id.eq(actor.id))
            .filter(memos::status.eq_any([
                MemoStatus::Approved.as_str(),
                MemoStatus::Distributed.as_str(),
            ]))
            .select(memos::id)
            .load::<Uuid>(conn)?,
    );
    ids.sort_unstable();
    ids.dedup();

    let mut query = memos::table.filter(memos::id.eq_any(ids)).into_boxed();
    if let Some(status) = status {
        query = query.filter(memos::status.eq(status.as_str()));
    }
    Ok(query.order(memos::created_at.desc()).load::<Memo>(conn)?)
}

pub async fn signed_artifact_url(
    state: &AppState,
    actor: &Actor,
    memo_id: Uuid,
) -> WorkflowResult<String> {
    let memo = {
        let mut conn = state.pooled()?;
        get(&mut conn, actor, memo_id)?
    };
    let key = memo
        .signed_artifact_key
        .ok_or(WorkflowError::NotFound("signed artifact"))?;
    state
        .storage
        .presign_get_object(&key, PRESIGNED_URL_EXPIRY)
        .await
        .map_err(WorkflowError::Storage)
}

/// Looks a seal up by verification code and re-checks the content hash.
pub fn verify_seal(conn: &mut PgConnection, code: &str) -> WorkflowResult<SealVerification> {
    let memo = memos::table
        .filter(sql::<Bool>("digital_seal ->> 'verification_code' = ").bind::<Text, _>(code))
        .first::<Memo>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound("seal"))?;
    let seal = memo
        .digital_seal
        .as_ref()
        .and_then(DigitalSeal::from_value)
        .ok_or_else(|| WorkflowError::Corrupt(format!("unreadable seal on memo {}", memo.id)))?;

    Ok(SealVerification {
        memo_id: memo.id,
        content_intact: seal.matches(&memo),
        correlative_number: memo.correlative_number,
        subject: memo.subject,
        status: memo.status,
        approver: seal.approver,
        sealed_at: seal.sealed_at,
    })
}

/// The seal and artifact were built from `snapshot`; the locked row must be
/// that same revision or they would describe content that was never approved.
fn ensure_unchanged(snapshot: &Memo, locked: &Memo, current: MemoStatus) -> WorkflowResult<()> {
    if locked.updated_at == snapshot.updated_at {
        Ok(())
    } else {
        Err(WorkflowError::ChangedDuringApproval { current })
    }
}
