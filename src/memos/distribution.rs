//! Fan-out of an approved memo to its recipients.
//!
//! Every recipient is notified independently and gets exactly one delivery
//! record. Sends happen before the write transaction so no network I/O runs
//! while the memo row is locked.

use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::directory;
use super::error::{WorkflowError, WorkflowResult};
use super::policy::{self, Actor};
use super::status::{DeliveryMethod, DeliveryState, MemoStatus, Transition};
use crate::models::{DistributionRecord, Memo, NewDistributionRecord, User};
use crate::notify::{transition_notice, Notifier};
use crate::schema::{distribution_records, memos};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub recipient_id: Uuid,
    pub state: DeliveryState,
    pub delivered_at: Option<NaiveDateTime>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryTally {
    pub delivered: usize,
    pub failed: usize,
    pub pending: usize,
}

pub fn tally(outcomes: &[DeliveryOutcome]) -> DeliveryTally {
    outcomes
        .iter()
        .fold(DeliveryTally::default(), |mut tally, outcome| {
            match outcome.state {
                DeliveryState::Delivered => tally.delivered += 1,
                DeliveryState::Error => tally.failed += 1,
                DeliveryState::Pending | DeliveryState::Sent => tally.pending += 1,
            }
            tally
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct Distribution {
    pub memo_id: Uuid,
    pub distributed_at: Option<NaiveDateTime>,
    pub outcomes: Vec<DeliveryOutcome>,
    pub tally: DeliveryTally,
}

/// Notifies each recipient in turn; one failure never stops the others.
pub async fn dispatch(
    notifier: &dyn Notifier,
    recipients: &[User],
    subject: &str,
    body: &str,
) -> Vec<DeliveryOutcome> {
    let mut outcomes = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let outcome = if !notifier.is_enabled() {
            DeliveryOutcome {
                recipient_id: recipient.id,
                state: DeliveryState::Pending,
                delivered_at: None,
                error: None,
            }
        } else {
            match recipient.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
                None => DeliveryOutcome {
                    recipient_id: recipient.id,
                    state: DeliveryState::Error,
                    delivered_at: None,
                    error: Some("recipient has no email address".to_string()),
                },
                Some(email) => match notifier.send(email, subject, body).await {
                    Ok(()) => DeliveryOutcome {
                        recipient_id: recipient.id,
                        state: DeliveryState::Delivered,
                        delivered_at: Some(Utc::now().naive_utc()),
                        error: None,
                    },
                    Err(err) => {
                        warn!(recipient_id = %recipient.id, error = %err, "memo delivery failed");
                        DeliveryOutcome {
                            recipient_id: recipient.id,
                            state: DeliveryState::Error,
                            delivered_at: None,
                            error: Some(format!("{err:#}")),
                        }
                    }
                },
            }
        };
        outcomes.push(outcome);
    }
    outcomes
}

/// Writes one record per outcome and moves the memo to `Distributed`.
///
/// Runs under the memo row lock and fails with `NotApproved` if the memo left
/// `Approved` since the sends went out.
pub fn record(
    conn: &mut PgConnection,
    memo_id: Uuid,
    outcomes: &[DeliveryOutcome],
) -> WorkflowResult<Memo> {
    conn.transaction::<Memo, WorkflowError, _>(|conn| {
        let memo = directory::lock_memo(conn, memo_id)?;
        let current = policy::memo_status(&memo)?;
        if current != MemoStatus::Approved {
            return Err(WorkflowError::NotApproved { current });
        }

        let now = Utc::now().naive_utc();
        let rows: Vec<NewDistributionRecord> = outcomes
            .iter()
            .map(|outcome| NewDistributionRecord {
                id: Uuid::new_v4(),
                memo_id,
                recipient_id: outcome.recipient_id,
                method: DeliveryMethod::Email.as_str().to_string(),
                state: DeliveryState::Sent.as_str().to_string(),
                sent_at: now,
            })
            .collect();
        diesel::insert_into(distribution_records::table)
            .values(&rows)
            .execute(conn)?;

        for outcome in outcomes {
            if outcome.state == DeliveryState::Sent {
                continue;
            }
            diesel::update(
                distribution_records::table
                    .filter(distribution_records::memo_id.eq(memo_id))
                    .filter(distribution_records::recipient_id.eq(outcome.recipient_id)),
            )
            .set((
                distribution_records::state.eq(outcome.state.as_str()),
                distribution_records::delivered_at.eq(outcome.delivered_at),
                distribution_records::error_message.eq(outcome.error.as_deref()),
                distribution_records::updated_at.eq(now),
            ))
            .execute(conn)?;
        }

        let memo = diesel::update(memos::table.find(memo_id))
            .set((
                memos::status.eq(MemoStatus::Distributed.as_str()),
                memos::distributed_at.eq(now),
                memos::updated_at.eq(now),
            ))
            .get_result::<Memo>(conn)?;
        Ok(memo)
    })
}

/// Distributes an approved memo on behalf of its approver.
pub async fn distribute(
    state: &AppState,
    actor: &Actor,
    memo_id: Uuid,
) -> WorkflowResult<Distribution> {
    let (memo, recipients) = {
        let mut conn = state.pooled()?;
        let memo = directory::load_memo(&mut conn, memo_id)?;
        let current = policy::memo_status(&memo)?;
        if current != MemoStatus::Approved {
            return Err(WorkflowError::NotApproved { current });
        }
        policy::authorize(Transition::Distribute, actor, &memo, &[])
            .map_err(WorkflowError::Forbidden)?;
        let recipients = directory::recipients(&mut conn, memo_id)?;
        (memo, recipients)
    };

    let (subject, body) = transition_notice(MemoStatus::Approved, MemoStatus::Distributed, &memo)
        .map(|notice| (notice.subject, notice.body))
        .unwrap_or_else(|| (memo.subject.clone(), memo.body.clone()));
    let outcomes = dispatch(state.notifier.as_ref(), &recipients, &subject, &body).await;

    let mut conn = state.pooled()?;
    let memo = record(&mut conn, memo_id, &outcomes)?;
    let tally = tally(&outcomes);
    info!(
        memo_id = %memo_id,
        delivered = tally.delivered,
        failed = tally.failed,
        pending = tally.pending,
        "memo distributed"
    );

    Ok(Distribution {
        memo_id,
        distributed_at: memo.distributed_at,
        outcomes,
        tally,
    })
}

pub fn list_records(
    conn: &mut PgConnection,
    memo_id: Uuid,
) -> WorkflowResult<Vec<DistributionRecord>> {
    Ok(distribution_records::table
        .filter(distribution_records::memo_id.eq(memo_id))
        .order(distribution_records::sent_at.asc())
        .load::<DistributionRecord>(conn)?)
}

/// Marks the recipient's record as read. Repeated calls keep the first timestamp.
pub fn acknowledge(
    conn: &mut PgConnection,
    memo_id: Uuid,
    recipient_id: Uuid,
) -> WorkflowResult<DistributionRecord> {
    let record = distribution_records::table
        .filter(distribution_records::memo_id.eq(memo_id))
        .filter(distribution_records::recipient_id.eq(recipient_id))
        .first::<DistributionRecord>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound("distribution record"))?;
    if record.acknowledged {
        return Ok(record);
    }

    let now = Utc::now().naive_utc();
    Ok(diesel::update(distribution_records::table.find(record.id))
        .set((
            distribution_records::acknowledged.eq(true),
            distribution_records::acknowledged_at.eq(now),
            distribution_records::updated_at.eq(now),
        ))
        .get_result::<DistributionRecord>(conn)?)
}
