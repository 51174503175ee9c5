//! Reply threads: bounds on depth and breadth, the response window and the
//! shape of a freshly created reply.

use std::collections::HashSet;

use chrono::{NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use super::error::{WorkflowError, WorkflowResult};
use super::{MAX_REPLIES_PER_MEMO, MAX_REPLY_WINDOW_DAYS, MAX_THREAD_DEPTH, THREAD_WALK_CEILING};
use crate::models::Memo;
use crate::schema::memos;

/// Number of parent hops from `start` to the thread root.
///
/// `parent_of` returns the parent id of a memo. The walk stops after
/// `ceiling` hops or when it revisits a memo, so malformed data cannot make
/// it run away.
pub fn thread_depth<F>(start: Uuid, ceiling: usize, mut parent_of: F) -> WorkflowResult<usize>
where
    F: FnMut(Uuid) -> WorkflowResult<Option<Uuid>>,
{
    let mut seen = HashSet::from([start]);
    let mut current = start;
    let mut depth = 0;
    while depth < ceiling {
        match parent_of(current)? {
            Some(parent) if seen.insert(parent) => {
                depth += 1;
                current = parent;
            }
            Some(_) => {
                tracing::warn!(memo_id = %start, "reply chain loops back on itself");
                break;
            }
            None => break,
        }
    }
    Ok(depth)
}

/// Total number of replies below `root`, walked level by level.
///
/// `children_of` returns the direct replies of a batch of memos. Counting
/// stops once `ceiling` replies have been seen.
pub fn count_descendants<F>(root: Uuid, ceiling: usize, mut children_of: F) -> WorkflowResult<usize>
where
    F: FnMut(&[Uuid]) -> WorkflowResult<Vec<Uuid>>,
{
    let mut seen = HashSet::from([root]);
    let mut frontier = vec![root];
    let mut total = 0;
    while !frontier.is_empty() && total < ceiling {
        let children = children_of(&frontier)?;
        frontier = children
            .into_iter()
            .filter(|child| seen.insert(*child))
            .collect();
        total += frontier.len();
    }
    Ok(total.min(ceiling))
}

pub fn ensure_within_window(
    distributed_at: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> WorkflowResult<()> {
    if let Some(distributed_at) = distributed_at {
        if (now - distributed_at).num_days() > MAX_REPLY_WINDOW_DAYS {
            return Err(WorkflowError::ReplyWindowExpired {
                days: MAX_REPLY_WINDOW_DAYS,
            });
        }
    }
    Ok(())
}

/// Checks every reply bound against the stored thread of `parent`.
pub fn validate_reply(conn: &mut PgConnection, parent: &Memo, replier_id: Uuid) -> WorkflowResult<()> {
    ensure_within_window(parent.distributed_at, Utc::now().naive_utc())?;

    let depth = thread_depth(parent.id, THREAD_WALK_CEILING, |id| {
        let parent_id = memos::table
            .find(id)
            .select(memos::parent_id)
            .first::<Option<Uuid>>(conn)
            .optional()?;
        Ok(parent_id.flatten())
    })?;
    if depth >= MAX_THREAD_DEPTH {
        return Err(WorkflowError::ThreadTooDeep {
            max: MAX_THREAD_DEPTH,
        });
    }

    let replies = count_descendants(parent.id, THREAD_WALK_CEILING, |ids| {
        let children = memos::table
            .filter(memos::parent_id.eq_any(ids))
            .select(memos::id)
            .load::<Uuid>(conn)?;
        Ok(children)
    })?;
    if replies >= MAX_REPLIES_PER_MEMO {
        return Err(WorkflowError::TooManyReplies {
            max: MAX_REPLIES_PER_MEMO,
        });
    }

    let already_replied: bool = diesel::select(exists(
        memos::table
            .filter(memos::parent_id.eq(parent.id))
            .filter(memos::author_id.eq(replier_id)),
    ))
    .get_result(conn)?;
    if already_replied {
        return Err(WorkflowError::DuplicateReply);
    }

    Ok(())
}

/// Recipients of a reply: the original author, optionally the other original
/// recipients, then any explicit additions. Order is preserved and the
/// replier never addresses themselves.
pub fn reply_recipients(
    parent_author: Uuid,
    parent_recipients: &[Uuid],
    replier: Uuid,
    include_all: bool,
    additional: &[Uuid],
) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    let mut recipients = Vec::new();
    let mut push = |id: Uuid| {
        if id != replier && seen.insert(id) {
            recipients.push(id);
        }
    };

    push(parent_author);
    if include_all {
        parent_recipients.iter().copied().for_each(&mut push);
    }
    additional.iter().copied().for_each(&mut push);
    recipients
}

pub fn default_reply_subject(parent_subject: &str) -> String {
    let trimmed = parent_subject.trim();
    if trimmed.to_ascii_uppercase().starts_with("RE:") {
        trimmed.to_string()
    } else {
        format!("RE: {trimmed}")
    }
}

/// Department whose director is proposed as approver of a reply.
///
/// The reply stays in the parent's department, so a director from another
/// department could never approve it; the author then picks one.
pub fn reply_approver_department(
    replier_department: Option<Uuid>,
    parent_department: Option<Uuid>,
) -> Option<Uuid> {
    match (replier_department, parent_department) {
        (Some(replier), Some(parent)) if replier != parent => None,
        (replier, _) => replier,
    }
}

/// Body used when the replier does not write one.
pub fn default_reply_body(parent: &Memo, parent_author_name: &str) -> String {
    let number = parent.correlative_number.as_deref().unwrap_or("N/A");
    let distributed = parent
        .distributed_at
        .map(|at| at.format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "In reply to memorandum {number}.\n\n\
         > Subject: {subject}\n\
         > From: {parent_author_name}\n\
         > Distributed: {distributed}\n\n",
        subject = parent.subject.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memos::policy::tests::sample_memo;
    use crate::memos::MemoStatus;
    use chrono::Duration;
    use std::collections::HashMap;

    #[test]
    fn cross_department_replies_get_no_default_approver() {
        let legal = Uuid::new_v4();
        let finance = Uuid::new_v4();
        assert_eq!(reply_approver_department(Some(legal), Some(legal)), Some(legal));
        assert_eq!(reply_approver_department(Some(finance), Some(legal)), None);
        assert_eq!(reply_approver_department(Some(finance), None), Some(finance));
        assert_eq!(reply_approver_department(None, Some(legal)), None);
    }

    fn chain(len: usize) -> (Vec<Uuid>, HashMap<Uuid, Uuid>) {
        let ids: Vec<Uuid> = (0..=len).map(|_| Uuid::new_v4()).collect();
        let parents = ids.windows(2).map(|pair| (pair[1], pair[0])).collect();
        (ids, parents)
    }

    #[test]
    fn depth_counts_hops_to_root() {
        let (ids, parents) = chain(MAX_THREAD_DEPTH);
        let depth = thread_depth(*ids.last().unwrap(), THREAD_WALK_CEILING, |id| {
            Ok(parents.get(&id).copied())
        })
        .unwrap();
        assert_eq!(depth, MAX_THREAD_DEPTH);

        let root_depth =
            thread_depth(ids[0], THREAD_WALK_CEILING, |id| Ok(parents.get(&id).copied())).unwrap();
        assert_eq!(root_depth, 0);
    }

    #[test]
    fn depth_walk_survives_cycles_and_respects_ceiling() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let cyclic = HashMap::from([(a, b), (b, a)]);
        let depth = thread_depth(a, THREAD_WALK_CEILING, |id| Ok(cyclic.get(&id).copied())).unwrap();
        assert_eq!(depth, 1);

        let (ids, parents) = chain(50);
        let mut calls = 0;
        let capped = thread_depth(*ids.last().unwrap(), 10, |id| {
            calls += 1;
            Ok(parents.get(&id).copied())
        })
        .unwrap();
        assert_eq!(capped, 10);
        assert_eq!(calls, 10);
    }

    #[test]
    fn descendants_are_counted_across_levels() {
        let root = Uuid::new_v4();
        let first: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let second: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        children.insert(root, first.clone());
        children.insert(first[1], second.clone());
        children.insert(second[0], vec![root]);

        let total = count_descendants(root, THREAD_WALK_CEILING, |ids| {
            Ok(ids
                .iter()
                .flat_map(|id| children.get(id).cloned().unwrap_or_default())
                .collect())
        })
        .unwrap();
        assert_eq!(total, 5);
    }

    #[test]
    fn descendant_count_is_capped() {
        let root = Uuid::new_v4();
        let total = count_descendants(root, 7, |ids| {
            Ok(ids.iter().flat_map(|_| (0..4).map(|_| Uuid::new_v4())).collect())
        })
        .unwrap();
        assert_eq!(total, 7);
    }

    #[test]
    fn reply_window_is_inclusive_of_the_last_day() {
        let distributed = Utc::now().naive_utc();
        let at_limit = distributed + Duration::days(MAX_REPLY_WINDOW_DAYS) + Duration::hours(23);
        assert!(ensure_within_window(Some(distributed), at_limit).is_ok());

        let expired = distributed + Duration::days(MAX_REPLY_WINDOW_DAYS + 1);
        let err = ensure_within_window(Some(distributed), expired).unwrap_err();
        assert_eq!(err.code(), "REPLY_WINDOW_EXPIRED");

        assert!(ensure_within_window(None, expired).is_ok());
    }

    #[test]
    fn reply_recipients_start_with_the_original_author() {
        let author = Uuid::new_v4();
        let replier = Uuid::new_v4();
        let colleague = Uuid::new_v4();
        let extra = Uuid::new_v4();
        let original = [replier, colleague];

        assert_eq!(
            reply_recipients(author, &original, replier, false, &[]),
            vec![author]
        );
        assert_eq!(
            reply_recipients(author, &original, replier, true, &[extra, author]),
            vec![author, colleague, extra]
        );
        assert_eq!(
            reply_recipients(author, &original, replier, false, &[replier, extra]),
            vec![author, extra]
        );
    }

    #[test]
    fn default_subject_and_body_quote_the_original() {
        assert_eq!(default_reply_subject("Budget"), "RE: Budget");
        assert_eq!(default_reply_subject("Re: Budget"), "Re: Budget");

        let mut parent = sample_memo(Uuid::new_v4(), None, MemoStatus::Distributed);
        parent.correlative_number = Some("FIN-2024-03-0042".to_string());
        parent.distributed_at = Some(parent.created_at + Duration::hours(2));
        let body = default_reply_body(&parent, "Ana Torres");
        assert!(body.contains("FIN-2024-03-0042"));
        assert!(body.contains("> Subject: Quarterly budget review"));
        assert!(body.contains("> From: Ana Torres"));
        assert!(body.contains("04/03/2024 11:30"));
    }
}
