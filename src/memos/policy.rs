//! Authorization and precondition checks for each memo transition.
//!
//! Every transition goes through [`authorize`] with the acting user and the
//! memo as stored, so the rules live in one place instead of being spread
//! across handlers.

use uuid::Uuid;

use super::error::{Denial, WorkflowError, WorkflowResult};
use super::status::{MemoStatus, Role, Transition};
use super::{MAX_RECIPIENTS, MIN_BODY_CHARS};
use crate::models::{Memo, User};

/// The user performing an action, as resolved from the user directory.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
    pub department_id: Option<Uuid>,
}

impl Actor {
    pub fn from_user(user: &User) -> WorkflowResult<Self> {
        let role = user.role.parse().map_err(WorkflowError::Corrupt)?;
        Ok(Self {
            id: user.id,
            role,
            department_id: user.department_id,
        })
    }
}

pub fn memo_status(memo: &Memo) -> WorkflowResult<MemoStatus> {
    memo.status.parse().map_err(WorkflowError::Corrupt)
}

/// Fails with `InvalidTransition` unless the memo sits in a source state of `transition`.
pub fn ensure_source(transition: Transition, memo: &Memo) -> WorkflowResult<MemoStatus> {
    let current = memo_status(memo)?;
    if transition.allowed_from(current) {
        Ok(current)
    } else {
        Err(WorkflowError::InvalidTransition {
            transition,
            current,
        })
    }
}

/// Decides whether `actor` may perform `transition` on `memo`.
///
/// `recipient_ids` is only consulted for replies.
pub fn authorize(
    transition: Transition,
    actor: &Actor,
    memo: &Memo,
    recipient_ids: &[Uuid],
) -> Result<(), Denial> {
    match transition {
        Transition::Submit => {
            if actor.id != memo.author_id {
                return Err(Denial::NotAuthor);
            }
            Ok(())
        }
        Transition::Approve | Transition::Reject | Transition::RequestModification => {
            if memo.approver_id != Some(actor.id) {
                return Err(Denial::NotAssignedApprover);
            }
            if actor.role != Role::Director {
                return Err(Denial::RoleNotPermitted);
            }
            if let Some(department_id) = memo.department_id {
                if actor.department_id != Some(department_id) {
                    return Err(Denial::DepartmentMismatch);
                }
            }
            Ok(())
        }
        // Only ever triggered by the approval pipeline.
        Transition::Distribute => {
            if memo.approver_id != Some(actor.id) {
                return Err(Denial::NotAssignedApprover);
            }
            Ok(())
        }
        Transition::Reply => {
            if !recipient_ids.contains(&actor.id) {
                return Err(Denial::NotRecipient);
            }
            Ok(())
        }
    }
}

/// Content edits, attachment uploads and deletes are reserved to the author.
pub fn authorize_edit(actor: &Actor, memo: &Memo) -> Result<(), Denial> {
    if actor.id != memo.author_id {
        return Err(Denial::NotAuthor);
    }
    Ok(())
}

/// New memos are drafted by author-role users.
pub fn authorize_create(actor: &Actor) -> Result<(), Denial> {
    match actor.role {
        Role::SecondaryUser => Ok(()),
        _ => Err(Denial::RoleNotPermitted),
    }
}

/// Delivery records are visible to the memo's author and approver.
pub fn authorize_participant(actor: &Actor, memo: &Memo) -> Result<(), Denial> {
    if actor.id == memo.author_id || memo.approver_id == Some(actor.id) {
        return Ok(());
    }
    Err(Denial::NotParticipant)
}

/// Read access to a single memo.
///
/// Authors always see their own memos. Directors see what they approve and
/// anything pending in their department. Recipients see a memo once it is
/// approved.
pub fn can_view(actor: &Actor, memo: &Memo, is_recipient: bool) -> bool {
    if actor.id == memo.author_id {
        return true;
    }
    let status = memo_status(memo).ok();
    if actor.role == Role::Director {
        if memo.approver_id == Some(actor.id) {
            return true;
        }
        if status == Some(MemoStatus::PendingApproval)
            && memo.department_id.is_some()
            && memo.department_id == actor.department_id
        {
            return true;
        }
    }
    is_recipient && matches!(status, Some(MemoStatus::Approved | MemoStatus::Distributed))
}

/// Field preconditions for `submit`, checked in the order clients see them.
pub fn validate_submission(memo: &Memo, recipient_count: usize) -> WorkflowResult<()> {
    if memo.subject.trim().is_empty() {
        return Err(WorkflowError::SubjectRequired);
    }
    if memo.body.trim().chars().count() < MIN_BODY_CHARS {
        return Err(WorkflowError::BodyTooShort {
            min: MIN_BODY_CHARS,
        });
    }
    if memo.approver_id.is_none() {
        return Err(WorkflowError::NoApproverAssigned);
    }
    if recipient_count == 0 {
        return Err(WorkflowError::NoRecipientsAssigned);
    }
    if recipient_count > MAX_RECIPIENTS {
        return Err(WorkflowError::TooManyRecipients {
            max: MAX_RECIPIENTS,
        });
    }
    Ok(())
}

/// Recipient lists are capped even while drafting.
pub fn validate_recipient_count(count: usize) -> WorkflowResult<()> {
    if count > MAX_RECIPIENTS {
        return Err(WorkflowError::TooManyRecipients {
            max: MAX_RECIPIENTS,
        });
    }
    Ok(())
}

pub fn validate_modification_comments(comments: &str) -> WorkflowResult<String> {
    let trimmed = comments.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::CommentsRequired);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) fn sample_memo(author: Uuid, approver: Option<Uuid>, status: MemoStatus) -> Memo {
        let created = NaiveDate::from_ymd_opt(2024, 3, 4)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .expect("valid date");
        Memo {
            id: Uuid::new_v4(),
            correlative_number: None,
            subject: "Quarterly budget review".to_string(),
            body: "Please review the attached budget before Friday.".to_string(),
            priority: "normal".to_string(),
            confidential: false,
            status: status.as_str().to_string(),
            author_id: author,
            department_id: None,
            approver_id: approver,
            parent_id: None,
            digital_seal: None,
            signed_artifact_key: None,
            rejection_reason: None,
            modification_comments: None,
            created_at: created,
            updated_at: created,
            approved_at: None,
            distributed_at: None,
        }
    }

    fn actor(id: Uuid, role: Role, department_id: Option<Uuid>) -> Actor {
        Actor {
            id,
            role,
            department_id,
        }
    }

    #[test]
    fn approve_from_draft_is_a_state_error() {
        let memo = sample_memo(Uuid::new_v4(), Some(Uuid::new_v4()), MemoStatus::Draft);
        let err = ensure_source(Transition::Approve, &memo).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                transition: Transition::Approve,
                current: MemoStatus::Draft
            }
        ));
        assert_eq!(memo.status, "DRAFT");
    }

    #[test]
    fn only_the_author_submits() {
        let author = Uuid::new_v4();
        let memo = sample_memo(author, Some(Uuid::new_v4()), MemoStatus::Draft);
        assert!(authorize(
            Transition::Submit,
            &actor(author, Role::SecondaryUser, None),
            &memo,
            &[]
        )
        .is_ok());
        assert_eq!(
            authorize(
                Transition::Submit,
                &actor(Uuid::new_v4(), Role::SecondaryUser, None),
                &memo,
                &[]
            ),
            Err(Denial::NotAuthor)
        );
    }

    #[test]
    fn approver_must_be_assigned_director_of_same_department() {
        let approver = Uuid::new_v4();
        let finance = Uuid::new_v4();
        let mut memo = sample_memo(Uuid::new_v4(), Some(approver), MemoStatus::PendingApproval);
        memo.department_id = Some(finance);

        let assigned = actor(approver, Role::Director, Some(finance));
        assert!(authorize(Transition::Approve, &assigned, &memo, &[]).is_ok());

        let other_director = actor(Uuid::new_v4(), Role::Director, Some(finance));
        assert_eq!(
            authorize(Transition::Reject, &other_director, &memo, &[]),
            Err(Denial::NotAssignedApprover)
        );

        let moved = actor(approver, Role::Director, Some(Uuid::new_v4()));
        assert_eq!(
            authorize(Transition::RequestModification, &moved, &memo, &[]),
            Err(Denial::DepartmentMismatch)
        );

        let demoted = actor(approver, Role::AreaUser, Some(finance));
        assert_eq!(
            authorize(Transition::Approve, &demoted, &memo, &[]),
            Err(Denial::RoleNotPermitted)
        );
    }

    #[test]
    fn memo_without_department_skips_department_check() {
        let approver = Uuid::new_v4();
        let memo = sample_memo(Uuid::new_v4(), Some(approver), MemoStatus::PendingApproval);
        let director = actor(approver, Role::Director, Some(Uuid::new_v4()));
        assert!(authorize(Transition::Approve, &director, &memo, &[]).is_ok());
    }

    #[test]
    fn replies_require_recipient_membership() {
        let recipient = Uuid::new_v4();
        let memo = sample_memo(Uuid::new_v4(), None, MemoStatus::Distributed);
        let replier = actor(recipient, Role::AreaUser, None);
        assert!(authorize(Transition::Reply, &replier, &memo, &[recipient]).is_ok());
        assert_eq!(
            authorize(Transition::Reply, &replier, &memo, &[Uuid::new_v4()]),
            Err(Denial::NotRecipient)
        );
    }

    #[test]
    fn visibility_follows_role_and_status() {
        let author = Uuid::new_v4();
        let approver = Uuid::new_v4();
        let finance = Uuid::new_v4();
        let mut memo = sample_memo(author, Some(approver), MemoStatus::PendingApproval);
        memo.department_id = Some(finance);

        assert!(can_view(&actor(author, Role::SecondaryUser, None), &memo, false));
        assert!(can_view(&actor(approver, Role::Director, None), &memo, false));
        let colleague = actor(Uuid::new_v4(), Role::Director, Some(finance));
        assert!(can_view(&colleague, &memo, false));

        let reader = actor(Uuid::new_v4(), Role::AreaUser, Some(finance));
        assert!(!can_view(&reader, &memo, true));
        memo.status = MemoStatus::Distributed.as_str().to_string();
        assert!(can_view(&reader, &memo, true));
        assert!(!can_view(&reader, &memo, false));
        assert!(!can_view(&colleague, &memo, false));
    }

    #[test]
    fn delivery_records_are_for_author_and_approver() {
        let author = Uuid::new_v4();
        let approver = Uuid::new_v4();
        let memo = sample_memo(author, Some(approver), MemoStatus::Distributed);
        assert!(authorize_participant(&actor(author, Role::SecondaryUser, None), &memo).is_ok());
        assert!(authorize_participant(&actor(approver, Role::Director, None), &memo).is_ok());
        assert_eq!(
            authorize_participant(&actor(Uuid::new_v4(), Role::Admin, None), &memo),
            Err(Denial::NotParticipant)
        );
    }

    #[test]
    fn submission_checks_fields_in_order() {
        let mut memo = sample_memo(Uuid::new_v4(), None, MemoStatus::Draft);
        memo.subject = "   ".to_string();
        assert!(matches!(
            validate_submission(&memo, 1),
            Err(WorkflowError::SubjectRequired)
        ));

        memo.subject = "Budget".to_string();
        memo.body = "  too short ".to_string();
        assert!(matches!(
            validate_submission(&memo, 1),
            Err(WorkflowError::BodyTooShort { min: 10 })
        ));

        memo.body = "Long enough body text".to_string();
        let err = validate_submission(&memo, 1).unwrap_err();
        assert_eq!(err.code(), "NO_APPROVER_ASSIGNED");

        memo.approver_id = Some(Uuid::new_v4());
        assert!(matches!(
            validate_submission(&memo, 0),
            Err(WorkflowError::NoRecipientsAssigned)
        ));
        let err = validate_submission(&memo, MAX_RECIPIENTS + 1).unwrap_err();
        assert_eq!(err.code(), "TOO_MANY_RECIPIENTS");
        assert!(validate_submission(&memo, MAX_RECIPIENTS).is_ok());
    }

    #[test]
    fn modification_comments_must_not_be_blank() {
        assert!(matches!(
            validate_modification_comments(" \n "),
            Err(WorkflowError::CommentsRequired)
        ));
        assert_eq!(
            validate_modification_comments("  add the totals ").unwrap(),
            "add the totals"
        );
    }
}
