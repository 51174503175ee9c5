use thiserror::Error;

use super::status::{MemoStatus, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Authorization,
    State,
    NotFound,
    Unavailable,
    Internal,
}

/// Reason an actor may not perform a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("only the author may perform this action")]
    NotAuthor,
    #[error("only the assigned approver may decide on this memo")]
    NotAssignedApprover,
    #[error("only a director of the memo's department may decide on this memo")]
    DepartmentMismatch,
    #[error("your role may not perform this action")]
    RoleNotPermitted,
    #[error("only recipients may perform this action")]
    NotRecipient,
    #[error("only the author or the approver may perform this action")]
    NotParticipant,
}

impl Denial {
    pub fn code(self) -> &'static str {
        match self {
            Denial::NotAuthor => "NOT_AUTHOR",
            Denial::NotAssignedApprover => "NOT_ASSIGNED_APPROVER",
            Denial::DepartmentMismatch => "DEPARTMENT_MISMATCH",
            Denial::RoleNotPermitted => "ROLE_NOT_PERMITTED",
            Denial::NotRecipient => "NOT_RECIPIENT",
            Denial::NotParticipant => "NOT_PARTICIPANT",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("subject is required")]
    SubjectRequired,
    #[error("body must contain at least {min} characters")]
    BodyTooShort { min: usize },
    #[error("an approver must be assigned before submitting")]
    NoApproverAssigned,
    #[error("at least one recipient must be assigned before submitting")]
    NoRecipientsAssigned,
    #[error("at most {max} recipients are allowed")]
    TooManyRecipients { max: usize },
    #[error("one or more referenced users do not exist")]
    UnknownUsers,
    #[error("comments describing the requested modifications are required")]
    CommentsRequired,
    #[error("department has no correlative prefix configured")]
    InvalidDepartment,
    #[error("month {0} is outside 1-12")]
    InvalidMonth(u32),
    #[error("thread depth limit of {max} levels reached")]
    ThreadTooDeep { max: usize },
    #[error("reply limit of {max} replies reached")]
    TooManyReplies { max: usize },
    #[error("the {days}-day reply window has expired")]
    ReplyWindowExpired { days: i64 },
    #[error("you have already replied to this memo")]
    DuplicateReply,
    #[error("at most {max} attachments are allowed")]
    TooManyAttachments { max: usize },
    #[error("attachment exceeds the {max_bytes}-byte limit")]
    AttachmentTooLarge { max_bytes: u64 },
    #[error("attachments exceed the {max_bytes}-byte total limit")]
    AttachmentsTooLarge { max_bytes: u64 },
    #[error("attachment type not allowed; allowed: {allowed}")]
    UnsupportedAttachment { allowed: String },
    #[error("attachment is empty")]
    EmptyAttachment,
    #[error("{0}")]
    Forbidden(Denial),
    #[error("cannot {transition} a memo in status {current}")]
    InvalidTransition {
        transition: Transition,
        current: MemoStatus,
    },
    #[error("memo can no longer be edited (status {current})")]
    NotEditable { current: MemoStatus },
    #[error("memo is not approved (status {current})")]
    NotApproved { current: MemoStatus },
    #[error("memo changed while it was being approved, retry the request")]
    ChangedDuringApproval { current: MemoStatus },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("correlative sequence is busy, retry the request")]
    SequenceUnavailable,
    #[error("stored memo is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
    pub fn class(&self) -> ErrorClass {
        use WorkflowError::*;
        match self {
            SubjectRequired
            | BodyTooShort { .. }
            | NoApproverAssigned
            | NoRecipientsAssigned
            | TooManyRecipients { .. }
            | UnknownUsers
            | CommentsRequired
            | InvalidDepartment
            | InvalidMonth(_)
            | ThreadTooDeep { .. }
            | TooManyReplies { .. }
            | ReplyWindowExpired { .. }
            | DuplicateReply
            | TooManyAttachments { .. }
            | AttachmentTooLarge { .. }
            | AttachmentsTooLarge { .. }
            | UnsupportedAttachment { .. }
            | EmptyAttachment => ErrorClass::Validation,
            Forbidden(_) => ErrorClass::Authorization,
            InvalidTransition { .. }
            | NotEditable { .. }
            | NotApproved { .. }
            | ChangedDuringApproval { .. } => ErrorClass::State,
            NotFound(_) | Database(diesel::result::Error::NotFound) => ErrorClass::NotFound,
            SequenceUnavailable => ErrorClass::Unavailable,
            Corrupt(_) | Database(_) | Pool(_) | Storage(_) => ErrorClass::Internal,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        use WorkflowError::*;
        match self {
            SubjectRequired => "SUBJECT_REQUIRED",
            BodyTooShort { .. } => "BODY_TOO_SHORT",
            NoApproverAssigned => "NO_APPROVER_ASSIGNED",
            NoRecipientsAssigned => "NO_RECIPIENTS_ASSIGNED",
            TooManyRecipients { .. } => "TOO_MANY_RECIPIENTS",
            UnknownUsers => "UNKNOWN_USERS",
            CommentsRequired => "MODIFICATION_COMMENTS_REQUIRED",
            InvalidDepartment => "INVALID_DEPARTMENT",
            InvalidMonth(_) => "INVALID_MONTH",
            ThreadTooDeep { .. } => "THREAD_DEPTH_EXCEEDED",
            TooManyReplies { .. } => "REPLY_LIMIT_EXCEEDED",
            ReplyWindowExpired { .. } => "REPLY_WINDOW_EXPIRED",
            DuplicateReply => "DUPLICATE_REPLY",
            TooManyAttachments { .. } => "TOO_MANY_ATTACHMENTS",
            AttachmentTooLarge { .. } => "ATTACHMENT_TOO_LARGE",
            AttachmentsTooLarge { .. } => "ATTACHMENTS_TOO_LARGE",
            UnsupportedAttachment { .. } => "UNSUPPORTED_ATTACHMENT",
            EmptyAttachment => "EMPTY_ATTACHMENT",
            Forbidden(denial) => denial.code(),
            InvalidTransition { .. } => "INVALID_TRANSITION",
            NotEditable { .. } => "MEMO_NOT_EDITABLE",
            NotApproved { .. } => "NOT_APPROVED",
            ChangedDuringApproval { .. } => "MEMO_CHANGED",
            NotFound(_) | Database(diesel::result::Error::NotFound) => "NOT_FOUND",
            SequenceUnavailable => "SEQUENCE_UNAVAILABLE",
            Corrupt(_) | Database(_) | Pool(_) | Storage(_) => "INTERNAL_ERROR",
        }
    }

    pub fn current_status(&self) -> Option<MemoStatus> {
        match self {
            WorkflowError::InvalidTransition { current, .. }
            | WorkflowError::NotEditable { current }
            | WorkflowError::NotApproved { current }
            | WorkflowError::ChangedDuringApproval { current } => Some(*current),
            _ => None,
        }
    }
}
