use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    ModificationRequested,
    Distributed,
}

impl MemoStatus {
    pub const ALL: [MemoStatus; 6] = [
        MemoStatus::Draft,
        MemoStatus::PendingApproval,
        MemoStatus::Approved,
        MemoStatus::Rejected,
        MemoStatus::ModificationRequested,
        MemoStatus::Distributed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MemoStatus::Draft => "DRAFT",
            MemoStatus::PendingApproval => "PENDING_APPROVAL",
            MemoStatus::Approved => "APPROVED",
            MemoStatus::Rejected => "REJECTED",
            MemoStatus::ModificationRequested => "MODIFICATION_REQUESTED",
            MemoStatus::Distributed => "DISTRIBUTED",
        }
    }

    /// Author-side edits (content, recipients, attachments) are only allowed here.
    pub fn is_editable(self) -> bool {
        matches!(self, MemoStatus::Draft | MemoStatus::ModificationRequested)
    }
}

impl fmt::Display for MemoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MemoStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown memo status {value}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Submit,
    Approve,
    Reject,
    RequestModification,
    Distribute,
    Reply,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Submit => "submit",
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::RequestModification => "request-modification",
            Transition::Distribute => "distribute",
            Transition::Reply => "reply",
        }
    }

    /// States from which this transition may start.
    pub fn sources(self) -> &'static [MemoStatus] {
        match self {
            Transition::Submit => &[MemoStatus::Draft, MemoStatus::ModificationRequested],
            Transition::Approve | Transition::Reject | Transition::RequestModification => {
                &[MemoStatus::PendingApproval]
            }
            Transition::Distribute => &[MemoStatus::Approved],
            Transition::Reply => &[MemoStatus::Distributed],
        }
    }

    /// Status the memo lands in. Replies create a new memo and leave the parent as is.
    pub fn target(self) -> Option<MemoStatus> {
        match self {
            Transition::Submit => Some(MemoStatus::PendingApproval),
            Transition::Approve => Some(MemoStatus::Approved),
            Transition::Reject => Some(MemoStatus::Rejected),
            Transition::RequestModification => Some(MemoStatus::ModificationRequested),
            Transition::Distribute => Some(MemoStatus::Distributed),
            Transition::Reply => None,
        }
    }

    pub fn allowed_from(self, status: MemoStatus) -> bool {
        self.sources().contains(&status)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Falls back to `Normal` for values written by older clients.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SecondaryUser,
    Director,
    AreaUser,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::SecondaryUser => "SECONDARY_USER",
            Role::Director => "DIRECTOR",
            Role::AreaUser => "AREA_USER",
            Role::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SECONDARY_USER" => Ok(Role::SecondaryUser),
            "DIRECTOR" => Ok(Role::Director),
            "AREA_USER" => Ok(Role::AreaUser),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Error,
    Pending,
}

impl DeliveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryState::Sent => "SENT",
            DeliveryState::Delivered => "DELIVERED",
            DeliveryState::Error => "ERROR",
            DeliveryState::Pending => "PENDING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Email,
}

impl DeliveryMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMethod::Email => "email",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in MemoStatus::ALL {
            assert_eq!(status.as_str().parse::<MemoStatus>(), Ok(status));
        }
        assert!("DISTRIBUIDO".parse::<MemoStatus>().is_err());
    }

    #[test]
    fn only_draft_and_modification_requested_can_be_submitted() {
        let submittable: Vec<_> = MemoStatus::ALL
            .into_iter()
            .filter(|status| Transition::Submit.allowed_from(*status))
            .collect();
        assert_eq!(
            submittable,
            vec![MemoStatus::Draft, MemoStatus::ModificationRequested]
        );
    }

    #[test]
    fn approver_decisions_require_pending_approval() {
        for transition in [
            Transition::Approve,
            Transition::Reject,
            Transition::RequestModification,
        ] {
            for status in MemoStatus::ALL {
                assert_eq!(
                    transition.allowed_from(status),
                    status == MemoStatus::PendingApproval,
                    "{transition} from {status}"
                );
            }
        }
    }

    #[test]
    fn replies_only_hang_off_distributed_memos() {
        assert!(Transition::Reply.allowed_from(MemoStatus::Distributed));
        assert!(!Transition::Reply.allowed_from(MemoStatus::Approved));
        assert_eq!(Transition::Reply.target(), None);
        assert_eq!(
            Transition::Distribute.target(),
            Some(MemoStatus::Distributed)
        );
    }

    #[test]
    fn unknown_priority_defaults_to_normal() {
        assert_eq!(Priority::parse_lenient(" URGENT "), Priority::Urgent);
        assert_eq!(Priority::parse_lenient("whenever"), Priority::Normal);
    }
}
