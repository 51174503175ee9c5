//! Digital seal attached to a memo when it is approved.
//!
//! The seal binds a SHA-256 hash of the memo's canonical content to a random
//! verification code and the approver's identity. It is written once and
//! never recomputed; [`content_hash`] exists so the stored hash can be
//! checked against the memo as it is today.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{NaiveDateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::error::{WorkflowError, WorkflowResult};
use crate::models::{Department, Memo, User};

pub const SEAL_ALGORITHM: &str = "sha256";
const VERIFICATION_CODE_BYTES: usize = 32;
const UNKNOWN: &str = "unknown";
const LOCATION_PLACEHOLDER: &str = "unavailable";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalSeal {
    pub algorithm: String,
    pub content_hash: String,
    pub verification_code: String,
    pub approver: SealApprover,
    pub sealed_at: String,
    pub request: RequestContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealApprover {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub department: Option<String>,
}

/// Best-effort metadata about the approving request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub client_ip: String,
    pub user_agent: String,
    pub location: String,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            client_ip: UNKNOWN.to_string(),
            user_agent: UNKNOWN.to_string(),
            location: LOCATION_PLACEHOLDER.to_string(),
        }
    }
}

impl RequestContext {
    /// Reads the client address from `X-Forwarded-For` (first hop), then `X-Real-IP`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let client_ip = header("x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or_else(|| header("x-real-ip"))
            .unwrap_or(UNKNOWN)
            .to_string();
        let user_agent = header("user-agent").unwrap_or(UNKNOWN).to_string();

        Self {
            client_ip,
            user_agent,
            location: LOCATION_PLACEHOLDER.to_string(),
        }
    }
}

pub(crate) fn format_timestamp(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Key-sorted compact JSON over the sealed fields.
pub fn canonical_content(memo: &Memo) -> String {
    let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
    fields.insert("author_id", Value::String(memo.author_id.to_string()));
    fields.insert("body", Value::String(memo.body.clone()));
    fields.insert(
        "correlative_number",
        memo.correlative_number
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    fields.insert(
        "created_at",
        Value::String(format_timestamp(memo.created_at)),
    );
    fields.insert(
        "approved_at",
        memo.approved_at
            .map(|at| Value::String(format_timestamp(at)))
            .unwrap_or(Value::Null),
    );
    fields.insert("subject", Value::String(memo.subject.clone()));

    // Serialized from the BTreeMap, not a serde_json::Map, so keys stay sorted.
    serde_json::to_string(&fields).unwrap_or_default()
}

pub fn content_hash(memo: &Memo) -> String {
    hex::encode(Sha256::digest(canonical_content(memo).as_bytes()))
}

fn generate_verification_code() -> String {
    let mut bytes = [0u8; VERIFICATION_CODE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds the seal for `memo` as approved by `approver`.
///
/// `memo.approved_at` must already hold the approval time that will be stored.
pub fn build(
    memo: &Memo,
    approver: Option<&User>,
    approver_department: Option<&Department>,
    request: Option<RequestContext>,
) -> WorkflowResult<DigitalSeal> {
    let approver = match (memo.approver_id, approver) {
        (Some(expected), Some(user)) if user.id == expected => user,
        _ => return Err(WorkflowError::NoApproverAssigned),
    };

    Ok(DigitalSeal {
        algorithm: SEAL_ALGORITHM.to_string(),
        content_hash: content_hash(memo),
        verification_code: generate_verification_code(),
        approver: SealApprover {
            id: approver.id,
            name: approver.full_name().to_string(),
            title: approver.title.clone(),
            department: approver_department.map(|department| department.name.clone()),
        },
        sealed_at: format_timestamp(memo.approved_at.unwrap_or_else(|| Utc::now().naive_utc())),
        request: request.unwrap_or_default(),
    })
}

impl DigitalSeal {
    pub fn to_value(&self) -> WorkflowResult<Value> {
        serde_json::to_value(self).map_err(|err| WorkflowError::Corrupt(err.to_string()))
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Whether the memo's current content still matches the sealed hash.
    pub fn matches(&self, memo: &Memo) -> bool {
        self.content_hash == content_hash(memo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memos::policy::tests::sample_memo;
    use crate::memos::MemoStatus;
    use axum::http::HeaderValue;
    use chrono::NaiveDate;

    fn approver_user(id: Uuid) -> User {
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid date");
        User {
            id,
            username: "mrivera".to_string(),
            email: Some("mrivera@example.com".to_string()),
            display_name: "Marta Rivera".to_string(),
            title: "Finance Director".to_string(),
            role: "DIRECTOR".to_string(),
            department_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn approved_memo(approver: Uuid) -> Memo {
        let mut memo = sample_memo(Uuid::new_v4(), Some(approver), MemoStatus::Approved);
        memo.correlative_number = Some("FIN-2024-03-0042".to_string());
        memo.approved_at = NaiveDate::from_ymd_opt(2024, 3, 5)
            .and_then(|d| d.and_hms_micro_opt(14, 1, 2, 345_678));
        memo
    }

    #[test]
    fn canonical_content_is_key_sorted() {
        let memo = approved_memo(Uuid::new_v4());
        let canonical = canonical_content(&memo);
        let keys = [
            "\"approved_at\"",
            "\"author_id\"",
            "\"body\"",
            "\"correlative_number\"",
            "\"created_at\"",
            "\"subject\"",
        ];
        let positions: Vec<usize> = keys
            .iter()
            .map(|key| canonical.find(key).expect("key present"))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(canonical.contains("\"approved_at\":\"2024-03-05T14:01:02.345678Z\""));
    }

    #[test]
    fn hash_is_reproducible_but_codes_are_not() {
        let approver_id = Uuid::new_v4();
        let memo = approved_memo(approver_id);
        let approver = approver_user(approver_id);

        let first = build(&memo, Some(&approver), None, None).unwrap();
        let second = build(&memo, Some(&approver), None, None).unwrap();

        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.content_hash, content_hash(&memo));
        assert_eq!(first.content_hash.len(), 64);
        assert_ne!(first.verification_code, second.verification_code);
        assert!(first.verification_code.len() >= 43);
        assert!(first
            .verification_code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn content_changes_break_the_hash() {
        let approver_id = Uuid::new_v4();
        let mut memo = approved_memo(approver_id);
        let seal = build(&memo, Some(&approver_user(approver_id)), None, None).unwrap();
        assert!(seal.matches(&memo));
        memo.body.push_str(" Amended.");
        assert!(!seal.matches(&memo));
    }

    #[test]
    fn requires_the_assigned_approver() {
        let memo = sample_memo(Uuid::new_v4(), None, MemoStatus::PendingApproval);
        let err = build(&memo, Some(&approver_user(Uuid::new_v4())), None, None).unwrap_err();
        assert_eq!(err.code(), "NO_APPROVER_ASSIGNED");
    }

    #[test]
    fn seal_survives_json_storage() {
        let approver_id = Uuid::new_v4();
        let memo = approved_memo(approver_id);
        let seal = build(&memo, Some(&approver_user(approver_id)), None, None).unwrap();
        let stored = seal.to_value().unwrap();
        assert_eq!(DigitalSeal::from_value(&stored), Some(seal));
    }

    #[test]
    fn request_context_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        headers.insert("user-agent", HeaderValue::from_static("memo-client/2.1"));

        let context = RequestContext::from_headers(&headers);
        assert_eq!(context.client_ip, "203.0.113.7");
        assert_eq!(context.user_agent, "memo-client/2.1");
        assert_eq!(context.location, "unavailable");

        headers.remove("x-forwarded-for");
        assert_eq!(RequestContext::from_headers(&headers).client_ip, "10.0.0.9");
        assert_eq!(
            RequestContext::from_headers(&HeaderMap::new()).client_ip,
            "unknown"
        );
    }
}
