use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = departments)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub prefix: Option<String>,
    pub director_id: Option<Uuid>,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Department {
    /// Prefix used for correlative numbers, if one is configured.
    pub fn configured_prefix(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(str::trim)
            .filter(|prefix| !prefix.is_empty())
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = departments)]
pub struct NewDepartment {
    pub id: Uuid,
    pub name: String,
    pub prefix: Option<String>,
    pub director_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub display_name: String,
    pub title: String,
    pub role: String,
    pub department_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn full_name(&self) -> &str {
        let trimmed = self.display_name.trim();
        if trimmed.is_empty() {
            &self.username
        } else {
            trimmed
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub display_name: String,
    pub title: String,
    pub role: String,
    pub department_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = memos)]
pub struct Memo {
    pub id: Uuid,
    pub correlative_number: Option<String>,
    pub subject: String,
    pub body: String,
    pub priority: String,
    pub confidential: bool,
    pub status: String,
    pub author_id: Uuid,
    pub department_id: Option<Uuid>,
    pub approver_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub digital_seal: Option<serde_json::Value>,
    pub signed_artifact_key: Option<String>,
    pub rejection_reason: Option<String>,
    pub modification_comments: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub approved_at: Option<NaiveDateTime>,
    pub distributed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = memos)]
pub struct NewMemo {
    pub id: Uuid,
    pub subject: String,
    pub body: String,
    pub priority: String,
    pub confidential: bool,
    pub status: String,
    pub author_id: Uuid,
    pub department_id: Option<Uuid>,
    pub approver_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
}

/// Author edits to an editable memo; `None` leaves a column untouched.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = memos)]
pub struct MemoChangeset {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub priority: Option<String>,
    pub confidential: Option<bool>,
    pub approver_id: Option<Uuid>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = memo_recipients)]
#[diesel(belongs_to(Memo))]
#[diesel(belongs_to(User))]
#[diesel(primary_key(memo_id, user_id))]
pub struct MemoRecipient {
    pub memo_id: Uuid,
    pub user_id: Uuid,
    pub added_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = memo_recipients)]
pub struct NewMemoRecipient {
    pub memo_id: Uuid,
    pub user_id: Uuid,
    pub added_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = memo_attachments)]
#[diesel(belongs_to(Memo))]
pub struct MemoAttachment {
    pub id: Uuid,
    pub memo_id: Uuid,
    pub uploaded_by: Uuid,
    pub filename: String,
    pub content_type: Option<String>,
    pub s3_key: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = memo_attachments)]
pub struct NewMemoAttachment {
    pub id: Uuid,
    pub memo_id: Uuid,
    pub uploaded_by: Uuid,
    pub filename: String,
    pub content_type: Option<String>,
    pub s3_key: String,
    pub size_bytes: i64,
    pub checksum: String,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = sequence_counters)]
#[diesel(belongs_to(Department))]
#[diesel(primary_key(department_id, year, month))]
pub struct SequenceCounter {
    pub department_id: Uuid,
    pub year: i32,
    pub month: i32,
    pub last_sequence: i32,
    pub prefix: String,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sequence_counters)]
pub struct NewSequenceCounter {
    pub department_id: Uuid,
    pub year: i32,
    pub month: i32,
    pub last_sequence: i32,
    pub prefix: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = distribution_records)]
#[diesel(belongs_to(Memo))]
pub struct DistributionRecord {
    pub id: Uuid,
    pub memo_id: Uuid,
    pub recipient_id: Uuid,
    pub method: String,
    pub state: String,
    pub sent_at: NaiveDateTime,
    pub delivered_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = distribution_records)]
pub struct NewDistributionRecord {
    pub id: Uuid,
    pub memo_id: Uuid,
    pub recipient_id: Uuid,
    pub method: String,
    pub state: String,
    pub sent_at: NaiveDateTime,
}
