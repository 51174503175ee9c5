use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    memos::{
        attachments::{self, AttachmentUpload},
        directory, distribution, policy,
        workflow::{self, ApprovalReport, MemoChanges, NewMemoInput, ReplyInput},
        MemoStatus, Priority, RequestContext, WorkflowError,
    },
    models::{DistributionRecord, Memo, MemoAttachment},
    state::AppState,
};

#[derive(Deserialize)]
pub struct CreateMemoRequest {
    pub subject: String,
    pub body: String,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub confidential: bool,
    pub approver_id: Option<Uuid>,
    #[serde(default)]
    pub recipient_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateMemoRequest {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub priority: Option<Priority>,
    pub confidential: Option<bool>,
    pub approver_id: Option<Uuid>,
    pub recipient_ids: Option<Vec<Uuid>>,
}

#[derive(Deserialize)]
pub struct ListMemosQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ModificationRequest {
    pub comments: String,
}

#[derive(Deserialize, Default)]
pub struct ReplyRequest {
    pub subject: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub include_all_recipients: bool,
    #[serde(default)]
    pub additional_recipients: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct MemoResponse {
    pub id: Uuid,
    pub correlative_number: Option<String>,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub confidential: bool,
    pub status: String,
    pub author_id: Uuid,
    pub department_id: Option<Uuid>,
    pub approver_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub recipient_ids: Vec<Uuid>,
    pub digital_seal: Option<Value>,
    pub has_signed_artifact: bool,
    pub rejection_reason: Option<String>,
    pub modification_comments: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub approved_at: Option<NaiveDateTime>,
    pub distributed_at: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct MemoSummary {
    pub id: Uuid,
    pub correlative_number: Option<String>,
    pub subject: String,
    pub priority: Priority,
    pub confidential: bool,
    pub status: String,
    pub author_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub distributed_at: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct AttachmentResponse {
    pub id: Uuid,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub uploaded_by: Uuid,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct DistributionRecordResponse {
    pub recipient_id: Uuid,
    pub method: String,
    pub state: String,
    pub sent_at: NaiveDateTime,
    pub delivered_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct DownloadUrlResponse {
    pub url: String,
}

fn memo_response(conn: &mut PgConnection, memo: Memo) -> AppResult<MemoResponse> {
    let recipient_ids = directory::recipient_ids(conn, memo.id)?;
    Ok(MemoResponse {
        id: memo.id,
        priority: Priority::parse_lenient(&memo.priority),
        has_signed_artifact: memo.signed_artifact_key.is_some(),
        correlative_number: memo.correlative_number,
        subject: memo.subject,
        body: memo.body,
        confidential: memo.confidential,
        status: memo.status,
        author_id: memo.author_id,
        department_id: memo.department_id,
        approver_id: memo.approver_id,
        parent_id: memo.parent_id,
        recipient_ids,
        digital_seal: memo.digital_seal,
        rejection_reason: memo.rejection_reason,
        modification_comments: memo.modification_comments,
        created_at: memo.created_at,
        updated_at: memo.updated_at,
        approved_at: memo.approved_at,
        distributed_at: memo.distributed_at,
    })
}

fn memo_reply(state: &AppState, memo: Memo) -> AppResult<Json<MemoResponse>> {
    let mut conn = state.db()?;
    Ok(Json(memo_response(&mut conn, memo)?))
}

impl From<Memo> for MemoSummary {
    fn from(memo: Memo) -> Self {
        Self {
            id: memo.id,
            priority: Priority::parse_lenient(&memo.priority),
            correlative_number: memo.correlative_number,
            subject: memo.subject,
            confidential: memo.confidential,
            status: memo.status,
            author_id: memo.author_id,
            parent_id: memo.parent_id,
            created_at: memo.created_at,
            distributed_at: memo.distributed_at,
        }
    }
}

impl From<MemoAttachment> for AttachmentResponse {
    fn from(attachment: MemoAttachment) -> Self {
        Self {
            id: attachment.id,
            filename: attachment.filename,
            content_type: attachment.content_type,
            size_bytes: attachment.size_bytes,
            checksum: attachment.checksum,
            uploaded_by: attachment.uploaded_by,
            uploaded_at: attachment.uploaded_at,
        }
    }
}

impl From<DistributionRecord> for DistributionRecordResponse {
    fn from(record: DistributionRecord) -> Self {
        Self {
            recipient_id: record.recipient_id,
            method: record.method,
            state: record.state,
            sent_at: record.sent_at,
            delivered_at: record.delivered_at,
            error_message: record.error_message,
            acknowledged: record.acknowledged,
            acknowledged_at: record.acknowledged_at,
        }
    }
}

pub async fn create_memo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateMemoRequest>,
) -> AppResult<(StatusCode, Json<MemoResponse>)> {
    let mut conn = state.db()?;
    let actor = user.actor(&mut conn)?;
    let memo = workflow::create(
        &mut conn,
        &actor,
        NewMemoInput {
            subject: payload.subject,
            body: payload.body,
            priority: payload.priority,
            confidential: payload.confidential,
            approver_id: payload.approver_id,
            recipient_ids: payload.recipient_ids,
        },
    )?;
    Ok((StatusCode::CREATED, Json(memo_response(&mut conn, memo)?)))
}

pub async fn list_memos(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListMemosQuery>,
) -> AppResult<Json<Vec<MemoSummary>>> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(
            value
                .parse::<MemoStatus>()
                .map_err(|_| AppError::bad_request(format!("unknown status filter {value}")))?,
        ),
    };

    let mut conn = state.db()?;
    let actor = user.actor(&mut conn)?;
    let memos = workflow::list(&mut conn, &actor, status)?;
    Ok(Json(memos.into_iter().map(MemoSummary::from).collect()))
}

pub async fn get_memo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
) -> AppResult<Json<MemoResponse>> {
    let mut conn = state.db()?;
    let actor = user.actor(&mut conn)?;
    let memo = workflow::get(&mut conn, &actor, memo_id)?;
    Ok(Json(memo_response(&mut conn, memo)?))
}

pub async fn update_memo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
    Json(payload): Json<UpdateMemoRequest>,
) -> AppResult<Json<MemoResponse>> {
    let mut conn = state.db()?;
    let actor = user.actor(&mut conn)?;
    let memo = workflow::update(
        &mut conn,
        &actor,
        memo_id,
        MemoChanges {
            subject: payload.subject,
            body: payload.body,
            priority: payload.priority,
            confidential: payload.confidential,
            approver_id: payload.approver_id,
            recipient_ids: payload.recipient_ids,
        },
    )?;
    Ok(Json(memo_response(&mut conn, memo)?))
}

pub async fn delete_memo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let actor = {
        let mut conn = state.db()?;
        user.actor(&mut conn)?
    };
    workflow::delete(&state, &actor, memo_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_memo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
) -> AppResult<Json<MemoResponse>> {
    let actor = {
        let mut conn = state.db()?;
        user.actor(&mut conn)?
    };
    let memo = workflow::submit(&state, &actor, memo_id).await?;
    memo_reply(&state, memo)
}

pub async fn approve_memo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
    headers: HeaderMap,
) -> AppResult<Json<ApprovalReport>> {
    let actor = {
        let mut conn = state.db()?;
        user.actor(&mut conn)?
    };
    let request = RequestContext::from_headers(&headers);
    let report = workflow::approve(&state, &actor, memo_id, request).await?;
    Ok(Json(report))
}

pub async fn reject_memo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
    payload: Option<Json<RejectRequest>>,
) -> AppResult<Json<MemoResponse>> {
    let actor = {
        let mut conn = state.db()?;
        user.actor(&mut conn)?
    };
    let reason = payload.and_then(|Json(payload)| payload.reason);
    let memo = workflow::reject(&state, &actor, memo_id, reason).await?;
    memo_reply(&state, memo)
}

pub async fn request_modification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
    Json(payload): Json<ModificationRequest>,
) -> AppResult<Json<MemoResponse>> {
    let actor = {
        let mut conn = state.db()?;
        user.actor(&mut conn)?
    };
    let memo = workflow::request_modification(&state, &actor, memo_id, &payload.comments).await?;
    memo_reply(&state, memo)
}

pub async fn reply_to_memo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
    payload: Option<Json<ReplyRequest>>,
) -> AppResult<(StatusCode, Json<MemoResponse>)> {
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();
    let mut conn = state.db()?;
    let actor = user.actor(&mut conn)?;
    let reply = workflow::reply(
        &mut conn,
        &actor,
        memo_id,
        ReplyInput {
            subject: payload.subject,
            body: payload.body,
            include_all_recipients: payload.include_all_recipients,
            additional_recipients: payload.additional_recipients,
        },
    )?;
    Ok((StatusCode::CREATED, Json(memo_response(&mut conn, reply)?)))
}

pub async fn upload_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<AttachmentResponse>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        filename = field.file_name().map(|name| name.to_string());
        content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read attachment bytes");
            AppError::bad_request(format!("failed to read file bytes: {err}"))
        })?;
        file_bytes = Some(data.to_vec());
    }

    let bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    let filename = filename
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("filename is required"))?;

    let actor = {
        let mut conn = state.db()?;
        user.actor(&mut conn)?
    };
    let attachment = attachments::upload(
        &state,
        &actor,
        memo_id,
        AttachmentUpload {
            filename,
            content_type,
            bytes,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(attachment.into())))
}

pub async fn list_attachments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
) -> AppResult<Json<Vec<AttachmentResponse>>> {
    let mut conn = state.db()?;
    let actor = user.actor(&mut conn)?;
    workflow::get(&mut conn, &actor, memo_id)?;
    let attachments = attachments::list(&mut conn, memo_id)?;
    Ok(Json(attachments.into_iter().map(Into::into).collect()))
}

pub async fn download_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((memo_id, attachment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<DownloadUrlResponse>> {
    {
        let mut conn = state.db()?;
        let actor = user.actor(&mut conn)?;
        workflow::get(&mut conn, &actor, memo_id)?;
    }
    let url = attachments::download_url(&state, memo_id, attachment_id).await?;
    Ok(Json(DownloadUrlResponse { url }))
}

pub async fn download_signed_artifact(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
) -> AppResult<Json<DownloadUrlResponse>> {
    let actor = {
        let mut conn = state.db()?;
        user.actor(&mut conn)?
    };
    let url = workflow::signed_artifact_url(&state, &actor, memo_id).await?;
    Ok(Json(DownloadUrlResponse { url }))
}

pub async fn list_distribution(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
) -> AppResult<Json<Vec<DistributionRecordResponse>>> {
    let mut conn = state.db()?;
    let actor = user.actor(&mut conn)?;
    let memo = workflow::get(&mut conn, &actor, memo_id)?;
    policy::authorize_participant(&actor, &memo).map_err(WorkflowError::Forbidden)?;
    let records = distribution::list_records(&mut conn, memo_id)?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

pub async fn acknowledge_distribution(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(memo_id): Path<Uuid>,
) -> AppResult<Json<DistributionRecordResponse>> {
    let mut conn = state.db()?;
    let actor = user.actor(&mut conn)?;
    workflow::get(&mut conn, &actor, memo_id)?;
    let record = distribution::acknowledge(&mut conn, memo_id, actor.id)?;
    Ok(Json(record.into()))
}
