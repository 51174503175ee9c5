//! Files attached to a memo while it is still editable.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use super::directory;
use super::error::{WorkflowError, WorkflowResult};
use super::policy::{self, Actor};
use super::{
    ALLOWED_ATTACHMENT_EXTENSIONS, MAX_ATTACHMENTS, MAX_ATTACHMENT_BYTES,
    MAX_TOTAL_ATTACHMENT_BYTES,
};
use crate::models::{MemoAttachment, NewMemoAttachment};
use crate::schema::memo_attachments;
use crate::state::AppState;
use crate::storage::{self, PRESIGNED_URL_EXPIRY};

#[derive(Debug)]
pub struct AttachmentUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Lowercased extension if it is on the allow list.
pub fn allowed_extension(filename: &str) -> WorkflowResult<String> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .filter(|ext| ALLOWED_ATTACHMENT_EXTENSIONS.contains(&ext.as_str()));
    extension.ok_or_else(|| WorkflowError::UnsupportedAttachment {
        allowed: ALLOWED_ATTACHMENT_EXTENSIONS.join(", "),
    })
}

/// Checks one new file against the limits, given what is already attached.
pub fn check_limits(size: u64, existing_count: usize, existing_bytes: u64) -> WorkflowResult<()> {
    if size == 0 {
        return Err(WorkflowError::EmptyAttachment);
    }
    if size > MAX_ATTACHMENT_BYTES {
        return Err(WorkflowError::AttachmentTooLarge {
            max_bytes: MAX_ATTACHMENT_BYTES,
        });
    }
    if existing_count >= MAX_ATTACHMENTS {
        return Err(WorkflowError::TooManyAttachments {
            max: MAX_ATTACHMENTS,
        });
    }
    if existing_bytes + size > MAX_TOTAL_ATTACHMENT_BYTES {
        return Err(WorkflowError::AttachmentsTooLarge {
            max_bytes: MAX_TOTAL_ATTACHMENT_BYTES,
        });
    }
    Ok(())
}

pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn ensure_editable(actor: &Actor, conn: &mut PgConnection, memo_id: Uuid) -> WorkflowResult<()> {
    let memo = directory::lock_memo(conn, memo_id)?;
    policy::authorize_edit(actor, &memo).map_err(WorkflowError::Forbidden)?;
    let current = policy::memo_status(&memo)?;
    if !current.is_editable() {
        return Err(WorkflowError::NotEditable { current });
    }
    Ok(())
}

fn usage(conn: &mut PgConnection, memo_id: Uuid) -> WorkflowResult<(usize, u64)> {
    let sizes: Vec<i64> = memo_attachments::table
        .filter(memo_attachments::memo_id.eq(memo_id))
        .select(memo_attachments::size_bytes)
        .load(conn)?;
    let total = sizes.iter().map(|size| (*size).max(0) as u64).sum();
    Ok((sizes.len(), total))
}

/// Stores the file, then records it under the memo row lock.
///
/// The object is removed again if the limits or the memo status no longer
/// allow it once the lock is held.
pub async fn upload(
    state: &AppState,
    actor: &Actor,
    memo_id: Uuid,
    upload: AttachmentUpload,
) -> WorkflowResult<MemoAttachment> {
    let filename = upload.filename.trim().to_string();
    let extension = allowed_extension(&filename)?;
    let size = upload.bytes.len() as u64;

    {
        let mut conn = state.pooled()?;
        conn.transaction::<_, WorkflowError, _>(|conn| {
            ensure_editable(actor, conn, memo_id)?;
            let (count, total) = usage(conn, memo_id)?;
            check_limits(size, count, total)
        })?;
    }

    let attachment_id = Uuid::new_v4();
    let key = storage::attachment_key(memo_id, attachment_id, &extension);
    let content_type = upload.content_type.filter(|value| !value.is_empty()).or_else(|| {
        mime_guess::from_path(&filename)
            .first()
            .map(|mime| mime.essence_str().to_string())
    });
    let digest = checksum(&upload.bytes);

    state
        .storage
        .put_object(
            &key,
            upload.bytes,
            content_type.clone(),
            storage::attachment_disposition(&filename),
        )
        .await
        .map_err(WorkflowError::Storage)?;

    let recorded = {
        let mut conn = state.pooled()?;
        conn.transaction::<MemoAttachment, WorkflowError, _>(|conn| {
            ensure_editable(actor, conn, memo_id)?;
            let (count, total) = usage(conn, memo_id)?;
            check_limits(size, count, total)?;
            Ok(diesel::insert_into(memo_attachments::table)
                .values(&NewMemoAttachment {
                    id: attachment_id,
                    memo_id,
                    uploaded_by: actor.id,
                    filename: filename.clone(),
                    content_type: content_type.clone(),
                    s3_key: key.clone(),
                    size_bytes: size as i64,
                    checksum: digest.clone(),
                })
                .get_result::<MemoAttachment>(conn)?)
        })
    };

    match recorded {
        Ok(attachment) => {
            info!(
                memo_id = %memo_id,
                attachment_id = %attachment.id,
                size_bytes = attachment.size_bytes,
                "attachment stored"
            );
            Ok(attachment)
        }
        Err(err) => {
            if let Err(cleanup) = state.storage.delete_object(&key).await {
                warn!(key = %key, error = %cleanup, "failed to remove orphaned attachment");
            }
            Err(err)
        }
    }
}

pub fn list(conn: &mut PgConnection, memo_id: Uuid) -> WorkflowResult<Vec<MemoAttachment>> {
    Ok(memo_attachments::table
        .filter(memo_attachments::memo_id.eq(memo_id))
        .order(memo_attachments::uploaded_at.asc())
        .load::<MemoAttachment>(conn)?)
}

pub async fn download_url(
    state: &AppState,
    memo_id: Uuid,
    attachment_id: Uuid,
) -> WorkflowResult<String> {
    let attachment = {
        let mut conn = state.pooled()?;
        memo_attachments::table
            .find(attachment_id)
            .filter(memo_attachments::memo_id.eq(memo_id))
            .first::<MemoAttachment>(&mut conn)
            .optional()?
            .ok_or(WorkflowError::NotFound("attachment"))?
    };
    state
        .storage
        .presign_get_object(&attachment.s3_key, PRESIGNED_URL_EXPIRY)
        .await
        .map_err(WorkflowError::Storage)
}

/// Drops every stored object of a memo that is being deleted.
pub async fn purge_objects(state: &AppState, keys: Vec<String>) {
    for key in keys {
        if let Err(err) = state.storage.delete_object(&key).await {
            warn!(key = %key, error = %err, "failed to delete attachment object");
        }
    }
}

pub(crate) fn stored_keys(conn: &mut PgConnection, memo_id: Uuid) -> WorkflowResult<Vec<String>> {
    Ok(memo_attachments::table
        .filter(memo_attachments::memo_id.eq(memo_id))
        .select(memo_attachments::s3_key)
        .load::<String>(conn)?)
}
