use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use uuid::Uuid;

pub const PRESIGNED_URL_EXPIRY: Duration = Duration::from_secs(300);

#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()>;

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String>;

    async fn delete_object(&self, key: &str) -> Result<()>;
}

pub fn attachment_key(memo_id: Uuid, attachment_id: Uuid, extension: &str) -> String {
    format!("memos/{memo_id}/attachments/{attachment_id}.{extension}")
}

pub fn signed_artifact_key(memo_id: Uuid, correlative_number: Option<&str>) -> String {
    let stem = correlative_number.unwrap_or("memo");
    format!("memos/{memo_id}/signed/{stem}-{}.pdf", Uuid::new_v4().simple())
}

/// `attachment` disposition that survives non-ASCII filenames.
pub fn attachment_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "attachment; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}"
    ))
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        if let Some(content_disposition) = content_disposition {
            request = request.content_disposition(content_disposition);
        }

        request
            .send()
            .await
            .with_context(|| format!("failed to upload {key} to S3"))?;

        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .context("failed to build S3 presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .context("failed to generate presigned download URL")?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to delete {key} from S3"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_memo() {
        let memo_id = Uuid::new_v4();
        let attachment_id = Uuid::new_v4();
        assert_eq!(
            attachment_key(memo_id, attachment_id, "pdf"),
            format!("memos/{memo_id}/attachments/{attachment_id}.pdf")
        );
        let signed = signed_artifact_key(memo_id, Some("FIN-2024-03-0042"));
        assert!(signed.starts_with(&format!("memos/{memo_id}/signed/FIN-2024-03-0042-")));
        assert!(signed.ends_with(".pdf"));
    }

    #[test]
    fn disposition_escapes_quotes_and_encodes_utf8() {
        let value = attachment_disposition("presupuesto \"final\" año.pdf").unwrap();
        assert!(value.starts_with("attachment; filename=\"presupuesto _final_ año.pdf\""));
        assert!(value.ends_with("filename*=UTF-8''presupuesto%20%5Ffinal%5F%20a%C3%B1o%2Epdf"));
        assert!(attachment_disposition("").is_none());
    }
}
