use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client as S3Client,
};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::storage::{ObjectStorage, S3Storage};

/// Client for the memo bucket. Static credentials win over the default chain
/// when both keys are configured; path-style addressing keeps MinIO working.
pub async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let region_provider = RegionProviderChain::first_try(Some(Region::new(config.aws_region.clone())))
        .or_default_provider()
        .or_else("us-east-1");

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
    if let Some(endpoint) = &config.aws_endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    if let (Some(access_key), Some(secret_key)) = (
        config.aws_access_key_id.clone(),
        config.aws_secret_access_key.clone(),
    ) {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "memodesk-static",
        ));
    }

    let shared = loader.load().await;
    let s3_config = S3ConfigBuilder::from(&shared)
        .force_path_style(true)
        .build();
    Ok(S3Client::from_conf(s3_config))
}

/// Storage for attachments and signed copies. An unreachable bucket is only
/// logged so the API can still serve reads that do not touch storage.
pub async fn connect_storage(config: &AppConfig) -> Result<Arc<dyn ObjectStorage>> {
    let client = build_client(config)
        .await
        .context("failed to build S3 client")?;

    match client.head_bucket().bucket(&config.s3_bucket).send().await {
        Ok(_) => info!(bucket = %config.s3_bucket, "object storage ready"),
        Err(err) => warn!(
            bucket = %config.s3_bucket,
            error = %err,
            "object storage bucket is not reachable"
        ),
    }

    Ok(Arc::new(S3Storage::new(client, config.s3_bucket.clone())))
}
