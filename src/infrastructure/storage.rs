use crate::config::ConverterConfig;
use crate::error::ConverterError;
use crate::services::storage::{S3ObjectStore, StoreError, classify_sdk_error};
use aws_sdk_s3::config::{Credentials, Region};
use std::sync::Arc;
use tracing::info;

/// Builds the S3 client and confirms the bucket is reachable.
pub async fn setup_storage(config: &ConverterConfig) -> Result<Arc<S3ObjectStore>, ConverterError> {
    info!(
        "☁️  S3 Storage: {} (Bucket: {}, Region: {})",
        config.endpoint_url.as_deref().unwrap_or("aws"),
        config.bucket,
        config.region
    );

    let mut loader = aws_config::from_env().region(Region::new(config.region.clone()));
    if let Some(endpoint_url) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }
    if let (Some(access_key), Some(secret_key)) =
        (&config.access_key_id, &config.secret_access_key)
    {
        loader = loader.credentials_provider(Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            None,
            None,
            "static",
        ));
    }
    let aws_config = loader.load().await;

    // Path-style addressing for MinIO and other self-hosted endpoints.
    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(config.endpoint_url.is_some())
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);

    match s3_client.head_bucket().bucket(&config.bucket).send().await {
        Ok(_) => info!("✅ Connected to bucket '{}'", config.bucket),
        Err(e) => {
            let reason = match classify_sdk_error(&config.bucket, e) {
                StoreError::NotFound(_) => format!("bucket '{}' not found", config.bucket),
                StoreError::AccessDenied(_) => {
                    format!("access denied to bucket '{}'", config.bucket)
                }
                other => other.to_string(),
            };
            return Err(ConverterError::Connection(reason));
        }
    }

    Ok(Arc::new(S3ObjectStore::new(s3_client, config.bucket.clone())))
}
