// S3 object store adapter
//
// Thin wrapper over aws-sdk-s3. Retries, credential resolution and connection
// pooling are left to the SDK client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info};

use super::{ObjectStore, StoreError};
use crate::config::DaemonConfig;

/// Signing region used with a custom endpoint when none is configured
const CUSTOM_ENDPOINT_REGION: &str = "us-east-1";

/// Upper bound on resolving the AWS environment (profiles, region, credentials chain)
const CONFIG_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the startup bucket check
const HEAD_BUCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// `ObjectStore` backed by a single S3 bucket
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Build a client from the ambient AWS configuration
    ///
    /// With an endpoint override the client uses path-style addressing so the
    /// endpoint host is used verbatim (MinIO, localstack, test fakes).
    pub async fn connect(config: &DaemonConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        let region = config
            .region()
            .map(str::to_string)
            .or_else(|| config.endpoint().map(|_| CUSTOM_ENDPOINT_REGION.to_string()));
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(endpoint) = config.endpoint() {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = tokio::time::timeout(CONFIG_LOAD_TIMEOUT, loader.load())
            .await
            .context("timed out resolving AWS configuration")?;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if config.endpoint().is_some() {
            builder = builder.force_path_style(true);
        }

        info!(
            bucket = config.bucket(),
            endpoint = config.endpoint().unwrap_or("default"),
            "S3 client configured"
        );

        Ok(Self::from_client(Client::from_conf(builder.build()), config.bucket()))
    }

    /// Wrap an existing SDK client
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

/// Keep the full SDK error chain; `SdkError`'s own `Display` is only the outer layer
fn backend_error(err: impl std::error::Error) -> StoreError {
    StoreError::Backend(DisplayErrorContext(err).to_string().into())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StoreError::NotFound(key.to_string())
                } else {
                    backend_error(err)
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|err| StoreError::Read(Box::new(err)))?;

        Ok(data.into_bytes())
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::BucketOwnerFullControl)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(backend_error)?;

        debug!(key = key, size = size, "Object uploaded");
        Ok(())
    }

    async fn head_bucket(&self) -> Result<(), StoreError> {
        let request = self.client.head_bucket().bucket(&self.bucket).send();

        match tokio::time::timeout(HEAD_BUCKET_TIMEOUT, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(backend_error(err)),
            Err(_) => Err(StoreError::Backend(
                format!(
                    "timed out after {}s checking bucket {}",
                    HEAD_BUCKET_TIMEOUT.as_secs(),
                    self.bucket
                )
                .into(),
            )),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
