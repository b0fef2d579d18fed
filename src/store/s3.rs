use crate::config::ObjectStoreConfig;
use crate::store::ObjectStore;
use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};

/// Object store backed by S3
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create an S3-backed object store
    pub async fn new(config: &ObjectStoreConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(region = %config.region, "S3 object store initialized");

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to delete object {key} from bucket {bucket}"))?;

        debug!(bucket = %bucket, key = %key, "Object deleted");
        Ok(())
    }
}
