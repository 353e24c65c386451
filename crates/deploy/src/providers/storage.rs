//! Object storage seam and its S3 implementation.

use std::collections::HashMap;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    AbortIncompleteMultipartUpload, BucketLifecycleConfiguration, BucketLocationConstraint,
    CreateBucketConfiguration, Delete, ExpirationStatus, LifecycleRule, LifecycleRuleFilter,
    ObjectIdentifier, PublicAccessBlockConfiguration,
};

use crate::error::{DeployError, Result};
use crate::providers::map_sdk_error;

/// Days after which an abandoned multipart upload is expired by the bucket
/// lifecycle rule installed at creation time.
const ABORT_INCOMPLETE_UPLOAD_DAYS: i32 = 7;

/// Object storage surface consumed by the artifact store.
///
/// All writes have overwrite semantics and are idempotent at the key level.
pub trait ObjectStore: Send + Sync {
    fn bucket_exists(&self, bucket: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Create the bucket with public access blocked and a lifecycle rule for
    /// abandoned uploads. "Already owned by you" is success; "owned by
    /// another party" surfaces as a conflict.
    fn create_bucket(&self, bucket: &str) -> impl Future<Output = Result<()>> + Send;

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn list_keys(&self, bucket: &str, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> impl Future<Output = Result<()>> + Send;

    fn copy_object(
        &self,
        bucket: &str,
        source_key: &str,
        target_key: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// HTTPS URL for referencing an uploaded object (e.g. a stack template
    /// too large to inline).
    fn object_url(&self, bucket: &str, key: &str) -> String;
}

/// S3-backed object store.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    region: String,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }
}

impl ObjectStore for S3ObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(error) => {
                let mapped = map_sdk_error("head_bucket", &format!("bucket {bucket}"), error);
                if mapped.is_not_found() {
                    Ok(false)
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        if let Err(error) = request.send().await {
            let code = aws_sdk_s3::error::ProvideErrorMetadata::code(&error);
            if code == Some("BucketAlreadyOwnedByYou") {
                tracing::debug!(bucket, "Bucket already owned by this account");
                return Ok(());
            }
            return Err(map_sdk_error("create_bucket", &format!("bucket {bucket}"), error));
        }

        self.client
            .put_public_access_block()
            .bucket(bucket)
            .public_access_block_configuration(
                PublicAccessBlockConfiguration::builder()
                    .block_public_acls(true)
                    .block_public_policy(true)
                    .ignore_public_acls(true)
                    .restrict_public_buckets(true)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error("put_public_access_block", &format!("bucket {bucket}"), e))?;

        let rule = LifecycleRule::builder()
            .id("skylift-abort-incomplete-uploads")
            .status(ExpirationStatus::Enabled)
            .filter(LifecycleRuleFilter::builder().prefix("").build())
            .abort_incomplete_multipart_upload(
                AbortIncompleteMultipartUpload::builder()
                    .days_after_initiation(ABORT_INCOMPLETE_UPLOAD_DAYS)
                    .build(),
            )
            .build()
            .map_err(|e| DeployError::validation(format!("invalid lifecycle rule: {e}")))?;

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(
                BucketLifecycleConfiguration::builder()
                    .rules(rule)
                    .build()
                    .map_err(|e| DeployError::validation(format!("invalid lifecycle config: {e}")))?,
            )
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("put_bucket_lifecycle_configuration", &format!("bucket {bucket}"), e)
            })?;

        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body));
        for (name, value) in metadata {
            request = request.metadata(name, value);
        }
        request
            .send()
            .await
            .map_err(|e| map_sdk_error("put_object", &format!("s3://{bucket}/{key}"), e))?;
        Ok(())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = continuation {
                request = request.continuation_token(token);
            }
            let page = request
                .send()
                .await
                .map_err(|e| map_sdk_error("list_objects", &format!("s3://{bucket}/{prefix}"), e))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        // The provider caps each delete call at 1000 keys.
        for chunk in keys.chunks(1000) {
            let objects = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| DeployError::validation(format!("invalid object key: {e}")))
                })
                .collect::<Result<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| DeployError::validation(format!("invalid delete request: {e}")))?;
            self.client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| map_sdk_error("delete_objects", &format!("bucket {bucket}"), e))?;
        }
        Ok(())
    }

    async fn copy_object(&self, bucket: &str, source_key: &str, target_key: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(bucket)
            .copy_source(format!("{bucket}/{source_key}"))
            .key(target_key)
            .send()
            .await
            .map_err(|e| map_sdk_error("copy_object", &format!("s3://{bucket}/{source_key}"), e))?;
        Ok(())
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("https://{bucket}.s3.{}.amazonaws.com/{key}", self.region)
    }
}
