//! Artifact store: content-addressed uploads into the deployment bucket.
//!
//! Keys follow `{service}/{version}/{logical_name}` so everything belonging
//! to one deployment lives under a single prefix that can be copied on
//! promotion and deleted when a stage is removed.

use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{DeployError, Result};
use crate::providers::{ArtifactRef, ObjectStore};

/// Metadata key carrying the hex sha256 of the uploaded body.
const DIGEST_METADATA_KEY: &str = "sha256-digest";

/// Uploads and organizes deployment artifacts in an object store bucket.
#[derive(Debug, Clone)]
pub struct ArtifactStore<S> {
    store: S,
    bucket: String,
}

impl<S: ObjectStore> ArtifactStore<S> {
    pub fn new(store: S, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Create the deployment bucket if it does not exist yet.
    pub async fn ensure_bucket(&self) -> Result<()> {
        if self.store.bucket_exists(&self.bucket).await? {
            return Ok(());
        }
        tracing::info!(bucket = %self.bucket, "Creating deployment bucket");
        self.store.create_bucket(&self.bucket).await
    }

    /// Key for one logical artifact of one deployment.
    pub fn artifact_key(service: &str, version: &str, logical_name: &str) -> String {
        format!("{service}/{version}/{logical_name}")
    }

    /// Prefix grouping every artifact of one deployment.
    pub fn version_prefix(service: &str, version: &str) -> String {
        format!("{service}/{version}/")
    }

    /// Upload a local file as a deployment artifact.
    pub async fn put(
        &self,
        service: &str,
        version: &str,
        logical_name: &str,
        path: &Path,
    ) -> Result<ArtifactRef> {
        let body = tokio::fs::read(path).await.map_err(|source| DeployError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.put_bytes(service, version, logical_name, body).await
    }

    /// Upload raw bytes as a deployment artifact, recording the content
    /// digest as object metadata.
    pub async fn put_bytes(
        &self,
        service: &str,
        version: &str,
        logical_name: &str,
        body: Vec<u8>,
    ) -> Result<ArtifactRef> {
        let key = Self::artifact_key(service, version, logical_name);
        let digest = hex::encode(Sha256::digest(&body));
        let metadata = HashMap::from([(DIGEST_METADATA_KEY.to_string(), digest.clone())]);

        tracing::debug!(
            bucket = %self.bucket,
            key,
            bytes = body.len(),
            digest,
            "Uploading artifact"
        );
        self.store
            .put_object(&self.bucket, &key, body, metadata)
            .await?;

        Ok(ArtifactRef {
            bucket: self.bucket.clone(),
            key,
        })
    }

    /// Copy every artifact of one deployment under a new version prefix.
    /// Used by promotion so the promoted stage has its own copy of the code.
    pub async fn copy_version(
        &self,
        service: &str,
        source_version: &str,
        target_version: &str,
    ) -> Result<usize> {
        let source_prefix = Self::version_prefix(service, source_version);
        let target_prefix = Self::version_prefix(service, target_version);

        let keys = self.store.list_keys(&self.bucket, &source_prefix).await?;
        for key in &keys {
            let target_key = format!("{target_prefix}{}", &key[source_prefix.len()..]);
            self.store.copy_object(&self.bucket, key, &target_key).await?;
        }
        tracing::info!(
            service,
            source_version,
            target_version,
            copied = keys.len(),
            "Copied deployment artifacts"
        );
        Ok(keys.len())
    }

    /// Delete every artifact under one deployment prefix.
    pub async fn delete_version(&self, service: &str, version: &str) -> Result<usize> {
        let prefix = Self::version_prefix(service, version);
        let keys = self.store.list_keys(&self.bucket, &prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.store.delete_objects(&self.bucket, &keys).await?;
        tracing::info!(service, version, deleted = keys.len(), "Deleted deployment artifacts");
        Ok(keys.len())
    }

    /// HTTPS URL of an artifact, for interfaces that take a URL rather than
    /// a bucket/key pair.
    pub fn url(&self, key: &str) -> String {
        self.store.object_url(&self.bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_key_layout() {
        assert_eq!(
            ArtifactStore::<crate::providers::S3ObjectStore>::artifact_key("orders", "pr-42", "lambda.zip"),
            "orders/pr-42/lambda.zip"
        );
        assert_eq!(
            ArtifactStore::<crate::providers::S3ObjectStore>::version_prefix("orders", "pr-42"),
            "orders/pr-42/"
        );
    }
}
