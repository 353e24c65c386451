//! Function hosting seam and its Lambda implementation.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::providers::map_sdk_error;

/// Location of an uploaded code artifact in the deployment bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub bucket: String,
    pub key: String,
}

/// One immutable published version of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionVersion {
    pub version: String,
    pub arn: String,
    pub code_size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// The result of publishing new code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedVersion {
    pub arn: String,
    pub version: String,
}

/// A named pointer at a published version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasInfo {
    pub name: String,
    pub function_version: String,
}

/// Request to let a caller principal invoke a function qualifier.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub function_name: String,
    pub qualifier: String,
    pub statement_id: String,
    pub action: String,
    pub principal: String,
    pub source_arn: String,
}

/// Function hosting surface consumed by the version manager.
pub trait FunctionApi: Send + Sync {
    /// Replace the function code from an uploaded artifact and publish the
    /// result as a new immutable version.
    fn publish_version(
        &self,
        function_name: &str,
        artifact: &ArtifactRef,
    ) -> impl Future<Output = Result<PublishedVersion>> + Send;

    /// All published versions, including the mutable `$LATEST` pseudo-version.
    fn list_versions(&self, function_name: &str) -> impl Future<Output = Result<Vec<FunctionVersion>>> + Send;

    fn get_alias(
        &self,
        function_name: &str,
        alias_name: &str,
    ) -> impl Future<Output = Result<AliasInfo>> + Send;

    fn create_alias(
        &self,
        function_name: &str,
        alias_name: &str,
        version: &str,
    ) -> impl Future<Output = Result<AliasInfo>> + Send;

    fn update_alias(
        &self,
        function_name: &str,
        alias_name: &str,
        version: &str,
    ) -> impl Future<Output = Result<AliasInfo>> + Send;

    fn delete_alias(
        &self,
        function_name: &str,
        alias_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn list_aliases(&self, function_name: &str) -> impl Future<Output = Result<Vec<AliasInfo>>> + Send;

    /// Delete one published version. Deleting a version still referenced by
    /// an alias surfaces as a conflict.
    fn delete_version(
        &self,
        function_name: &str,
        version: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// The resource policy attached to a qualifier, if any.
    fn get_policy(
        &self,
        function_name: &str,
        qualifier: &str,
    ) -> impl Future<Output = Result<Option<String>>> + Send;

    fn add_permission(&self, request: PermissionRequest) -> impl Future<Output = Result<()>> + Send;
}

/// Lambda-backed function host.
#[derive(Debug, Clone)]
pub struct LambdaApi {
    client: aws_sdk_lambda::Client,
}

impl LambdaApi {
    pub fn new(client: aws_sdk_lambda::Client) -> Self {
        Self { client }
    }

    /// Lambda reports timestamps as ISO-8601 with milliseconds and a numeric
    /// offset ("2024-05-01T12:00:00.000+0000").
    fn parse_last_modified(raw: Option<&str>) -> Option<DateTime<Utc>> {
        let raw = raw?;
        DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z")
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl FunctionApi for LambdaApi {
    async fn publish_version(
        &self,
        function_name: &str,
        artifact: &ArtifactRef,
    ) -> Result<PublishedVersion> {
        let output = self
            .client
            .update_function_code()
            .function_name(function_name)
            .s3_bucket(&artifact.bucket)
            .s3_key(&artifact.key)
            .publish(true)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("update_function_code", &format!("function {function_name}"), e)
            })?;

        Ok(PublishedVersion {
            arn: output.function_arn().unwrap_or_default().to_string(),
            version: output.version().unwrap_or_default().to_string(),
        })
    }

    async fn list_versions(&self, function_name: &str) -> Result<Vec<FunctionVersion>> {
        let mut versions = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_versions_by_function()
                .function_name(function_name);
            if let Some(token) = marker {
                request = request.marker(token);
            }
            let page = request.send().await.map_err(|e| {
                map_sdk_error("list_versions", &format!("function {function_name}"), e)
            })?;
            versions.extend(page.versions().iter().map(|config| FunctionVersion {
                version: config.version().unwrap_or_default().to_string(),
                arn: config.function_arn().unwrap_or_default().to_string(),
                code_size: config.code_size(),
                last_modified: Self::parse_last_modified(config.last_modified()),
            }));
            match page.next_marker() {
                Some(token) => marker = Some(token.to_string()),
                None => break,
            }
        }
        Ok(versions)
    }

    async fn get_alias(&self, function_name: &str, alias_name: &str) -> Result<AliasInfo> {
        let output = self
            .client
            .get_alias()
            .function_name(function_name)
            .name(alias_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("get_alias", &format!("alias {alias_name} on {function_name}"), e)
            })?;
        Ok(AliasInfo {
            name: output.name().unwrap_or(alias_name).to_string(),
            function_version: output.function_version().unwrap_or_default().to_string(),
        })
    }

    async fn create_alias(
        &self,
        function_name: &str,
        alias_name: &str,
        version: &str,
    ) -> Result<AliasInfo> {
        let output = self
            .client
            .create_alias()
            .function_name(function_name)
            .name(alias_name)
            .function_version(version)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("create_alias", &format!("alias {alias_name} on {function_name}"), e)
            })?;
        Ok(AliasInfo {
            name: output.name().unwrap_or(alias_name).to_string(),
            function_version: output.function_version().unwrap_or(version).to_string(),
        })
    }

    async fn update_alias(
        &self,
        function_name: &str,
        alias_name: &str,
        version: &str,
    ) -> Result<AliasInfo> {
        let output = self
            .client
            .update_alias()
            .function_name(function_name)
            .name(alias_name)
            .function_version(version)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("update_alias", &format!("alias {alias_name} on {function_name}"), e)
            })?;
        Ok(AliasInfo {
            name: output.name().unwrap_or(alias_name).to_string(),
            function_version: output.function_version().unwrap_or(version).to_string(),
        })
    }

    async fn delete_alias(&self, function_name: &str, alias_name: &str) -> Result<()> {
        self.client
            .delete_alias()
            .function_name(function_name)
            .name(alias_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("delete_alias", &format!("alias {alias_name} on {function_name}"), e)
            })?;
        Ok(())
    }

    async fn list_aliases(&self, function_name: &str) -> Result<Vec<AliasInfo>> {
        let mut aliases = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut request = self.client.list_aliases().function_name(function_name);
            if let Some(token) = marker {
                request = request.marker(token);
            }
            let page = request.send().await.map_err(|e| {
                map_sdk_error("list_aliases", &format!("function {function_name}"), e)
            })?;
            aliases.extend(page.aliases().iter().map(|alias| AliasInfo {
                name: alias.name().unwrap_or_default().to_string(),
                function_version: alias.function_version().unwrap_or_default().to_string(),
            }));
            match page.next_marker() {
                Some(token) => marker = Some(token.to_string()),
                None => break,
            }
        }
        Ok(aliases)
    }

    async fn delete_version(&self, function_name: &str, version: &str) -> Result<()> {
        self.client
            .delete_function()
            .function_name(function_name)
            .qualifier(version)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    "delete_version",
                    &format!("version {version} of {function_name}"),
                    e,
                )
            })?;
        Ok(())
    }

    async fn get_policy(&self, function_name: &str, qualifier: &str) -> Result<Option<String>> {
        match self
            .client
            .get_policy()
            .function_name(function_name)
            .qualifier(qualifier)
            .send()
            .await
        {
            Ok(output) => Ok(output.policy().map(str::to_string)),
            Err(error) => {
                let mapped = map_sdk_error(
                    "get_policy",
                    &format!("policy on {function_name}:{qualifier}"),
                    error,
                );
                if mapped.is_not_found() {
                    Ok(None)
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn add_permission(&self, request: PermissionRequest) -> Result<()> {
        self.client
            .add_permission()
            .function_name(&request.function_name)
            .qualifier(&request.qualifier)
            .statement_id(&request.statement_id)
            .action(&request.action)
            .principal(&request.principal)
            .source_arn(&request.source_arn)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    "add_permission",
                    &format!("permission {} on {}", request.statement_id, request.function_name),
                    e,
                )
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_last_modified() {
        let parsed = LambdaApi::parse_last_modified(Some("2024-05-01T12:30:00.000+0000"));
        let parsed = parsed.expect("timestamp should parse");
        assert_eq!(parsed.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }

    #[test]
    fn test_parse_last_modified_garbage_is_none() {
        assert!(LambdaApi::parse_last_modified(Some("yesterday")).is_none());
        assert!(LambdaApi::parse_last_modified(None).is_none());
    }
}
