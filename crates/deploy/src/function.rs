//! Function version and alias lifecycle.
//!
//! A stage is an alias pointing at one immutable published version. Publishing
//! creates a new version, repointing an alias garbage-collects the version it
//! previously referenced when nothing else uses it, and periodic cleanup
//! prunes old unpinned versions.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use comfy_table::Table;

use crate::error::Result;
use crate::providers::{AliasInfo, ArtifactRef, FunctionApi, FunctionVersion, PermissionRequest,
    PublishedVersion};

/// The mutable head pseudo-version. Never deleted, never aliased by us.
const LATEST: &str = "$LATEST";

/// How many of the newest versions cleanup always keeps, pinned or not.
const KEEP_NEWEST_VERSIONS: usize = 10;

/// Versions younger than this are never cleaned up.
const MAX_VERSION_AGE_DAYS: i64 = 60;

/// Manages published versions and stage aliases of one function.
#[derive(Debug, Clone)]
pub struct FunctionVersionManager<C> {
    api: C,
    function_name: String,
    protected_stage: String,
}

/// What cleanup decided (and, unless dry-run, did) for each version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDisposition {
    pub version: String,
    pub code_size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub reason: String,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub function_name: String,
    pub dry_run: bool,
    pub kept: Vec<VersionDisposition>,
    pub deleted: Vec<VersionDisposition>,
    /// Non-protected aliases detached before retention was computed.
    pub detached_aliases: Vec<String>,
}

impl CleanupReport {
    /// Code bytes freed (or that would be freed) by the deletions.
    pub fn released_bytes(&self) -> i64 {
        self.deleted.iter().map(|d| d.code_size).sum()
    }

    /// Code bytes still held by kept versions.
    pub fn retained_bytes(&self) -> i64 {
        self.kept.iter().map(|d| d.code_size).sum()
    }

    /// Render the plan as a table for CLI output.
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_header(vec!["Version", "Action", "Reason", "Size", "Last modified"]);
        for (rows, action) in [(&self.deleted, "delete"), (&self.kept, "keep")] {
            for row in rows.iter() {
                table.add_row(vec![
                    row.version.clone(),
                    action.to_string(),
                    row.reason.clone(),
                    row.code_size.to_string(),
                    row.last_modified
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
            }
        }
        table
    }
}

impl<C: FunctionApi> FunctionVersionManager<C> {
    pub fn new(api: C, function_name: impl Into<String>, protected_stage: impl Into<String>) -> Self {
        Self {
            api,
            function_name: function_name.into(),
            protected_stage: protected_stage.into(),
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// A stage whose name contains the protected marker is never torn down
    /// and its pinned version is never garbage-collected.
    pub fn is_protected(&self, stage: &str) -> bool {
        stage.contains(&self.protected_stage)
    }

    /// The alias backing a stage. Absence surfaces as a `NotFound` error.
    pub async fn alias_for(&self, stage: &str) -> Result<AliasInfo> {
        self.api.get_alias(&self.function_name, stage).await
    }

    /// Publish the uploaded artifact as a new immutable version.
    pub async fn publish_new_version(&self, artifact: &ArtifactRef) -> Result<PublishedVersion> {
        let published = self.api.publish_version(&self.function_name, artifact).await?;
        tracing::info!(
            function = %self.function_name,
            version = %published.version,
            key = %artifact.key,
            "Published new function version"
        );
        Ok(published)
    }

    /// Point the stage alias at a version, creating the alias on first use.
    ///
    /// The version the alias previously referenced is deleted opportunistically
    /// when no other alias still uses it. That delete is best-effort; the alias
    /// already points at the new version, so failures only leave garbage.
    pub async fn set_alias(&self, stage: &str, version: &str) -> Result<AliasInfo> {
        let previous = match self.api.get_alias(&self.function_name, stage).await {
            Ok(existing) => Some(existing.function_version),
            Err(error) if error.is_not_found() => None,
            Err(error) => return Err(error),
        };

        let alias = match &previous {
            Some(_) => {
                self.api
                    .update_alias(&self.function_name, stage, version)
                    .await?
            }
            None => {
                self.api
                    .create_alias(&self.function_name, stage, version)
                    .await?
            }
        };
        tracing::info!(
            function = %self.function_name,
            stage,
            version,
            previous = previous.as_deref().unwrap_or("-"),
            "Stage alias updated"
        );

        // The protected stage keeps its history; cleanup prunes it later.
        if let Some(previous) = previous {
            if previous != version && previous != LATEST && !self.is_protected(stage) {
                let others = self.api.list_aliases(&self.function_name).await?;
                let still_referenced = others
                    .iter()
                    .any(|a| a.name != stage && a.function_version == previous);
                if !still_referenced {
                    self.delete_version_best_effort(&previous).await;
                }
            }
        }

        Ok(alias)
    }

    /// Tear down a stage: delete its alias and, when nothing else references
    /// it, the version it pointed at. Idempotent; removing an absent stage is
    /// a no-op, and so is removing the protected stage.
    pub async fn remove_version(&self, stage: &str) -> Result<Option<String>> {
        if self.is_protected(stage) {
            tracing::info!(
                function = %self.function_name,
                stage,
                "Stage is protected, leaving its alias and version in place"
            );
            return Ok(None);
        }

        // Per-version alias listing is not reliable across providers, so work
        // from the full alias map.
        let aliases = self.api.list_aliases(&self.function_name).await?;
        let Some(alias) = aliases.iter().find(|a| a.name == stage) else {
            tracing::debug!(function = %self.function_name, stage, "Stage alias already absent");
            return Ok(None);
        };
        let version = alias.function_version.clone();

        match self.api.delete_alias(&self.function_name, stage).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(error),
        }

        let still_referenced = aliases
            .iter()
            .any(|a| a.name != stage && a.function_version == version);
        if !still_referenced && version != LATEST {
            self.delete_version_best_effort(&version).await;
        }

        tracing::info!(function = %self.function_name, stage, version, "Stage removed");
        Ok(Some(version))
    }

    /// Map from version to the aliases pinning it.
    pub async fn alias_map(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let aliases = self.api.list_aliases(&self.function_name).await?;
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for alias in aliases {
            map.entry(alias.function_version).or_default().push(alias.name);
        }
        Ok(map)
    }

    /// Prune old versions: keeps `$LATEST`, every alias-pinned version, the
    /// newest [`KEEP_NEWEST_VERSIONS`], and anything younger than
    /// [`MAX_VERSION_AGE_DAYS`] days. With `force_remove_aliases` every
    /// non-protected alias is detached first, so only the protected pin
    /// survives retention. With `dry_run` the plan is returned without
    /// touching anything.
    pub async fn cleanup_old_versions(
        &self,
        force_remove_aliases: bool,
        dry_run: bool,
    ) -> Result<CleanupReport> {
        let versions = self.api.list_versions(&self.function_name).await?;
        let aliases = self.api.list_aliases(&self.function_name).await?;

        let mut detached_aliases = Vec::new();
        let effective_aliases: Vec<AliasInfo> = if force_remove_aliases {
            let (protected, detachable): (Vec<_>, Vec<_>) = aliases
                .into_iter()
                .partition(|a| self.is_protected(&a.name));
            for alias in &detachable {
                if !dry_run {
                    match self.api.delete_alias(&self.function_name, &alias.name).await {
                        Ok(()) => {}
                        Err(error) if error.is_not_found() => {}
                        Err(error) => return Err(error),
                    }
                }
                detached_aliases.push(alias.name.clone());
            }
            protected
        } else {
            aliases
        };

        let (kept, candidates) = retention_plan(&versions, &effective_aliases, Utc::now());

        let mut deleted = Vec::new();
        if dry_run {
            deleted = candidates;
        } else {
            for candidate in candidates {
                self.delete_version_best_effort(&candidate.version).await;
                deleted.push(candidate);
            }
        }

        let report = CleanupReport {
            function_name: self.function_name.clone(),
            dry_run,
            kept,
            deleted,
            detached_aliases,
        };
        tracing::info!(
            function = %self.function_name,
            kept = report.kept.len(),
            deleted = report.deleted.len(),
            detached = report.detached_aliases.len(),
            retained_bytes = report.retained_bytes(),
            released_bytes = report.released_bytes(),
            dry_run,
            "Version cleanup pass finished"
        );
        Ok(report)
    }

    /// Allow the gateway to invoke the stage alias. Idempotent: if the stage
    /// policy already carries the statement, nothing is changed.
    pub async fn grant_invoke_permission(
        &self,
        stage: &str,
        gateway_id: &str,
        region: &str,
        account_id: &str,
    ) -> Result<()> {
        let statement_id = format!("{stage}-execute");

        if let Some(policy) = self.api.get_policy(&self.function_name, stage).await? {
            if policy_has_statement(&policy, &statement_id) {
                tracing::debug!(
                    function = %self.function_name,
                    stage,
                    statement_id,
                    "Invoke permission already granted"
                );
                return Ok(());
            }
        }

        let request = PermissionRequest {
            function_name: self.function_name.clone(),
            qualifier: stage.to_string(),
            statement_id: statement_id.clone(),
            action: "lambda:InvokeFunction".to_string(),
            principal: "apigateway.amazonaws.com".to_string(),
            source_arn: format!("arn:aws:execute-api:{region}:{account_id}:{gateway_id}/*"),
        };
        match self.api.add_permission(request).await {
            Ok(()) => {
                tracing::info!(
                    function = %self.function_name,
                    stage,
                    gateway_id,
                    "Granted gateway invoke permission"
                );
                Ok(())
            }
            // A concurrent deploy may have installed the statement between
            // the policy read and this write.
            Err(error) if error.is_conflict() => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn delete_version_best_effort(&self, version: &str) {
        match self.api.delete_version(&self.function_name, version).await {
            Ok(()) => {
                tracing::info!(function = %self.function_name, version, "Deleted unused version");
            }
            Err(error) if error.is_conflict() || error.is_not_found() => {
                tracing::debug!(
                    function = %self.function_name,
                    version,
                    error = %error,
                    "Skipped version delete"
                );
            }
            Err(error) => {
                tracing::warn!(
                    function = %self.function_name,
                    version,
                    error = %error,
                    "Version delete failed, leaving it behind"
                );
            }
        }
    }
}

/// Whether the policy document carries a statement with exactly this sid.
/// An unparseable policy counts as not carrying it; the subsequent
/// `add_permission` then reports the real state.
fn policy_has_statement(policy: &str, statement_id: &str) -> bool {
    let Ok(document) = serde_json::from_str::<serde_json::Value>(policy) else {
        return false;
    };
    document["Statement"].as_array().is_some_and(|statements| {
        statements
            .iter()
            .any(|statement| statement["Sid"].as_str() == Some(statement_id))
    })
}

/// Split versions into kept and delete candidates.
fn retention_plan(
    versions: &[FunctionVersion],
    aliases: &[AliasInfo],
    now: DateTime<Utc>,
) -> (Vec<VersionDisposition>, Vec<VersionDisposition>) {
    let cutoff = now - Duration::days(MAX_VERSION_AGE_DAYS);

    // Numeric versions, newest first. `$LATEST` is handled separately.
    let mut numbered: Vec<&FunctionVersion> = versions
        .iter()
        .filter(|v| v.version != LATEST)
        .collect();
    numbered.sort_by_key(|v| std::cmp::Reverse(v.version.parse::<u64>().unwrap_or(0)));

    let mut kept = Vec::new();
    let mut delete = Vec::new();

    if let Some(latest) = versions.iter().find(|v| v.version == LATEST) {
        kept.push(disposition(latest, "mutable head"));
    }

    for (rank, version) in numbered.iter().enumerate() {
        let pinned_by: Vec<&str> = aliases
            .iter()
            .filter(|a| a.function_version == version.version)
            .map(|a| a.name.as_str())
            .collect();

        if !pinned_by.is_empty() {
            kept.push(disposition(version, &format!("pinned by {}", pinned_by.join(", "))));
        } else if rank < KEEP_NEWEST_VERSIONS {
            kept.push(disposition(version, &format!("among newest {KEEP_NEWEST_VERSIONS}")));
        } else if version.last_modified.is_some_and(|t| t > cutoff) {
            kept.push(disposition(
                version,
                &format!("younger than {MAX_VERSION_AGE_DAYS} days"),
            ));
        } else {
            delete.push(disposition(version, "old and unpinned"));
        }
    }

    (kept, delete)
}

fn disposition(version: &FunctionVersion, reason: &str) -> VersionDisposition {
    VersionDisposition {
        version: version.version.clone(),
        code_size: version.code_size,
        last_modified: version.last_modified,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(number: u64, age_days: i64) -> FunctionVersion {
        FunctionVersion {
            version: number.to_string(),
            arn: format!("arn:aws:lambda:us-east-1:123:function:svc-api:{number}"),
            code_size: 1024,
            last_modified: Some(Utc::now() - Duration::days(age_days)),
        }
    }

    fn alias(name: &str, version: u64) -> AliasInfo {
        AliasInfo {
            name: name.to_string(),
            function_version: version.to_string(),
        }
    }

    #[test]
    fn test_retention_keeps_newest_ten_regardless_of_age() {
        let versions: Vec<_> = (1..=12).map(|n| version(n, 365)).collect();
        let (kept, delete) = retention_plan(&versions, &[], Utc::now());

        let deleted: Vec<_> = delete.iter().map(|d| d.version.as_str()).collect();
        assert_eq!(deleted, vec!["2", "1"]);
        assert_eq!(kept.len(), 10);
    }

    #[test]
    fn test_retention_keeps_pinned_and_recent_versions() {
        let mut versions: Vec<_> = (1..=15).map(|n| version(n, 365)).collect();
        versions[0].last_modified = Some(Utc::now() - Duration::days(5)); // version 1, recent
        let aliases = vec![alias("production", 2)];

        let (kept, delete) = retention_plan(&versions, &aliases, Utc::now());

        let deleted: Vec<_> = delete.iter().map(|d| d.version.as_str()).collect();
        assert_eq!(deleted, vec!["5", "4", "3"]);
        assert!(kept.iter().any(|k| k.version == "2" && k.reason.contains("production")));
        assert!(kept.iter().any(|k| k.version == "1"));
    }

    #[test]
    fn test_policy_statement_match_is_exact() {
        let policy = r#"{"Statement":[{"Sid":"pr-4-execute-old"},{"Sid":"other"}]}"#;
        assert!(policy_has_statement(policy, "pr-4-execute-old"));
        // A sid embedded in a longer sid is not a match.
        assert!(!policy_has_statement(policy, "pr-4-execute"));
        assert!(!policy_has_statement("not a policy document", "pr-4-execute"));
    }

    #[test]
    fn test_retention_never_touches_latest() {
        let versions = vec![FunctionVersion {
            version: LATEST.to_string(),
            arn: "arn:aws:lambda:us-east-1:123:function:svc-api".to_string(),
            code_size: 0,
            last_modified: Some(Utc::now() - Duration::days(400)),
        }];
        let (kept, delete) = retention_plan(&versions, &[], Utc::now());
        assert!(delete.is_empty());
        assert_eq!(kept[0].version, LATEST);
    }
}
