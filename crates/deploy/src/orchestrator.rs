//! Top-level service deployment flows.
//!
//! Ties the artifact store, the function version manager, and the gateway
//! manager together into the three flows operators actually run: publish a
//! stage, remove a stage, and promote one stage's code to another.

use std::path::PathBuf;

use url::Url;

use crate::artifact::ArtifactStore;
use crate::config::ServiceConfig;
use crate::error::{DeployError, Result};
use crate::function::{CleanupReport, FunctionVersionManager};
use crate::gateway::{GatewayManager, GatewayRef};
use crate::providers::{FunctionApi, GatewayApi, ObjectStore, StackApi};
use crate::stack::{DeployOutcome, StackOptions, StackReconciler, Template};

/// Logical name the code package is filed under in the deployment bucket.
const CODE_ARTIFACT_NAME: &str = "package.zip";

/// Request to publish code and expose it on a stage.
#[derive(Debug, Clone)]
pub struct StageDeployRequest {
    /// Stage to deploy (a branch or pull-request name, or the protected
    /// stage).
    pub stage: String,
    /// Local code package to upload.
    pub code_package: PathBuf,
    /// Whether the stage must be routable through the service gateway. When
    /// false a missing gateway is tolerated and only the function is
    /// deployed.
    pub routing: bool,
}

/// What a stage deploy produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDeployment {
    pub stage: String,
    /// Function version the stage alias points at.
    pub version: String,
    pub gateway: Option<GatewayRef>,
    /// Public URL of the stage, when a gateway serves it.
    pub service_url: Option<Url>,
}

/// Orchestrates the per-service deployment flows.
pub struct ServiceDeployer<F, G, C, S> {
    config: ServiceConfig,
    account_id: String,
    functions: FunctionVersionManager<F>,
    gateways: GatewayManager<G>,
    stacks: StackReconciler<C, S>,
    artifacts: ArtifactStore<S>,
}

impl<F, G, C, S> ServiceDeployer<F, G, C, S>
where
    F: FunctionApi,
    G: GatewayApi,
    C: StackApi,
    S: ObjectStore,
{
    pub fn new(
        config: ServiceConfig,
        account_id: impl Into<String>,
        functions: FunctionVersionManager<F>,
        gateways: GatewayManager<G>,
        stacks: StackReconciler<C, S>,
        artifacts: ArtifactStore<S>,
    ) -> Self {
        Self {
            config,
            account_id: account_id.into(),
            functions,
            gateways,
            stacks,
            artifacts,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Upload the code package, publish it as a new version, point the stage
    /// alias at it, and route the gateway stage to the alias.
    pub async fn publish_and_deploy_stage(
        &self,
        request: &StageDeployRequest,
    ) -> Result<StageDeployment> {
        validate_stage_name(&request.stage)?;
        tracing::info!(
            service = %self.config.service_name,
            stage = %request.stage,
            package = %request.code_package.display(),
            "Deploying stage"
        );

        let (_, gateway) = futures::try_join!(
            self.artifacts.ensure_bucket(),
            self.resolve_gateway(request.routing),
        )?;

        let artifact = self
            .artifacts
            .put(
                &self.config.service_name,
                &request.stage,
                CODE_ARTIFACT_NAME,
                &request.code_package,
            )
            .await?;
        let published = self.functions.publish_new_version(&artifact).await?;
        self.functions
            .set_alias(&request.stage, &published.version)
            .await?;

        let service_url = match &gateway {
            Some(gateway) => {
                self.functions
                    .grant_invoke_permission(
                        &request.stage,
                        &gateway.id,
                        &self.config.region,
                        &self.account_id,
                    )
                    .await?;
                self.gateways
                    .bind_stage(gateway, &request.stage, &published.version)
                    .await?;
                Some(self.stage_url(&gateway.id, &request.stage)?)
            }
            None => None,
        };

        tracing::info!(
            service = %self.config.service_name,
            stage = %request.stage,
            version = %published.version,
            url = service_url.as_ref().map(Url::as_str).unwrap_or("-"),
            "Stage deployed"
        );
        Ok(StageDeployment {
            stage: request.stage.clone(),
            version: published.version,
            gateway,
            service_url,
        })
    }

    /// Tear a stage down: unroute it, drop its alias and unreferenced
    /// version, and delete its artifacts. Idempotent; a stage that never
    /// existed is a no-op. The protected stage is refused.
    pub async fn remove_stage(&self, stage: &str) -> Result<()> {
        validate_stage_name(stage)?;
        if self.functions.is_protected(stage) {
            return Err(DeployError::validation(format!(
                "stage {stage} is protected and cannot be removed"
            )));
        }

        // Unroute before touching the alias so no traffic reaches a dangling
        // version.
        match self.gateways.resolve(&self.config.service_name).await {
            Ok(gateway) => self.gateways.unbind_stage(&gateway, stage).await?,
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(error),
        }

        self.functions.remove_version(stage).await?;
        self.artifacts
            .delete_version(&self.config.service_name, stage)
            .await?;

        tracing::info!(service = %self.config.service_name, stage, "Stage removed");
        Ok(())
    }

    /// Point `target_stage` at the exact version `source_stage` currently
    /// runs, copying the source artifacts so the target owns its code.
    pub async fn promote_to_stage(
        &self,
        source_stage: &str,
        target_stage: &str,
    ) -> Result<StageDeployment> {
        validate_stage_name(source_stage)?;
        validate_stage_name(target_stage)?;
        if source_stage == target_stage {
            return Err(DeployError::validation(
                "source and target stage must differ",
            ));
        }

        let source = self.functions.alias_for(source_stage).await?;
        tracing::info!(
            service = %self.config.service_name,
            source_stage,
            target_stage,
            version = %source.function_version,
            "Promoting stage"
        );

        self.artifacts
            .copy_version(&self.config.service_name, source_stage, target_stage)
            .await?;
        let alias = self
            .functions
            .set_alias(target_stage, &source.function_version)
            .await?;

        let gateway = self.resolve_gateway(false).await?;
        let service_url = match &gateway {
            Some(gateway) => {
                self.functions
                    .grant_invoke_permission(
                        target_stage,
                        &gateway.id,
                        &self.config.region,
                        &self.account_id,
                    )
                    .await?;
                self.gateways
                    .bind_stage(gateway, target_stage, &alias.function_version)
                    .await?;
                Some(self.stage_url(&gateway.id, target_stage)?)
            }
            None => None,
        };

        Ok(StageDeployment {
            stage: target_stage.to_string(),
            version: alias.function_version,
            gateway,
            service_url,
        })
    }

    /// Reconcile an infrastructure stack owned by this service. The
    /// deployment bucket is created first because the reconciler uploads the
    /// template through it.
    pub async fn deploy_template(
        &self,
        template: &Template,
        options: &StackOptions,
    ) -> Result<DeployOutcome> {
        self.artifacts.ensure_bucket().await?;
        self.stacks.deploy_template(template, options).await
    }

    /// Prune old function versions. Advisory; see
    /// [`FunctionVersionManager::cleanup_old_versions`].
    pub async fn cleanup(&self, force_remove_aliases: bool, dry_run: bool) -> Result<CleanupReport> {
        self.functions
            .cleanup_old_versions(force_remove_aliases, dry_run)
            .await
    }

    /// Public URL of a stage behind a gateway.
    pub fn stage_url(&self, gateway_id: &str, stage: &str) -> Result<Url> {
        let raw = format!(
            "https://{gateway_id}.execute-api.{}.amazonaws.com/{stage}",
            self.config.region
        );
        Url::parse(&raw).map_err(|e| DeployError::validation(format!("invalid stage url {raw}: {e}")))
    }

    async fn resolve_gateway(&self, required: bool) -> Result<Option<GatewayRef>> {
        match self.gateways.resolve(&self.config.service_name).await {
            Ok(gateway) => Ok(Some(gateway)),
            Err(error) if error.is_not_found() && !required => {
                tracing::debug!(
                    service = %self.config.service_name,
                    "Service has no gateway, deploying function only"
                );
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}

fn validate_stage_name(stage: &str) -> Result<()> {
    if stage.is_empty() {
        return Err(DeployError::validation("stage name must not be empty"));
    }
    if !stage
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DeployError::validation(format!(
            "stage name {stage} may only contain alphanumerics, '-' and '_'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_validation() {
        assert!(validate_stage_name("pr-42").is_ok());
        assert!(validate_stage_name("feature_login").is_ok());
        assert!(validate_stage_name("").is_err());
        assert!(validate_stage_name("pr/42").is_err());
    }
}
