//! Gateway resolution and stage binding.
//!
//! A service owns at most one gateway, looked up by name across both
//! generations. Current-generation gateways win when both exist. Binding a
//! stage makes the gateway serve it; how depends on the generation.

use crate::error::{DeployError, Result};
use crate::providers::{GatewayApi, GatewaySummary};

/// Which gateway generation a service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum GatewayGeneration {
    #[strum(serialize = "http")]
    HttpApi,
    #[strum(serialize = "rest")]
    RestApi,
}

/// A resolved gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRef {
    pub id: String,
    pub name: String,
    pub generation: GatewayGeneration,
}

/// Result of binding a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBinding {
    pub gateway: GatewayRef,
    /// Absent when the stage auto-deploys and no explicit deployment was
    /// needed.
    pub deployment_id: Option<String>,
}

/// Resolves gateways by service name and manages their stages.
#[derive(Debug, Clone)]
pub struct GatewayManager<G> {
    api: G,
}

impl<G: GatewayApi> GatewayManager<G> {
    pub fn new(api: G) -> Self {
        Self { api }
    }

    /// Find the gateway named after the service. The current generation is
    /// consulted first so services migrating between generations route
    /// through the new one.
    pub async fn resolve(&self, service_name: &str) -> Result<GatewayRef> {
        if let Some(api) = find_by_name(&self.api.list_http_apis().await?, service_name) {
            return Ok(GatewayRef {
                id: api.id.clone(),
                name: api.name.clone(),
                generation: GatewayGeneration::HttpApi,
            });
        }
        if let Some(api) = find_by_name(&self.api.list_rest_apis().await?, service_name) {
            return Ok(GatewayRef {
                id: api.id.clone(),
                name: api.name.clone(),
                generation: GatewayGeneration::RestApi,
            });
        }
        Err(DeployError::not_found(format!("gateway {service_name}")))
    }

    /// Make the gateway serve the stage. `version` is the function version
    /// the stage alias points at; it lands in the deployment description so
    /// console history shows what each deployment shipped.
    pub async fn bind_stage(
        &self,
        gateway: &GatewayRef,
        stage: &str,
        version: &str,
    ) -> Result<StageBinding> {
        let description = format!("Stage {stage} at function version {version}");
        let deployment_id = match gateway.generation {
            GatewayGeneration::HttpApi => {
                match self.api.get_http_stage(&gateway.id, stage).await {
                    Ok(info) if info.auto_deploy => {
                        // Auto-deploy stages track route changes on their own.
                        tracing::debug!(
                            gateway = %gateway.id,
                            stage,
                            "Stage auto-deploys, nothing to bind"
                        );
                        None
                    }
                    Ok(_) => Some(
                        self.api
                            .create_http_deployment(&gateway.id, stage, &description)
                            .await?,
                    ),
                    Err(error) if error.is_not_found() => {
                        self.api.create_http_stage(&gateway.id, stage).await?;
                        Some(
                            self.api
                                .create_http_deployment(&gateway.id, stage, &description)
                                .await?,
                        )
                    }
                    Err(error) => return Err(error),
                }
            }
            GatewayGeneration::RestApi => Some(
                self.api
                    .create_rest_deployment(&gateway.id, stage, &description)
                    .await?,
            ),
        };

        tracing::info!(
            gateway = %gateway.id,
            generation = %gateway.generation,
            stage,
            deployment = deployment_id.as_deref().unwrap_or("-"),
            "Stage bound"
        );
        Ok(StageBinding {
            gateway: gateway.clone(),
            deployment_id,
        })
    }

    /// Stop serving the stage. Idempotent; an absent stage is success.
    pub async fn unbind_stage(&self, gateway: &GatewayRef, stage: &str) -> Result<()> {
        let result = match gateway.generation {
            GatewayGeneration::HttpApi => self.api.delete_http_stage(&gateway.id, stage).await,
            GatewayGeneration::RestApi => self.api.delete_rest_stage(&gateway.id, stage).await,
        };
        match result {
            Ok(()) => {
                tracing::info!(gateway = %gateway.id, stage, "Stage unbound");
                Ok(())
            }
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error),
        }
    }
}

fn find_by_name<'a>(apis: &'a [GatewaySummary], name: &str) -> Option<&'a GatewaySummary> {
    apis.iter().find(|api| api.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_display() {
        assert_eq!(GatewayGeneration::HttpApi.to_string(), "http");
        assert_eq!(GatewayGeneration::RestApi.to_string(), "rest");
    }

    #[test]
    fn test_find_by_name_is_exact() {
        let apis = vec![
            GatewaySummary {
                id: "a1".to_string(),
                name: "orders-staging".to_string(),
            },
            GatewaySummary {
                id: "a2".to_string(),
                name: "orders".to_string(),
            },
        ];
        assert_eq!(find_by_name(&apis, "orders").map(|a| a.id.as_str()), Some("a2"));
        assert!(find_by_name(&apis, "payments").is_none());
    }
}
