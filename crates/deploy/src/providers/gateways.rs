//! Routing gateway seam over both gateway generations.

use crate::error::Result;
use crate::providers::map_sdk_error;

/// One gateway visible in the account, either generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySummary {
    pub id: String,
    pub name: String,
}

/// Stage configuration relevant to binding decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageInfo {
    /// Auto-deploy stages pick up route changes without an explicit
    /// deployment, so binding them is a no-op.
    pub auto_deploy: bool,
}

/// Gateway surface consumed by the gateway manager.
///
/// The two generations have different stage models, so the seam exposes them
/// separately and the manager dispatches on the resolved generation.
pub trait GatewayApi: Send + Sync {
    fn list_http_apis(&self) -> impl Future<Output = Result<Vec<GatewaySummary>>> + Send;

    fn list_rest_apis(&self) -> impl Future<Output = Result<Vec<GatewaySummary>>> + Send;

    /// Stage configuration for a current-generation gateway. Absence surfaces
    /// as a `NotFound` error.
    fn get_http_stage(
        &self,
        api_id: &str,
        stage_name: &str,
    ) -> impl Future<Output = Result<StageInfo>> + Send;

    fn create_http_stage(
        &self,
        api_id: &str,
        stage_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn create_http_deployment(
        &self,
        api_id: &str,
        stage_name: &str,
        description: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Deploy a legacy gateway to a stage, recording the stage name in the
    /// `lambdaVersion` stage variable so integrations can target the matching
    /// function alias.
    fn create_rest_deployment(
        &self,
        api_id: &str,
        stage_name: &str,
        description: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn delete_http_stage(
        &self,
        api_id: &str,
        stage_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_rest_stage(
        &self,
        api_id: &str,
        stage_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// API Gateway implementation wrapping both generation clients.
#[derive(Debug, Clone)]
pub struct AwsGatewayApi {
    http: aws_sdk_apigatewayv2::Client,
    rest: aws_sdk_apigateway::Client,
}

impl AwsGatewayApi {
    pub fn new(http: aws_sdk_apigatewayv2::Client, rest: aws_sdk_apigateway::Client) -> Self {
        Self { http, rest }
    }
}

impl GatewayApi for AwsGatewayApi {
    async fn list_http_apis(&self) -> Result<Vec<GatewaySummary>> {
        let mut apis = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut request = self.http.get_apis().max_results("100".to_string());
            if let Some(token) = next_token {
                request = request.next_token(token);
            }
            let page = request
                .send()
                .await
                .map_err(|e| map_sdk_error("list_http_apis", "http gateways", e))?;
            apis.extend(page.items().iter().map(|api| GatewaySummary {
                id: api.api_id().unwrap_or_default().to_string(),
                name: api.name().unwrap_or_default().to_string(),
            }));
            match page.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(apis)
    }

    async fn list_rest_apis(&self) -> Result<Vec<GatewaySummary>> {
        let mut apis = Vec::new();
        let mut position: Option<String> = None;
        loop {
            let mut request = self.rest.get_rest_apis().limit(100);
            if let Some(token) = position {
                request = request.position(token);
            }
            let page = request
                .send()
                .await
                .map_err(|e| map_sdk_error("list_rest_apis", "rest gateways", e))?;
            apis.extend(page.items().iter().map(|api| GatewaySummary {
                id: api.id().unwrap_or_default().to_string(),
                name: api.name().unwrap_or_default().to_string(),
            }));
            match page.position() {
                Some(token) => position = Some(token.to_string()),
                None => break,
            }
        }
        Ok(apis)
    }

    async fn get_http_stage(&self, api_id: &str, stage_name: &str) -> Result<StageInfo> {
        let output = self
            .http
            .get_stage()
            .api_id(api_id)
            .stage_name(stage_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("get_http_stage", &format!("stage {stage_name} on {api_id}"), e)
            })?;
        Ok(StageInfo {
            auto_deploy: output.auto_deploy().unwrap_or(false),
        })
    }

    async fn create_http_stage(&self, api_id: &str, stage_name: &str) -> Result<()> {
        self.http
            .create_stage()
            .api_id(api_id)
            .stage_name(stage_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("create_http_stage", &format!("stage {stage_name} on {api_id}"), e)
            })?;
        Ok(())
    }

    async fn create_http_deployment(
        &self,
        api_id: &str,
        stage_name: &str,
        description: &str,
    ) -> Result<String> {
        let output = self
            .http
            .create_deployment()
            .api_id(api_id)
            .stage_name(stage_name)
            .description(description)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    "create_http_deployment",
                    &format!("stage {stage_name} on {api_id}"),
                    e,
                )
            })?;
        Ok(output.deployment_id().unwrap_or_default().to_string())
    }

    async fn create_rest_deployment(
        &self,
        api_id: &str,
        stage_name: &str,
        description: &str,
    ) -> Result<String> {
        let output = self
            .rest
            .create_deployment()
            .rest_api_id(api_id)
            .stage_name(stage_name)
            .description(description)
            .variables("lambdaVersion", stage_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    "create_rest_deployment",
                    &format!("stage {stage_name} on {api_id}"),
                    e,
                )
            })?;
        Ok(output.id().unwrap_or_default().to_string())
    }

    async fn delete_http_stage(&self, api_id: &str, stage_name: &str) -> Result<()> {
        self.http
            .delete_stage()
            .api_id(api_id)
            .stage_name(stage_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("delete_http_stage", &format!("stage {stage_name} on {api_id}"), e)
            })?;
        Ok(())
    }

    async fn delete_rest_stage(&self, api_id: &str, stage_name: &str) -> Result<()> {
        self.rest
            .delete_stage()
            .rest_api_id(api_id)
            .stage_name(stage_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("delete_rest_stage", &format!("stage {stage_name} on {api_id}"), e)
            })?;
        Ok(())
    }
}
