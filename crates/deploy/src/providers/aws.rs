//! Shared AWS client construction.

use aws_config::{BehaviorVersion, Region};

use crate::error::{DeployError, Result};
use crate::providers::functions::LambdaApi;
use crate::providers::gateways::AwsGatewayApi;
use crate::providers::stacks::CloudFormationApi;
use crate::providers::storage::S3ObjectStore;

/// All provider clients built from one shared credential and region
/// resolution pass.
#[derive(Debug, Clone)]
pub struct AwsClients {
    region: String,
    sts: aws_sdk_sts::Client,
    s3: aws_sdk_s3::Client,
    cloudformation: aws_sdk_cloudformation::Client,
    lambda: aws_sdk_lambda::Client,
    apigateway: aws_sdk_apigateway::Client,
    apigatewayv2: aws_sdk_apigatewayv2::Client,
}

impl AwsClients {
    pub async fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;
        Self {
            region,
            sts: aws_sdk_sts::Client::new(&config),
            s3: aws_sdk_s3::Client::new(&config),
            cloudformation: aws_sdk_cloudformation::Client::new(&config),
            lambda: aws_sdk_lambda::Client::new(&config),
            apigateway: aws_sdk_apigateway::Client::new(&config),
            apigatewayv2: aws_sdk_apigatewayv2::Client::new(&config),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// The account id of the resolved credentials.
    pub async fn account_id(&self) -> Result<String> {
        let identity = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| super::map_sdk_error("get_caller_identity", "caller identity", e))?;
        identity
            .account()
            .map(str::to_string)
            .ok_or_else(|| DeployError::validation("caller identity has no account id"))
    }

    pub fn object_store(&self) -> S3ObjectStore {
        S3ObjectStore::new(self.s3.clone(), self.region.clone())
    }

    pub fn stack_api(&self) -> CloudFormationApi {
        CloudFormationApi::new(self.cloudformation.clone())
    }

    pub fn function_api(&self) -> LambdaApi {
        LambdaApi::new(self.lambda.clone())
    }

    pub fn gateway_api(&self) -> AwsGatewayApi {
        AwsGatewayApi::new(self.apigatewayv2.clone(), self.apigateway.clone())
    }
}
