//! Stack control-plane seam and its CloudFormation implementation.

use aws_sdk_cloudformation::types as cfn;

use crate::error::{DeployError, Result};
use crate::providers::map_sdk_error;

/// A template parameter key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A stack tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Whether the change set creates a new stack or updates an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ChangeSetType {
    Create,
    Update,
}

/// Current state of a stack as described by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub stack_id: String,
    pub stack_name: String,
    pub status: String,
    pub status_reason: Option<String>,
    pub parameters: Vec<Parameter>,
    pub outputs: Vec<StackOutput>,
}

/// A stack output key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
}

/// Current state of a change set computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetDescription {
    pub status: String,
    pub execution_status: Option<String>,
    pub status_reason: Option<String>,
    pub change_count: usize,
}

/// One stack event, used to harvest failure reasons on rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEvent {
    pub logical_id: String,
    pub physical_id: Option<String>,
    pub status: String,
    pub reason: Option<String>,
}

/// Request to create a change set against a stack.
#[derive(Debug, Clone)]
pub struct CreateChangeSetRequest {
    pub stack_name: String,
    pub change_set_name: String,
    pub change_set_type: ChangeSetType,
    pub template_url: String,
    pub parameters: Vec<Parameter>,
    pub tags: Vec<Tag>,
}

/// Control-plane surface for the declarative stack system.
pub trait StackApi: Send + Sync {
    /// Describe the stack. Absence surfaces as a `NotFound` error.
    fn describe_stack(&self, stack_name: &str) -> impl Future<Output = Result<StackDescription>> + Send;

    /// The currently-applied template body.
    fn get_template(&self, stack_name: &str) -> impl Future<Output = Result<String>> + Send;

    /// Ask the provider to validate a template body before anything is
    /// created from it.
    fn validate_template(&self, template_body: &str) -> impl Future<Output = Result<()>> + Send;

    fn create_change_set(&self, request: CreateChangeSetRequest) -> impl Future<Output = Result<()>> + Send;

    fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> impl Future<Output = Result<ChangeSetDescription>> + Send;

    fn execute_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_stack(&self, stack_name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Most recent stack events, newest first.
    fn describe_stack_events(&self, stack_name: &str) -> impl Future<Output = Result<Vec<StackEvent>>> + Send;

    fn update_termination_protection(
        &self,
        stack_name: &str,
        enabled: bool,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Control-plane surface for multi-region stack sets.
pub trait StackSetApi: Send + Sync {
    /// Returns true when the stack set exists.
    fn stack_set_exists(&self, stack_set_name: &str) -> impl Future<Output = Result<bool>> + Send;

    fn create_stack_set(
        &self,
        stack_set_name: &str,
        template_url: &str,
        parameters: &[Parameter],
        tags: &[Tag],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Returns the operation id to poll.
    fn update_stack_set(
        &self,
        stack_set_name: &str,
        template_url: &str,
        parameters: &[Parameter],
        tags: &[Tag],
    ) -> impl Future<Output = Result<String>> + Send;

    /// Regions that currently have a stack instance.
    fn list_instance_regions(&self, stack_set_name: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Create instances in the given regions for the given account; returns
    /// the operation id to poll.
    fn create_stack_instances(
        &self,
        stack_set_name: &str,
        account_id: &str,
        regions: &[String],
    ) -> impl Future<Output = Result<String>> + Send;

    /// Status of a stack-set operation (RUNNING, SUCCEEDED, FAILED, ...).
    fn describe_operation(
        &self,
        stack_set_name: &str,
        operation_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// CloudFormation-backed stack control plane.
#[derive(Debug, Clone)]
pub struct CloudFormationApi {
    client: aws_sdk_cloudformation::Client,
}

impl CloudFormationApi {
    pub fn new(client: aws_sdk_cloudformation::Client) -> Self {
        Self { client }
    }

    fn convert_parameters(parameters: &[Parameter]) -> Vec<cfn::Parameter> {
        parameters
            .iter()
            .map(|p| {
                cfn::Parameter::builder()
                    .parameter_key(&p.key)
                    .parameter_value(&p.value)
                    .build()
            })
            .collect()
    }

    fn convert_tags(tags: &[Tag]) -> Result<Vec<cfn::Tag>> {
        tags.iter()
            .map(|t| {
                Ok(cfn::Tag::builder()
                    .key(&t.key)
                    .value(&t.value)
                    .build())
            })
            .collect()
    }
}

impl StackApi for CloudFormationApi {
    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription> {
        let output = self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| map_sdk_error("describe_stack", &format!("stack {stack_name}"), e))?;

        let stack = output
            .stacks()
            .first()
            .ok_or_else(|| DeployError::not_found(format!("stack {stack_name}")))?;

        Ok(StackDescription {
            stack_id: stack.stack_id().unwrap_or_default().to_string(),
            stack_name: stack.stack_name().unwrap_or(stack_name).to_string(),
            status: stack
                .stack_status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            status_reason: stack.stack_status_reason().map(str::to_string),
            parameters: stack
                .parameters()
                .iter()
                .map(|p| Parameter {
                    key: p.parameter_key().unwrap_or_default().to_string(),
                    value: p.parameter_value().unwrap_or_default().to_string(),
                })
                .collect(),
            outputs: stack
                .outputs()
                .iter()
                .map(|o| StackOutput {
                    key: o.output_key().unwrap_or_default().to_string(),
                    value: o.output_value().unwrap_or_default().to_string(),
                })
                .collect(),
        })
    }

    async fn get_template(&self, stack_name: &str) -> Result<String> {
        let output = self
            .client
            .get_template()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| map_sdk_error("get_template", &format!("stack {stack_name}"), e))?;
        Ok(output.template_body().unwrap_or_default().to_string())
    }

    async fn validate_template(&self, template_body: &str) -> Result<()> {
        self.client
            .validate_template()
            .template_body(template_body)
            .send()
            .await
            .map_err(|e| map_sdk_error("validate_template", "template", e))?;
        Ok(())
    }

    async fn create_change_set(&self, request: CreateChangeSetRequest) -> Result<()> {
        let change_set_type = match request.change_set_type {
            ChangeSetType::Create => cfn::ChangeSetType::Create,
            ChangeSetType::Update => cfn::ChangeSetType::Update,
        };

        self.client
            .create_change_set()
            .stack_name(&request.stack_name)
            .change_set_name(&request.change_set_name)
            .change_set_type(change_set_type)
            .template_url(&request.template_url)
            .set_parameters(Some(Self::convert_parameters(&request.parameters)))
            .set_tags(Some(Self::convert_tags(&request.tags)?))
            .capabilities(cfn::Capability::CapabilityIam)
            .capabilities(cfn::Capability::CapabilityNamedIam)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("create_change_set", &format!("stack {}", request.stack_name), e)
            })?;
        Ok(())
    }

    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<ChangeSetDescription> {
        let output = self
            .client
            .describe_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    "describe_change_set",
                    &format!("change set {stack_name}/{change_set_name}"),
                    e,
                )
            })?;

        Ok(ChangeSetDescription {
            status: output
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            execution_status: output.execution_status().map(|s| s.as_str().to_string()),
            status_reason: output.status_reason().map(str::to_string),
            change_count: output.changes().len(),
        })
    }

    async fn execute_change_set(&self, stack_name: &str, change_set_name: &str) -> Result<()> {
        self.client
            .execute_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    "execute_change_set",
                    &format!("change set {stack_name}/{change_set_name}"),
                    e,
                )
            })?;
        Ok(())
    }

    async fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> Result<()> {
        self.client
            .delete_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    "delete_change_set",
                    &format!("change set {stack_name}/{change_set_name}"),
                    e,
                )
            })?;
        Ok(())
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<()> {
        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| map_sdk_error("delete_stack", &format!("stack {stack_name}"), e))?;
        Ok(())
    }

    async fn describe_stack_events(&self, stack_name: &str) -> Result<Vec<StackEvent>> {
        let output = self
            .client
            .describe_stack_events()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("describe_stack_events", &format!("stack {stack_name}"), e)
            })?;

        Ok(output
            .stack_events()
            .iter()
            .map(|event| StackEvent {
                logical_id: event.logical_resource_id().unwrap_or_default().to_string(),
                physical_id: event.physical_resource_id().map(str::to_string),
                status: event
                    .resource_status()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                reason: event.resource_status_reason().map(str::to_string),
            })
            .collect())
    }

    async fn update_termination_protection(&self, stack_name: &str, enabled: bool) -> Result<()> {
        self.client
            .update_termination_protection()
            .stack_name(stack_name)
            .enable_termination_protection(enabled)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    "update_termination_protection",
                    &format!("stack {stack_name}"),
                    e,
                )
            })?;
        Ok(())
    }
}

impl StackSetApi for CloudFormationApi {
    async fn stack_set_exists(&self, stack_set_name: &str) -> Result<bool> {
        match self
            .client
            .describe_stack_set()
            .stack_set_name(stack_set_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(error) => {
                let mapped = map_sdk_error(
                    "describe_stack_set",
                    &format!("stack set {stack_set_name}"),
                    error,
                );
                if mapped.is_not_found() {
                    Ok(false)
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn create_stack_set(
        &self,
        stack_set_name: &str,
        template_url: &str,
        parameters: &[Parameter],
        tags: &[Tag],
    ) -> Result<()> {
        self.client
            .create_stack_set()
            .stack_set_name(stack_set_name)
            .template_url(template_url)
            .set_parameters(Some(Self::convert_parameters(parameters)))
            .set_tags(Some(Self::convert_tags(tags)?))
            .capabilities(cfn::Capability::CapabilityIam)
            .capabilities(cfn::Capability::CapabilityNamedIam)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("create_stack_set", &format!("stack set {stack_set_name}"), e)
            })?;
        Ok(())
    }

    async fn update_stack_set(
        &self,
        stack_set_name: &str,
        template_url: &str,
        parameters: &[Parameter],
        tags: &[Tag],
    ) -> Result<String> {
        let output = self
            .client
            .update_stack_set()
            .stack_set_name(stack_set_name)
            .template_url(template_url)
            .set_parameters(Some(Self::convert_parameters(parameters)))
            .set_tags(Some(Self::convert_tags(tags)?))
            .capabilities(cfn::Capability::CapabilityIam)
            .capabilities(cfn::Capability::CapabilityNamedIam)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error("update_stack_set", &format!("stack set {stack_set_name}"), e)
            })?;
        Ok(output.operation_id().unwrap_or_default().to_string())
    }

    async fn list_instance_regions(&self, stack_set_name: &str) -> Result<Vec<String>> {
        let mut regions = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_stack_instances()
                .stack_set_name(stack_set_name);
            if let Some(token) = next_token {
                request = request.next_token(token);
            }
            let page = request.send().await.map_err(|e| {
                map_sdk_error("list_stack_instances", &format!("stack set {stack_set_name}"), e)
            })?;
            regions.extend(
                page.summaries()
                    .iter()
                    .filter_map(|summary| summary.region().map(str::to_string)),
            );
            match page.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        regions.sort();
        regions.dedup();
        Ok(regions)
    }

    async fn create_stack_instances(
        &self,
        stack_set_name: &str,
        account_id: &str,
        regions: &[String],
    ) -> Result<String> {
        let output = self
            .client
            .create_stack_instances()
            .stack_set_name(stack_set_name)
            .accounts(account_id)
            .set_regions(Some(regions.to_vec()))
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    "create_stack_instances",
                    &format!("stack set {stack_set_name}"),
                    e,
                )
            })?;
        Ok(output.operation_id().unwrap_or_default().to_string())
    }

    async fn describe_operation(
        &self,
        stack_set_name: &str,
        operation_id: &str,
    ) -> Result<String> {
        let output = self
            .client
            .describe_stack_set_operation()
            .stack_set_name(stack_set_name)
            .operation_id(operation_id)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    "describe_stack_set_operation",
                    &format!("stack set operation {stack_set_name}/{operation_id}"),
                    e,
                )
            })?;
        Ok(output
            .stack_set_operation()
            .and_then(|op| op.status())
            .map(|s| s.as_str().to_string())
            .unwrap_or_default())
    }
}
