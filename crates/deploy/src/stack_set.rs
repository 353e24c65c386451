//! Multi-region stack-set reconciliation.
//!
//! Stack sets replicate one template across regions. Reconciling one means
//! creating or updating the set, then adding instances for any requested
//! region that does not have one yet. Both mutations are asynchronous
//! operations polled to completion.

use crate::artifact::ArtifactStore;
use crate::error::{DeployError, Result};
use crate::providers::{ObjectStore, Parameter, StackSetApi, Tag};
use crate::retry::{poll_until, Poll, PollConfig};
use crate::stack::Template;

/// Options for one stack-set deploy.
#[derive(Debug, Clone)]
pub struct StackSetOptions {
    pub stack_set_name: String,
    pub service: String,
    pub version: String,
    pub parameters: Vec<Parameter>,
    pub tags: Vec<Tag>,
    /// Regions that must carry an instance of the set.
    pub regions: Vec<String>,
}

/// What a stack-set deploy did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSetOutcome {
    /// False when the set was created fresh (creation applies the template,
    /// so no separate update runs).
    pub updated: bool,
    /// Regions that received a new instance.
    pub regions_added: Vec<String>,
}

/// Reconciles one stack set and its per-region instances.
#[derive(Debug, Clone)]
pub struct StackSetReconciler<C, S> {
    api: C,
    artifacts: ArtifactStore<S>,
    timings: PollConfig,
}

impl<C: StackSetApi, S: ObjectStore> StackSetReconciler<C, S> {
    pub fn new(api: C, artifacts: ArtifactStore<S>) -> Self {
        Self {
            api,
            artifacts,
            timings: PollConfig::STACK_SET,
        }
    }

    pub fn with_timings(mut self, timings: PollConfig) -> Self {
        self.timings = timings;
        self
    }

    pub async fn deploy_template(
        &self,
        template: &Template,
        options: &StackSetOptions,
        account_id: &str,
    ) -> Result<StackSetOutcome> {
        if options.regions.is_empty() {
            return Err(DeployError::validation(
                "stack set deploy requires at least one region",
            ));
        }

        let body = template.body()?;
        let artifact = self
            .artifacts
            .put_bytes(
                &options.service,
                &options.version,
                &format!("{}.template.json", options.stack_set_name),
                body.into_bytes(),
            )
            .await?;
        let template_url = self.artifacts.url(&artifact.key);

        let exists = self.api.stack_set_exists(&options.stack_set_name).await?;
        let updated = if exists {
            tracing::info!(stack_set = %options.stack_set_name, "Updating stack set");
            let operation_id = self
                .api
                .update_stack_set(
                    &options.stack_set_name,
                    &template_url,
                    &options.parameters,
                    &options.tags,
                )
                .await?;
            self.wait_for_operation(&options.stack_set_name, &operation_id)
                .await?;
            true
        } else {
            tracing::info!(stack_set = %options.stack_set_name, "Creating stack set");
            self.api
                .create_stack_set(
                    &options.stack_set_name,
                    &template_url,
                    &options.parameters,
                    &options.tags,
                )
                .await?;
            false
        };

        let existing_regions = self
            .api
            .list_instance_regions(&options.stack_set_name)
            .await?;
        let regions_added: Vec<String> = options
            .regions
            .iter()
            .filter(|region| !existing_regions.contains(region))
            .cloned()
            .collect();

        if !regions_added.is_empty() {
            tracing::info!(
                stack_set = %options.stack_set_name,
                regions = ?regions_added,
                "Adding stack instances"
            );
            let operation_id = self
                .api
                .create_stack_instances(&options.stack_set_name, account_id, &regions_added)
                .await?;
            self.wait_for_operation(&options.stack_set_name, &operation_id)
                .await?;
        }

        Ok(StackSetOutcome {
            updated,
            regions_added,
        })
    }

    async fn wait_for_operation(&self, stack_set_name: &str, operation_id: &str) -> Result<()> {
        let api = &self.api;
        poll_until(
            &self.timings,
            &format!("stack set operation {stack_set_name}/{operation_id}"),
            || async move {
                let status = api.describe_operation(stack_set_name, operation_id).await?;
                match status.as_str() {
                    "SUCCEEDED" => Ok(Poll::Ready(())),
                    "RUNNING" | "QUEUED" | "STOPPING" => Ok(Poll::Pending),
                    other => Err(DeployError::Provider {
                        operation: format!("stack set operation on {stack_set_name}"),
                        code: None,
                        message: format!("operation {operation_id} ended in {other}"),
                    }),
                }
            },
        )
        .await
    }
}
