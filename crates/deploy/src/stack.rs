//! Declarative stack reconciliation.
//!
//! A deploy is: upload the template, compute a change set against the live
//! stack, execute it, and poll until the stack settles. Stacks stranded by a
//! failed first create are deleted and recreated rather than surfaced as an
//! operator chore, and a deploy whose template and parameters match the live
//! stack short-circuits without touching the control plane.

use backon::{ExponentialBuilder, Retryable};
use tempdir::TempDir;

use crate::artifact::ArtifactStore;
use crate::error::{DeployError, ResourceFailure, Result};
use crate::providers::{ChangeSetType, CreateChangeSetRequest, ObjectStore, Parameter, StackApi,
    StackDescription, Tag};
use crate::retry::{poll_until, Poll, PollConfig};

/// Reasons the control plane uses to report an empty change set. These exact
/// strings are part of its observable behavior; treat them as a wire format.
const NO_CHANGES_REASONS: [&str; 2] = [
    "The submitted information didn't contain changes. Submit different information to create a change set.",
    "No updates are to be performed.",
];

/// A stack template, either structured or pre-rendered.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum Template {
    Json(serde_json::Value),
    Raw(String),
}

impl Template {
    /// Rendered template body as uploaded to the deployment bucket.
    pub fn body(&self) -> Result<String> {
        match self {
            Template::Json(value) => serde_json::to_string_pretty(value)
                .map_err(|e| DeployError::validation(format!("template is not serializable: {e}"))),
            Template::Raw(body) => Ok(body.clone()),
        }
    }
}

/// Options for one stack deploy.
#[derive(Debug, Clone)]
pub struct StackOptions {
    pub stack_name: String,
    /// Service and version name the template artifact is filed under.
    pub service: String,
    pub version: String,
    pub parameters: Vec<Parameter>,
    pub tags: Vec<Tag>,
    /// Explicit change set name; generated when absent.
    pub change_set_name: Option<String>,
    /// Enable termination protection after a successful deploy.
    pub protect: bool,
    /// Skip the unchanged-template short-circuit and always drive a change
    /// set through the control plane.
    pub force: bool,
}

impl StackOptions {
    pub fn new(
        stack_name: impl Into<String>,
        service: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            stack_name: stack_name.into(),
            service: service.into(),
            version: version.into(),
            parameters: Vec::new(),
            tags: Vec::new(),
            change_set_name: None,
            protect: true,
            force: false,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_change_set_name(mut self, name: impl Into<String>) -> Self {
        self.change_set_name = Some(name.into());
        self
    }

    pub fn with_protect(mut self, protect: bool) -> Self {
        self.protect = protect;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// What a deploy did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Deployed(StackDescription),
    /// The live stack already matches the requested state.
    Skipped { reason: String },
}

/// Polling windows used by the reconciler. Tests tighten these.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerTimings {
    pub change_set: PollConfig,
    pub stack: PollConfig,
    pub delete: PollConfig,
}

impl Default for ReconcilerTimings {
    fn default() -> Self {
        Self {
            change_set: PollConfig::CHANGE_SET,
            stack: PollConfig::STACK,
            delete: PollConfig::STACK_DELETE,
        }
    }
}

/// What `stack_exists` concluded about the live stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackPresence {
    Present,
    Absent,
    /// Stranded by a failed first create; delete and recreate.
    NeedsDelete,
    Blocked,
}

fn presence_from_status(status: &str) -> StackPresence {
    match status {
        "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "UPDATE_ROLLBACK_COMPLETE"
        | "IMPORT_COMPLETE" | "IMPORT_ROLLBACK_COMPLETE" => StackPresence::Present,
        // A reviewed-but-never-executed stack has no resources; treat it as
        // absent and let the create change set replace it.
        "REVIEW_IN_PROGRESS" | "DELETE_COMPLETE" => StackPresence::Absent,
        "ROLLBACK_COMPLETE" => StackPresence::NeedsDelete,
        _ => StackPresence::Blocked,
    }
}

fn is_no_changes_reason(reason: &str) -> bool {
    NO_CHANGES_REASONS.iter().any(|known| reason.contains(known))
}

/// Whether the change set computation settled, and how.
enum ChangeSetOutcome {
    HasChanges,
    NoChanges(String),
}

/// Reconciles one declarative stack against the control plane.
#[derive(Debug, Clone)]
pub struct StackReconciler<C, S> {
    stacks: C,
    artifacts: ArtifactStore<S>,
    timings: ReconcilerTimings,
}

impl<C: StackApi, S: ObjectStore> StackReconciler<C, S> {
    pub fn new(stacks: C, artifacts: ArtifactStore<S>) -> Self {
        Self {
            stacks,
            artifacts,
            timings: ReconcilerTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: ReconcilerTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Drive the live stack to the requested template and parameters.
    pub async fn deploy_template(
        &self,
        template: &Template,
        options: &StackOptions,
    ) -> Result<DeployOutcome> {
        if options.stack_name.is_empty() {
            return Err(DeployError::validation("stack name must not be empty"));
        }
        let body = template.body()?;
        self.stacks.validate_template(&body).await?;
        let exists = self.stack_exists(&options.stack_name).await?;

        if exists && !options.force {
            if let Some(reason) = self.unchanged_reason(&body, options).await? {
                tracing::info!(stack = %options.stack_name, reason, "Skipping stack deploy");
                return Ok(DeployOutcome::Skipped { reason });
            }
        }

        let template_url = self.upload_template(&body, options).await?;
        let change_set_name = options
            .change_set_name
            .clone()
            .unwrap_or_else(generate_change_set_name);
        let change_set_type = if exists {
            ChangeSetType::Update
        } else {
            ChangeSetType::Create
        };

        tracing::info!(
            stack = %options.stack_name,
            change_set = %change_set_name,
            kind = %change_set_type,
            "Creating change set"
        );
        let request = CreateChangeSetRequest {
            stack_name: options.stack_name.clone(),
            change_set_name: change_set_name.clone(),
            change_set_type,
            template_url,
            parameters: options.parameters.clone(),
            tags: options.tags.clone(),
        };
        (|| async { self.stacks.create_change_set(request.clone()).await })
            .retry(ExponentialBuilder::default())
            .when(DeployError::is_transient)
            .await?;

        match self
            .wait_for_change_set(&options.stack_name, &change_set_name)
            .await?
        {
            ChangeSetOutcome::NoChanges(reason) => {
                // The empty change set lingers otherwise.
                if let Err(error) = self
                    .stacks
                    .delete_change_set(&options.stack_name, &change_set_name)
                    .await
                {
                    tracing::warn!(
                        stack = %options.stack_name,
                        change_set = %change_set_name,
                        error = %error,
                        "Failed to delete empty change set"
                    );
                }
                tracing::info!(stack = %options.stack_name, reason, "Skipping stack deploy");
                return Ok(DeployOutcome::Skipped { reason });
            }
            ChangeSetOutcome::HasChanges => {}
        }

        (|| async {
            self.stacks
                .execute_change_set(&options.stack_name, &change_set_name)
                .await
        })
        .retry(ExponentialBuilder::default())
        .when(DeployError::is_transient)
        .await?;

        let description = self.wait_for_stack(&options.stack_name).await?;

        if options.protect {
            // Protection failures never fail a deploy that already settled.
            if let Err(error) = self
                .stacks
                .update_termination_protection(&options.stack_name, true)
                .await
            {
                tracing::warn!(
                    stack = %options.stack_name,
                    error = %error,
                    "Failed to enable termination protection"
                );
            }
        }

        tracing::info!(
            stack = %options.stack_name,
            status = %description.status,
            "Stack deploy finished"
        );
        Ok(DeployOutcome::Deployed(description))
    }

    /// Whether the stack exists in a deployable state. A stack stranded in
    /// `ROLLBACK_COMPLETE` by a failed first create is deleted here and
    /// reported absent so the caller recreates it.
    pub async fn stack_exists(&self, stack_name: &str) -> Result<bool> {
        let description = match self.stacks.describe_stack(stack_name).await {
            Ok(description) => description,
            Err(error) if error.is_not_found() => return Ok(false),
            Err(error) => return Err(error),
        };

        match presence_from_status(&description.status) {
            StackPresence::Present => Ok(true),
            StackPresence::Absent => Ok(false),
            StackPresence::NeedsDelete => {
                tracing::warn!(
                    stack = %stack_name,
                    status = %description.status,
                    "Stack stranded by failed create, deleting before redeploy"
                );
                self.delete_stack_and_wait(stack_name).await?;
                Ok(false)
            }
            StackPresence::Blocked => Err(DeployError::StackBlocked {
                stack_name: stack_name.to_string(),
                status: description.status,
            }),
        }
    }

    /// Delete the stack and wait until it is gone. Absence is success.
    pub async fn delete_stack_and_wait(&self, stack_name: &str) -> Result<()> {
        // Protection has to come off first or the delete is rejected.
        if let Err(error) = self
            .stacks
            .update_termination_protection(stack_name, false)
            .await
        {
            if !error.is_not_found() {
                tracing::debug!(
                    stack = %stack_name,
                    error = %error,
                    "Could not disable termination protection before delete"
                );
            }
        }
        self.stacks.delete_stack(stack_name).await?;

        let stacks = &self.stacks;
        poll_until(
            &self.timings.delete,
            &format!("deletion of stack {stack_name}"),
            || async move {
                match stacks.describe_stack(stack_name).await {
                    Err(error) if error.is_not_found() => Ok(Poll::Ready(())),
                    Err(error) => Err(error),
                    Ok(description) => match description.status.as_str() {
                        "DELETE_COMPLETE" => Ok(Poll::Ready(())),
                        "DELETE_FAILED" => Err(DeployError::StackBlocked {
                            stack_name: stack_name.to_string(),
                            status: description.status,
                        }),
                        _ => Ok(Poll::Pending),
                    },
                }
            },
        )
        .await
    }

    /// None when the live template or parameters differ, Some(reason) when a
    /// deploy would be a no-op.
    async fn unchanged_reason(&self, body: &str, options: &StackOptions) -> Result<Option<String>> {
        let current_body = self.stacks.get_template(&options.stack_name).await?;
        if !templates_equal(&current_body, body) {
            return Ok(None);
        }
        let description = self.stacks.describe_stack(&options.stack_name).await?;
        if !parameters_equal(&description.parameters, &options.parameters) {
            return Ok(None);
        }
        Ok(Some("template and parameters unchanged".to_string()))
    }

    async fn upload_template(&self, body: &str, options: &StackOptions) -> Result<String> {
        let dir = TempDir::new("skylift-template").map_err(|source| DeployError::Io {
            path: "temporary template directory".to_string(),
            source,
        })?;
        let path = dir.path().join(format!("{}.template.json", options.stack_name));
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| DeployError::Io {
                path: path.display().to_string(),
                source,
            })?;

        let artifact = self
            .artifacts
            .put(
                &options.service,
                &options.version,
                &format!("{}.template.json", options.stack_name),
                &path,
            )
            .await?;
        Ok(self.artifacts.url(&artifact.key))
    }

    async fn wait_for_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<ChangeSetOutcome> {
        let stacks = &self.stacks;
        poll_until(
            &self.timings.change_set,
            &format!("change set {stack_name}/{change_set_name}"),
            || async move {
                let description = stacks.describe_change_set(stack_name, change_set_name).await?;
                match description.status.as_str() {
                    "CREATE_COMPLETE" => {
                        if description.change_count == 0 {
                            Ok(Poll::Ready(ChangeSetOutcome::NoChanges(
                                "change set is empty".to_string(),
                            )))
                        } else {
                            Ok(Poll::Ready(ChangeSetOutcome::HasChanges))
                        }
                    }
                    "FAILED" => {
                        let reason = description.status_reason.unwrap_or_default();
                        if is_no_changes_reason(&reason) {
                            Ok(Poll::Ready(ChangeSetOutcome::NoChanges(reason)))
                        } else {
                            Err(DeployError::ChangeSetFailed {
                                stack_name: stack_name.to_string(),
                                change_set_name: change_set_name.to_string(),
                                status: description.status,
                                reason,
                            })
                        }
                    }
                    "CREATE_PENDING" | "CREATE_IN_PROGRESS" => Ok(Poll::Pending),
                    other => Err(DeployError::ChangeSetFailed {
                        stack_name: stack_name.to_string(),
                        change_set_name: change_set_name.to_string(),
                        status: other.to_string(),
                        reason: description.status_reason.unwrap_or_default(),
                    }),
                }
            },
        )
        .await
    }

    async fn wait_for_stack(&self, stack_name: &str) -> Result<StackDescription> {
        let stacks = &self.stacks;
        let result = poll_until(
            &self.timings.stack,
            &format!("stack {stack_name}"),
            || async move {
                let description = stacks.describe_stack(stack_name).await?;
                let status = description.status.as_str();
                if status == "CREATE_COMPLETE" || status == "UPDATE_COMPLETE" {
                    return Ok(Poll::Ready(description));
                }
                if status.ends_with("_IN_PROGRESS") {
                    // Rollbacks keep this status until they settle; the
                    // terminal rollback status is caught below.
                    return Ok(Poll::Pending);
                }
                Err(DeployError::StackFailure {
                    stack_name: stack_name.to_string(),
                    status: description.status,
                    events: Vec::new(),
                })
            },
        )
        .await;

        match result {
            Ok(description) => Ok(description),
            Err(DeployError::StackFailure { stack_name, status, .. }) => {
                let events = self.failure_events(&stack_name).await;
                Err(DeployError::StackFailure {
                    stack_name,
                    status,
                    events,
                })
            }
            Err(error) => Err(error),
        }
    }

    /// Failed resources from recent stack events, newest first. Best-effort:
    /// an error here must not mask the deploy failure being reported.
    async fn failure_events(&self, stack_name: &str) -> Vec<ResourceFailure> {
        let events = match self.stacks.describe_stack_events(stack_name).await {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(stack = %stack_name, error = %error, "Could not fetch stack events");
                return Vec::new();
            }
        };
        events
            .into_iter()
            .filter(|event| {
                event.status.ends_with("FAILED") || event.status == "ROLLBACK_IN_PROGRESS"
            })
            .map(|event| ResourceFailure {
                logical_id: event.logical_id,
                physical_id: event.physical_id,
                reason: event.reason,
            })
            .collect()
    }
}

fn generate_change_set_name() -> String {
    let suffix = names::Generator::default()
        .next()
        .unwrap_or_else(|| "deploy".to_string());
    format!("skylift-{suffix}")
}

/// Templates compare structurally when both sides parse as JSON, textually
/// otherwise.
fn templates_equal(current: &str, desired: &str) -> bool {
    match (
        serde_json::from_str::<serde_json::Value>(current),
        serde_json::from_str::<serde_json::Value>(desired),
    ) {
        (Ok(current), Ok(desired)) => current == desired,
        _ => current.trim() == desired.trim(),
    }
}

fn parameters_equal(current: &[Parameter], desired: &[Parameter]) -> bool {
    let mut current = current.to_vec();
    let mut desired = desired.to_vec();
    current.sort();
    desired.sort();
    current == desired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_mapping() {
        assert_eq!(presence_from_status("CREATE_COMPLETE"), StackPresence::Present);
        assert_eq!(presence_from_status("UPDATE_ROLLBACK_COMPLETE"), StackPresence::Present);
        assert_eq!(presence_from_status("REVIEW_IN_PROGRESS"), StackPresence::Absent);
        assert_eq!(presence_from_status("ROLLBACK_COMPLETE"), StackPresence::NeedsDelete);
        assert_eq!(presence_from_status("UPDATE_IN_PROGRESS"), StackPresence::Blocked);
        assert_eq!(presence_from_status("DELETE_FAILED"), StackPresence::Blocked);
    }

    #[test]
    fn test_no_changes_reasons_match_verbatim_and_embedded() {
        assert!(is_no_changes_reason("No updates are to be performed."));
        assert!(is_no_changes_reason(
            "The submitted information didn't contain changes. \
             Submit different information to create a change set."
        ));
        assert!(!is_no_changes_reason("Parameter validation failed"));
    }

    #[test]
    fn test_templates_compare_structurally_when_json() {
        assert!(templates_equal(
            "{\"Resources\": {\"Fn\": {}}}",
            "{ \"Resources\" : { \"Fn\" : {} } }"
        ));
        assert!(!templates_equal(
            "{\"Resources\": {\"Fn\": {}}}",
            "{\"Resources\": {\"Other\": {}}}"
        ));
        // Non-JSON bodies fall back to a textual comparison.
        assert!(templates_equal("AWSTemplateFormatVersion: x\n", "AWSTemplateFormatVersion: x"));
    }

    #[test]
    fn test_parameters_compare_order_independent() {
        let live = vec![Parameter::new("b", "2"), Parameter::new("a", "1")];
        let desired = vec![Parameter::new("a", "1"), Parameter::new("b", "2")];
        assert!(parameters_equal(&live, &desired));
        assert!(!parameters_equal(&live, &[Parameter::new("a", "1")]));
    }

    #[test]
    fn test_generated_change_set_name_shape() {
        let name = generate_change_set_name();
        assert!(name.starts_with("skylift-"));
        assert!(name.len() > "skylift-".len());
    }
}
