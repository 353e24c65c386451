//! Control-plane seams.
//!
//! Each external collaborator (object storage, stack control plane, function
//! hosting, routing gateway) is modeled as a trait over plain request and
//! response types owned by this crate. Production implementations adapt the
//! AWS SDK clients; tests provide in-memory fakes. Provider error codes are
//! classified into [`DeployError`] kinds at this seam so callers branch on
//! kinds, never on provider strings.

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};

use crate::error::DeployError;

mod aws;
pub mod functions;
pub mod gateways;
pub mod stacks;
pub mod storage;

pub use aws::AwsClients;
pub use functions::{AliasInfo, ArtifactRef, FunctionApi, FunctionVersion, LambdaApi,
    PermissionRequest, PublishedVersion};
pub use gateways::{AwsGatewayApi, GatewayApi, GatewaySummary, StageInfo};
pub use stacks::{ChangeSetDescription, ChangeSetType, CloudFormationApi, CreateChangeSetRequest,
    Parameter, StackApi, StackDescription, StackEvent, StackOutput, StackSetApi, Tag};
pub use storage::{ObjectStore, S3ObjectStore};

/// Map a raw SDK error into the deployment error taxonomy.
///
/// Network-level failures (dispatch, timeout, malformed response) are
/// transient; service errors are classified by provider error code, with the
/// code and message preserved for triage when no kind applies.
pub(crate) fn map_sdk_error<E>(
    operation: &str,
    resource: &str,
    error: SdkError<E>,
) -> DeployError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            return DeployError::Transient {
                operation: operation.to_string(),
                reason: error.to_string(),
            };
        }
        _ => {}
    }

    let code = error.code().map(str::to_string);
    let message = error
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());

    classify_provider_error(operation, resource, code, message)
}

fn classify_provider_error(
    operation: &str,
    resource: &str,
    code: Option<String>,
    message: String,
) -> DeployError {
    match code.as_deref() {
        Some(
            "ResourceNotFoundException" | "NotFoundException" | "NoSuchBucket" | "NoSuchKey"
            | "ChangeSetNotFound" | "StackSetNotFoundException",
        ) => DeployError::not_found(resource),
        // CloudFormation reports a missing stack as a ValidationError with a
        // "does not exist" message rather than a structured not-found code.
        Some("ValidationError") if message.contains("does not exist") => {
            DeployError::not_found(resource)
        }
        Some(
            "ResourceConflictException" | "ConflictException" | "BucketAlreadyExists"
            | "AlreadyExistsException" | "OperationInProgressException"
            | "ResourceInUseException",
        ) => DeployError::conflict(resource, message),
        Some(
            "TooManyRequestsException" | "Throttling" | "ThrottlingException"
            | "RequestLimitExceeded" | "ServiceUnavailable" | "ServiceUnavailableException"
            | "RequestTimeout" | "InternalFailure" | "InternalServerErrorException",
        ) => DeployError::Transient {
            operation: operation.to_string(),
            reason: message,
        },
        _ => DeployError::Provider {
            operation: operation.to_string(),
            code,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_stack_validation_error_is_not_found() {
        let error = classify_provider_error(
            "describe_stack",
            "stack svc-test",
            Some("ValidationError".to_string()),
            "Stack with id svc-test does not exist".to_string(),
        );
        assert!(error.is_not_found());
    }

    #[test]
    fn test_other_validation_error_is_provider() {
        let error = classify_provider_error(
            "create_change_set",
            "stack svc-test",
            Some("ValidationError".to_string()),
            "Template format error".to_string(),
        );
        assert!(matches!(error, DeployError::Provider { .. }));
    }

    #[test]
    fn test_throttling_is_transient() {
        let error = classify_provider_error(
            "describe_change_set",
            "change set skylift-1",
            Some("ThrottlingException".to_string()),
            "Rate exceeded".to_string(),
        );
        assert!(error.is_transient());
    }

    #[test]
    fn test_still_referenced_delete_is_conflict() {
        let error = classify_provider_error(
            "delete_version",
            "version 3 of svc-fn",
            Some("ResourceConflictException".to_string()),
            "version is referenced by an alias".to_string(),
        );
        assert!(error.is_conflict());
    }
}
