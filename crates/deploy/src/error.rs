//! Error taxonomy for deployment operations.
//!
//! Every failure a caller may want to branch on gets its own kind: absence
//! (`NotFound`) is not a generic failure, conflicts can be swallowed where
//! semantically safe, transient describe failures are retried before they
//! escalate, and polling loops raise `Timeout` carrying the configured bound.

use std::time::Duration;

/// Result alias used throughout the deploy crate.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// A single failed resource extracted from stack events, used to surface the
/// root cause of a rollback without manually inspecting the provider console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    /// Logical resource id from the template.
    pub logical_id: String,
    /// Physical resource id assigned by the provider, when known.
    pub physical_id: Option<String>,
    /// Provider-supplied failure reason.
    pub reason: Option<String>,
}

impl std::fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.logical_id)?;
        if let Some(physical) = &self.physical_id {
            write!(f, " ({})", physical)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// Deployment error kinds.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A required option is missing or malformed. Raised before any network
    /// call is made.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The named resource does not exist. Callers branch on this to decide
    /// whether absence is expected (e.g. a gateway that was never
    /// provisioned during a function-only publish).
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// The operation conflicts with the current state of the resource
    /// (another change set is active, a version is still referenced, a
    /// bucket is owned by another party).
    #[error("conflict on {resource}: {reason}")]
    Conflict { resource: String, reason: String },

    /// A retryable infrastructure failure (throttling, connection reset).
    /// Consumed by the bounded retry budget inside polling loops.
    #[error("transient failure in {operation}: {reason}")]
    Transient { operation: String, reason: String },

    /// A polling loop exceeded its absolute deadline without observing a
    /// terminal state. Carries the configured bound.
    #[error("timed out after {bound:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: String,
        bound: Duration,
    },

    /// Change-set computation reached a terminal failure that is not one of
    /// the known "no changes" outcomes.
    #[error("change set {change_set_name} on stack {stack_name} failed ({status}): {reason}")]
    ChangeSetFailed {
        stack_name: String,
        change_set_name: String,
        status: String,
        reason: String,
    },

    /// The stack reached a failure or rollback status. Carries the failed
    /// resources harvested from recent stack events.
    #[error("stack {stack_name} reached {status} ({} failed resources)", events.len())]
    StackFailure {
        stack_name: String,
        status: String,
        events: Vec<ResourceFailure>,
    },

    /// The stack is in a state that prevents creation or update and cannot
    /// be self-healed.
    #[error("stack {stack_name} status {status} prevents creation or update")]
    StackBlocked { stack_name: String, status: String },

    /// Any other provider-side failure, preserving the provider error code
    /// and message for operator triage.
    #[error("{operation} failed: {message}")]
    Provider {
        operation: String,
        code: Option<String>,
        message: String,
    },

    /// Local I/O failure (temp template file, artifact read).
    #[error("i/o failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        DeployError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        DeployError::Conflict {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DeployError::Validation(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DeployError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DeployError::Conflict { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DeployError::Transient { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DeployError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_carries_bound() {
        let err = DeployError::Timeout {
            waiting_for: "stack svc-test".to_string(),
            bound: Duration::from_secs(3600),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("3600"));
        assert!(err.to_string().contains("svc-test"));
    }

    #[test]
    fn test_resource_failure_display() {
        let failure = ResourceFailure {
            logical_id: "ApiFunction".to_string(),
            physical_id: Some("svc-api".to_string()),
            reason: Some("CREATE_FAILED: role missing".to_string()),
        };
        assert_eq!(
            failure.to_string(),
            "ApiFunction (svc-api): CREATE_FAILED: role missing"
        );
    }

    #[test]
    fn test_kind_predicates() {
        assert!(DeployError::not_found("gateway svc").is_not_found());
        assert!(DeployError::conflict("alias pr-42", "in use").is_conflict());
        assert!(
            DeployError::Transient {
                operation: "describe_stack".to_string(),
                reason: "throttled".to_string(),
            }
            .is_transient()
        );
    }
}
