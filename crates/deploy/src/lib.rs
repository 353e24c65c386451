//! Deployment engine for serverless services.
//!
//! Reconciles three kinds of state against a cloud provider: immutable
//! function versions addressed by stage aliases, gateway stages routing to
//! those aliases, and declarative infrastructure stacks driven through change
//! sets. Every mutation is idempotent and every wait is deadline-bounded, so
//! a deploy can be re-run after any failure.

pub mod artifact;
pub mod config;
pub mod error;
pub mod function;
pub mod gateway;
pub mod health;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod stack;
pub mod stack_set;

pub use artifact::ArtifactStore;
pub use config::{ServiceConfig, SKYCONF_FILENAME};
pub use error::{DeployError, ResourceFailure, Result};
pub use function::{CleanupReport, FunctionVersionManager, VersionDisposition};
pub use gateway::{GatewayGeneration, GatewayManager, GatewayRef, StageBinding};
pub use health::{HealthProbe, StageHealth};
pub use orchestrator::{ServiceDeployer, StageDeployRequest, StageDeployment};
pub use providers::AwsClients;
pub use retry::{Poll, PollConfig};
pub use stack::{DeployOutcome, ReconcilerTimings, StackOptions, StackReconciler, Template};
pub use stack_set::{StackSetOptions, StackSetOutcome, StackSetReconciler};
