//! skylift is a CLI tool to deploy serverless services stage by stage.

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use skylift_deploy::{
    ArtifactStore, AwsClients, DeployOutcome, FunctionVersionManager, GatewayManager,
    HealthProbe, ServiceConfig, ServiceDeployer, StackOptions, StackReconciler,
    StackSetOptions, StackSetReconciler, StageDeployRequest, Template,
};
use skylift_deploy::providers::{
    AwsGatewayApi, CloudFormationApi, LambdaApi, Parameter, S3ObjectStore, Tag,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = ServiceConfig::load_from_file(&cli.config)
        .context("Failed to load service configuration")?;
    tracing::info!(
        service = %config.service_name,
        region = %config.region,
        "Loaded service configuration"
    );
    let clients = AwsClients::new(config.region.clone()).await;

    match cli.command {
        Commands::Deploy {
            stage,
            package,
            no_routing,
        } => {
            let deployer = build_deployer(&config, &clients).await?;
            let deployment = deployer
                .publish_and_deploy_stage(&StageDeployRequest {
                    stage,
                    code_package: package,
                    routing: !no_routing,
                })
                .await?;
            println!(
                "Deployed {} version {} to stage {}",
                config.service_name, deployment.version, deployment.stage
            );
            if let Some(url) = &deployment.service_url {
                println!("Service URL: {url}");
            }
        }

        Commands::Stack {
            stack_name,
            template,
            parameters,
            tags,
            label,
            force,
            no_protect,
        } => {
            let template = load_template(&template)?;
            let deployer = build_deployer(&config, &clients).await?;

            let options = StackOptions::new(stack_name, &config.service_name, &label)
                .with_parameters(to_parameters(parameters))
                .with_tags(to_tags(tags))
                .with_protect(!no_protect)
                .with_force(force);
            match deployer.deploy_template(&template, &options).await? {
                DeployOutcome::Deployed(description) => {
                    println!(
                        "Stack {} is {}",
                        description.stack_name, description.status
                    );
                    for output in &description.outputs {
                        println!("  {} = {}", output.key, output.value);
                    }
                }
                DeployOutcome::Skipped { reason } => {
                    println!("Stack unchanged, skipped: {reason}");
                }
            }
        }

        Commands::StackSet {
            stack_set_name,
            template,
            parameters,
            tags,
            regions,
            label,
        } => {
            let template = load_template(&template)?;
            let artifacts = ArtifactStore::new(clients.object_store(), &config.deployment_bucket);
            artifacts.ensure_bucket().await?;
            let account_id = clients.account_id().await?;
            let reconciler = StackSetReconciler::new(clients.stack_api(), artifacts);

            let options = StackSetOptions {
                stack_set_name,
                service: config.service_name.clone(),
                version: label,
                parameters: to_parameters(parameters),
                tags: to_tags(tags),
                regions,
            };
            let outcome = reconciler
                .deploy_template(&template, &options, &account_id)
                .await?;
            if outcome.regions_added.is_empty() {
                println!("Stack set {} reconciled", options.stack_set_name);
            } else {
                println!(
                    "Stack set {} reconciled, new regions: {}",
                    options.stack_set_name,
                    outcome.regions_added.join(", ")
                );
            }
        }

        Commands::Remove { stage } => {
            let deployer = build_deployer(&config, &clients).await?;
            deployer.remove_stage(&stage).await?;
            println!("Removed stage {stage}");
        }

        Commands::Promote { source, target } => {
            let deployer = build_deployer(&config, &clients).await?;
            let deployment = deployer.promote_to_stage(&source, &target).await?;
            println!(
                "Promoted {source} to {target} (version {})",
                deployment.version
            );
            if let Some(url) = &deployment.service_url {
                println!("Service URL: {url}");
            }
        }

        Commands::Cleanup {
            dry_run,
            force_remove_aliases,
        } => {
            let deployer = build_deployer(&config, &clients).await?;
            let report = deployer.cleanup(force_remove_aliases, dry_run).await?;
            println!("{}", report.table());
            if report.dry_run {
                println!(
                    "Dry run: {} version(s) would be deleted. Re-run without --dry-run to delete.",
                    report.deleted.len()
                );
            } else {
                println!("Deleted {} version(s)", report.deleted.len());
            }
        }

        Commands::Health { url } => {
            let probe = HealthProbe::new()?;
            let health = probe.probe_stage(&url).await;
            println!("{health}");
            if !health.reachable {
                anyhow::bail!("stage is unreachable");
            }
        }
    }

    Ok(())
}

async fn build_deployer(
    config: &ServiceConfig,
    clients: &AwsClients,
) -> Result<ServiceDeployer<LambdaApi, AwsGatewayApi, CloudFormationApi, S3ObjectStore>> {
    let account_id = clients
        .account_id()
        .await
        .context("Failed to resolve the caller account")?;
    let artifacts = ArtifactStore::new(clients.object_store(), config.deployment_bucket.clone());
    Ok(ServiceDeployer::new(
        config.clone(),
        account_id,
        FunctionVersionManager::new(
            clients.function_api(),
            config.function_name(),
            config.protected_stage.clone(),
        ),
        GatewayManager::new(clients.gateway_api()),
        StackReconciler::new(clients.stack_api(), artifacts.clone()),
        artifacts,
    ))
}

/// Read a template file; JSON bodies are compared structurally, anything
/// else is uploaded as-is.
fn load_template(path: &Path) -> Result<Template> {
    let body = std::fs::read_to_string(path)
        .context(format!("Failed to read template from {}", path.display()))?;
    match serde_json::from_str(&body) {
        Ok(value) => Ok(Template::Json(value)),
        Err(_) => Ok(Template::Raw(body)),
    }
}

fn to_parameters(pairs: Vec<(String, String)>) -> Vec<Parameter> {
    pairs
        .into_iter()
        .map(|(key, value)| Parameter::new(key, value))
        .collect()
}

fn to_tags(pairs: Vec<(String, String)>) -> Vec<Tag> {
    pairs
        .into_iter()
        .map(|(key, value)| Tag::new(key, value))
        .collect()
}
