use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "skylift")]
#[command(
    author,
    version,
    about = "Deploy serverless services: function versions, gateway stages and infrastructure stacks"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "SKYLIFT_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to the service configuration file, or a directory containing
    /// Skylift.toml.
    #[arg(short, long, env = "SKYLIFT_CONFIG", default_value = ".", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish a code package and expose it on a stage.
    Deploy {
        /// Stage to deploy (a branch or pull-request name).
        #[arg(short, long, env = "SKYLIFT_STAGE")]
        stage: String,

        /// Path to the zipped code package.
        #[arg(short, long)]
        package: PathBuf,

        /// Deploy the function only, without requiring a gateway.
        #[arg(long)]
        no_routing: bool,
    },

    /// Reconcile an infrastructure stack against a template.
    Stack {
        /// Name of the stack.
        #[arg(short = 'n', long)]
        stack_name: String,

        /// Path to the template file.
        #[arg(short, long)]
        template: PathBuf,

        /// Template parameters as KEY=VALUE pairs.
        #[arg(short = 'P', long = "parameter", value_parser = parse_key_val)]
        parameters: Vec<(String, String)>,

        /// Stack tags as KEY=VALUE pairs.
        #[arg(short = 'T', long = "tag", value_parser = parse_key_val)]
        tags: Vec<(String, String)>,

        /// Label the uploaded template is filed under in the deployment
        /// bucket.
        #[arg(long, default_value = "infra")]
        label: String,

        /// Deploy even when the live template and parameters are unchanged.
        #[arg(long)]
        force: bool,

        /// Leave termination protection off after the deploy.
        #[arg(long)]
        no_protect: bool,
    },

    /// Reconcile a multi-region stack set against a template.
    StackSet {
        /// Name of the stack set.
        #[arg(short = 'n', long)]
        stack_set_name: String,

        /// Path to the template file.
        #[arg(short, long)]
        template: PathBuf,

        /// Template parameters as KEY=VALUE pairs.
        #[arg(short = 'P', long = "parameter", value_parser = parse_key_val)]
        parameters: Vec<(String, String)>,

        /// Stack tags as KEY=VALUE pairs.
        #[arg(short = 'T', long = "tag", value_parser = parse_key_val)]
        tags: Vec<(String, String)>,

        /// Regions that must carry an instance of the set.
        #[arg(short, long, required = true)]
        regions: Vec<String>,

        /// Label the uploaded template is filed under in the deployment
        /// bucket.
        #[arg(long, default_value = "infra")]
        label: String,
    },

    /// Tear a stage down: gateway stage, alias, version and artifacts.
    Remove {
        /// Stage to remove.
        #[arg(short, long, env = "SKYLIFT_STAGE")]
        stage: String,
    },

    /// Point a target stage at the exact version a source stage runs.
    Promote {
        /// Stage to promote from.
        #[arg(short, long)]
        source: String,

        /// Stage to promote to.
        #[arg(short, long, default_value = "production")]
        target: String,
    },

    /// Prune old unpinned function versions.
    Cleanup {
        /// Print the plan without deleting anything.
        #[arg(long)]
        dry_run: bool,

        /// Detach non-production stage aliases first so the versions they pin
        /// become collectable.
        #[arg(long)]
        force_remove_aliases: bool,
    },

    /// Probe a stage URL for reachability.
    Health {
        /// URL to probe.
        url: url::Url,
    },
}

/// Parse a KEY=VALUE argument.
fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {raw}"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("Stage=pr-42"),
            Ok(("Stage".to_string(), "pr-42".to_string()))
        );
        assert_eq!(
            parse_key_val("Url=https://a.test/?x=1"),
            Ok(("Url".to_string(), "https://a.test/?x=1".to_string()))
        );
        assert!(parse_key_val("no-equals").is_err());
        assert!(parse_key_val("=value").is_err());
    }

    #[test]
    fn test_cli_parses_deploy() {
        let cli = Cli::try_parse_from([
            "skylift", "deploy", "--stage", "pr-42", "--package", "dist/package.zip",
        ])
        .expect("deploy should parse");
        match cli.command {
            Commands::Deploy { stage, no_routing, .. } => {
                assert_eq!(stage, "pr-42");
                assert!(!no_routing);
            }
            _ => panic!("expected deploy command"),
        }
    }
}
