use anyhow::Result;
use clap::{Parser, Subcommand};
use cloudflow::app::init_logging;
use cloudflow::compute::DryRunClient;
use cloudflow::config::EngineConfig;
use cloudflow::workflow::{ResourceKind, RunStatus, Workflow, WorkflowDocument};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Run declarative compute workflows
#[derive(Parser)]
#[command(name = "cloudflow", version)]
#[command(about = "Create and clean up compute resources from workflow files", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow file and print its execution levels
    Validate {
        /// Workflow file (YAML or JSON)
        file: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a workflow without calling the compute API
    DryRun {
        /// Workflow file (YAML or JSON)
        file: PathBuf,

        /// Simulated latency of every API call, in milliseconds
        #[arg(long, default_value = "0")]
        latency_ms: u64,

        /// Keep tracked resources instead of deleting them at the end
        #[arg(long)]
        no_cleanup: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Validate { file, json } => run_validate(cli.config.as_deref(), &file, json),
        Commands::DryRun {
            file,
            latency_ms,
            no_cleanup,
        } => run_dry_run(cli.config.as_deref(), &file, latency_ms, no_cleanup).await,
    };

    match result {
        Ok(RunStatus::Succeeded) => {}
        Ok(RunStatus::Cancelled) => std::process::exit(130),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run_validate(config: Option<&Path>, file: &Path, json: bool) -> Result<RunStatus> {
    let config = EngineConfig::load(config)?;
    let document = WorkflowDocument::load(file)?;
    let workflow = Workflow::from_document(document, &config, Arc::new(DryRunClient::new()))?;
    workflow.validate()?;

    let levels = workflow.levels();
    if json {
        let report = serde_json::json!({
            "name": workflow.context().name(),
            "project": workflow.context().project(),
            "zone": workflow.context().zone(),
            "levels": levels,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Workflow {:?} is valid", workflow.context().name());
        for (depth, steps) in levels.iter().enumerate() {
            println!("  level {}: {}", depth, steps.join(", "));
        }
    }
    Ok(RunStatus::Succeeded)
}

async fn run_dry_run(
    config: Option<&Path>,
    file: &Path,
    latency_ms: u64,
    no_cleanup: bool,
) -> Result<RunStatus> {
    let mut config = EngineConfig::load(config)?;
    if no_cleanup {
        config.cleanup = false;
    }

    let document = WorkflowDocument::load(file)?;
    let client = DryRunClient::new().with_latency(Duration::from_millis(latency_ms));
    let workflow = Workflow::from_document(document, &config, Arc::new(client))?;

    let token = workflow.context().cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling workflow");
            token.cancel();
        }
    });

    let result = workflow.run().await;
    print_resources(&workflow);

    let status = result?;
    match status {
        RunStatus::Succeeded => println!("Workflow {:?} succeeded", workflow.context().name()),
        RunStatus::Cancelled => println!("Workflow {:?} was cancelled", workflow.context().name()),
    }
    Ok(status)
}

fn print_resources(workflow: &Workflow) {
    let context = workflow.context();
    println!("Run {} of {:?}", context.run_id(), context.name());
    for kind in [ResourceKind::Disk, ResourceKind::Image, ResourceKind::Instance] {
        let resources = context.registry(kind).snapshot();
        if resources.is_empty() {
            continue;
        }
        println!("  {kind}s:");
        for resource in resources {
            let status = if resource.deleted {
                "deleted"
            } else if resource.no_cleanup {
                "kept"
            } else {
                "present"
            };
            println!(
                "    {} -> {} ({}, created {})",
                resource.logical_name,
                resource.link(),
                status,
                resource.created_at.format("%H:%M:%S%.3f")
            );
        }
    }
}
