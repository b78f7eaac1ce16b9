use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use fanout_core::checkpoint::FileCheckpointStore;
use fanout_core::config::RuntimeConfig;
use fanout_core::error::FanoutError;
use fanout_core::logging::{log_error, log_info};
use fanout_core::orchestrator::{
    Orchestrator, OrchestratorConfig, RunReport, SystemClock, ThreadSleeper,
};
use fanout_lambda::adapters::dynamodb::DynamoDbStatusStore;
use fanout_lambda::adapters::ecs::EcsTaskSubmitter;
use fanout_lambda::handlers::launcher::decode_launch_request;
use serde_json::json;

const COMPONENT: &str = "fanout_orchestrator";

#[derive(Parser)]
#[command(
    name = "fanout_orchestrator",
    about = "Launch a batch of ECS tasks and poll until every task finishes"
)]
struct Cli {
    /// Checkpoint file holding the run state between steps
    #[arg(long, env = "FANOUT_CHECKPOINT", default_value = "fanout-checkpoint.json")]
    checkpoint: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run from a launch request JSON file
    Start {
        /// Path to the launch request
        #[arg(long)]
        request: PathBuf,
    },
    /// Continue the run recorded in the checkpoint file
    Resume,
}

/// Why a run ended without a report, plus any backend ids it left running.
#[derive(Debug)]
struct RunFailure {
    message: String,
    started_task_ids: Vec<String>,
}

impl From<String> for RunFailure {
    fn from(message: String) -> Self {
        Self {
            message,
            started_task_ids: Vec::new(),
        }
    }
}

impl From<FanoutError> for RunFailure {
    fn from(error: FanoutError) -> Self {
        Self {
            message: error.caller_message(),
            started_task_ids: error
                .partial_task_ids()
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
        }
    }
}

fn run(cli: Cli, handle: tokio::runtime::Handle) -> Result<RunReport, RunFailure> {
    let config = RuntimeConfig::from_env().map_err(|error| error.to_string())?;
    let aws_config = handle.block_on(
        aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.store.region.clone()))
            .load(),
    );
    let store = DynamoDbStatusStore::new(
        aws_sdk_dynamodb::Client::new(&aws_config),
        &config.store,
        handle.clone(),
    );
    let submitter = EcsTaskSubmitter::new(aws_sdk_ecs::Client::new(&aws_config), handle);
    let checkpoints = FileCheckpointStore::new(cli.checkpoint);
    let orchestrator = Orchestrator::new(
        &submitter,
        &store,
        &checkpoints,
        &SystemClock,
        &ThreadSleeper,
        OrchestratorConfig::from_runtime(&config),
    );

    let result = match cli.command {
        Commands::Start { request } => {
            let raw = fs::read_to_string(&request).map_err(|error| {
                format!("failed to read launch request '{}': {error}", request.display())
            })?;
            let event = serde_json::from_str(&raw)
                .map_err(|error| format!("launch request is not valid JSON: {error}"))?;
            decode_launch_request(event).and_then(|request| orchestrator.start(request))
        }
        Commands::Resume => orchestrator.resume(),
    };
    result.map_err(RunFailure::from)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let handle = tokio::runtime::Handle::current();

    let outcome = tokio::task::spawn_blocking(move || run(cli, handle))
        .await
        .map_err(|error| RunFailure::from(format!("orchestrator thread failed: {error}")))
        .and_then(|result| result);

    match outcome {
        Ok(report) => {
            log_info(
                COMPONENT,
                "run_report",
                json!({
                    "workflow_name": report.payload.workflow_name,
                    "run_id": report.payload.run_id,
                    "task_count": report.payload.task_count(),
                    "completed_tasks": report.tally.completed,
                    "failed_tasks": report.tally.failed,
                    "polls": report.polls,
                    "summary_status": report.summary.as_ref().map(|s| s.status.as_str()),
                }),
            );
            ExitCode::SUCCESS
        }
        Err(failure) => {
            log_error(
                COMPONENT,
                "run_failed",
                json!({
                    "error": failure.message,
                    "started_task_ids": failure.started_task_ids,
                }),
            );
            ExitCode::FAILURE
        }
    }
}
