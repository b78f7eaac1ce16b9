use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use fanout_core::config::{StoreConfig, ENV_TASK_NAME, ENV_WORKFLOW_RUN_ID};
use fanout_core::logging::{log_error, log_info};
use fanout_core::reporter::{report_task_outcome, TaskOutcome};
use fanout_lambda::adapters::dynamodb::DynamoDbStatusStore;
use fanout_lambda::adapters::metadata::{fetch_task_arn, metadata_base_uri};
use serde_json::json;

const COMPONENT: &str = "task_worker";

/// Runs one work unit inside its container and records the outcome on the
/// unit's detail row.
#[derive(Parser)]
#[command(name = "task_worker")]
struct Cli {
    /// Task ARN to report under; resolved from the ECS metadata endpoint when unset
    #[arg(long, env = "ECS_TASK_ARN")]
    task_arn: Option<String>,
    /// Run id of the batch this unit belongs to
    #[arg(long, env = ENV_WORKFLOW_RUN_ID)]
    run_id: i64,
    /// Command that performs the work
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

async fn resolve_task_arn(explicit: Option<String>) -> Result<String, String> {
    if let Some(arn) = explicit.filter(|arn| !arn.trim().is_empty()) {
        return Ok(arn);
    }
    let base_uri = metadata_base_uri(|name| std::env::var(name).ok())
        .ok_or_else(|| "ECS task metadata URI is not set; pass --task-arn".to_string())?;
    fetch_task_arn(&reqwest::Client::new(), &base_uri).await
}

async fn run(cli: Cli) -> Result<bool, String> {
    let config = StoreConfig::from_env().map_err(|error| error.to_string())?;
    let task_arn = resolve_task_arn(cli.task_arn).await?;
    let task_name = std::env::var(ENV_TASK_NAME).unwrap_or_default();

    let (program, args) = cli
        .command
        .split_first()
        .ok_or_else(|| "no command given".to_string())?;
    let started_at = Utc::now();
    log_info(
        COMPONENT,
        "work_started",
        json!({"run_id": cli.run_id, "task_id": task_arn, "task_name": task_name, "program": program}),
    );
    let success = match tokio::process::Command::new(program).args(args).status().await {
        Ok(status) => status.success(),
        Err(error) => {
            log_error(
                COMPONENT,
                "spawn_failed",
                json!({"program": program, "error": error.to_string()}),
            );
            false
        }
    };
    let outcome = TaskOutcome::from_exit(success, started_at, Utc::now());

    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()))
        .load()
        .await;
    let store = DynamoDbStatusStore::new(
        aws_sdk_dynamodb::Client::new(&aws_config),
        &config,
        tokio::runtime::Handle::current(),
    );
    report_task_outcome(&store, cli.run_id, &task_arn, &outcome)
        .map_err(|error| error.to_string())?;
    Ok(success)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(message) => {
            log_error(COMPONENT, "report_failed", json!({"error": message}));
            ExitCode::FAILURE
        }
    }
}
