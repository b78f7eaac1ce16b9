use chrono::Utc;
use fanout_core::config::RuntimeConfig;
use fanout_core::error::FanoutError;
use fanout_core::launcher::LaunchOptions;
use fanout_core::logging::log_error;
use fanout_lambda::adapters::dynamodb::DynamoDbStatusStore;
use fanout_lambda::adapters::ecs::EcsTaskSubmitter;
use fanout_lambda::handlers::launcher::handle_launch_event;
use fanout_lambda::handlers::monitor::handle_monitor_event;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Value};

const COMPONENT: &str = "fanout_runtime";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Launch,
    Monitor,
}

fn classify_event(event: &Value) -> EventKind {
    let Some(object) = event.as_object() else {
        return EventKind::Launch;
    };
    if ["iterator", "ecs_task_ids", "ecsTaskArns"]
        .iter()
        .any(|key| object.contains_key(*key))
    {
        EventKind::Monitor
    } else {
        EventKind::Launch
    }
}

async fn handle_request(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let config = RuntimeConfig::from_env()
        .map_err(|error| Error::from(format!("invalid runtime configuration: {error}")))?;
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.store.region.clone()))
        .load()
        .await;
    let handle = tokio::runtime::Handle::current();
    let store = DynamoDbStatusStore::new(
        aws_sdk_dynamodb::Client::new(&aws_config),
        &config.store,
        handle.clone(),
    );
    let kind = classify_event(&event.payload);

    let result = tokio::task::block_in_place(|| match kind {
        EventKind::Launch => {
            let submitter = EcsTaskSubmitter::new(aws_sdk_ecs::Client::new(&aws_config), handle);
            let options = LaunchOptions::starting_at(Utc::now())
                .with_max_concurrency(config.max_concurrency)
                .with_worker_environment(config.store.worker_environment());
            handle_launch_event(event.payload, &submitter, &store, &options)
        }
        EventKind::Monitor => {
            handle_monitor_event(event.payload, &store, &Utc::now().to_rfc3339())
                .map(|outcome| outcome.payload)
        }
    });

    let payload = result.map_err(|error| {
        log_error(
            COMPONENT,
            "request_failed",
            json!({
                "kind": format!("{kind:?}"),
                "error_code": error.error_code(),
                "error": error.to_string(),
                "started_task_ids": error.partial_task_ids(),
            }),
        );
        lambda_error(&error)
    })?;
    serde_json::to_value(payload)
        .map_err(|error| Error::from(format!("failed to serialize iterator payload: {error}")))
}

fn lambda_error(error: &FanoutError) -> Error {
    Error::from(error.caller_message())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_runtime::run(service_fn(handle_request)).await
}
