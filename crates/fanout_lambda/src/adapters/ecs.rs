//! ECS Fargate [`TaskSubmitter`].

use std::collections::BTreeMap;

use aws_sdk_ecs::error::DisplayErrorContext;
use aws_sdk_ecs::operation::run_task::RunTaskOutput;
use aws_sdk_ecs::types::{
    AwsVpcConfiguration, ContainerOverride, KeyValuePair, LaunchType, NetworkConfiguration,
    TaskOverride,
};
use aws_sdk_ecs::Client;
use fanout_core::contract::BackendTarget;
use fanout_core::launcher::{TaskSubmission, TaskSubmitter};
use tokio::runtime::Handle;

pub struct EcsTaskSubmitter {
    client: Client,
    handle: Handle,
}

impl EcsTaskSubmitter {
    pub fn new(client: Client, handle: Handle) -> Self {
        Self { client, handle }
    }
}

impl TaskSubmitter for EcsTaskSubmitter {
    fn submit_task(&self, submission: &TaskSubmission<'_>) -> Result<String, String> {
        let target = submission.target;
        let network = network_configuration(target)?;
        let overrides = task_overrides(&target.container_name, &submission.environment);
        let request = self
            .client
            .run_task()
            .cluster(&target.cluster_name)
            .task_definition(&target.task_definition)
            .launch_type(LaunchType::Fargate)
            .count(1)
            .started_by(started_by(submission.run_id))
            .network_configuration(network)
            .overrides(overrides);
        let task_name = submission.unit.task_name.clone();

        tokio::task::block_in_place(|| {
            self.handle.block_on(async move {
                let output = request.send().await.map_err(|error| {
                    format!(
                        "failed to run ECS task for '{task_name}': {}",
                        DisplayErrorContext(error)
                    )
                })?;
                started_task_arn(&output)
            })
        })
    }
}

/// ECS caps `startedBy` at 128 characters; run ids are far below that.
pub fn started_by(run_id: i64) -> String {
    format!("fanout-{run_id}")
}

pub fn network_configuration(target: &BackendTarget) -> Result<NetworkConfiguration, String> {
    let awsvpc = AwsVpcConfiguration::builder()
        .set_subnets(Some(target.subnet_ids.clone()))
        .set_security_groups(Some(target.security_group_ids.clone()))
        .build()
        .map_err(|error| format!("invalid awsvpc configuration: {error}"))?;
    Ok(NetworkConfiguration::builder()
        .awsvpc_configuration(awsvpc)
        .build())
}

pub fn task_overrides(container_name: &str, environment: &BTreeMap<String, String>) -> TaskOverride {
    let variables = environment
        .iter()
        .map(|(name, value)| KeyValuePair::builder().name(name).value(value).build())
        .collect();
    TaskOverride::builder()
        .container_overrides(
            ContainerOverride::builder()
                .name(container_name)
                .set_environment(Some(variables))
                .build(),
        )
        .build()
}

/// A `RunTask` call can succeed at the API level and still start nothing;
/// in that case ECS reports the reason in `failures`.
pub fn started_task_arn(output: &RunTaskOutput) -> Result<String, String> {
    if let Some(arn) = output
        .tasks()
        .iter()
        .find_map(|task| task.task_arn().filter(|arn| !arn.is_empty()))
    {
        return Ok(arn.to_string());
    }

    let reasons: Vec<String> = output
        .failures()
        .iter()
        .map(|failure| {
            let reason = failure.reason().unwrap_or("unknown reason");
            match failure.detail() {
                Some(detail) => format!("{reason} ({detail})"),
                None => reason.to_string(),
            }
        })
        .collect();
    if reasons.is_empty() {
        Err("ECS accepted the request but started no task".to_string())
    } else {
        Err(format!("ECS did not start the task: {}", reasons.join("; ")))
    }
}
