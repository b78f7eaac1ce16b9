use std::collections::BTreeMap;

use fanout_core::contract::{LaunchRequest, RunTarget, WorkUnitSpec};
use serde_json::json;

pub const WORKFLOW: &str = "nightly-copy";

pub fn run_target() -> RunTarget {
    RunTarget {
        cluster_name: "batch-cluster".to_string(),
        task_definition: "copy-task:3".to_string(),
        container_name: "worker".to_string(),
        subnet_ids: vec!["subnet-a".to_string()],
        security_group_ids: vec!["sg-1".to_string()],
        subnet_id_literal: Some("subnet-b,subnet-a".to_string()),
        security_group_literal: None,
        separator: None,
        environment: BTreeMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]),
    }
}

pub fn launch_request(task_names: &[&str]) -> LaunchRequest {
    LaunchRequest {
        workflow_name: WORKFLOW.to_string(),
        run_target: run_target(),
        task_list: task_names
            .iter()
            .map(|name| WorkUnitSpec {
                task_name: name.to_string(),
                source_location: format!("s3://input-bucket/{name}.csv"),
                transform_params: BTreeMap::from([("delimiter".to_string(), json!(","))]),
            })
            .collect(),
    }
}
