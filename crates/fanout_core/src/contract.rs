use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_ID_SEPARATOR: &str = ",";

pub type TransformParams = BTreeMap<String, Value>;

/// One unit of work as supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkUnitSpec {
    #[serde(alias = "taskName")]
    pub task_name: String,
    #[serde(alias = "sourceLocation")]
    pub source_location: String,
    #[serde(default, alias = "transformParams")]
    pub transform_params: TransformParams,
}

/// Execution backend parameters shared by every unit in a batch.
///
/// Subnets and security groups can be given either as lists or as a single
/// delimited literal (`subnet_id_literal` + `separator`); both forms are merged
/// by [`normalize_request`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunTarget {
    #[serde(alias = "clusterName")]
    pub cluster_name: String,
    #[serde(alias = "taskDefinition")]
    pub task_definition: String,
    #[serde(alias = "containerName")]
    pub container_name: String,
    #[serde(default, alias = "subnetIds")]
    pub subnet_ids: Vec<String>,
    #[serde(default, alias = "securityGroupIds")]
    pub security_group_ids: Vec<String>,
    #[serde(
        default,
        alias = "subnetIdLiteral",
        skip_serializing_if = "Option::is_none"
    )]
    pub subnet_id_literal: Option<String>,
    #[serde(
        default,
        alias = "securityGroupId",
        skip_serializing_if = "Option::is_none"
    )]
    pub security_group_literal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchRequest {
    #[serde(alias = "workflowName")]
    pub workflow_name: String,
    #[serde(alias = "runTarget")]
    pub run_target: RunTarget,
    #[serde(default, alias = "taskList")]
    pub task_list: Vec<WorkUnitSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendTarget {
    pub cluster_name: String,
    pub task_definition: String,
    pub container_name: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedLaunchRequest {
    pub workflow_name: String,
    pub target: BackendTarget,
    pub task_list: Vec<WorkUnitSpec>,
}

/// The record threaded through Launch → Poll → Wait → Poll.
///
/// `continue` is absent on the launcher's output and present on every
/// monitor output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IteratorPayload {
    #[serde(alias = "workflowName")]
    pub workflow_name: String,
    #[serde(alias = "workflowRunId")]
    pub run_id: i64,
    #[serde(rename = "ecs_task_ids", alias = "ecsTaskArns", default)]
    pub task_ids: Vec<String>,
    #[serde(
        rename = "continue",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub continue_polling: Option<bool>,
}

impl IteratorPayload {
    pub fn launched(workflow_name: impl Into<String>, run_id: i64, task_ids: Vec<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            run_id,
            task_ids,
            continue_polling: None,
        }
    }

    pub fn with_decision(mut self, continue_polling: bool) -> Self {
        self.continue_polling = Some(continue_polling);
        self
    }

    pub fn task_count(&self) -> usize {
        self.task_ids.len()
    }

    /// A payload that has not been polled yet is treated as still running.
    pub fn should_continue(&self) -> bool {
        self.continue_polling.unwrap_or(true)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workflow_name.trim().is_empty() {
            return Err(ValidationError::new("workflow_name cannot be empty"));
        }
        if self.run_id <= 0 {
            return Err(ValidationError::new("run_id must be a positive integer"));
        }
        if self.task_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ValidationError::new(
                "ecs_task_ids must not contain empty identifiers",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn normalize_request(
    payload: LaunchRequest,
) -> Result<NormalizedLaunchRequest, ValidationError> {
    let workflow_name = payload.workflow_name.trim().to_string();
    if workflow_name.is_empty() {
        return Err(ValidationError::new("workflow_name cannot be empty"));
    }

    let target = payload.run_target;
    let cluster_name = required_field("run_target.cluster_name", &target.cluster_name)?;
    let task_definition = required_field("run_target.task_definition", &target.task_definition)?;
    let container_name = required_field("run_target.container_name", &target.container_name)?;

    let separator = match target.separator.as_deref() {
        Some("") => {
            return Err(ValidationError::new(
                "run_target.separator cannot be empty",
            ));
        }
        Some(value) => value,
        None => DEFAULT_ID_SEPARATOR,
    };

    let subnet_ids = merge_ids(
        target.subnet_ids,
        target.subnet_id_literal.as_deref(),
        separator,
    );
    let security_group_ids = merge_ids(
        target.security_group_ids,
        target.security_group_literal.as_deref(),
        separator,
    );

    if target.environment.keys().any(|key| key.trim().is_empty()) {
        return Err(ValidationError::new(
            "run_target.environment keys must be non-empty strings",
        ));
    }

    let mut task_list = Vec::with_capacity(payload.task_list.len());
    for (index, unit) in payload.task_list.into_iter().enumerate() {
        let task_name = unit.task_name.trim().to_string();
        if task_name.is_empty() {
            return Err(ValidationError::new(format!(
                "task_list[{index}].task_name cannot be empty"
            )));
        }
        let source_location = unit.source_location.trim().to_string();
        if source_location.is_empty() {
            return Err(ValidationError::new(format!(
                "task_list[{index}] ('{task_name}') requires a source_location"
            )));
        }
        task_list.push(WorkUnitSpec {
            task_name,
            source_location,
            transform_params: unit.transform_params,
        });
    }

    Ok(NormalizedLaunchRequest {
        workflow_name,
        target: BackendTarget {
            cluster_name,
            task_definition,
            container_name,
            subnet_ids,
            security_group_ids,
            environment: target.environment,
        },
        task_list,
    })
}

/// Splits a delimited identifier literal, dropping blank tokens.
pub fn tokenize_ids(literal: &str, separator: &str) -> Vec<String> {
    literal
        .split(separator)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn stable_contract_json(value: impl Serialize) -> Result<String, ValidationError> {
    serde_json::to_string(&value)
        .map_err(|error| ValidationError::new(format!("contract value is not serializable: {error}")))
}

fn required_field(name: &str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(format!("{name} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

fn merge_ids(listed: Vec<String>, literal: Option<&str>, separator: &str) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    let tokens = literal
        .map(|value| tokenize_ids(value, separator))
        .unwrap_or_default();
    for id in listed
        .into_iter()
        .map(|id| id.trim().to_string())
        .chain(tokens)
    {
        if !id.is_empty() && !merged.contains(&id) {
            merged.push(id);
        }
    }
    merged
}
