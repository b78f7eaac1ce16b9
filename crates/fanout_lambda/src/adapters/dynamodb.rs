//! DynamoDB-backed [`StatusStore`].
//!
//! Two tables, both with configurable key attribute names:
//!
//! | Table        | Partition key           | Sort key                 |
//! |--------------|-------------------------|--------------------------|
//! | Run summary  | workflow name (S)       | run id, epoch millis (N) |
//! | Task detail  | run id (N)              | backend task ARN (S)     |
//!
//! Summary rows carry `spec_snapshot`, `task_count`, `status`,
//! `completed_tasks`, `failed_tasks`, `running_tasks`, `start_time` and
//! `update_time`. Detail rows carry `task_name`, `status`, `start_time`,
//! `update_time` and `exec_time_in_seconds`.
//!
//! Reads are strongly consistent. Updates use `UpdateItem` with `SET`
//! expressions, so a missing row is created rather than rejected.

use std::collections::HashMap;
use std::future::Future;

use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use fanout_core::config::{StoreConfig, TableConfig};
use fanout_core::records::{
    DetailUpdate, RunKey, RunStatus, RunSummary, SummaryUpdate, TaskDetail, TaskKey,
};
use fanout_core::store::StatusStore;
use tokio::runtime::Handle;

pub const ATTR_SPEC_SNAPSHOT: &str = "spec_snapshot";
pub const ATTR_TASK_COUNT: &str = "task_count";
pub const ATTR_STATUS: &str = "status";
pub const ATTR_COMPLETED_TASKS: &str = "completed_tasks";
pub const ATTR_FAILED_TASKS: &str = "failed_tasks";
pub const ATTR_RUNNING_TASKS: &str = "running_tasks";
pub const ATTR_START_TIME: &str = "start_time";
pub const ATTR_UPDATE_TIME: &str = "update_time";
pub const ATTR_TASK_NAME: &str = "task_name";
pub const ATTR_EXEC_TIME: &str = "exec_time_in_seconds";

type Item = HashMap<String, AttributeValue>;

/// `UpdateItem` parameters: expression, attribute names, attribute values.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSpec {
    pub expression: String,
    pub names: HashMap<String, String>,
    pub values: Item,
}

pub struct DynamoDbStatusStore {
    client: Client,
    handle: Handle,
    summary: TableConfig,
    details: TableConfig,
}

impl DynamoDbStatusStore {
    /// `handle` must belong to a multi-threaded runtime; calls block on it,
    /// so the store is usable from rayon workers as well as runtime threads.
    pub fn new(client: Client, config: &StoreConfig, handle: Handle) -> Self {
        Self {
            client,
            handle,
            summary: config.summary.clone(),
            details: config.details.clone(),
        }
    }

    fn block_on<T>(&self, future: impl Future<Output = Result<T, String>>) -> Result<T, String> {
        tokio::task::block_in_place(|| self.handle.block_on(future))
    }

    fn summary_key(&self, key: &RunKey) -> Item {
        HashMap::from([
            (
                self.summary.partition_key.clone(),
                AttributeValue::S(key.workflow_name.clone()),
            ),
            (
                self.summary.sort_key.clone(),
                AttributeValue::N(key.run_id.to_string()),
            ),
        ])
    }

    fn detail_key(&self, key: &TaskKey) -> Item {
        HashMap::from([
            (
                self.details.partition_key.clone(),
                AttributeValue::N(key.run_id.to_string()),
            ),
            (
                self.details.sort_key.clone(),
                AttributeValue::S(key.task_id.clone()),
            ),
        ])
    }

    fn update_item(&self, table: &str, key: Item, spec: UpdateSpec) -> Result<(), String> {
        let client = self.client.clone();
        let table_name = table.to_string();
        self.block_on(async move {
            client
                .update_item()
                .table_name(&table_name)
                .set_key(Some(key))
                .update_expression(spec.expression)
                .set_expression_attribute_names(Some(spec.names))
                .set_expression_attribute_values(Some(spec.values))
                .send()
                .await
                .map(|_| ())
                .map_err(|error| sdk_error("UpdateItem", &table_name, error))
        })
    }

    fn put_item(&self, table: &str, item: Item) -> Result<(), String> {
        let client = self.client.clone();
        let table_name = table.to_string();
        self.block_on(async move {
            client
                .put_item()
                .table_name(&table_name)
                .set_item(Some(item))
                .send()
                .await
                .map(|_| ())
                .map_err(|error| sdk_error("PutItem", &table_name, error))
        })
    }
}

impl StatusStore for DynamoDbStatusStore {
    fn put_summary(&self, summary: &RunSummary) -> Result<(), String> {
        self.put_item(&self.summary.table_name, summary_item(summary, &self.summary))
    }

    fn put_detail(&self, detail: &TaskDetail) -> Result<(), String> {
        self.put_item(&self.details.table_name, detail_item(detail, &self.details))
    }

    fn update_summary(&self, key: &RunKey, update: &SummaryUpdate) -> Result<(), String> {
        self.update_item(
            &self.summary.table_name,
            self.summary_key(key),
            summary_update_spec(update),
        )
    }

    fn update_detail(&self, key: &TaskKey, update: &DetailUpdate) -> Result<(), String> {
        self.update_item(
            &self.details.table_name,
            self.detail_key(key),
            detail_update_spec(update),
        )
    }

    fn query_details_by_run(&self, run_id: i64) -> Result<Vec<TaskDetail>, String> {
        let client = self.client.clone();
        let table = self.details.clone();
        self.block_on(async move {
            let mut rows = Vec::new();
            let mut exclusive_start_key = None;

            loop {
                let mut query = client
                    .query()
                    .table_name(&table.table_name)
                    .consistent_read(true)
                    .key_condition_expression("#pk = :pk")
                    .expression_attribute_names("#pk", &table.partition_key)
                    .expression_attribute_values(":pk", AttributeValue::N(run_id.to_string()));

                if let Some(start_key) = exclusive_start_key.take() {
                    query = query.set_exclusive_start_key(Some(start_key));
                }

                let output = query
                    .send()
                    .await
                    .map_err(|error| sdk_error("Query", &table.table_name, error))?;

                for item in output.items() {
                    rows.push(detail_from_item(item, &table)?);
                }

                match output.last_evaluated_key() {
                    Some(last_key) if !last_key.is_empty() => {
                        exclusive_start_key = Some(last_key.clone());
                    }
                    _ => break,
                }
            }

            Ok(rows)
        })
    }

    fn get_summary(&self, key: &RunKey) -> Result<Option<RunSummary>, String> {
        let client = self.client.clone();
        let table = self.summary.clone();
        let item_key = self.summary_key(key);
        self.block_on(async move {
            let output = client
                .get_item()
                .table_name(&table.table_name)
                .consistent_read(true)
                .set_key(Some(item_key))
                .send()
                .await
                .map_err(|error| sdk_error("GetItem", &table.table_name, error))?;
            output
                .item()
                .map(|item| summary_from_item(item, &table))
                .transpose()
        })
    }
}

fn sdk_error(operation: &str, table: &str, error: impl std::error::Error) -> String {
    format!(
        "DynamoDB {operation} on table '{table}' failed: {}",
        DisplayErrorContext(error)
    )
}

pub fn summary_item(summary: &RunSummary, table: &TableConfig) -> Item {
    HashMap::from([
        (
            table.partition_key.clone(),
            AttributeValue::S(summary.workflow_name.clone()),
        ),
        (
            table.sort_key.clone(),
            AttributeValue::N(summary.run_id.to_string()),
        ),
        (
            ATTR_SPEC_SNAPSHOT.to_string(),
            AttributeValue::S(summary.spec_snapshot.clone()),
        ),
        (
            ATTR_TASK_COUNT.to_string(),
            AttributeValue::N(summary.task_count.to_string()),
        ),
        (
            ATTR_STATUS.to_string(),
            AttributeValue::S(summary.status.as_str().to_string()),
        ),
        (
            ATTR_COMPLETED_TASKS.to_string(),
            AttributeValue::N(summary.completed_count.to_string()),
        ),
        (
            ATTR_FAILED_TASKS.to_string(),
            AttributeValue::N(summary.failed_count.to_string()),
        ),
        (
            ATTR_RUNNING_TASKS.to_string(),
            AttributeValue::N(summary.running_count.to_string()),
        ),
        (
            ATTR_START_TIME.to_string(),
            AttributeValue::S(summary.start_time.clone()),
        ),
        (
            ATTR_UPDATE_TIME.to_string(),
            AttributeValue::S(summary.update_time.clone()),
        ),
    ])
}

pub fn summary_from_item(item: &Item, table: &TableConfig) -> Result<RunSummary, String> {
    let status_raw = string_attr(item, ATTR_STATUS).unwrap_or_default();
    let status = RunStatus::parse(&status_raw)
        .ok_or_else(|| format!("summary row has unknown status '{status_raw}'"))?;

    Ok(RunSummary {
        workflow_name: required_string(item, &table.partition_key)?,
        run_id: required_number(item, &table.sort_key)?,
        spec_snapshot: string_attr(item, ATTR_SPEC_SNAPSHOT).unwrap_or_default(),
        task_count: number_attr(item, ATTR_TASK_COUNT)?.unwrap_or(0),
        status,
        completed_count: number_attr(item, ATTR_COMPLETED_TASKS)?.unwrap_or(0),
        failed_count: number_attr(item, ATTR_FAILED_TASKS)?.unwrap_or(0),
        running_count: number_attr(item, ATTR_RUNNING_TASKS)?.unwrap_or(0),
        start_time: string_attr(item, ATTR_START_TIME).unwrap_or_default(),
        update_time: string_attr(item, ATTR_UPDATE_TIME).unwrap_or_default(),
    })
}

pub fn detail_item(detail: &TaskDetail, table: &TableConfig) -> Item {
    let mut item = HashMap::from([
        (
            table.partition_key.clone(),
            AttributeValue::N(detail.run_id.to_string()),
        ),
        (
            table.sort_key.clone(),
            AttributeValue::S(detail.task_id.clone()),
        ),
        (
            ATTR_TASK_NAME.to_string(),
            AttributeValue::S(detail.task_name.clone()),
        ),
        (ATTR_STATUS.to_string(), AttributeValue::S(detail.status.clone())),
        (
            ATTR_START_TIME.to_string(),
            AttributeValue::S(detail.start_time.clone()),
        ),
        (
            ATTR_UPDATE_TIME.to_string(),
            AttributeValue::S(detail.update_time.clone()),
        ),
    ]);
    if let Some(seconds) = detail.exec_duration_seconds {
        item.insert(ATTR_EXEC_TIME.to_string(), AttributeValue::N(seconds.to_string()));
    }
    item
}

/// Rows written by a worker before the launcher may lack everything but the
/// key and status; missing strings come back empty.
pub fn detail_from_item(item: &Item, table: &TableConfig) -> Result<TaskDetail, String> {
    Ok(TaskDetail {
        run_id: required_number(item, &table.partition_key)?,
        task_id: required_string(item, &table.sort_key)?,
        task_name: string_attr(item, ATTR_TASK_NAME).unwrap_or_default(),
        status: string_attr(item, ATTR_STATUS).unwrap_or_default(),
        start_time: string_attr(item, ATTR_START_TIME).unwrap_or_default(),
        update_time: string_attr(item, ATTR_UPDATE_TIME).unwrap_or_default(),
        exec_duration_seconds: number_attr(item, ATTR_EXEC_TIME)?,
    })
}

pub fn summary_update_spec(update: &SummaryUpdate) -> UpdateSpec {
    UpdateSpec {
        expression: format!(
            "SET #status = :status, {ATTR_COMPLETED_TASKS} = :completed, \
             {ATTR_FAILED_TASKS} = :failed, {ATTR_RUNNING_TASKS} = :running, \
             {ATTR_UPDATE_TIME} = :update_time"
        ),
        names: HashMap::from([("#status".to_string(), ATTR_STATUS.to_string())]),
        values: HashMap::from([
            (
                ":status".to_string(),
                AttributeValue::S(update.status.as_str().to_string()),
            ),
            (
                ":completed".to_string(),
                AttributeValue::N(update.completed_count.to_string()),
            ),
            (
                ":failed".to_string(),
                AttributeValue::N(update.failed_count.to_string()),
            ),
            (
                ":running".to_string(),
                AttributeValue::N(update.running_count.to_string()),
            ),
            (
                ":update_time".to_string(),
                AttributeValue::S(update.update_time.clone()),
            ),
        ]),
    }
}

pub fn detail_update_spec(update: &DetailUpdate) -> UpdateSpec {
    let mut expression = format!("SET #status = :status, {ATTR_UPDATE_TIME} = :update_time");
    let mut values = HashMap::from([
        (
            ":status".to_string(),
            AttributeValue::S(update.status.as_str().to_string()),
        ),
        (
            ":update_time".to_string(),
            AttributeValue::S(update.update_time.clone()),
        ),
    ]);
    if let Some(seconds) = update.exec_duration_seconds {
        expression.push_str(&format!(", {ATTR_EXEC_TIME} = :exec_time"));
        values.insert(":exec_time".to_string(), AttributeValue::N(seconds.to_string()));
    }
    UpdateSpec {
        expression,
        names: HashMap::from([("#status".to_string(), ATTR_STATUS.to_string())]),
        values,
    }
}

fn string_attr(item: &Item, name: &str) -> Option<String> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .cloned()
}

fn required_string(item: &Item, name: &str) -> Result<String, String> {
    string_attr(item, name).ok_or_else(|| format!("missing or non-string attribute '{name}'"))
}

fn number_attr<T: std::str::FromStr>(item: &Item, name: &str) -> Result<Option<T>, String> {
    let Some(value) = item.get(name) else {
        return Ok(None);
    };
    let raw = value
        .as_n()
        .map_err(|_| format!("attribute '{name}' must be a number"))?;
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| format!("attribute '{name}' has invalid number '{raw}'"))
}

fn required_number<T: std::str::FromStr>(item: &Item, name: &str) -> Result<T, String> {
    number_attr(item, name)?.ok_or_else(|| format!("missing numeric attribute '{name}'"))
}
