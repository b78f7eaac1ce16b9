//! Deployment configuration read from plain environment values.
//!
//! Every name has a default so a bare Lambda still starts; blank values are
//! treated as unset.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::contract::ValidationError;

pub const ENV_REGION: &str = "region";
pub const ENV_SUMMARY_TABLE: &str = "workflow_summary_ddb_table_name";
pub const ENV_SUMMARY_PARTITION_KEY: &str = "workflow_summary_hash_key";
pub const ENV_SUMMARY_SORT_KEY: &str = "workflow_summary_range_key";
pub const ENV_DETAILS_TABLE: &str = "workflow_details_ddb_table_name";
pub const ENV_DETAILS_PARTITION_KEY: &str = "workflow_details_hash_key";
pub const ENV_DETAILS_SORT_KEY: &str = "workflow_details_range_key";
pub const ENV_LAUNCH_MAX_CONCURRENCY: &str = "launch_max_concurrency";
pub const ENV_POLL_WAIT_SECONDS: &str = "poll_wait_seconds";

// Set on each launched container in addition to the store settings above.
pub const ENV_WORKFLOW_NAME: &str = "workflow_name";
pub const ENV_WORKFLOW_RUN_ID: &str = "workflow_run_id";
pub const ENV_TASK_NAME: &str = "task_name";
pub const ENV_SOURCE_LOCATION: &str = "source_location";
pub const ENV_TRANSFORM_PARAMS: &str = "transform_params";

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SUMMARY_TABLE: &str = "workflow_summary";
pub const DEFAULT_SUMMARY_PARTITION_KEY: &str = "workflow_name";
pub const DEFAULT_SUMMARY_SORT_KEY: &str = "workflow_run_id";
pub const DEFAULT_DETAILS_TABLE: &str = "workflow_details";
pub const DEFAULT_DETAILS_PARTITION_KEY: &str = "workflow_run_id";
pub const DEFAULT_DETAILS_SORT_KEY: &str = "ecs_task_id";
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;
pub const DEFAULT_POLL_WAIT_SECONDS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub table_name: String,
    pub partition_key: String,
    pub sort_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub region: String,
    pub summary: TableConfig,
    pub details: TableConfig,
}

impl StoreConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ValidationError> {
        let value = |name: &str, default: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let config = Self {
            region: value(ENV_REGION, DEFAULT_REGION),
            summary: TableConfig {
                table_name: value(ENV_SUMMARY_TABLE, DEFAULT_SUMMARY_TABLE),
                partition_key: value(ENV_SUMMARY_PARTITION_KEY, DEFAULT_SUMMARY_PARTITION_KEY),
                sort_key: value(ENV_SUMMARY_SORT_KEY, DEFAULT_SUMMARY_SORT_KEY),
            },
            details: TableConfig {
                table_name: value(ENV_DETAILS_TABLE, DEFAULT_DETAILS_TABLE),
                partition_key: value(ENV_DETAILS_PARTITION_KEY, DEFAULT_DETAILS_PARTITION_KEY),
                sort_key: value(ENV_DETAILS_SORT_KEY, DEFAULT_DETAILS_SORT_KEY),
            },
        };

        for (label, table) in [("summary", &config.summary), ("details", &config.details)] {
            if table.partition_key == table.sort_key {
                return Err(ValidationError::new(format!(
                    "{label} table partition and sort keys must differ (both '{}')",
                    table.sort_key
                )));
            }
        }

        Ok(config)
    }

    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Settings a work unit needs to report its own status.
    pub fn worker_environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ENV_REGION.to_string(), self.region.clone()),
            (ENV_DETAILS_TABLE.to_string(), self.details.table_name.clone()),
            (
                ENV_DETAILS_PARTITION_KEY.to_string(),
                self.details.partition_key.clone(),
            ),
            (ENV_DETAILS_SORT_KEY.to_string(), self.details.sort_key.clone()),
        ])
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            summary: TableConfig {
                table_name: DEFAULT_SUMMARY_TABLE.to_string(),
                partition_key: DEFAULT_SUMMARY_PARTITION_KEY.to_string(),
                sort_key: DEFAULT_SUMMARY_SORT_KEY.to_string(),
            },
            details: TableConfig {
                table_name: DEFAULT_DETAILS_TABLE.to_string(),
                partition_key: DEFAULT_DETAILS_PARTITION_KEY.to_string(),
                sort_key: DEFAULT_DETAILS_SORT_KEY.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub store: StoreConfig,
    pub max_concurrency: usize,
    pub poll_wait: Duration,
}

impl RuntimeConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ValidationError> {
        let store = StoreConfig::from_lookup(&lookup)?;
        let max_concurrency = parse_positive(
            ENV_LAUNCH_MAX_CONCURRENCY,
            lookup(ENV_LAUNCH_MAX_CONCURRENCY),
            DEFAULT_MAX_CONCURRENCY as u64,
        )? as usize;
        let poll_wait_seconds = parse_positive(
            ENV_POLL_WAIT_SECONDS,
            lookup(ENV_POLL_WAIT_SECONDS),
            DEFAULT_POLL_WAIT_SECONDS,
        )?;

        Ok(Self {
            store,
            max_concurrency,
            poll_wait: Duration::from_secs(poll_wait_seconds),
        })
    }

    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

fn parse_positive(name: &str, raw: Option<String>, default: u64) -> Result<u64, ValidationError> {
    let Some(raw) = raw.map(|value| value.trim().to_string()).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => Err(ValidationError::new(format!(
            "{name} must be a positive integer, got '{raw}'"
        ))),
        Ok(value) => Ok(value),
    }
}
