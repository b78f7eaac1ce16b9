//! ECS task metadata endpoint (v4) lookup.

use fanout_core::reporter::parse_task_arn;

pub const ENV_METADATA_URI: &str = "ECS_CONTAINER_METADATA_URI_V4";
pub const ENV_METADATA_URI_LEGACY: &str = "ECS_CONTAINER_METADATA_URI";

/// Base metadata URI injected by the ECS agent, preferring the v4 variable.
pub fn metadata_base_uri(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    [ENV_METADATA_URI, ENV_METADATA_URI_LEGACY]
        .into_iter()
        .filter_map(&lookup)
        .map(|uri| uri.trim().trim_end_matches('/').to_string())
        .find(|uri| !uri.is_empty())
}

pub fn task_metadata_url(base_uri: &str) -> String {
    format!("{}/task", base_uri.trim_end_matches('/'))
}

pub async fn fetch_task_arn(client: &reqwest::Client, base_uri: &str) -> Result<String, String> {
    let url = task_metadata_url(base_uri);
    let response = client
        .get(&url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|error| format!("failed to query task metadata at {url}: {error}"))?;
    let body = response
        .text()
        .await
        .map_err(|error| format!("failed to read task metadata body: {error}"))?;
    parse_task_arn(&body).map_err(|error| error.message().to_string())
}
